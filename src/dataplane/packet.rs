//! Owned packet buffer with cached layer offsets.

use crate::protocol::ethernet::{self, Frame};
use crate::protocol::icmp::{IcmpPacket, IcmpPacketMut};
use crate::protocol::ipv4::{self, Ipv4Header};
use crate::protocol::ipv6::{self, Ipv6Header};
use crate::protocol::{icmpv6, EtherType, IpVersion};
use crate::{Error, Result};
use std::net::IpAddr;

/// Checksum handling applied to outgoing packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChecksumPolicy {
    /// Compute checksums at all.
    pub calculate: bool,
    /// Leave the IPv4 header checksum to the NIC.
    pub hw_offload: bool,
}

impl Default for ChecksumPolicy {
    fn default() -> Self {
        Self {
            calculate: true,
            hw_offload: false,
        }
    }
}

/// Offload requests carried with a packet to the transmit path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TxOffload {
    /// The NIC must fill in the IPv4 header checksum.
    pub ipv4_header: bool,
}

/// A received or generated Ethernet frame.
///
/// Layer offsets are filled in by `parse_l3` / `parse_l4` and reset whenever
/// the buffer is cloned.
#[derive(Debug)]
pub struct Packet {
    data: Vec<u8>,
    l3_offset: Option<usize>,
    l4: Option<(usize, usize)>,
    tx_offload: TxOffload,
}

impl Packet {
    /// Wraps a raw frame; no layer is parsed yet.
    pub fn from_frame(data: Vec<u8>) -> Self {
        Self {
            data,
            l3_offset: None,
            l4: None,
            tx_offload: TxOffload::default(),
        }
    }

    /// Full byte copy into a freshly allocated buffer.
    ///
    /// Fails only when the allocator cannot provide the buffer.
    pub fn try_clone(&self) -> Result<Packet> {
        let mut data = Vec::new();
        data.try_reserve_exact(self.data.len())
            .map_err(|_| Error::BufferExhausted {
                requested: self.data.len(),
            })?;
        data.extend_from_slice(&self.data);
        Ok(Packet::from_frame(data))
    }

    /// Parse the Ethernet header (802.1Q aware) and validate the IP header.
    pub fn parse_l3(&mut self) -> Result<IpVersion> {
        let frame = Frame::parse(&self.data)?;
        let offset = frame.header_len();

        let version = match EtherType::from_u16(frame.ethertype()) {
            Some(EtherType::Ipv4) => {
                Ipv4Header::parse(frame.payload())?;
                IpVersion::V4
            }
            Some(EtherType::Ipv6) => {
                Ipv6Header::parse(frame.payload())?;
                IpVersion::V6
            }
            _ => {
                return Err(Error::Parse(format!(
                    "unsupported ethertype 0x{:04x}",
                    frame.ethertype()
                )));
            }
        };

        self.l3_offset = Some(offset);
        self.l4 = None;
        Ok(version)
    }

    /// Locate the transport header, returning its protocol number.
    ///
    /// IPv6 extension headers are skipped. The transport bytes end where the
    /// IP length fields say, not at the end of the frame; a length field
    /// claiming more than the captured bytes is a parse error.
    pub fn parse_l4(&mut self, version: IpVersion) -> Result<u8> {
        let l3 = self.l3_offset()?;
        let buffer = &self.data[l3..];

        let (protocol, start, end) = match version {
            IpVersion::V4 => {
                let hdr = Ipv4Header::parse(buffer)?;
                let start = hdr.header_len();
                (hdr.protocol(), start, start + hdr.payload()?.len())
            }
            IpVersion::V6 => {
                let hdr = Ipv6Header::parse(buffer)?;
                let (protocol, start) = hdr.upper_layer()?;
                (protocol, start, ipv6::HEADER_SIZE + hdr.payload()?.len())
            }
        };

        if start > end {
            return Err(Error::Parse("transport header beyond IP payload".into()));
        }

        self.l4 = Some((l3 + start, l3 + end));
        Ok(protocol)
    }

    fn l3_offset(&self) -> Result<usize> {
        self.l3_offset
            .ok_or_else(|| Error::InvalidPacket("network layer not parsed".into()))
    }

    fn l4_range(&self) -> Result<(usize, usize)> {
        self.l4
            .ok_or_else(|| Error::InvalidPacket("transport layer not parsed".into()))
    }

    /// Ethernet view of the frame.
    pub fn frame(&self) -> Result<Frame<'_>> {
        Frame::parse(&self.data)
    }

    /// Network layer header and payload.
    pub fn l3_bytes(&self) -> Result<&[u8]> {
        Ok(&self.data[self.l3_offset()?..])
    }

    /// Transport header and payload.
    pub fn l4_bytes(&self) -> Result<&[u8]> {
        let (start, end) = self.l4_range()?;
        Ok(&self.data[start..end])
    }

    /// IP source address.
    pub fn src_addr(&self, version: IpVersion) -> Result<IpAddr> {
        let l3 = self.l3_bytes()?;
        Ok(match version {
            IpVersion::V4 => IpAddr::V4(Ipv4Header::parse(l3)?.src_addr()),
            IpVersion::V6 => IpAddr::V6(Ipv6Header::parse(l3)?.src_addr()),
        })
    }

    /// IP destination address.
    pub fn dst_addr(&self, version: IpVersion) -> Result<IpAddr> {
        let l3 = self.l3_bytes()?;
        Ok(match version {
            IpVersion::V4 => IpAddr::V4(Ipv4Header::parse(l3)?.dst_addr()),
            IpVersion::V6 => IpAddr::V6(Ipv6Header::parse(l3)?.dst_addr()),
        })
    }

    /// Swap Ethernet and IP source/destination so the packet heads back to its sender.
    pub fn swap_addrs(&mut self, version: IpVersion) -> Result<()> {
        let l3 = self.l3_offset()?;
        match version {
            IpVersion::V4 => {
                Ipv4Header::parse(&self.data[l3..])?;
                ipv4::swap_addrs(&mut self.data[l3..]);
            }
            IpVersion::V6 => {
                Ipv6Header::parse(&self.data[l3..])?;
                ipv6::swap_addrs(&mut self.data[l3..]);
            }
        }
        ethernet::swap_macs(&mut self.data);
        Ok(())
    }

    /// ICMP/ICMPv6 view of the transport bytes.
    pub fn icmp(&self) -> Result<IcmpPacket<'_>> {
        IcmpPacket::parse(self.l4_bytes()?)
    }

    /// Mutable ICMP/ICMPv6 view of the transport bytes.
    pub fn icmp_mut(&mut self) -> Result<IcmpPacketMut<'_>> {
        let (start, end) = self.l4_range()?;
        IcmpPacketMut::parse(&mut self.data[start..end])
    }

    /// Recompute the IP header and ICMP/ICMPv6 checksums under `policy`.
    pub fn set_icmp_checksum(&mut self, version: IpVersion, policy: ChecksumPolicy) -> Result<()> {
        if !policy.calculate {
            return Ok(());
        }

        let l3 = self.l3_offset()?;
        let (start, end) = self.l4_range()?;

        match version {
            IpVersion::V4 => {
                let header_len = Ipv4Header::parse(&self.data[l3..])?.header_len();
                if policy.hw_offload {
                    ipv4::clear_checksum(&mut self.data[l3..]);
                    self.tx_offload.ipv4_header = true;
                } else {
                    ipv4::update_checksum(&mut self.data[l3..], header_len);
                }
                self.icmp_mut()?.update_checksum();
            }
            IpVersion::V6 => {
                let hdr = Ipv6Header::parse(&self.data[l3..])?;
                let (src, dst) = (hdr.src_addr(), hdr.dst_addr());
                icmpv6::set_checksum(&mut self.data[start..end], &src, &dst);
            }
        }

        Ok(())
    }

    /// Offload work requested from the transmit path.
    pub fn tx_offload(&self) -> TxOffload {
        self.tx_offload
    }

    /// The whole frame.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Gives up the frame buffer.
    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    /// Frame length in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::protocol::ethernet::FrameBuilder;
    use crate::protocol::icmp::EchoRequestBuilder;
    use crate::protocol::ipv4::{Ipv4Builder, Protocol};
    use crate::protocol::ipv6::{Ipv6Builder, NextHeader};
    use crate::protocol::{MacAddr, VlanTag};
    use std::net::{Ipv4Addr, Ipv6Addr};

    pub(crate) const PEER_MAC: MacAddr = MacAddr([0x02, 0xaa, 0xbb, 0xcc, 0xdd, 0x01]);
    pub(crate) const PORT_MAC: MacAddr = MacAddr([0x02, 0x00, 0x00, 0x00, 0x00, 0x01]);

    pub(crate) fn ipv4_echo_frame(src: Ipv4Addr, dst: Ipv4Addr, icmp_type: u8, id: u16) -> Vec<u8> {
        let mut icmp = EchoRequestBuilder::new(id, 1)
            .payload(b"abcdefgh")
            .build_raw(icmp_type);
        let sum = crate::protocol::icmp::icmp_checksum(&icmp);
        icmp[2..4].copy_from_slice(&sum.to_be_bytes());

        let ip = Ipv4Builder::new()
            .protocol(Protocol::Icmp as u8)
            .src_addr(src)
            .dst_addr(dst)
            .payload(&icmp)
            .build();

        FrameBuilder::new()
            .dst_mac(PORT_MAC)
            .src_mac(PEER_MAC)
            .ethertype(EtherType::Ipv4 as u16)
            .payload(&ip)
            .build()
    }

    pub(crate) fn ipv6_icmp_frame(
        src: Ipv6Addr,
        dst: Ipv6Addr,
        icmp: &[u8],
        extension: Option<&[u8]>,
    ) -> Vec<u8> {
        let mut icmp = icmp.to_vec();
        icmpv6::set_checksum(&mut icmp, &src, &dst);

        let builder = Ipv6Builder::new().src_addr(src).dst_addr(dst);
        let ip = match extension {
            Some(ext) => {
                let mut payload = ext.to_vec();
                payload.extend_from_slice(&icmp);
                builder
                    .next_header(NextHeader::HopByHop as u8)
                    .payload(&payload)
                    .build()
            }
            None => builder
                .next_header(NextHeader::Icmpv6 as u8)
                .payload(&icmp)
                .build(),
        };

        FrameBuilder::new()
            .dst_mac(PORT_MAC)
            .src_mac(PEER_MAC)
            .ethertype(EtherType::Ipv6 as u16)
            .payload(&ip)
            .build()
    }

    fn parsed(data: Vec<u8>, version: IpVersion) -> Packet {
        let mut pkt = Packet::from_frame(data);
        assert_eq!(pkt.parse_l3().unwrap(), version);
        pkt.parse_l4(version).unwrap();
        pkt
    }

    #[test]
    fn test_parse_ipv4_icmp() {
        let src = Ipv4Addr::new(192, 0, 2, 10);
        let dst = Ipv4Addr::new(192, 0, 2, 1);
        let mut pkt = Packet::from_frame(ipv4_echo_frame(src, dst, 8, 0x42));

        assert_eq!(pkt.parse_l3().unwrap(), IpVersion::V4);
        assert_eq!(pkt.parse_l4(IpVersion::V4).unwrap(), Protocol::Icmp as u8);
        assert_eq!(pkt.src_addr(IpVersion::V4).unwrap(), IpAddr::V4(src));
        assert_eq!(pkt.dst_addr(IpVersion::V4).unwrap(), IpAddr::V4(dst));

        let icmp = pkt.icmp().unwrap();
        assert_eq!(icmp.icmp_type(), 8);
        assert_eq!(icmp.identifier(), 0x42);
    }

    #[test]
    fn test_parse_l3_vlan_tagged() {
        let inner = ipv4_echo_frame(
            Ipv4Addr::new(10, 0, 0, 2),
            Ipv4Addr::new(10, 0, 0, 1),
            8,
            1,
        );
        let tagged = FrameBuilder::new()
            .dst_mac(PORT_MAC)
            .src_mac(PEER_MAC)
            .vlan_tag(VlanTag::new(42))
            .ethertype(EtherType::Ipv4 as u16)
            .payload(&inner[ethernet::HEADER_SIZE..])
            .build();

        let pkt = parsed(tagged, IpVersion::V4);
        assert_eq!(pkt.frame().unwrap().vlan_tag().unwrap().vid, 42);
        assert_eq!(pkt.icmp().unwrap().identifier(), 1);
    }

    #[test]
    fn test_parse_l3_rejects_other_ethertypes() {
        let arp = FrameBuilder::new()
            .dst_mac(MacAddr::BROADCAST)
            .src_mac(PEER_MAC)
            .ethertype(0x0806)
            .payload(&[0u8; 28])
            .build();
        let mut pkt = Packet::from_frame(arp);
        assert!(pkt.parse_l3().is_err());
    }

    #[test]
    fn test_access_before_parse_fails() {
        let pkt = Packet::from_frame(vec![0u8; 60]);
        assert!(pkt.l3_bytes().is_err());
        assert!(pkt.icmp().is_err());
    }

    #[test]
    fn test_parse_l4_ipv6_extension_header() {
        let src: Ipv6Addr = "2001:db8::10".parse().unwrap();
        let dst: Ipv6Addr = "2001:db8::1".parse().unwrap();
        let echo = EchoRequestBuilder::new(7, 1).build_raw(128);
        let hop_by_hop = [58, 0, 1, 4, 0, 0, 0, 0];

        let mut pkt = Packet::from_frame(ipv6_icmp_frame(src, dst, &echo, Some(&hop_by_hop)));
        pkt.parse_l3().unwrap();
        assert_eq!(pkt.parse_l4(IpVersion::V6).unwrap(), 58);
        assert_eq!(pkt.icmp().unwrap().icmp_type(), 128);
        assert_eq!(pkt.icmp().unwrap().identifier(), 7);
    }

    #[test]
    fn test_parse_l4_rejects_truncated_capture() {
        let mut data = ipv4_echo_frame(
            Ipv4Addr::new(10, 0, 0, 2),
            Ipv4Addr::new(10, 0, 0, 1),
            8,
            1,
        );
        data[16..18].copy_from_slice(&1000u16.to_be_bytes());

        let mut pkt = Packet::from_frame(data);
        assert_eq!(pkt.parse_l3().unwrap(), IpVersion::V4);
        assert!(matches!(pkt.parse_l4(IpVersion::V4), Err(Error::Parse(_))));
        assert!(pkt.l4_bytes().is_err());
    }

    #[test]
    fn test_l4_excludes_ethernet_padding() {
        let mut data = ipv4_echo_frame(
            Ipv4Addr::new(10, 0, 0, 2),
            Ipv4Addr::new(10, 0, 0, 1),
            8,
            1,
        );
        data.extend_from_slice(&[0u8; 6]);
        let pkt = parsed(data, IpVersion::V4);
        assert_eq!(pkt.l4_bytes().unwrap().len(), 16);
    }

    #[test]
    fn test_try_clone_is_independent_and_unparsed() {
        let original = parsed(
            ipv4_echo_frame(Ipv4Addr::new(10, 0, 0, 2), Ipv4Addr::new(10, 0, 0, 1), 8, 1),
            IpVersion::V4,
        );
        let mut clone = original.try_clone().unwrap();

        assert_eq!(clone.as_bytes(), original.as_bytes());
        assert!(clone.l3_bytes().is_err());

        clone.parse_l3().unwrap();
        clone.swap_addrs(IpVersion::V4).unwrap();
        assert_ne!(clone.as_bytes(), original.as_bytes());
    }

    #[test]
    fn test_swap_addrs_swaps_macs_and_ips() {
        let src = Ipv4Addr::new(10, 0, 0, 2);
        let dst = Ipv4Addr::new(10, 0, 0, 1);
        let mut pkt = parsed(ipv4_echo_frame(src, dst, 8, 1), IpVersion::V4);

        pkt.swap_addrs(IpVersion::V4).unwrap();

        let frame = pkt.frame().unwrap();
        assert_eq!(frame.dst_mac(), PEER_MAC);
        assert_eq!(frame.src_mac(), PORT_MAC);
        assert_eq!(pkt.src_addr(IpVersion::V4).unwrap(), IpAddr::V4(dst));
        assert_eq!(pkt.dst_addr(IpVersion::V4).unwrap(), IpAddr::V4(src));
    }

    #[test]
    fn test_checksum_software_ipv4() {
        let mut pkt = parsed(
            ipv4_echo_frame(Ipv4Addr::new(10, 0, 0, 2), Ipv4Addr::new(10, 0, 0, 1), 8, 1),
            IpVersion::V4,
        );
        pkt.icmp_mut().unwrap().set_type(0);
        // Corrupt the header checksum so recomputation is observable
        let l3 = ethernet::HEADER_SIZE;
        pkt.data[l3 + 10] ^= 0xff;

        pkt.set_icmp_checksum(IpVersion::V4, ChecksumPolicy::default())
            .unwrap();

        let hdr = Ipv4Header::parse(pkt.l3_bytes().unwrap()).unwrap();
        assert!(hdr.validate_checksum());
        assert!(pkt.icmp().unwrap().validate_checksum());
        assert!(!pkt.tx_offload().ipv4_header);
    }

    #[test]
    fn test_checksum_hw_offload_ipv4() {
        let mut pkt = parsed(
            ipv4_echo_frame(Ipv4Addr::new(10, 0, 0, 2), Ipv4Addr::new(10, 0, 0, 1), 8, 1),
            IpVersion::V4,
        );
        pkt.icmp_mut().unwrap().set_type(0);

        let policy = ChecksumPolicy {
            calculate: true,
            hw_offload: true,
        };
        pkt.set_icmp_checksum(IpVersion::V4, policy).unwrap();

        let hdr = Ipv4Header::parse(pkt.l3_bytes().unwrap()).unwrap();
        assert_eq!(hdr.checksum(), 0);
        assert!(pkt.tx_offload().ipv4_header);
        assert!(pkt.icmp().unwrap().validate_checksum());
    }

    #[test]
    fn test_checksum_disabled_touches_nothing() {
        let mut pkt = parsed(
            ipv4_echo_frame(Ipv4Addr::new(10, 0, 0, 2), Ipv4Addr::new(10, 0, 0, 1), 8, 1),
            IpVersion::V4,
        );
        pkt.icmp_mut().unwrap().set_type(0);
        let before = pkt.as_bytes().to_vec();

        let policy = ChecksumPolicy {
            calculate: false,
            hw_offload: false,
        };
        pkt.set_icmp_checksum(IpVersion::V4, policy).unwrap();
        assert_eq!(pkt.as_bytes(), &before[..]);
    }

    #[test]
    fn test_checksum_ipv6() {
        let src: Ipv6Addr = "2001:db8::10".parse().unwrap();
        let dst: Ipv6Addr = "2001:db8::1".parse().unwrap();
        let echo = EchoRequestBuilder::new(7, 1).payload(b"xyz").build_raw(128);
        let mut pkt = parsed(ipv6_icmp_frame(src, dst, &echo, None), IpVersion::V6);

        pkt.swap_addrs(IpVersion::V6).unwrap();
        pkt.icmp_mut().unwrap().set_type(129);
        pkt.set_icmp_checksum(IpVersion::V6, ChecksumPolicy::default())
            .unwrap();

        assert!(icmpv6::validate_checksum(&dst, &src, pkt.l4_bytes().unwrap()));
    }
}
