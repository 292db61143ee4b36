//! Ethernet II framing with optional 802.1Q tag

use super::{EtherType, MacAddr, VlanTag};
use crate::{Error, Result};

/// Untagged Ethernet header size
pub const HEADER_SIZE: usize = 14;
/// Ethernet header size with a single 802.1Q tag
pub const VLAN_HEADER_SIZE: usize = 18;
/// Largest tagged frame without FCS
pub const MAX_FRAME_SIZE: usize = 1522;

const MAC_LEN: usize = 6;

/// Zero-copy view of an Ethernet frame
#[derive(Debug)]
pub struct Frame<'a> {
    buffer: &'a [u8],
    vlan_tag: Option<VlanTag>,
    header_len: usize,
}

impl<'a> Frame<'a> {
    pub fn parse(buffer: &'a [u8]) -> Result<Self> {
        if buffer.len() < HEADER_SIZE {
            return Err(Error::Parse(format!(
                "Ethernet frame of {} bytes is too short",
                buffer.len()
            )));
        }

        let outer = u16::from_be_bytes([buffer[12], buffer[13]]);
        if outer != EtherType::Vlan as u16 {
            return Ok(Self {
                buffer,
                vlan_tag: None,
                header_len: HEADER_SIZE,
            });
        }

        if buffer.len() < VLAN_HEADER_SIZE {
            return Err(Error::Parse("802.1Q tag truncated".into()));
        }
        Ok(Self {
            buffer,
            vlan_tag: Some(VlanTag::from_bytes([buffer[14], buffer[15]])),
            header_len: VLAN_HEADER_SIZE,
        })
    }

    fn mac_at(&self, offset: usize) -> MacAddr {
        let mut octets = [0u8; MAC_LEN];
        octets.copy_from_slice(&self.buffer[offset..offset + MAC_LEN]);
        MacAddr(octets)
    }

    pub fn dst_mac(&self) -> MacAddr {
        self.mac_at(0)
    }

    pub fn src_mac(&self) -> MacAddr {
        self.mac_at(MAC_LEN)
    }

    /// EtherType of the payload (inner type for tagged frames)
    pub fn ethertype(&self) -> u16 {
        let at = self.header_len - 2;
        u16::from_be_bytes([self.buffer[at], self.buffer[at + 1]])
    }

    pub fn vlan_tag(&self) -> Option<VlanTag> {
        self.vlan_tag
    }

    /// Offset of the L3 header within the frame
    pub fn header_len(&self) -> usize {
        self.header_len
    }

    pub fn payload(&self) -> &[u8] {
        &self.buffer[self.header_len..]
    }
}

/// Swap source and destination MAC addresses in place
pub fn swap_macs(frame: &mut [u8]) {
    let (dst, src) = frame[..2 * MAC_LEN].split_at_mut(MAC_LEN);
    dst.swap_with_slice(src);
}

/// Builder for Ethernet frames; fields may be set in any order
#[derive(Debug, Clone)]
pub struct FrameBuilder {
    dst_mac: MacAddr,
    src_mac: MacAddr,
    vlan_tag: Option<VlanTag>,
    ethertype: u16,
    payload: Vec<u8>,
}

impl FrameBuilder {
    pub fn new() -> Self {
        Self {
            dst_mac: MacAddr::ZERO,
            src_mac: MacAddr::ZERO,
            vlan_tag: None,
            ethertype: 0,
            payload: Vec::new(),
        }
    }

    pub fn dst_mac(mut self, mac: MacAddr) -> Self {
        self.dst_mac = mac;
        self
    }

    pub fn src_mac(mut self, mac: MacAddr) -> Self {
        self.src_mac = mac;
        self
    }

    pub fn vlan_tag(mut self, tag: VlanTag) -> Self {
        self.vlan_tag = Some(tag);
        self
    }

    pub fn ethertype(mut self, ethertype: u16) -> Self {
        self.ethertype = ethertype;
        self
    }

    pub fn payload(mut self, payload: &[u8]) -> Self {
        self.payload = payload.to_vec();
        self
    }

    pub fn build(self) -> Vec<u8> {
        let header_len = if self.vlan_tag.is_some() {
            VLAN_HEADER_SIZE
        } else {
            HEADER_SIZE
        };
        let mut frame = Vec::with_capacity((header_len + self.payload.len()).min(MAX_FRAME_SIZE));

        frame.extend_from_slice(&self.dst_mac.0);
        frame.extend_from_slice(&self.src_mac.0);
        if let Some(tag) = self.vlan_tag {
            frame.extend_from_slice(&(EtherType::Vlan as u16).to_be_bytes());
            frame.extend_from_slice(&tag.to_bytes());
        }
        frame.extend_from_slice(&self.ethertype.to_be_bytes());
        frame.extend_from_slice(&self.payload);
        frame
    }
}

impl Default for FrameBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: MacAddr = MacAddr([0x02, 0, 0, 0, 0, 0x0a]);
    const B: MacAddr = MacAddr([0x02, 0, 0, 0, 0, 0x0b]);

    #[test]
    fn test_parse_untagged() {
        let data = FrameBuilder::new()
            .dst_mac(A)
            .src_mac(B)
            .ethertype(EtherType::Ipv4 as u16)
            .payload(&[0xde, 0xad])
            .build();
        assert_eq!(data.len(), 16);

        let frame = Frame::parse(&data).unwrap();
        assert_eq!(frame.dst_mac(), A);
        assert_eq!(frame.src_mac(), B);
        assert_eq!(frame.ethertype(), 0x0800);
        assert!(frame.vlan_tag().is_none());
        assert_eq!(frame.header_len(), HEADER_SIZE);
        assert_eq!(frame.payload(), &[0xde, 0xad]);
    }

    #[test]
    fn test_parse_tagged() {
        // VID 100, inner IPv6
        let data = [
            &A.0[..],
            &B.0[..],
            &[0x81, 0x00, 0x00, 0x64, 0x86, 0xdd, 0xca, 0xfe],
        ]
        .concat();

        let frame = Frame::parse(&data).unwrap();
        assert_eq!(frame.ethertype(), EtherType::Ipv6 as u16);
        assert_eq!(frame.vlan_tag().unwrap().vid, 100);
        assert_eq!(frame.header_len(), VLAN_HEADER_SIZE);
        assert_eq!(frame.payload(), &[0xca, 0xfe]);

        let rebuilt = FrameBuilder::new()
            .ethertype(EtherType::Ipv6 as u16)
            .vlan_tag(VlanTag::new(100))
            .src_mac(B)
            .dst_mac(A)
            .payload(&[0xca, 0xfe])
            .build();
        assert_eq!(rebuilt, data);
    }

    #[test]
    fn test_parse_truncated() {
        assert!(Frame::parse(&[0u8; 13]).is_err());

        let mut data = vec![0u8; 14];
        data[12..14].copy_from_slice(&[0x81, 0x00]);
        assert!(Frame::parse(&data).is_err());
    }

    #[test]
    fn test_swap_macs() {
        let mut data = FrameBuilder::new()
            .dst_mac(A)
            .src_mac(B)
            .ethertype(EtherType::Ipv4 as u16)
            .payload(&[1, 2, 3])
            .build();
        swap_macs(&mut data);

        let frame = Frame::parse(&data).unwrap();
        assert_eq!(frame.dst_mac(), B);
        assert_eq!(frame.src_mac(), A);
        assert_eq!(frame.payload(), &[1, 2, 3]);
    }
}
