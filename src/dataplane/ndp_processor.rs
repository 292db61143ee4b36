//! NDP packet processor.
//!
//! Answers Neighbor Solicitations for the port's own addresses and learns
//! link-layer addresses from solicitations and advertisements.

use super::icmp_handler::Disposition;
use super::packet::{ChecksumPolicy, Packet};
use super::port::Port;
use super::transport::PacketTransport;
use crate::protocol::ethernet::FrameBuilder;
use crate::protocol::icmpv6::{
    Icmpv6Type, NeighborAdvertisement, NeighborSolicitation, ALL_NODES, NDP_HOP_LIMIT,
};
use crate::protocol::ipv6::{Ipv6Builder, Ipv6Header, NextHeader};
use crate::protocol::{EtherType, IpVersion, MacAddr};
use crate::telemetry::MetricsRegistry;
use crate::Result;
use std::net::{IpAddr, Ipv6Addr};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Ethernet address of the IPv6 all-nodes group (RFC 2464 Section 7).
const ALL_NODES_MAC: MacAddr = MacAddr([0x33, 0x33, 0x00, 0x00, 0x00, 0x01]);

/// Handler for IPv6 Neighbor Discovery traffic addressed to a port.
///
/// Returns `Send` for anything that is not Neighbor Discovery so the caller
/// continues with its own processing.
pub trait NeighborDiscovery: Send + Sync {
    fn handle(&self, port: &Port, packet: &Packet) -> Disposition;
}

/// Neighbor Discovery handler answering for the port's own addresses.
pub struct NdpHandler<T> {
    transport: Arc<T>,
    checksum: ChecksumPolicy,
    metrics: Arc<MetricsRegistry>,
}

impl<T: PacketTransport> NdpHandler<T> {
    /// Creates a handler sending advertisements through `transport`.
    pub fn new(transport: Arc<T>, checksum: ChecksumPolicy, metrics: Arc<MetricsRegistry>) -> Self {
        Self {
            transport,
            checksum,
            metrics,
        }
    }

    fn solicitation(&self, port: &Port, packet: &Packet, msg: &[u8]) -> Disposition {
        if port.has_fallback() {
            return Disposition::ToFallback;
        }

        let ns = match NeighborSolicitation::parse(msg) {
            Ok(ns) => ns,
            Err(e) => {
                debug!(port = %port.name, "Dropping malformed solicitation: {}", e);
                return Disposition::Drop;
            }
        };

        let Some(subnet) = port.subnet6.as_ref().filter(|s| s.owns(&ns.target_addr)) else {
            trace!(port = %port.name, target = %ns.target_addr, "Solicitation for foreign target");
            return Disposition::Drop;
        };

        let src = match packet.src_addr(IpVersion::V6) {
            Ok(IpAddr::V6(src)) => src,
            _ => return Disposition::Drop,
        };

        // Duplicate address detection solicitations carry no usable sender
        if !src.is_unspecified() {
            if let Some(mac) = ns.source_link_addr {
                port.neighbors.insert(src, mac);
            }
        }

        debug!(
            port = %port.name,
            target = %ns.target_addr,
            prefix_len = subnet.prefix_len,
            "Answering neighbor solicitation"
        );

        if let Err(e) = self.send_advertisement(port, packet, &ns, src) {
            warn!(port = %port.name, "Failed to build neighbor advertisement: {}", e);
        }
        Disposition::Drop
    }

    fn advertisement(&self, port: &Port, msg: &[u8]) -> Disposition {
        match NeighborAdvertisement::parse(msg) {
            Ok(na) => {
                if let Some(mac) = na.target_link_addr {
                    port.neighbors.insert(na.target_addr, mac);
                }
            }
            Err(e) => {
                debug!(port = %port.name, "Malformed advertisement: {}", e);
            }
        }

        if port.has_fallback() {
            Disposition::ToFallback
        } else {
            Disposition::Drop
        }
    }

    fn send_advertisement(
        &self,
        port: &Port,
        packet: &Packet,
        ns: &NeighborSolicitation,
        src: Ipv6Addr,
    ) -> Result<()> {
        let frame = packet.frame()?;
        let dad = src.is_unspecified();

        // Without a source link-layer option the sender's cached address is
        // used, then the frame's source (RFC 4861 7.2.4)
        let (dst, dst_mac) = if dad {
            (ALL_NODES, ALL_NODES_MAC)
        } else {
            let mac = ns
                .source_link_addr
                .or_else(|| port.neighbors.lookup(&src).map(|(mac, _)| mac))
                .unwrap_or(frame.src_mac());
            (src, mac)
        };

        let na = NeighborAdvertisement::reply(ns.target_addr, port.mac, !dad);
        let ip = Ipv6Builder::new()
            .hop_limit(NDP_HOP_LIMIT)
            .next_header(NextHeader::Icmpv6 as u8)
            .src_addr(ns.target_addr)
            .dst_addr(dst)
            .payload(&na.to_bytes())
            .build();

        let mut builder = FrameBuilder::new().dst_mac(dst_mac).src_mac(port.mac);
        if let Some(tag) = frame.vlan_tag() {
            builder = builder.vlan_tag(tag);
        }
        let data = builder
            .ethertype(EtherType::Ipv6 as u16)
            .payload(&ip)
            .build();

        let mut reply = Packet::from_frame(data);
        reply.parse_l3()?;
        reply.parse_l4(IpVersion::V6)?;
        reply.set_icmp_checksum(IpVersion::V6, self.checksum)?;

        self.transport.record(&reply, Disposition::Send);
        self.transport.transmit(reply, port.index);
        self.metrics.na_sent.inc();
        Ok(())
    }
}

impl<T: PacketTransport> NeighborDiscovery for NdpHandler<T> {
    fn handle(&self, port: &Port, packet: &Packet) -> Disposition {
        let Ok(msg) = packet.l4_bytes() else {
            return Disposition::Send;
        };

        let kind = msg.first().copied().and_then(Icmpv6Type::from_u8);
        if !matches!(
            kind,
            Some(Icmpv6Type::NeighborSolicitation | Icmpv6Type::NeighborAdvertisement)
        ) {
            return Disposition::Send;
        }

        self.metrics.nd_handled.inc();

        // RFC 4861 7.1: messages that crossed a router are invalid
        let hop_limit = packet
            .l3_bytes()
            .and_then(Ipv6Header::parse)
            .map(|hdr| hdr.hop_limit())
            .ok();
        if hop_limit != Some(NDP_HOP_LIMIT) {
            debug!(port = %port.name, "Dropping ND message with hop limit {:?}", hop_limit);
            return Disposition::Drop;
        }

        match kind {
            Some(Icmpv6Type::NeighborSolicitation) => self.solicitation(port, packet, msg),
            _ => self.advertisement(port, msg),
        }
    }
}
