//! Gateway ports and their addressing.

use super::flow::FlowStore;
use super::neighbor_table::NeighborTable;
use crate::protocol::MacAddr;
use serde::Deserialize;
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::Arc;

/// Index used to address a port on the transmit path.
pub type PortIndex = u16;

/// Which side of the NAT a port faces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortRole {
    /// Faces the outside network.
    Public,
    /// Faces the hosts behind the gateway.
    Private,
}

impl fmt::Display for PortRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortRole::Public => write!(f, "public"),
            PortRole::Private => write!(f, "private"),
        }
    }
}

/// IPv4 address of a port and its prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subnet4 {
    pub addr: Ipv4Addr,
    pub prefix_len: u8,
}

/// IPv6 addressing of a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subnet6 {
    pub addr: Ipv6Addr,
    pub prefix_len: u8,
    /// fe80::/64 address derived from the port MAC.
    pub link_local: Ipv6Addr,
    /// Solicited-node group of `addr`.
    pub multicast: Ipv6Addr,
    /// Solicited-node group of `link_local`.
    pub link_local_multicast: Ipv6Addr,
}

impl Subnet6 {
    /// Creates a subnet with an explicit link-local address.
    pub fn new(addr: Ipv6Addr, prefix_len: u8, link_local: Ipv6Addr) -> Self {
        Self {
            addr,
            prefix_len,
            link_local,
            multicast: solicited_node(&addr),
            link_local_multicast: solicited_node(&link_local),
        }
    }

    /// Addressing with the link-local address derived from the port MAC.
    pub fn with_mac(addr: Ipv6Addr, prefix_len: u8, mac: &MacAddr) -> Self {
        Self::new(addr, prefix_len, link_local_from_mac(mac))
    }

    /// Whether `addr` is one of the unicast addresses we own.
    pub fn owns(&self, addr: &Ipv6Addr) -> bool {
        *addr == self.addr || *addr == self.link_local
    }
}

/// fe80::/64 with the modified EUI-64 of `mac` (RFC 4291 Appendix A).
pub fn link_local_from_mac(mac: &MacAddr) -> Ipv6Addr {
    let mut octets = [0u8; 16];
    octets[0] = 0xfe;
    octets[1] = 0x80;
    octets[8..].copy_from_slice(&mac.eui64());
    Ipv6Addr::from(octets)
}

/// Solicited-node multicast address ff02::1:ffXX:XXXX (RFC 4291 2.7.1).
pub fn solicited_node(addr: &Ipv6Addr) -> Ipv6Addr {
    let o = addr.octets();
    let mut octets = [0u8; 16];
    octets[0] = 0xff;
    octets[1] = 0x02;
    octets[11] = 0x01;
    octets[12] = 0xff;
    octets[13..].copy_from_slice(&o[13..]);
    Ipv6Addr::from(octets)
}

/// A gateway port, built once at startup and read-only afterwards.
#[derive(Debug, Clone)]
pub struct Port {
    /// Interface name.
    pub name: String,
    /// Index used to queue frames for transmission.
    pub index: PortIndex,
    pub role: PortRole,
    /// MAC address used as the source of generated frames.
    pub mac: MacAddr,
    pub subnet4: Subnet4,
    pub subnet6: Option<Subnet6>,
    /// Interface of the host stack that takes traffic we do not handle.
    pub fallback: Option<String>,
    /// Translation state, shared with the other ports.
    pub flows: Arc<FlowStore>,
    /// IPv6 neighbor cache of this port.
    pub neighbors: Arc<NeighborTable>,
}

impl Port {
    pub fn new(
        name: impl Into<String>,
        index: PortIndex,
        role: PortRole,
        mac: MacAddr,
        subnet4: Subnet4,
    ) -> Self {
        Self {
            name: name.into(),
            index,
            role,
            mac,
            subnet4,
            subnet6: None,
            fallback: None,
            flows: Arc::new(FlowStore::new()),
            neighbors: Arc::new(NeighborTable::default()),
        }
    }

    /// Enables IPv6 on the port.
    pub fn with_ipv6(mut self, subnet6: Subnet6) -> Self {
        self.subnet6 = Some(subnet6);
        self
    }

    /// Set the fallback interface; an empty name means none.
    pub fn with_fallback(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.fallback = if name.is_empty() { None } else { Some(name) };
        self
    }

    /// Replaces the flow store with a shared one.
    pub fn with_flows(mut self, flows: Arc<FlowStore>) -> Self {
        self.flows = flows;
        self
    }

    /// Whether unhandled traffic has a fallback interface to go to.
    pub fn has_fallback(&self) -> bool {
        self.fallback.is_some()
    }
}
