//! Translation flow store.
//!
//! Translation entries live in one concurrent table per protocol, keyed by the
//! address/port (or ICMP identifier) pair seen on the wire. Activity is tracked
//! separately in the portmap, one timestamp per (family, protocol, identifier).

use super::packet::Packet;
use super::port::PortRole;
use crate::protocol::{AddressFamily, IpVersion};
use dashmap::DashMap;
use std::collections::HashSet;
use std::net::IpAddr;
use std::time::{Duration, Instant};
use tracing::debug;

/// Protocols with their own translation table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlowProtocol {
    Icmp,
    Icmpv6,
    Tcp,
    Udp,
}

impl FlowProtocol {
    const COUNT: usize = 4;

    /// Control message protocol of an IP version.
    pub fn control(version: IpVersion) -> Self {
        match version {
            IpVersion::V4 => FlowProtocol::Icmp,
            IpVersion::V6 => FlowProtocol::Icmpv6,
        }
    }

    /// Table for an IP protocol number, if it has one.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(FlowProtocol::Icmp),
            6 => Some(FlowProtocol::Tcp),
            17 => Some(FlowProtocol::Udp),
            58 => Some(FlowProtocol::Icmpv6),
            _ => None,
        }
    }

    fn slot(self) -> usize {
        match self {
            FlowProtocol::Icmp => 0,
            FlowProtocol::Icmpv6 => 1,
            FlowProtocol::Tcp => 2,
            FlowProtocol::Udp => 3,
        }
    }
}

/// Address and port (ICMP identifier for echo messages) of one flow endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlowKey {
    /// Address on the gateway side of the translation.
    pub addr: IpAddr,
    /// Transport port, or the ICMP echo identifier.
    pub port: u16,
}

impl FlowKey {
    /// Creates a key from an address and port.
    pub fn new(addr: IpAddr, port: u16) -> Self {
        Self { addr, port }
    }

    /// Key of an ICMP echo message as seen on `role`'s side of the NAT.
    ///
    /// Public side traffic is keyed by its destination (our address), private
    /// side traffic by its source. Messages other than echo request/reply have
    /// no key. The packet must be parsed through the transport layer.
    pub fn derive(role: PortRole, version: IpVersion, packet: &Packet) -> Option<FlowKey> {
        let icmp = packet.icmp().ok()?;
        let icmp_type = icmp.icmp_type();
        if icmp_type != version.echo_request_type() && icmp_type != version.echo_reply_type() {
            return None;
        }

        let addr = match role {
            PortRole::Public => packet.dst_addr(version).ok()?,
            PortRole::Private => packet.src_addr(version).ok()?,
        };

        Some(FlowKey::new(addr, icmp.identifier()))
    }
}

/// Translation table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowEntry {
    /// Endpoint on the other side of the translation.
    pub peer: FlowKey,
    /// Address family of the portmap entry owning this translation.
    pub family: AddressFamily,
    /// Portmap identifier owning this translation.
    pub id: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct PortmapKey {
    family: AddressFamily,
    protocol: FlowProtocol,
    id: u16,
}

/// Concurrent translation tables and portmap.
#[derive(Debug)]
pub struct FlowStore {
    tables: [DashMap<FlowKey, FlowEntry>; FlowProtocol::COUNT],
    portmap: DashMap<PortmapKey, Instant>,
}

impl FlowStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            tables: std::array::from_fn(|_| DashMap::new()),
            portmap: DashMap::new(),
        }
    }

    fn table(&self, protocol: FlowProtocol) -> &DashMap<FlowKey, FlowEntry> {
        &self.tables[protocol.slot()]
    }

    /// Whether a translation exists for `key`.
    pub fn lookup(&self, protocol: FlowProtocol, key: &FlowKey) -> bool {
        self.table(protocol).contains_key(key)
    }

    /// Install a translation and mark its portmap entry as used now.
    pub fn insert(&self, protocol: FlowProtocol, key: FlowKey, entry: FlowEntry) {
        self.touch(entry.family, protocol, entry.id);
        self.table(protocol).insert(key, entry);
    }

    /// Record activity on a portmap entry.
    pub fn touch(&self, family: AddressFamily, protocol: FlowProtocol, id: u16) {
        self.touch_at(family, protocol, id, Instant::now());
    }

    /// Record activity at an explicit instant.
    pub fn touch_at(&self, family: AddressFamily, protocol: FlowProtocol, id: u16, at: Instant) {
        self.portmap.insert(
            PortmapKey {
                family,
                protocol,
                id,
            },
            at,
        );
    }

    /// Last activity of a portmap entry.
    pub fn last_used(
        &self,
        family: AddressFamily,
        protocol: FlowProtocol,
        id: u16,
    ) -> Option<Instant> {
        self.portmap
            .get(&PortmapKey {
                family,
                protocol,
                id,
            })
            .map(|t| *t)
    }

    /// Idle for longer than `timeout`; a missing entry is infinitely old.
    pub fn is_stale(
        &self,
        family: AddressFamily,
        protocol: FlowProtocol,
        id: u16,
        timeout: Duration,
    ) -> bool {
        self.is_stale_at(family, protocol, id, timeout, Instant::now())
    }

    fn is_stale_at(
        &self,
        family: AddressFamily,
        protocol: FlowProtocol,
        id: u16,
        timeout: Duration,
        now: Instant,
    ) -> bool {
        match self.last_used(family, protocol, id) {
            Some(at) => now.saturating_duration_since(at) > timeout,
            None => true,
        }
    }

    /// Remove portmap entries idle for longer than `timeout` together with the
    /// translations they own. Returns the number of removed portmap entries.
    pub fn expire_idle(&self, timeout: Duration) -> usize {
        self.expire_idle_at(timeout, Instant::now())
    }

    fn expire_idle_at(&self, timeout: Duration, now: Instant) -> usize {
        let idle = |at: &Instant| now.saturating_duration_since(*at) > timeout;

        let candidates: Vec<PortmapKey> = self
            .portmap
            .iter()
            .filter(|e| idle(e.value()))
            .map(|e| *e.key())
            .collect();

        let mut expired: [HashSet<(AddressFamily, u16)>; FlowProtocol::COUNT] =
            std::array::from_fn(|_| HashSet::new());
        let mut removed = 0;
        for key in candidates {
            // Re-checked under the shard lock: the entry may have been touched since
            if self.portmap.remove_if(&key, |_, at| idle(at)).is_some() {
                expired[key.protocol.slot()].insert((key.family, key.id));
                removed += 1;
            }
        }

        for (table, owners) in self.tables.iter().zip(&expired) {
            if !owners.is_empty() {
                table.retain(|_, e| !owners.contains(&(e.family, e.id)));
            }
        }

        if removed > 0 {
            debug!(removed, "Expired idle flows");
        }
        removed
    }

    /// Number of translations for `protocol`.
    pub fn len(&self, protocol: FlowProtocol) -> usize {
        self.table(protocol).len()
    }

    /// True when no translation and no portmap entry exists.
    pub fn is_empty(&self) -> bool {
        self.tables.iter().all(|t| t.is_empty()) && self.portmap.is_empty()
    }
}

impl Default for FlowStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataplane::packet::tests::{ipv4_echo_frame, ipv6_icmp_frame};
    use crate::protocol::icmp::EchoRequestBuilder;
    use std::net::{Ipv4Addr, Ipv6Addr};

    fn key(last: u8, port: u16) -> FlowKey {
        FlowKey::new(IpAddr::V4(Ipv4Addr::new(192, 0, 2, last)), port)
    }

    fn entry(id: u16) -> FlowEntry {
        FlowEntry {
            peer: FlowKey::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)), id),
            family: AddressFamily::Inet,
            id,
        }
    }

    fn parsed(data: Vec<u8>) -> (Packet, IpVersion) {
        let mut pkt = Packet::from_frame(data);
        let version = pkt.parse_l3().unwrap();
        pkt.parse_l4(version).unwrap();
        (pkt, version)
    }

    #[test]
    fn test_lookup_is_per_protocol() {
        let store = FlowStore::new();
        store.insert(FlowProtocol::Icmp, key(1, 100), entry(100));

        assert!(store.lookup(FlowProtocol::Icmp, &key(1, 100)));
        assert!(!store.lookup(FlowProtocol::Icmpv6, &key(1, 100)));
        assert!(!store.lookup(FlowProtocol::Icmp, &key(1, 101)));
    }

    #[test]
    fn test_insert_touches_portmap() {
        let store = FlowStore::new();
        assert!(store
            .last_used(AddressFamily::Inet, FlowProtocol::Icmp, 100)
            .is_none());

        store.insert(FlowProtocol::Icmp, key(1, 100), entry(100));
        assert!(store
            .last_used(AddressFamily::Inet, FlowProtocol::Icmp, 100)
            .is_some());
        assert!(store
            .last_used(AddressFamily::Inet6, FlowProtocol::Icmp, 100)
            .is_none());
    }

    #[test]
    fn test_is_stale() {
        let store = FlowStore::new();
        let timeout = Duration::from_secs(60);

        // Missing entry counts as stale
        assert!(store.is_stale(AddressFamily::Inet, FlowProtocol::Icmp, 7, timeout));

        store.touch(AddressFamily::Inet, FlowProtocol::Icmp, 7);
        assert!(!store.is_stale(AddressFamily::Inet, FlowProtocol::Icmp, 7, timeout));

        let later = Instant::now() + Duration::from_secs(120);
        assert!(store.is_stale_at(AddressFamily::Inet, FlowProtocol::Icmp, 7, timeout, later));
    }

    #[test]
    fn test_expire_idle_removes_owned_translations() {
        let store = FlowStore::new();
        let base = Instant::now();
        let now = base + Duration::from_secs(120);
        store.insert(FlowProtocol::Icmp, key(1, 100), entry(100));
        store.insert(FlowProtocol::Icmp, key(2, 100), entry(100));
        store.insert(FlowProtocol::Icmp, key(1, 200), entry(200));
        store.insert(FlowProtocol::Icmp, key(1, 300), entry(300));
        store.touch_at(AddressFamily::Inet, FlowProtocol::Icmp, 100, base);
        store.touch_at(AddressFamily::Inet, FlowProtocol::Icmp, 300, base);
        store.touch_at(AddressFamily::Inet, FlowProtocol::Icmp, 200, now);

        assert_eq!(store.expire_idle_at(Duration::from_secs(60), now), 2);
        assert!(!store.lookup(FlowProtocol::Icmp, &key(1, 100)));
        assert!(!store.lookup(FlowProtocol::Icmp, &key(2, 100)));
        assert!(!store.lookup(FlowProtocol::Icmp, &key(1, 300)));
        assert!(store.lookup(FlowProtocol::Icmp, &key(1, 200)));
        assert_eq!(store.len(FlowProtocol::Icmp), 1);

        // nothing left to expire
        assert_eq!(store.expire_idle_at(Duration::from_secs(60), now), 0);
    }

    #[test]
    fn test_protocol_mapping() {
        assert_eq!(FlowProtocol::control(IpVersion::V4), FlowProtocol::Icmp);
        assert_eq!(FlowProtocol::control(IpVersion::V6), FlowProtocol::Icmpv6);
        assert_eq!(FlowProtocol::from_u8(58), Some(FlowProtocol::Icmpv6));
        assert_eq!(FlowProtocol::from_u8(2), None);
    }

    #[test]
    fn test_derive_public_uses_destination() {
        let src = Ipv4Addr::new(198, 51, 100, 7);
        let dst = Ipv4Addr::new(192, 0, 2, 1);
        let (pkt, version) = parsed(ipv4_echo_frame(src, dst, 8, 0x1234));

        let key = FlowKey::derive(PortRole::Public, version, &pkt).unwrap();
        assert_eq!(key, FlowKey::new(IpAddr::V4(dst), 0x1234));
    }

    #[test]
    fn test_derive_private_uses_source() {
        let src = Ipv4Addr::new(10, 0, 0, 2);
        let dst = Ipv4Addr::new(198, 51, 100, 7);
        let (pkt, version) = parsed(ipv4_echo_frame(src, dst, 0, 0x99));

        let key = FlowKey::derive(PortRole::Private, version, &pkt).unwrap();
        assert_eq!(key, FlowKey::new(IpAddr::V4(src), 0x99));
    }

    #[test]
    fn test_derive_non_echo_has_no_key() {
        let (pkt, version) = parsed(ipv4_echo_frame(
            Ipv4Addr::new(10, 0, 0, 2),
            Ipv4Addr::new(10, 0, 0, 1),
            3,
            1,
        ));
        assert!(FlowKey::derive(PortRole::Public, version, &pkt).is_none());

        let src: Ipv6Addr = "2001:db8::2".parse().unwrap();
        let dst: Ipv6Addr = "2001:db8::1".parse().unwrap();
        let ns_like = EchoRequestBuilder::new(0, 0).build_raw(135);
        let (pkt, version) = parsed(ipv6_icmp_frame(src, dst, &ns_like, None));
        assert!(FlowKey::derive(PortRole::Public, version, &pkt).is_none());
    }

    #[test]
    fn test_derive_ipv6_echo() {
        let src: Ipv6Addr = "2001:db8::2".parse().unwrap();
        let dst: Ipv6Addr = "2001:db8::1".parse().unwrap();
        let echo = EchoRequestBuilder::new(0x4242, 1).build_raw(128);
        let (pkt, version) = parsed(ipv6_icmp_frame(src, dst, &echo, None));

        let key = FlowKey::derive(PortRole::Public, version, &pkt).unwrap();
        assert_eq!(key, FlowKey::new(IpAddr::V6(dst), 0x4242));
    }
}
