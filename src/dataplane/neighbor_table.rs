//! Per-port IPv6 neighbor cache fed by Neighbor Discovery (RFC 4861 7.3).
//!
//! The port reader and the aging task touch it concurrently; all methods
//! take `&self`.

use crate::protocol::MacAddr;
use dashmap::DashMap;
use std::net::Ipv6Addr;
use std::time::{Duration, Instant};

const REACHABLE_TIME: Duration = Duration::from_secs(30);
const GC_TIME: Duration = Duration::from_secs(120);

/// Reachability of a cached neighbor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NeighborState {
    /// Confirmed within the reachable time.
    Reachable,
    /// Not confirmed recently; the address is still usable.
    Stale,
}

#[derive(Debug, Clone, Copy)]
struct Neighbor {
    mac: MacAddr,
    confirmed: Instant,
    state: NeighborState,
}

/// IPv6 address to link-layer address cache of one port.
#[derive(Debug)]
pub struct NeighborTable {
    entries: DashMap<Ipv6Addr, Neighbor>,
    reachable_time: Duration,
    gc_time: Duration,
}

impl NeighborTable {
    /// Entries go stale after `reachable_time` and are dropped after `gc_time`.
    pub fn new(reachable_time: Duration, gc_time: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            reachable_time,
            gc_time,
        }
    }

    /// Learn or confirm `ip`; the entry becomes Reachable.
    pub fn insert(&self, ip: Ipv6Addr, mac: MacAddr) {
        self.insert_at(ip, mac, Instant::now());
    }

    fn insert_at(&self, ip: Ipv6Addr, mac: MacAddr, at: Instant) {
        self.entries.insert(
            ip,
            Neighbor {
                mac,
                confirmed: at,
                state: NeighborState::Reachable,
            },
        );
    }

    /// Cached link-layer address of `ip` and how fresh it is.
    pub fn lookup(&self, ip: &Ipv6Addr) -> Option<(MacAddr, NeighborState)> {
        self.entries.get(ip).map(|n| (n.mac, n.state))
    }

    /// Demote unconfirmed entries to Stale and drop expired ones.
    /// Returns how many were dropped.
    pub fn refresh_states(&self) -> usize {
        self.refresh_at(Instant::now())
    }

    fn refresh_at(&self, now: Instant) -> usize {
        let mut dropped = 0;
        self.entries.retain(|_, n| {
            let age = now.saturating_duration_since(n.confirmed);
            if age >= self.gc_time {
                dropped += 1;
                return false;
            }
            if age >= self.reachable_time {
                n.state = NeighborState::Stale;
            }
            true
        });
        dropped
    }

    /// Number of cached neighbors.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for NeighborTable {
    fn default() -> Self {
        Self::new(REACHABLE_TIME, GC_TIME)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const MAC1: MacAddr = MacAddr([0x02, 0, 0, 0, 0, 1]);
    const MAC2: MacAddr = MacAddr([0x02, 0, 0, 0, 0, 2]);

    fn ip(s: &str) -> Ipv6Addr {
        s.parse().unwrap()
    }

    #[test]
    fn test_learn_and_confirm() {
        let table = NeighborTable::default();
        assert!(table.lookup(&ip("fe80::1")).is_none());

        table.insert(ip("fe80::1"), MAC1);
        assert_eq!(
            table.lookup(&ip("fe80::1")),
            Some((MAC1, NeighborState::Reachable))
        );

        // a later advertisement replaces the address
        table.insert(ip("fe80::1"), MAC2);
        assert_eq!(table.len(), 1);
        assert_eq!(table.lookup(&ip("fe80::1")).unwrap().0, MAC2);
    }

    #[test]
    fn test_aging() {
        let table = NeighborTable::default();
        let base = Instant::now();
        let now = base + Duration::from_secs(600);

        table.insert_at(ip("2001:db8::1"), MAC1, now);
        table.insert_at(ip("2001:db8::2"), MAC1, base + Duration::from_secs(540));
        table.insert_at(ip("2001:db8::3"), MAC2, base);

        assert_eq!(table.refresh_at(now), 1);
        assert_eq!(
            table.lookup(&ip("2001:db8::1")).unwrap().1,
            NeighborState::Reachable
        );
        assert_eq!(
            table.lookup(&ip("2001:db8::2")).unwrap().1,
            NeighborState::Stale
        );
        assert!(table.lookup(&ip("2001:db8::3")).is_none());

        // confirmation brings a stale entry back
        table.insert_at(ip("2001:db8::2"), MAC1, now);
        assert_eq!(
            table.lookup(&ip("2001:db8::2")).unwrap().1,
            NeighborState::Reachable
        );
    }

    #[test]
    fn test_shared_between_threads() {
        let table = Arc::new(NeighborTable::default());
        let workers: Vec<_> = (0..4u16)
            .map(|t| {
                let table = Arc::clone(&table);
                std::thread::spawn(move || {
                    for i in 0..32u16 {
                        table.insert(Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, t, i), MAC1);
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }
        assert_eq!(table.len(), 128);
    }
}
