//! Gateway counters.
//!
//! Everything is a relaxed atomic; readers only need eventually consistent
//! values for the shutdown dump.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic counter shared between tasks.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    /// Creates a counter at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Increments the counter by 1.
    pub fn inc(&self) {
        self.add(1);
    }

    /// Adds `val` to the counter.
    pub fn add(&self, val: u64) {
        self.0.fetch_add(val, Ordering::Relaxed);
    }

    /// Current value of the counter.
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Interface-level traffic of one port.
#[derive(Debug, Default)]
pub struct PortStats {
    /// Frames received.
    pub rx_packets: Counter,
    /// Bytes received.
    pub rx_bytes: Counter,
    /// Failed receive calls.
    pub rx_errors: Counter,
    /// Frames transmitted.
    pub tx_packets: Counter,
    /// Bytes transmitted.
    pub tx_bytes: Counter,
    /// Failed send calls.
    pub tx_errors: Counter,
}

impl PortStats {
    /// Creates port statistics with every counter at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts one received frame of `bytes` bytes.
    pub fn record_rx(&self, bytes: usize) {
        self.rx_packets.inc();
        self.rx_bytes.add(bytes as u64);
    }

    /// Counts one transmitted frame of `bytes` bytes.
    pub fn record_tx(&self, bytes: usize) {
        self.tx_packets.inc();
        self.tx_bytes.add(bytes as u64);
    }

    fn snapshot(&self) -> [(&'static str, u64); 6] {
        [
            ("rx_packets", self.rx_packets.get()),
            ("rx_bytes", self.rx_bytes.get()),
            ("rx_errors", self.rx_errors.get()),
            ("tx_packets", self.tx_packets.get()),
            ("tx_bytes", self.tx_bytes.get()),
            ("tx_errors", self.tx_errors.get()),
        ]
    }
}

/// Gateway-wide counters plus per-port traffic statistics.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    ports: DashMap<String, PortStats>,

    /// Echo replies built in the fast path.
    pub icmp_echo_replies: Counter,
    /// Frames handed to a fallback interface.
    pub fallback_redirects: Counter,
    /// Solicitations and advertisements consumed without forwarding.
    pub nd_handled: Counter,
    /// Neighbor Advertisements generated.
    pub na_sent: Counter,
    /// Packets passed on to the translation stage.
    pub packets_translated: Counter,
    /// Packets discarded for lack of a destination.
    pub packets_dropped: Counter,
    /// Portmap entries removed by aging.
    pub flows_expired: Counter,
}

impl MetricsRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking `name`; traffic on unregistered ports is not counted.
    pub fn register_port(&self, name: &str) {
        self.ports.entry(name.to_string()).or_default();
    }

    fn with_port(&self, name: &str, f: impl FnOnce(&PortStats)) {
        if let Some(stats) = self.ports.get(name) {
            f(stats.value());
        }
    }

    /// Counts a frame received on `port`.
    pub fn record_rx(&self, port: &str, bytes: usize) {
        self.with_port(port, |s| s.record_rx(bytes));
    }

    /// Counts a frame transmitted on `port`.
    pub fn record_tx(&self, port: &str, bytes: usize) {
        self.with_port(port, |s| s.record_tx(bytes));
    }

    /// Counts a receive failure on `port`.
    pub fn record_rx_error(&self, port: &str) {
        self.with_port(port, |s| s.rx_errors.inc());
    }

    /// Counts a send failure on `port`.
    pub fn record_tx_error(&self, port: &str) {
        self.with_port(port, |s| s.tx_errors.inc());
    }

    /// Flat `(name, value)` list; gateway counters first, then ports by name.
    pub fn export(&self) -> Vec<(String, u64)> {
        let gateway = [
            ("icmp_echo_replies", &self.icmp_echo_replies),
            ("fallback_redirects", &self.fallback_redirects),
            ("nd_handled", &self.nd_handled),
            ("na_sent", &self.na_sent),
            ("packets_translated", &self.packets_translated),
            ("packets_dropped", &self.packets_dropped),
            ("flows_expired", &self.flows_expired),
        ];
        let mut out: Vec<(String, u64)> = gateway
            .into_iter()
            .map(|(name, counter)| (name.to_string(), counter.get()))
            .collect();

        let mut names: Vec<String> = self.ports.iter().map(|e| e.key().clone()).collect();
        names.sort();
        for name in names {
            self.with_port(&name, |stats| {
                out.extend(
                    stats
                        .snapshot()
                        .into_iter()
                        .map(|(field, value)| (format!("{}_{}", name, field), value)),
                );
            });
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn value(export: &[(String, u64)], key: &str) -> Option<u64> {
        export.iter().find(|(k, _)| k == key).map(|(_, v)| *v)
    }

    #[test]
    fn test_counter() {
        let counter = Counter::new();
        counter.inc();
        counter.add(41);
        assert_eq!(counter.get(), 42);
    }

    #[test]
    fn test_port_traffic() {
        let registry = MetricsRegistry::new();
        registry.register_port("wan0");

        registry.record_rx("wan0", 98);
        registry.record_rx("wan0", 98);
        registry.record_tx("wan0", 86);
        registry.record_tx_error("wan0");
        registry.record_rx("veth9", 60);

        let export = registry.export();
        assert_eq!(value(&export, "wan0_rx_packets"), Some(2));
        assert_eq!(value(&export, "wan0_rx_bytes"), Some(196));
        assert_eq!(value(&export, "wan0_tx_bytes"), Some(86));
        assert_eq!(value(&export, "wan0_tx_errors"), Some(1));
        assert_eq!(value(&export, "veth9_rx_packets"), None);
    }

    #[test]
    fn test_export_layout() {
        let registry = MetricsRegistry::new();
        registry.register_port("wan0");
        registry.register_port("lan0");
        registry.fallback_redirects.add(3);
        registry.na_sent.inc();

        let export = registry.export();
        assert_eq!(export[0].0, "icmp_echo_replies");
        assert_eq!(value(&export, "fallback_redirects"), Some(3));
        assert_eq!(value(&export, "na_sent"), Some(1));

        let ports: Vec<&str> = export
            .iter()
            .map(|(k, _)| k.as_str())
            .filter(|k| k.ends_with("_rx_packets"))
            .collect();
        assert_eq!(ports, ["lan0_rx_packets", "wan0_rx_packets"]);
    }
}
