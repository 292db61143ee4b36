//! Per-frame entry point of the NAT fast path.
//!
//! Parses received frames, runs the ICMP dispatcher on ICMP/ICMPv6 packets and
//! routes every disposition: the translation stage for `Send`, the port's
//! fallback interface for `ToFallback`, nothing for `Drop`.

use super::flow::{FlowKey, FlowStore};
use super::icmp_handler::{Disposition, IcmpDispatcher};
use super::ndp_processor::NeighborDiscovery;
use super::packet::Packet;
use super::port::{Port, PortIndex};
use super::transport::PacketTransport;
use crate::telemetry::MetricsRegistry;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, Interval, MissedTickBehavior};
use tracing::{debug, trace, warn};

/// Generic address/port translation stage fed with every `Send` packet.
pub trait Translator: Send + Sync {
    fn translate(&self, port: &Port, packet: Packet);
}

/// Stage that only accounts for the packets it receives.
pub struct PassThrough {
    metrics: Arc<MetricsRegistry>,
}

impl PassThrough {
    /// Creates a stage counting into `metrics`.
    pub fn new(metrics: Arc<MetricsRegistry>) -> Self {
        Self { metrics }
    }
}

impl Translator for PassThrough {
    fn translate(&self, port: &Port, packet: Packet) {
        trace!(port = %port.name, len = packet.len(), "Passing packet to translation");
        self.metrics.packets_translated.inc();
    }
}

/// NAT fast path over a fixed set of ports.
pub struct Gateway<T, N, X> {
    ports: Vec<Port>,
    flows: Arc<FlowStore>,
    dispatcher: IcmpDispatcher<T, N>,
    transport: Arc<T>,
    translator: X,
    metrics: Arc<MetricsRegistry>,
}

impl<T, N, X> Gateway<T, N, X>
where
    T: PacketTransport,
    N: NeighborDiscovery,
    X: Translator,
{
    /// Ports must be ordered by index. All of them share one flow store.
    pub fn new(
        ports: Vec<Port>,
        dispatcher: IcmpDispatcher<T, N>,
        transport: Arc<T>,
        translator: X,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        let flows = Arc::new(FlowStore::new());
        let ports = ports
            .into_iter()
            .map(|port| {
                metrics.register_port(&port.name);
                port.with_flows(flows.clone())
            })
            .collect();

        Self {
            ports,
            flows,
            dispatcher,
            transport,
            translator,
            metrics,
        }
    }

    /// All ports, ordered by index.
    pub fn ports(&self) -> &[Port] {
        &self.ports
    }

    /// Port with the given transmit index.
    pub fn port(&self, index: PortIndex) -> Option<&Port> {
        self.ports.get(usize::from(index))
    }

    /// Flow store shared by every port.
    pub fn flows(&self) -> &Arc<FlowStore> {
        &self.flows
    }

    /// Parse a frame received on `port` and decide its disposition.
    ///
    /// Anything that is not a well-formed ICMP/ICMPv6 packet belongs to the
    /// generic pipeline and yields `Send`.
    pub fn process_frame(&self, port: &Port, frame: Vec<u8>) -> (Disposition, Packet) {
        let mut packet = Packet::from_frame(frame);

        let version = match packet.parse_l3() {
            Ok(version) => version,
            Err(e) => {
                trace!(port = %port.name, "Not an IP packet: {}", e);
                return (Disposition::Send, packet);
            }
        };

        match packet.parse_l4(version) {
            Ok(protocol) if protocol == version.icmp_protocol() => {}
            Ok(_) => return (Disposition::Send, packet),
            Err(e) => {
                trace!(port = %port.name, "Failed to parse {} transport: {}", version, e);
                return (Disposition::Send, packet);
            }
        }

        let key = FlowKey::derive(port.role, version, &packet);
        let disposition = self.dispatcher.dispatch(port, version, &packet, key.as_ref());
        (disposition, packet)
    }

    /// Handle a frame received on port `index`.
    ///
    /// Returns the frame to write to the port's fallback interface, if any.
    pub fn handle_frame(&self, index: PortIndex, frame: Vec<u8>) -> Option<Vec<u8>> {
        let Some(port) = self.port(index) else {
            warn!(index, "Frame for unknown port");
            return None;
        };

        self.metrics.record_rx(&port.name, frame.len());
        let (disposition, packet) = self.process_frame(port, frame);
        self.transport.record(&packet, disposition);

        match disposition {
            Disposition::Send => {
                self.translator.translate(port, packet);
                None
            }
            Disposition::Drop => None,
            Disposition::ToFallback => {
                if !port.has_fallback() {
                    warn!(port = %port.name, "Fallback requested without fallback interface");
                    self.metrics.packets_dropped.inc();
                    return None;
                }
                self.metrics.fallback_redirects.inc();
                Some(packet.into_bytes())
            }
        }
    }

    /// Frames written by the host stack on a fallback interface leave through its port unchanged.
    pub fn handle_fallback_frame(&self, index: PortIndex, frame: Vec<u8>) {
        self.transport.transmit(Packet::from_frame(frame), index);
    }

    /// Expire idle flows and age neighbor entries.
    pub fn run_aging(&self) {
        let expired = self.flows.expire_idle(self.dispatcher.settings().connection_timeout);
        self.metrics.flows_expired.add(expired as u64);

        for port in &self.ports {
            let removed = port.neighbors.refresh_states();
            if removed > 0 {
                debug!(port = %port.name, removed, "Aged out neighbor entries");
            }
        }
    }

    /// Timer driving `run_aging`.
    pub fn aging_interval(period: Duration) -> Interval {
        let mut timer = interval(period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        timer
    }
}
