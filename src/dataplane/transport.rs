//! Packet transmission and diagnostic capture.

use super::icmp_handler::Disposition;
use super::packet::{Packet, TxOffload};
use super::port::PortIndex;
use crate::config::DumpConfig;
use crate::protocol::ethernet::Frame;
use crate::protocol::ipv4::{self, Ipv4Header};
use crate::protocol::EtherType;
use crate::telemetry::MetricsRegistry;
use crate::Result;
use std::collections::HashMap;
use std::fmt::Write;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Outbound side of the dataplane as seen by packet handlers.
pub trait PacketTransport: Send + Sync {
    /// Independent copy of `packet`; fails only when no buffer is available.
    fn clone_packet(&self, packet: &Packet) -> Result<Packet> {
        packet.try_clone()
    }

    /// Queue `packet` for transmission on `port`.
    fn transmit(&self, packet: Packet, port: PortIndex);

    /// Diagnostic capture of a packet and the decision taken for it.
    fn record(&self, packet: &Packet, disposition: Disposition);
}

/// A frame waiting for a port writer.
#[derive(Debug)]
pub struct TxFrame {
    /// Frame bytes.
    pub data: Vec<u8>,
    /// Checksum work left to the transmit path.
    pub offload: TxOffload,
}

impl TxFrame {
    /// Bytes to hand to the socket.
    ///
    /// Raw sockets bypass NIC checksum offload, so a deferred IPv4 header
    /// checksum is filled in here.
    pub fn into_wire(mut self) -> Vec<u8> {
        if self.offload.ipv4_header {
            let target = Frame::parse(&self.data).ok().and_then(|frame| {
                if EtherType::from_u16(frame.ethertype()) != Some(EtherType::Ipv4) {
                    return None;
                }
                let header_len = Ipv4Header::parse(frame.payload()).ok()?.header_len();
                Some((frame.header_len(), header_len))
            });
            if let Some((offset, header_len)) = target {
                ipv4::update_checksum(&mut self.data[offset..], header_len);
            }
        }
        self.data
    }
}

/// Transport feeding per-port transmit queues drained by writer tasks.
pub struct QueueTransport {
    queues: HashMap<PortIndex, mpsc::UnboundedSender<TxFrame>>,
    dump: DumpConfig,
    metrics: Arc<MetricsRegistry>,
}

impl QueueTransport {
    /// Creates a transport with no port queues attached.
    pub fn new(dump: DumpConfig, metrics: Arc<MetricsRegistry>) -> Self {
        Self {
            queues: HashMap::new(),
            dump,
            metrics,
        }
    }

    /// Create the transmit queue of `port` and return its receiving end.
    pub fn add_port(&mut self, port: PortIndex) -> mpsc::UnboundedReceiver<TxFrame> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.queues.insert(port, tx);
        rx
    }
}

impl PacketTransport for QueueTransport {
    fn transmit(&self, packet: Packet, port: PortIndex) {
        let Some(queue) = self.queues.get(&port) else {
            warn!(port, "No transmit queue for port");
            self.metrics.packets_dropped.inc();
            return;
        };

        let frame = TxFrame {
            offload: packet.tx_offload(),
            data: packet.into_bytes(),
        };
        if queue.send(frame).is_err() {
            warn!(port, "Transmit queue closed");
            self.metrics.packets_dropped.inc();
        }
    }

    fn record(&self, packet: &Packet, disposition: Disposition) {
        if self.dump.enabled(disposition) {
            info!(
                disposition = %disposition,
                len = packet.len(),
                "\n{}",
                hex_dump(packet.as_bytes())
            );
        }
    }
}

/// Hex dump in 16-byte rows with offsets.
pub fn hex_dump(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len() * 3 + data.len() / 16 * 8);
    for (row, chunk) in data.chunks(16).enumerate() {
        let _ = write!(out, "{:04x}:", row * 16);
        for byte in chunk {
            let _ = write!(out, " {:02x}", byte);
        }
        out.push('\n');
    }
    out
}
