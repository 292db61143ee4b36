//! ICMP/ICMPv6 dispatch for packets arriving on a gateway port.
//!
//! Runs before address translation and decides, per packet, between answering
//! an echo request addressed to the gateway, handing untracked traffic to the
//! host stack, delegating Neighbor Discovery, or passing the packet on.

use super::flow::{FlowKey, FlowProtocol};
use super::ndp_processor::NeighborDiscovery;
use super::packet::{ChecksumPolicy, Packet};
use super::port::Port;
use super::transport::PacketTransport;
use crate::protocol::IpVersion;
use crate::telemetry::MetricsRegistry;
use crate::{Error, Result};
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, trace, warn};

/// Outcome of dispatching one packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Disposition {
    /// Continue through the translation pipeline.
    Send,
    /// Consumed here (answered or discarded).
    Drop,
    /// Hand to the port's fallback interface.
    ToFallback,
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Disposition::Send => write!(f, "send"),
            Disposition::Drop => write!(f, "drop"),
            Disposition::ToFallback => write!(f, "fallback"),
        }
    }
}

/// Ownership of a destination address relative to a port.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AddressClass {
    /// Destination is one of the port's own addresses.
    pub to_us: bool,
    /// Destination is link-local multicast.
    pub to_multicast: bool,
}

/// Classify `dst` against the addresses of `port`.
///
/// IPv4 has no multicast case. An IPv6 destination is never both ours and
/// one of our multicast groups.
pub fn classify(port: &Port, version: IpVersion, dst: IpAddr) -> AddressClass {
    match (version, dst) {
        (IpVersion::V4, IpAddr::V4(dst)) => AddressClass {
            to_us: dst == port.subnet4.addr,
            to_multicast: false,
        },
        (IpVersion::V6, IpAddr::V6(dst)) => match &port.subnet6 {
            Some(subnet) => {
                let to_us = dst == subnet.addr || dst == subnet.link_local;
                let to_multicast = !to_us
                    && (dst == subnet.multicast || dst == subnet.link_local_multicast);
                AddressClass {
                    to_us,
                    to_multicast,
                }
            }
            None => AddressClass::default(),
        },
        _ => AddressClass::default(),
    }
}

/// Static inputs of the dispatcher.
#[derive(Debug, Clone, Copy)]
pub struct DispatchSettings {
    /// Idle time after which a tracked flow counts as stale.
    pub connection_timeout: Duration,
    /// Checksum handling for generated replies.
    pub checksum: ChecksumPolicy,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            connection_timeout: Duration::from_secs(60),
            checksum: ChecksumPolicy::default(),
        }
    }
}

/// Stateless ICMP decision stage shared by all receive tasks.
pub struct IcmpDispatcher<T, N> {
    transport: Arc<T>,
    ndp: N,
    settings: DispatchSettings,
    metrics: Arc<MetricsRegistry>,
}

impl<T, N> IcmpDispatcher<T, N>
where
    T: PacketTransport,
    N: NeighborDiscovery,
{
    /// Creates a dispatcher sending its replies through `transport`.
    pub fn new(
        transport: Arc<T>,
        ndp: N,
        settings: DispatchSettings,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            transport,
            ndp,
            settings,
            metrics,
        }
    }

    /// Settings the dispatcher was created with.
    pub fn settings(&self) -> &DispatchSettings {
        &self.settings
    }

    /// Decide what happens to an ICMP/ICMPv6 packet received on `port`.
    ///
    /// `packet` must be parsed through the transport layer. `key` is the flow
    /// key derived for it, if any. The packet itself is never modified; an
    /// echo reply is built on a clone and transmitted before `Drop` is returned.
    pub fn dispatch(
        &self,
        port: &Port,
        version: IpVersion,
        packet: &Packet,
        key: Option<&FlowKey>,
    ) -> Disposition {
        let class = match packet.dst_addr(version) {
            Ok(dst) => classify(port, version, dst),
            Err(e) => {
                trace!(port = %port.name, "Unclassifiable packet: {}", e);
                return Disposition::Send;
            }
        };

        if version == IpVersion::V6 && (class.to_us || class.to_multicast) {
            let disposition = self.ndp.handle(port, packet);
            if disposition != Disposition::Send {
                return disposition;
            }
        }

        let Ok(icmp) = packet.icmp() else {
            return Disposition::Send;
        };

        if class.to_us && port.has_fallback() {
            if let Some(key) = key {
                let protocol = FlowProtocol::control(version);
                let family = version.address_family();
                if !port.flows.lookup(protocol, key)
                    || port.flows.is_stale(
                        family,
                        protocol,
                        icmp.identifier(),
                        self.settings.connection_timeout,
                    )
                {
                    trace!(
                        port = %port.name,
                        addr = %key.addr,
                        id = icmp.identifier(),
                        "Untracked or stale {} flow, redirecting to fallback",
                        version
                    );
                    return Disposition::ToFallback;
                }
            }
        }

        if !class.to_us || icmp.icmp_type() != version.echo_request_type() || icmp.code() != 0 {
            return Disposition::Send;
        }

        match self.send_echo_reply(port, version, packet) {
            Ok(()) => {
                self.metrics.icmp_echo_replies.inc();
            }
            Err(Error::BufferExhausted { requested }) => buffer_exhausted(requested),
            Err(e) => {
                warn!(port = %port.name, "Failed to build {} echo reply: {}", version, e);
            }
        }
        Disposition::Drop
    }

    fn send_echo_reply(&self, port: &Port, version: IpVersion, packet: &Packet) -> Result<()> {
        let mut reply = self.transport.clone_packet(packet)?;

        reply.parse_l3()?;
        reply.swap_addrs(version)?;
        reply.parse_l4(version)?;
        reply.icmp_mut()?.set_type(version.echo_reply_type());
        reply.set_icmp_checksum(version, self.settings.checksum)?;

        self.transport.record(&reply, Disposition::Send);
        self.transport.transmit(reply, port.index);
        Ok(())
    }
}

/// Without a buffer there is no way to answer, and the condition will recur
/// on the next packet.
fn buffer_exhausted(requested: usize) -> ! {
    error!(requested, "Packet buffer exhausted while building echo reply");
    std::process::exit(1)
}
