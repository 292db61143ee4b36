//! ICMPv6 (RFC 4443) and the Neighbor Discovery messages of RFC 4861

use super::{checksum, MacAddr};
use crate::{Error, Result};
use std::net::Ipv6Addr;

/// NS/NA length up to the options: header, flags word, target address
pub const NDP_MSG_SIZE: usize = 24;

/// Hop limit every Neighbor Discovery message is sent and received with
pub const NDP_HOP_LIMIT: u8 = 255;

/// ff02::1
pub const ALL_NODES: Ipv6Addr = Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 1);

const TARGET: usize = 8;
const FLAG_ROUTER: u8 = 0x80;
const FLAG_SOLICITED: u8 = 0x40;
const FLAG_OVERRIDE: u8 = 0x20;

const OPT_SOURCE_LL: u8 = 1;
const OPT_TARGET_LL: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Icmpv6Type {
    DestinationUnreachable = 1,
    PacketTooBig = 2,
    TimeExceeded = 3,
    EchoRequest = 128,
    EchoReply = 129,
    RouterSolicitation = 133,
    RouterAdvertisement = 134,
    NeighborSolicitation = 135,
    NeighborAdvertisement = 136,
}

impl Icmpv6Type {
    pub fn from_u8(value: u8) -> Option<Self> {
        use Icmpv6Type::*;
        Some(match value {
            1 => DestinationUnreachable,
            2 => PacketTooBig,
            3 => TimeExceeded,
            128 => EchoRequest,
            129 => EchoReply,
            133 => RouterSolicitation,
            134 => RouterAdvertisement,
            135 => NeighborSolicitation,
            136 => NeighborAdvertisement,
            _ => return None,
        })
    }
}

/// Check type, code and minimum length of an NS/NA message
fn expect_nd(buffer: &[u8], kind: Icmpv6Type) -> Result<()> {
    if buffer.len() < NDP_MSG_SIZE {
        return Err(Error::Parse(format!(
            "{:?} of {} bytes is truncated",
            kind,
            buffer.len()
        )));
    }
    if buffer[0] != kind as u8 || buffer[1] != 0 {
        return Err(Error::Parse(format!(
            "expected {:?}, got type {} code {}",
            kind, buffer[0], buffer[1]
        )));
    }
    Ok(())
}

fn target_of(buffer: &[u8]) -> Ipv6Addr {
    let mut octets = [0u8; 16];
    octets.copy_from_slice(&buffer[TARGET..TARGET + 16]);
    Ipv6Addr::from(octets)
}

/// Serialize an NS/NA body with an optional link-layer address option.
/// The checksum is left zero.
fn encode(kind: Icmpv6Type, flags: u8, target: Ipv6Addr, option: Option<(u8, MacAddr)>) -> Vec<u8> {
    let mut buf = Vec::with_capacity(NDP_MSG_SIZE + 8);
    buf.extend_from_slice(&[kind as u8, 0, 0, 0, flags, 0, 0, 0]);
    buf.extend_from_slice(&target.octets());
    if let Some((opt_type, mac)) = option {
        // length is counted in units of 8 octets
        buf.extend_from_slice(&[opt_type, 1]);
        buf.extend_from_slice(&mac.0);
    }
    buf
}

/// First link-layer address option of `opt_type`. Walking stops at a
/// zero-length or overrunning option.
fn link_layer_option(mut options: &[u8], opt_type: u8) -> Option<MacAddr> {
    while let [kind, len, ..] = *options {
        let len = usize::from(len) * 8;
        if len == 0 || len > options.len() {
            return None;
        }
        if kind == opt_type {
            let mut mac = [0u8; 6];
            mac.copy_from_slice(&options[2..8]);
            return Some(MacAddr(mac));
        }
        options = &options[len..];
    }
    None
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NeighborSolicitation {
    pub target_addr: Ipv6Addr,
    pub source_link_addr: Option<MacAddr>,
}

impl NeighborSolicitation {
    pub fn new(target_addr: Ipv6Addr, source_link_addr: Option<MacAddr>) -> Self {
        Self {
            target_addr,
            source_link_addr,
        }
    }

    /// Parse a full ICMPv6 message, header included
    pub fn parse(buffer: &[u8]) -> Result<Self> {
        expect_nd(buffer, Icmpv6Type::NeighborSolicitation)?;
        Ok(Self {
            target_addr: target_of(buffer),
            source_link_addr: link_layer_option(&buffer[NDP_MSG_SIZE..], OPT_SOURCE_LL),
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        encode(
            Icmpv6Type::NeighborSolicitation,
            0,
            self.target_addr,
            self.source_link_addr.map(|mac| (OPT_SOURCE_LL, mac)),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NeighborAdvertisement {
    pub router_flag: bool,
    pub solicited_flag: bool,
    pub override_flag: bool,
    pub target_addr: Ipv6Addr,
    pub target_link_addr: Option<MacAddr>,
}

impl NeighborAdvertisement {
    /// Parse a full ICMPv6 message, header included
    pub fn parse(buffer: &[u8]) -> Result<Self> {
        expect_nd(buffer, Icmpv6Type::NeighborAdvertisement)?;
        let flags = buffer[4];
        Ok(Self {
            router_flag: flags & FLAG_ROUTER != 0,
            solicited_flag: flags & FLAG_SOLICITED != 0,
            override_flag: flags & FLAG_OVERRIDE != 0,
            target_addr: target_of(buffer),
            target_link_addr: link_layer_option(&buffer[NDP_MSG_SIZE..], OPT_TARGET_LL),
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let flags = [
            (self.router_flag, FLAG_ROUTER),
            (self.solicited_flag, FLAG_SOLICITED),
            (self.override_flag, FLAG_OVERRIDE),
        ]
        .into_iter()
        .filter(|(set, _)| *set)
        .fold(0, |acc, (_, bit)| acc | bit);

        encode(
            Icmpv6Type::NeighborAdvertisement,
            flags,
            self.target_addr,
            self.target_link_addr.map(|mac| (OPT_TARGET_LL, mac)),
        )
    }

    /// Advertisement for one of our own addresses, with override set.
    /// `solicited` is false when answering duplicate address detection
    /// (RFC 4861 7.2.4).
    pub fn reply(target_addr: Ipv6Addr, target_link_addr: MacAddr, solicited: bool) -> Self {
        Self {
            router_flag: false,
            solicited_flag: solicited,
            override_flag: true,
            target_addr,
            target_link_addr: Some(target_link_addr),
        }
    }
}

/// Partial sum of the upper-layer pseudo-header (RFC 8200 8.1)
fn pseudo_header_sum(src: &Ipv6Addr, dst: &Ipv6Addr, len: usize) -> u32 {
    let sum = checksum::sum_words(&src.octets(), 0);
    let sum = checksum::sum_words(&dst.octets(), sum);
    let sum = checksum::sum_words(&(len as u32).to_be_bytes(), sum);
    sum.wrapping_add(super::ipv4::Protocol::Icmpv6 as u32)
}

/// ICMPv6 checksum of `message`, whose own checksum field is skipped
pub fn calculate_checksum(src_addr: &Ipv6Addr, dst_addr: &Ipv6Addr, message: &[u8]) -> u16 {
    let sum = pseudo_header_sum(src_addr, dst_addr, message.len());
    let sum = checksum::sum_words(&message[..2], sum);
    checksum::finish(checksum::sum_words(&message[4..], sum))
}

pub fn set_checksum(message: &mut [u8], src_addr: &Ipv6Addr, dst_addr: &Ipv6Addr) {
    let sum = calculate_checksum(src_addr, dst_addr, message);
    message[2..4].copy_from_slice(&sum.to_be_bytes());
}

pub fn validate_checksum(src_addr: &Ipv6Addr, dst_addr: &Ipv6Addr, message: &[u8]) -> bool {
    let sum = pseudo_header_sum(src_addr, dst_addr, message.len());
    checksum::finish(checksum::sum_words(message, sum)) == 0
}
