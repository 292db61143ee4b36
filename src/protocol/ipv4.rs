//! IPv4 protocol - RFC 791
//!
//! Only the fields the gateway reads or rewrites are exposed.

use super::checksum;
use crate::{Error, Result};
use std::net::Ipv4Addr;

/// Minimum IPv4 header size (without options)
pub const MIN_HEADER_SIZE: usize = 20;

const TOTAL_LENGTH: usize = 2;
const PROTOCOL: usize = 9;
const CHECKSUM: usize = 10;
const SRC_ADDR: usize = 12;
const DST_ADDR: usize = 16;

const DONT_FRAGMENT: u16 = 0x4000;

/// IP protocol numbers the gateway distinguishes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Protocol {
    Icmp = 1,
    Tcp = 6,
    Udp = 17,
    Icmpv6 = 58,
}

/// Zero-copy view of an IPv4 header
#[derive(Debug)]
pub struct Ipv4Header<'a> {
    buffer: &'a [u8],
    header_len: usize,
}

impl<'a> Ipv4Header<'a> {
    pub fn parse(buffer: &'a [u8]) -> Result<Self> {
        let Some(&first) = buffer.first() else {
            return Err(Error::Parse("empty IPv4 packet".into()));
        };
        if first >> 4 != 4 {
            return Err(Error::Parse(format!("IP version {} is not 4", first >> 4)));
        }

        let header_len = usize::from(first & 0x0f) * 4;
        if header_len < MIN_HEADER_SIZE {
            return Err(Error::Parse(format!("IPv4 IHL {} too small", header_len / 4)));
        }
        if buffer.len() < header_len {
            return Err(Error::Parse(format!(
                "IPv4 header truncated: {} of {} bytes",
                buffer.len(),
                header_len
            )));
        }

        Ok(Self { buffer, header_len })
    }

    fn word(&self, offset: usize) -> u16 {
        u16::from_be_bytes([self.buffer[offset], self.buffer[offset + 1]])
    }

    fn addr_at(&self, offset: usize) -> Ipv4Addr {
        let mut octets = [0u8; 4];
        octets.copy_from_slice(&self.buffer[offset..offset + 4]);
        Ipv4Addr::from(octets)
    }

    pub fn total_length(&self) -> u16 {
        self.word(TOTAL_LENGTH)
    }

    pub fn protocol(&self) -> u8 {
        self.buffer[PROTOCOL]
    }

    pub fn checksum(&self) -> u16 {
        self.word(CHECKSUM)
    }

    pub fn src_addr(&self) -> Ipv4Addr {
        self.addr_at(SRC_ADDR)
    }

    pub fn dst_addr(&self) -> Ipv4Addr {
        self.addr_at(DST_ADDR)
    }

    pub fn header_len(&self) -> usize {
        self.header_len
    }

    /// Payload bounded by the total length field (link-layer padding excluded).
    ///
    /// Fails when the field is shorter than the header or claims more bytes
    /// than were captured.
    pub fn payload(&self) -> Result<&[u8]> {
        let total = usize::from(self.total_length());
        self.buffer.get(self.header_len..total).ok_or_else(|| {
            Error::Parse(format!(
                "IPv4 total length {} does not fit header {} and capture {}",
                total,
                self.header_len,
                self.buffer.len()
            ))
        })
    }

    pub fn validate_checksum(&self) -> bool {
        checksum::checksum(&self.buffer[..self.header_len]) == 0
    }
}

/// Swap source and destination addresses of the header at the start of `buffer`.
///
/// The header checksum stays valid: the one's complement sum does not depend
/// on word order.
pub fn swap_addrs(buffer: &mut [u8]) {
    let (src, dst) = buffer[SRC_ADDR..DST_ADDR + 4].split_at_mut(4);
    src.swap_with_slice(dst);
}

/// Recompute the header checksum of the header at the start of `buffer`
pub fn update_checksum(buffer: &mut [u8], header_len: usize) {
    clear_checksum(buffer);
    let sum = checksum::checksum(&buffer[..header_len]);
    buffer[CHECKSUM..CHECKSUM + 2].copy_from_slice(&sum.to_be_bytes());
}

/// Zero the header checksum, leaving it to the NIC
pub fn clear_checksum(buffer: &mut [u8]) {
    buffer[CHECKSUM..CHECKSUM + 2].fill(0);
}

/// Builder for option-less IPv4 packets with DF set
#[derive(Debug, Clone)]
pub struct Ipv4Builder {
    ttl: u8,
    protocol: u8,
    src_addr: Ipv4Addr,
    dst_addr: Ipv4Addr,
    payload: Vec<u8>,
}

impl Ipv4Builder {
    pub fn new() -> Self {
        Self {
            ttl: 64,
            protocol: 0,
            src_addr: Ipv4Addr::UNSPECIFIED,
            dst_addr: Ipv4Addr::UNSPECIFIED,
            payload: Vec::new(),
        }
    }

    pub fn ttl(mut self, ttl: u8) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn protocol(mut self, protocol: u8) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn src_addr(mut self, addr: Ipv4Addr) -> Self {
        self.src_addr = addr;
        self
    }

    pub fn dst_addr(mut self, addr: Ipv4Addr) -> Self {
        self.dst_addr = addr;
        self
    }

    pub fn payload(mut self, payload: &[u8]) -> Self {
        self.payload = payload.to_vec();
        self
    }

    /// Serialize with a valid header checksum
    pub fn build(self) -> Vec<u8> {
        let total_length = MIN_HEADER_SIZE + self.payload.len();
        let mut packet = Vec::with_capacity(total_length);

        packet.push(0x45);
        packet.push(0);
        packet.extend_from_slice(&(total_length as u16).to_be_bytes());
        // Identification stays zero: DF packets are never reassembled
        packet.extend_from_slice(&[0, 0]);
        packet.extend_from_slice(&DONT_FRAGMENT.to_be_bytes());
        packet.push(self.ttl);
        packet.push(self.protocol);
        packet.extend_from_slice(&[0, 0]);
        packet.extend_from_slice(&self.src_addr.octets());
        packet.extend_from_slice(&self.dst_addr.octets());
        debug_assert_eq!(packet.len(), MIN_HEADER_SIZE);
        packet.extend_from_slice(&self.payload);

        update_checksum(&mut packet, MIN_HEADER_SIZE);
        packet
    }
}

impl Default for Ipv4Builder {
    fn default() -> Self {
        Self::new()
    }
}
