//! IPv6 - RFC 8200

use crate::{Error, Result};
use std::net::Ipv6Addr;

/// Fixed IPv6 header size
pub const HEADER_SIZE: usize = 40;

const PAYLOAD_LENGTH: usize = 4;
const NEXT_HEADER: usize = 6;
const HOP_LIMIT: usize = 7;
const SRC_ADDR: usize = 8;
const DST_ADDR: usize = 24;

/// Extension headers walked before the packet is rejected
const MAX_EXTENSION_HEADERS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum NextHeader {
    HopByHop = 0,
    Tcp = 6,
    Udp = 17,
    Routing = 43,
    Fragment = 44,
    Icmpv6 = 58,
    NoNextHeader = 59,
    DestinationOptions = 60,
}

fn is_extension(value: u8) -> bool {
    [
        NextHeader::HopByHop,
        NextHeader::Routing,
        NextHeader::Fragment,
        NextHeader::DestinationOptions,
    ]
    .iter()
    .any(|h| *h as u8 == value)
}

/// Zero-copy view of an IPv6 header and its payload
#[derive(Debug)]
pub struct Ipv6Header<'a> {
    buffer: &'a [u8],
}

impl<'a> Ipv6Header<'a> {
    pub fn parse(buffer: &'a [u8]) -> Result<Self> {
        if buffer.len() < HEADER_SIZE {
            return Err(Error::Parse(format!(
                "IPv6 header truncated: {} bytes",
                buffer.len()
            )));
        }
        if buffer[0] >> 4 != 6 {
            return Err(Error::Parse(format!("IP version {} is not 6", buffer[0] >> 4)));
        }
        Ok(Self { buffer })
    }

    fn addr_at(&self, offset: usize) -> Ipv6Addr {
        let mut octets = [0u8; 16];
        octets.copy_from_slice(&self.buffer[offset..offset + 16]);
        Ipv6Addr::from(octets)
    }

    pub fn version(&self) -> u8 {
        self.buffer[0] >> 4
    }

    pub fn payload_length(&self) -> u16 {
        u16::from_be_bytes([self.buffer[PAYLOAD_LENGTH], self.buffer[PAYLOAD_LENGTH + 1]])
    }

    pub fn next_header(&self) -> u8 {
        self.buffer[NEXT_HEADER]
    }

    pub fn hop_limit(&self) -> u8 {
        self.buffer[HOP_LIMIT]
    }

    pub fn src_addr(&self) -> Ipv6Addr {
        self.addr_at(SRC_ADDR)
    }

    pub fn dst_addr(&self) -> Ipv6Addr {
        self.addr_at(DST_ADDR)
    }

    /// Payload bounded by the payload length field (link-layer padding excluded).
    ///
    /// Fails when the field claims more bytes than were captured.
    pub fn payload(&self) -> Result<&'a [u8]> {
        let end = HEADER_SIZE + usize::from(self.payload_length());
        self.buffer.get(HEADER_SIZE..end).ok_or_else(|| {
            Error::Parse(format!(
                "IPv6 payload length {} exceeds the {} captured bytes",
                self.payload_length(),
                self.buffer.len() - HEADER_SIZE
            ))
        })
    }

    /// Skip extension headers; returns the upper-layer protocol and its
    /// offset from the start of the IPv6 header
    pub fn upper_layer(&self) -> Result<(u8, usize)> {
        let payload = self.payload()?;
        let mut next = self.next_header();
        let mut offset = 0;

        for _ in 0..MAX_EXTENSION_HEADERS {
            if !is_extension(next) {
                return Ok((next, HEADER_SIZE + offset));
            }
            let ext = payload
                .get(offset..offset + 8)
                .ok_or_else(|| Error::Parse("IPv6 extension header truncated".into()))?;
            // fragment headers have no length field
            offset += if next == NextHeader::Fragment as u8 {
                8
            } else {
                (usize::from(ext[1]) + 1) * 8
            };
            next = ext[0];
        }

        Err(Error::Parse(format!(
            "more than {} IPv6 extension headers",
            MAX_EXTENSION_HEADERS
        )))
    }
}

/// Swap source and destination of the header at the start of `buffer`.
/// The ICMPv6 checksum still has to be recomputed by the caller.
pub fn swap_addrs(buffer: &mut [u8]) {
    let (src, dst) = buffer[SRC_ADDR..DST_ADDR + 16].split_at_mut(16);
    src.swap_with_slice(dst);
}

/// Builder for IPv6 packets without extension headers
#[derive(Debug, Clone)]
pub struct Ipv6Builder {
    hop_limit: u8,
    next_header: u8,
    src_addr: Ipv6Addr,
    dst_addr: Ipv6Addr,
    payload: Vec<u8>,
}

impl Ipv6Builder {
    pub fn new() -> Self {
        Self {
            hop_limit: 64,
            next_header: NextHeader::NoNextHeader as u8,
            src_addr: Ipv6Addr::UNSPECIFIED,
            dst_addr: Ipv6Addr::UNSPECIFIED,
            payload: Vec::new(),
        }
    }

    pub fn hop_limit(mut self, hop_limit: u8) -> Self {
        self.hop_limit = hop_limit;
        self
    }

    pub fn next_header(mut self, next_header: u8) -> Self {
        self.next_header = next_header;
        self
    }

    pub fn src_addr(mut self, addr: Ipv6Addr) -> Self {
        self.src_addr = addr;
        self
    }

    pub fn dst_addr(mut self, addr: Ipv6Addr) -> Self {
        self.dst_addr = addr;
        self
    }

    pub fn payload(mut self, payload: &[u8]) -> Self {
        self.payload = payload.to_vec();
        self
    }

    pub fn build(self) -> Vec<u8> {
        let mut packet = Vec::with_capacity(HEADER_SIZE + self.payload.len());
        // version 6, zero traffic class and flow label
        packet.extend_from_slice(&[0x60, 0, 0, 0]);
        packet.extend_from_slice(&(self.payload.len() as u16).to_be_bytes());
        packet.push(self.next_header);
        packet.push(self.hop_limit);
        packet.extend_from_slice(&self.src_addr.octets());
        packet.extend_from_slice(&self.dst_addr.octets());
        packet.extend_from_slice(&self.payload);
        packet
    }
}

impl Default for Ipv6Builder {
    fn default() -> Self {
        Self::new()
    }
}
