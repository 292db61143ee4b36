//! ICMP - RFC 792
//!
//! Type, code, checksum and the echo identifier/sequence sit at the same
//! offsets in ICMPv6, so these views serve both protocols. Only the checksum
//! helpers are ICMPv4-specific; ICMPv6 adds a pseudo-header (see `icmpv6`).

use super::checksum;
use crate::{Error, Result};

/// Fixed part of every ICMP message
pub const ICMP_HEADER_SIZE: usize = 8;

const TYPE: usize = 0;
const CODE: usize = 1;
const CHECKSUM: usize = 2;
const IDENTIFIER: usize = 4;
const SEQUENCE: usize = 6;

/// ICMPv4 message types the gateway acts on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum IcmpType {
    EchoReply = 0,
    DestinationUnreachable = 3,
    EchoRequest = 8,
    TimeExceeded = 11,
}

fn check_len(len: usize) -> Result<()> {
    if len < ICMP_HEADER_SIZE {
        return Err(Error::Parse(format!("ICMP message of {} bytes", len)));
    }
    Ok(())
}

fn word(buffer: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([buffer[offset], buffer[offset + 1]])
}

/// Read-only view of an ICMP or ICMPv6 message
#[derive(Debug)]
pub struct IcmpPacket<'a> {
    buffer: &'a [u8],
}

impl<'a> IcmpPacket<'a> {
    pub fn parse(buffer: &'a [u8]) -> Result<Self> {
        check_len(buffer.len())?;
        Ok(Self { buffer })
    }

    pub fn icmp_type(&self) -> u8 {
        self.buffer[TYPE]
    }

    pub fn code(&self) -> u8 {
        self.buffer[CODE]
    }

    pub fn checksum(&self) -> u16 {
        word(self.buffer, CHECKSUM)
    }

    /// Echo identifier; for other types the first half of the rest-of-header
    pub fn identifier(&self) -> u16 {
        word(self.buffer, IDENTIFIER)
    }

    pub fn sequence(&self) -> u16 {
        word(self.buffer, SEQUENCE)
    }

    pub fn payload(&self) -> &'a [u8] {
        &self.buffer[ICMP_HEADER_SIZE..]
    }

    pub fn as_bytes(&self) -> &'a [u8] {
        self.buffer
    }

    /// ICMPv4 only
    pub fn validate_checksum(&self) -> bool {
        icmp_checksum(self.buffer) == 0
    }
}

/// Mutable view of an ICMP or ICMPv6 message inside a packet buffer
#[derive(Debug)]
pub struct IcmpPacketMut<'a> {
    buffer: &'a mut [u8],
}

impl<'a> IcmpPacketMut<'a> {
    pub fn parse(buffer: &'a mut [u8]) -> Result<Self> {
        check_len(buffer.len())?;
        Ok(Self { buffer })
    }

    pub fn icmp_type(&self) -> u8 {
        self.buffer[TYPE]
    }

    pub fn set_type(&mut self, icmp_type: u8) {
        self.buffer[TYPE] = icmp_type;
    }

    pub fn identifier(&self) -> u16 {
        word(self.buffer, IDENTIFIER)
    }

    pub fn set_checksum(&mut self, sum: u16) {
        self.buffer[CHECKSUM..CHECKSUM + 2].copy_from_slice(&sum.to_be_bytes());
    }

    /// Recompute the ICMPv4 checksum over the whole message
    pub fn update_checksum(&mut self) {
        self.set_checksum(0);
        let sum = icmp_checksum(self.buffer);
        self.set_checksum(sum);
    }
}

/// ICMPv4 checksum (no pseudo-header)
pub fn icmp_checksum(data: &[u8]) -> u16 {
    checksum::checksum(data)
}

/// Builds ICMP Echo messages.
///
/// The gateway itself only rewrites received requests; this is the public way
/// to craft test traffic, used by the integration tests.
#[derive(Debug, Clone)]
pub struct EchoRequestBuilder {
    identifier: u16,
    sequence: u16,
    payload: Vec<u8>,
}

impl EchoRequestBuilder {
    pub fn new(identifier: u16, sequence: u16) -> Self {
        Self {
            identifier,
            sequence,
            payload: Vec::new(),
        }
    }

    pub fn payload(mut self, data: &[u8]) -> Self {
        self.payload = data.to_vec();
        self
    }

    /// Serialize with an arbitrary type and a zero checksum
    pub fn build_raw(self, icmp_type: u8) -> Vec<u8> {
        let mut message = Vec::with_capacity(ICMP_HEADER_SIZE + self.payload.len());
        message.extend_from_slice(&[icmp_type, 0, 0, 0]);
        message.extend_from_slice(&self.identifier.to_be_bytes());
        message.extend_from_slice(&self.sequence.to_be_bytes());
        message.extend_from_slice(&self.payload);
        message
    }

    /// ICMPv4 Echo Request with a valid checksum
    pub fn build(self) -> Vec<u8> {
        let mut message = self.build_raw(IcmpType::EchoRequest as u8);
        IcmpPacketMut { buffer: &mut message }.update_checksum();
        message
    }
}
