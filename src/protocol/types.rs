//! Link-layer and address-family types shared by the protocol modules

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// 48-bit Ethernet hardware address
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    pub const BROADCAST: MacAddr = MacAddr([0xff; 6]);
    pub const ZERO: MacAddr = MacAddr([0; 6]);

    /// Group bit of the first octet
    pub fn is_multicast(&self) -> bool {
        self.0[0] & 0x01 != 0
    }

    /// Modified EUI-64 interface identifier (RFC 4291 Appendix A)
    pub fn eui64(&self) -> [u8; 8] {
        let [a, b, c, d, e, f] = self.0;
        [a ^ 0x02, b, c, 0xff, 0xfe, d, e, f]
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, octet) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(":")?;
            }
            write!(f, "{:02x}", octet)?;
        }
        Ok(())
    }
}

impl fmt::Debug for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid MAC address {input:?}")]
pub struct ParseMacAddrError {
    input: String,
}

impl FromStr for MacAddr {
    type Err = ParseMacAddrError;

    /// Accepts `aa:bb:cc:dd:ee:ff` and `aa-bb-cc-dd-ee-ff`, the forms
    /// found in sysfs and in operator-written configs
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ParseMacAddrError {
            input: s.to_string(),
        };

        let mut octets = [0u8; 6];
        let mut parts = s.split([':', '-']);
        for octet in octets.iter_mut() {
            let part = parts.next().ok_or_else(invalid)?;
            if part.len() != 2 {
                return Err(invalid());
            }
            *octet = u8::from_str_radix(part, 16).map_err(|_| invalid())?;
        }
        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(MacAddr(octets))
    }
}

/// EtherType values the gateway parses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum EtherType {
    Ipv4 = 0x0800,
    Vlan = 0x8100,
    Ipv6 = 0x86dd,
}

impl EtherType {
    pub fn from_u16(value: u16) -> Option<Self> {
        [EtherType::Ipv4, EtherType::Vlan, EtherType::Ipv6]
            .into_iter()
            .find(|t| *t as u16 == value)
    }
}

/// 802.1Q tag control information
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VlanTag {
    pub pcp: u8,
    pub dei: bool,
    pub vid: u16,
}

impl VlanTag {
    const VID_MASK: u16 = 0x0fff;

    pub fn new(vid: u16) -> Self {
        Self {
            pcp: 0,
            dei: false,
            vid: vid & Self::VID_MASK,
        }
    }

    pub fn to_bytes(&self) -> [u8; 2] {
        let tci = (u16::from(self.pcp & 0x07) << 13)
            | (u16::from(self.dei) << 12)
            | (self.vid & Self::VID_MASK);
        tci.to_be_bytes()
    }

    pub fn from_bytes(bytes: [u8; 2]) -> Self {
        let tci = u16::from_be_bytes(bytes);
        Self {
            pcp: (tci >> 13) as u8,
            dei: tci & 0x1000 != 0,
            vid: tci & Self::VID_MASK,
        }
    }
}

/// Address family of a flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressFamily {
    Inet,
    Inet6,
}

/// Network-layer version of a control message
///
/// Picks the ICMP or ICMPv6 constants so callers never carry raw protocol
/// numbers around.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IpVersion {
    V4,
    V6,
}

impl IpVersion {
    /// Protocol / next-header number of the control protocol
    pub fn icmp_protocol(&self) -> u8 {
        match self {
            IpVersion::V4 => super::ipv4::Protocol::Icmp as u8,
            IpVersion::V6 => super::ipv4::Protocol::Icmpv6 as u8,
        }
    }

    pub fn echo_request_type(&self) -> u8 {
        match self {
            IpVersion::V4 => super::icmp::IcmpType::EchoRequest as u8,
            IpVersion::V6 => super::icmpv6::Icmpv6Type::EchoRequest as u8,
        }
    }

    pub fn echo_reply_type(&self) -> u8 {
        match self {
            IpVersion::V4 => super::icmp::IcmpType::EchoReply as u8,
            IpVersion::V6 => super::icmpv6::Icmpv6Type::EchoReply as u8,
        }
    }

    pub fn address_family(&self) -> AddressFamily {
        match self {
            IpVersion::V4 => AddressFamily::Inet,
            IpVersion::V6 => AddressFamily::Inet6,
        }
    }
}

impl fmt::Display for IpVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            IpVersion::V4 => "icmp",
            IpVersion::V6 => "icmpv6",
        })
    }
}
