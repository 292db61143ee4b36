//! Configuration types

use crate::dataplane::{ChecksumPolicy, Disposition, PortRole};
use crate::telemetry::LogConfig;
use crate::{Error, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::time::Duration;

/// Gateway configuration (natgate.toml)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub nat: NatConfig,
    #[serde(default)]
    pub checksum: ChecksumConfig,
    #[serde(default)]
    pub dump: DumpConfig,
    /// Ports keyed by interface name; indices follow name order
    #[serde(default)]
    pub ports: BTreeMap<String, PortConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct NatConfig {
    /// Idle time after which a tracked ICMP flow is handed to the fallback stack
    pub connection_timeout_secs: u64,
    /// Period of the flow and neighbor aging tick
    pub aging_interval_secs: u64,
}

impl Default for NatConfig {
    fn default() -> Self {
        Self {
            connection_timeout_secs: 60,
            aging_interval_secs: 10,
        }
    }
}

impl NatConfig {
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_secs)
    }

    pub fn aging_interval(&self) -> Duration {
        Duration::from_secs(self.aging_interval_secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ChecksumConfig {
    pub calculate: bool,
    pub hw_offload: bool,
}

impl Default for ChecksumConfig {
    fn default() -> Self {
        Self {
            calculate: true,
            hw_offload: false,
        }
    }
}

impl ChecksumConfig {
    pub fn policy(&self) -> ChecksumPolicy {
        ChecksumPolicy {
            calculate: self.calculate,
            hw_offload: self.hw_offload,
        }
    }
}

/// Which recorded packets are hex-dumped to the log
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DumpConfig {
    pub send: bool,
    pub drop: bool,
    pub fallback: bool,
}

impl DumpConfig {
    pub fn enabled(&self, disposition: Disposition) -> bool {
        match disposition {
            Disposition::Send => self.send,
            Disposition::Drop => self.drop,
            Disposition::ToFallback => self.fallback,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PortConfig {
    pub role: PortRole,
    /// Read from sysfs when absent
    pub mac: Option<String>,
    /// Address in CIDR notation
    pub ipv4: String,
    pub ipv6: Option<String>,
    /// Overrides the EUI-64 link-local address
    pub link_local: Option<String>,
    /// Host stack interface; empty means none
    #[serde(default)]
    pub fallback: Option<String>,
}

/// Parse "a.b.c.d/len"
pub fn parse_cidr4(cidr: &str) -> Result<(Ipv4Addr, u8)> {
    let (addr, prefix) = split_cidr(cidr)?;
    let addr: Ipv4Addr = addr
        .parse()
        .map_err(|_| Error::Config(format!("invalid IPv4 address: {}", addr)))?;
    if prefix > 32 {
        return Err(Error::Config(format!("invalid IPv4 prefix: {}", cidr)));
    }
    Ok((addr, prefix))
}

/// Parse "x::y/len"
pub fn parse_cidr6(cidr: &str) -> Result<(Ipv6Addr, u8)> {
    let (addr, prefix) = split_cidr(cidr)?;
    let addr: Ipv6Addr = addr
        .parse()
        .map_err(|_| Error::Config(format!("invalid IPv6 address: {}", addr)))?;
    if prefix > 128 {
        return Err(Error::Config(format!("invalid IPv6 prefix: {}", cidr)));
    }
    Ok((addr, prefix))
}

fn split_cidr(cidr: &str) -> Result<(&str, u8)> {
    let (addr, prefix) = cidr
        .split_once('/')
        .ok_or_else(|| Error::Config(format!("invalid CIDR: {}", cidr)))?;
    let prefix = prefix
        .parse()
        .map_err(|_| Error::Config(format!("invalid prefix: {}", cidr)))?;
    Ok((addr, prefix))
}
