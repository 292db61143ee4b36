//! Configuration management
//!
//! Loads natgate.toml and turns its port sections into dataplane ports.

mod types;
mod validation;

pub use types::*;
pub use validation::{validate, ValidationResult};

use crate::dataplane::{link_local_from_mac, Port, Subnet4, Subnet6};
use crate::protocol::MacAddr;
use crate::{Error, Result};
use std::net::Ipv6Addr;
use std::path::Path;

/// Load configuration from a TOML file
pub fn load<P: AsRef<Path>>(path: P) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(Error::Io)?;
    let config: Config = toml::from_str(&content).map_err(|e| Error::Config(e.to_string()))?;
    Ok(config)
}

/// Build dataplane ports, indexed in name order.
///
/// `resolve_mac` supplies the MAC of ports that do not configure one.
pub fn build_ports<F>(config: &Config, mut resolve_mac: F) -> Result<Vec<Port>>
where
    F: FnMut(&str) -> Result<MacAddr>,
{
    let mut ports = Vec::with_capacity(config.ports.len());

    for (index, (name, cfg)) in config.ports.iter().enumerate() {
        let index = u16::try_from(index).map_err(|_| Error::Config("too many ports".into()))?;

        let mac = match &cfg.mac {
            Some(mac) => mac
                .parse::<MacAddr>()
                .map_err(|e| Error::Config(format!("ports.{}: {}", name, e)))?,
            None => resolve_mac(name)?,
        };

        let (addr, prefix_len) = parse_cidr4(&cfg.ipv4)?;
        let mut port = Port::new(
            name.clone(),
            index,
            cfg.role,
            mac,
            Subnet4 { addr, prefix_len },
        );

        if let Some(ipv6) = &cfg.ipv6 {
            let (addr6, prefix6) = parse_cidr6(ipv6)?;
            let link_local = match &cfg.link_local {
                Some(ll) => ll.parse::<Ipv6Addr>().map_err(|_| {
                    Error::Config(format!("ports.{}: invalid link_local '{}'", name, ll))
                })?,
                None => link_local_from_mac(&mac),
            };
            port = port.with_ipv6(Subnet6::new(addr6, prefix6, link_local));
        }

        if let Some(fallback) = &cfg.fallback {
            port = port.with_fallback(fallback.clone());
        }

        ports.push(port);
    }

    Ok(ports)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataplane::PortRole;
    use std::net::Ipv4Addr;

    const CONFIG: &str = r#"
[ports.wan0]
role = "public"
ipv4 = "192.0.2.1/24"
ipv6 = "2001:db8::1/64"
fallback = "tap0"

[ports.lan0]
role = "private"
mac = "02:00:00:00:00:aa"
ipv4 = "10.0.0.1/24"
ipv6 = "fd00::1/64"
link_local = "fe80::1"
fallback = ""
"#;

    #[test]
    fn test_build_ports() {
        let config: Config = toml::from_str(CONFIG).unwrap();
        let resolved = MacAddr([0x02, 0, 0, 0, 0, 0x01]);
        let ports = build_ports(&config, |_| Ok(resolved)).unwrap();

        assert_eq!(ports.len(), 2);

        let lan = &ports[0];
        assert_eq!(lan.name, "lan0");
        assert_eq!(lan.index, 0);
        assert_eq!(lan.role, PortRole::Private);
        assert_eq!(lan.mac, MacAddr([0x02, 0, 0, 0, 0, 0xaa]));
        assert_eq!(lan.subnet6.unwrap().link_local, "fe80::1".parse::<Ipv6Addr>().unwrap());
        assert!(!lan.has_fallback());

        let wan = &ports[1];
        assert_eq!(wan.index, 1);
        assert_eq!(wan.mac, resolved);
        assert_eq!(wan.subnet4.addr, Ipv4Addr::new(192, 0, 2, 1));
        assert_eq!(
            wan.subnet6.unwrap().link_local,
            "fe80::ff:fe00:1".parse::<Ipv6Addr>().unwrap()
        );
        assert_eq!(wan.fallback.as_deref(), Some("tap0"));
    }

    #[test]
    fn test_build_ports_propagates_mac_errors() {
        let config: Config = toml::from_str(CONFIG).unwrap();
        let result = build_ports(&config, |name| {
            Err(Error::InterfaceNotFound {
                name: name.to_string(),
            })
        });
        assert!(matches!(result, Err(Error::InterfaceNotFound { .. })));
    }

    #[test]
    fn test_load_missing_file() {
        assert!(matches!(
            load("/nonexistent/natgate.toml"),
            Err(Error::Io(_))
        ));
    }
}
