//! Configuration validation

use super::{parse_cidr4, parse_cidr6, Config};
use crate::dataplane::PortRole;
use crate::protocol::MacAddr;
use std::net::Ipv6Addr;

#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self {
            warnings: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn warn(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
    }

    pub fn error(&mut self, msg: impl Into<String>) {
        self.errors.push(msg.into());
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn print_diagnostics(&self) {
        for warning in &self.warnings {
            println!("[WARN] {}", warning);
        }
        for error in &self.errors {
            println!("[ERROR] {}", error);
        }
    }
}

impl Default for ValidationResult {
    fn default() -> Self {
        Self::new()
    }
}

/// Validate configuration and return warnings/errors
pub fn validate(config: &Config) -> ValidationResult {
    let mut result = ValidationResult::new();

    validate_log(config, &mut result);
    validate_nat(config, &mut result);
    validate_checksum(config, &mut result);
    validate_ports(config, &mut result);

    result
}

fn validate_log(config: &Config, result: &mut ValidationResult) {
    if config.log.level_filter().is_none() {
        result.warn(format!(
            "log.level: unknown level '{}', using info",
            config.log.level
        ));
    }
}

fn validate_nat(config: &Config, result: &mut ValidationResult) {
    if config.nat.aging_interval_secs == 0 {
        result.error("nat.aging_interval_secs: must be greater than 0");
    }
    if config.nat.connection_timeout_secs == 0 {
        result.warn("nat.connection_timeout_secs: 0 sends every echo to the fallback stack");
    }
}

fn validate_checksum(config: &Config, result: &mut ValidationResult) {
    if config.checksum.hw_offload && !config.checksum.calculate {
        result.warn("checksum.hw_offload: has no effect while calculate = false");
    }
}

fn validate_ports(config: &Config, result: &mut ValidationResult) {
    if config.ports.is_empty() {
        result.error("ports: no ports configured");
        return;
    }

    if config.ports.len() > u16::MAX as usize {
        result.error("ports: too many ports");
    }

    if !config.ports.values().any(|p| p.role == PortRole::Public) {
        result.warn("ports: no public port configured");
    }

    for (name, port) in &config.ports {
        if let Some(mac) = &port.mac {
            if mac.parse::<MacAddr>().is_err() {
                result.error(format!("ports.{}: invalid mac '{}'", name, mac));
            }
        }

        if let Err(e) = parse_cidr4(&port.ipv4) {
            result.error(format!("ports.{}: ipv4: {}", name, e));
        }

        match &port.ipv6 {
            Some(ipv6) => {
                if let Err(e) = parse_cidr6(ipv6) {
                    result.error(format!("ports.{}: ipv6: {}", name, e));
                }
            }
            None if port.link_local.is_some() => {
                result.warn(format!(
                    "ports.{}: link_local ignored without ipv6 address",
                    name
                ));
            }
            None => {}
        }

        if let Some(link_local) = &port.link_local {
            match link_local.parse::<Ipv6Addr>() {
                Ok(addr) if addr.segments()[0] & 0xffc0 != 0xfe80 => {
                    result.warn(format!(
                        "ports.{}: link_local {} is not in fe80::/10",
                        name, addr
                    ));
                }
                Ok(_) => {}
                Err(_) => {
                    result.error(format!(
                        "ports.{}: invalid link_local '{}'",
                        name, link_local
                    ));
                }
            }
        }

        if let Some(fallback) = port.fallback.as_deref().filter(|f| !f.is_empty()) {
            if config.ports.contains_key(fallback) {
                result.error(format!(
                    "ports.{}: fallback '{}' is itself a gateway port",
                    name, fallback
                ));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PortConfig;

    fn make_port(role: PortRole) -> PortConfig {
        PortConfig {
            role,
            mac: None,
            ipv4: "192.0.2.1/24".to_string(),
            ipv6: None,
            link_local: None,
            fallback: None,
        }
    }

    fn make_config() -> Config {
        let mut config = Config::default();
        config
            .ports
            .insert("wan0".to_string(), make_port(PortRole::Public));
        config
    }

    #[test]
    fn test_valid_minimal_config() {
        let result = validate(&make_config());
        assert!(!result.has_errors());
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_no_ports_is_error() {
        let result = validate(&Config::default());
        assert!(result.errors.iter().any(|e| e.contains("no ports")));
    }

    #[test]
    fn test_no_public_port_warns() {
        let mut config = Config::default();
        config
            .ports
            .insert("lan0".to_string(), make_port(PortRole::Private));
        let result = validate(&config);
        assert!(!result.has_errors());
        assert!(result.warnings.iter().any(|w| w.contains("no public port")));
    }

    #[test]
    fn test_invalid_addresses() {
        let mut config = make_config();
        let port = config.ports.get_mut("wan0").unwrap();
        port.ipv4 = "192.0.2.1".to_string();
        port.ipv6 = Some("2001:db8::zz/64".to_string());
        port.mac = Some("02:00:00".to_string());

        let result = validate(&config);
        assert!(result.errors.iter().any(|e| e.contains("ipv4")));
        assert!(result.errors.iter().any(|e| e.contains("ipv6")));
        assert!(result.errors.iter().any(|e| e.contains("invalid mac")));
    }

    #[test]
    fn test_link_local_checks() {
        let mut config = make_config();
        config.ports.get_mut("wan0").unwrap().link_local = Some("fe80::1".to_string());
        let result = validate(&config);
        assert!(result.warnings.iter().any(|w| w.contains("ignored")));

        let port = config.ports.get_mut("wan0").unwrap();
        port.ipv6 = Some("2001:db8::1/64".to_string());
        port.link_local = Some("2001:db8::5".to_string());
        let result = validate(&config);
        assert!(result.warnings.iter().any(|w| w.contains("fe80::/10")));
    }

    #[test]
    fn test_fallback_cannot_be_gateway_port() {
        let mut config = make_config();
        config
            .ports
            .insert("lan0".to_string(), make_port(PortRole::Private));
        config.ports.get_mut("wan0").unwrap().fallback = Some("lan0".to_string());

        let result = validate(&config);
        assert!(result.errors.iter().any(|e| e.contains("fallback")));

        config.ports.get_mut("wan0").unwrap().fallback = Some(String::new());
        assert!(!validate(&config).has_errors());
    }

    #[test]
    fn test_nat_and_checksum_checks() {
        let mut config = make_config();
        config.nat.aging_interval_secs = 0;
        config.nat.connection_timeout_secs = 0;
        config.checksum.calculate = false;
        config.checksum.hw_offload = true;

        let result = validate(&config);
        assert!(result.errors.iter().any(|e| e.contains("aging_interval")));
        assert!(result
            .warnings
            .iter()
            .any(|w| w.contains("connection_timeout")));
        assert!(result.warnings.iter().any(|w| w.contains("hw_offload")));
    }

    #[test]
    fn test_unknown_log_level_warns() {
        let mut config = make_config();
        config.log.level = "verbose".to_string();
        let result = validate(&config);
        assert!(result.warnings.iter().any(|w| w.contains("log.level")));
    }
}
