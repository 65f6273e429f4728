//! Controller configuration, loaded from a TOML file.
//!
//! Every field has a default, so an empty file (or no file at all) yields a
//! controller listening on the loopback address with an empty block set.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::path::Path;

use serde::Deserialize;

use crate::firewall::{BlockPair, NonIpv4Policy};
use crate::logging::{LogConfig, LogFormat};
use crate::{Error, Result};

/// Port switches connect to unless configured otherwise.
pub const DEFAULT_OFP_PORT: u16 = 6633;

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ControllerConfig {
    pub listen: SocketAddr,
    pub logging: LogConfig,
    pub flows: FlowConfig,
    pub firewall: FirewallConfig,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, DEFAULT_OFP_PORT)),
            logging: LogConfig::default(),
            flows: FlowConfig::default(),
            firewall: FirewallConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FlowConfig {
    /// Priority of learned forwarding rules.
    pub forward_priority: u16,
    /// Priority of firewall drop rules; must exceed `forward_priority`.
    pub drop_priority: u16,
    /// Pin flood decisions in the switch flow table, keyed on in-port and both MACs.
    pub install_flood_rules: bool,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            forward_priority: 10,
            drop_priority: 20,
            install_flood_rules: true,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FirewallConfig {
    pub non_ipv4: NonIpv4Policy,
    pub block: Vec<BlockPair>,
}

impl ControllerConfig {
    pub fn validate(&self) -> Result<()> {
        self.logging.validate()?;
        let flows = &self.flows;
        if flows.forward_priority == 0 {
            return Err(Error::Config(
                "flows.forward_priority must be above the table-miss priority 0".to_string(),
            ));
        }
        if flows.drop_priority <= flows.forward_priority {
            return Err(Error::Config(format!(
                "flows.drop_priority ({}) must be greater than flows.forward_priority ({})",
                flows.drop_priority, flows.forward_priority
            )));
        }
        Ok(())
    }
}

/// Parse and validate a configuration document.
pub fn parse(content: &str) -> Result<ControllerConfig> {
    let config: ControllerConfig =
        toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
    config.validate()?;
    Ok(config)
}

/// Load configuration from a TOML file
pub fn load<P: AsRef<Path>>(path: P) -> Result<ControllerConfig> {
    let content = std::fs::read_to_string(path).map_err(Error::Io)?;
    parse(&content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config = parse("").unwrap();
        assert_eq!(config.listen, "127.0.0.1:6633".parse().unwrap());
        assert_eq!(config.flows, FlowConfig::default());
        assert_eq!(config.firewall.non_ipv4, NonIpv4Policy::Allow);
        assert!(config.firewall.block.is_empty());
        assert_eq!(config.logging.level, "info");
        assert!(config.flows.install_flood_rules);
    }

    #[test]
    fn full_document() {
        let config = parse(
            r#"
            listen = "0.0.0.0:6653"

            [logging]
            level = "debug"
            format = "json"

            [flows]
            forward_priority = 10
            drop_priority = 100
            install_flood_rules = false

            [firewall]
            non_ipv4 = "deny"

            [[firewall.block]]
            src = "10.0.0.1"
            dst = "10.0.0.3"
            "#,
        )
        .unwrap();
        assert_eq!(config.listen.port(), 6653);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.flows.drop_priority, 100);
        assert!(!config.flows.install_flood_rules);
        assert_eq!(config.firewall.non_ipv4, NonIpv4Policy::Deny);
        assert_eq!(
            config.firewall.block,
            vec![BlockPair::new(
                Ipv4Addr::new(10, 0, 0, 1),
                Ipv4Addr::new(10, 0, 0, 3)
            )]
        );
    }

    #[test]
    fn drop_priority_must_outrank_forwarding() {
        let err = parse("[flows]\nforward_priority = 10\ndrop_priority = 10\n").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(parse("[flows]\nforward_priority = 0\n").is_err());
    }

    #[test]
    fn example_file_loads() {
        let config = load(concat!(
            env!("CARGO_MANIFEST_DIR"),
            "/config/controller.example.toml"
        ))
        .unwrap();
        assert_eq!(config.flows, FlowConfig::default());
        assert_eq!(config.firewall.block.len(), 1);
    }

    #[test]
    fn rejects_unknown_keys_and_bad_addresses() {
        assert!(parse("lisen = \"127.0.0.1:6633\"").is_err());
        assert!(parse("[[firewall.block]]\nsrc = \"10.0.0.300\"\ndst = \"10.0.0.1\"\n").is_err());
    }

    #[test]
    fn rejects_bad_logging() {
        assert!(parse("[logging]\nformat = \"xml\"\n").is_err());
        let err = parse("[logging]\nlevel = \"verbose\"\n").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
