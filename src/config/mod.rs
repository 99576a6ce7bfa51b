use serde::{Serialize, Deserialize};
use std::fs;
use std::path::Path;
use log::info;

mod node;
mod p2p;

pub use node::NodeConfig;
pub use p2p::SwitchConfig;

use crate::error::{P2pError, Result};

/// Main configuration file of a node
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Node configuration
    #[serde(default)]
    pub node: NodeConfig,

    /// Switch configuration
    #[serde(default)]
    pub p2p: SwitchConfig,
}

impl Config {
    /// Load configuration from a file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config_str = fs::read_to_string(path)
            .map_err(|e| P2pError::Config(format!("Failed to read config file: {}", e)))?;

        Self::from_toml(&config_str)
    }

    /// Parse configuration from a TOML document
    pub fn from_toml(config_str: &str) -> Result<Self> {
        toml::from_str(config_str)
            .map_err(|e| P2pError::Config(format!("Failed to parse config file: {}", e)))
    }

    /// Save configuration to a file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let config_str = toml::to_string_pretty(self)
            .map_err(|e| P2pError::Config(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, config_str)
            .map_err(|e| P2pError::Config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    /// Generate a default configuration file if it doesn't exist
    pub fn generate_default<P: AsRef<Path>>(path: P) -> Result<()> {
        let path = path.as_ref();

        if path.exists() {
            info!("Config file already exists at {:?}", path);
            return Ok(());
        }

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)
                    .map_err(|e| P2pError::Config(format!("Failed to create config directory: {}", e)))?;
            }
        }

        Config::default().save(path)?;

        info!("Generated default config at {:?}", path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("node.toml");

        let mut config = Config::default();
        config.node.node_name = "validator-1".to_string();
        config.p2p.bootstrap = vec!["/ip4/127.0.0.1/tcp/30100/p2p/12D3KooWEyoppNCUx8Yx66oV9fJnriXwCcXwDDUA2kj6vnc6iDEp".to_string()];
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.node.node_name, "validator-1");
        assert_eq!(loaded.p2p.bootstrap, config.p2p.bootstrap);
        assert_eq!(loaded.p2p.address, config.p2p.address);
    }

    #[test]
    fn test_missing_sections_use_defaults() {
        let config = Config::from_toml("[p2p]\naddress = \"/ip4/0.0.0.0/tcp/4001\"\n").unwrap();
        assert_eq!(config.p2p.address, "/ip4/0.0.0.0/tcp/4001");
        assert_eq!(config.p2p.discovery_interval().as_secs(), 4);
        assert_eq!(config.node.log_level, "info");
    }

    #[test]
    fn test_generate_default_keeps_existing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("node.toml");

        Config::generate_default(&path).unwrap();
        assert!(path.exists());

        let mut custom = Config::default();
        custom.node.node_name = "custom".to_string();
        custom.save(&path).unwrap();

        Config::generate_default(&path).unwrap();
        assert_eq!(Config::load(&path).unwrap().node.node_name, "custom");
    }

    #[test]
    fn test_invalid_toml() {
        assert!(matches!(Config::from_toml("p2p = 3 = 4"), Err(P2pError::Config(_))));
    }
}
