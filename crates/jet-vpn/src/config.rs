//! Daemon configuration (TOML)

use anyhow::{Context, Result};
use jet_session::InterfaceSettings;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Host-side settings for running a session manager
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Directory holding the persisted connection flag
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    /// Directory of `.ovpn` profiles
    #[serde(default = "default_config_dir")]
    pub config_dir: PathBuf,
    /// Simulated handshake time
    #[serde(default = "default_negotiate_delay_ms")]
    pub negotiate_delay_ms: u64,
    /// Tunnel interface settings
    #[serde(default)]
    pub interface: InterfaceSettings,
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("/tmp/jet-vpn/state")
}

fn default_config_dir() -> PathBuf {
    PathBuf::from("ovpns")
}

fn default_negotiate_delay_ms() -> u64 {
    2000
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            config_dir: default_config_dir(),
            negotiate_delay_ms: default_negotiate_delay_ms(),
            interface: InterfaceSettings::default(),
        }
    }
}

impl DaemonConfig {
    /// Load from a TOML file; a missing file yields the defaults
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_toml(&content).with_context(|| format!("Invalid config {}", path.display()))
    }

    /// Load from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Export as TOML
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn negotiate_delay(&self) -> Duration {
        Duration::from_millis(self.negotiate_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_gives_defaults() {
        let config = DaemonConfig::from_toml("").unwrap();

        assert_eq!(config, DaemonConfig::default());
        assert_eq!(config.negotiate_delay(), Duration::from_secs(2));
        assert_eq!(config.interface.mtu, 1500);
    }

    #[test]
    fn test_partial_interface_table() {
        let config = DaemonConfig::from_toml(
            r#"
            negotiate_delay_ms = 10

            [interface]
            mtu = 1400
            dns = ["1.1.1.1"]
            "#,
        )
        .unwrap();

        assert_eq!(config.negotiate_delay_ms, 10);
        assert_eq!(config.interface.mtu, 1400);
        assert_eq!(config.interface.dns.len(), 1);
        // Unspecified fields keep their defaults
        assert_eq!(config.interface.prefix_len, 24);
        assert_eq!(config.interface.routes.len(), 1);
    }

    #[test]
    fn test_sample_round_trips() {
        let sample = DaemonConfig::default().to_toml().unwrap();
        assert_eq!(DaemonConfig::from_toml(&sample).unwrap(), DaemonConfig::default());
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = DaemonConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, DaemonConfig::default());
    }
}
