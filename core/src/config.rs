//! Configuration management (config.toml)
//!
//! Network defaults and transport timings, stored in TOML format in the
//! platform-specific config directory. Every section and field is optional;
//! anything missing falls back to its default.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default port the host listens on
pub const DEFAULT_PORT: u16 = 8888;

/// Name of the configuration file inside the config directory
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Application configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Config {
    /// Where to find the host, and which port to host on
    #[serde(default)]
    pub network: NetworkConfig,
    /// Transport timings
    #[serde(default)]
    pub transport: TransportConfig,
}

/// Session addressing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Address clients connect to (default: 127.0.0.1:8888)
    #[serde(default = "default_host_address")]
    pub host_address: SocketAddr,
    /// Local port for hosts and dedicated servers (default: 8888)
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Transport timings, in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Retransmission interval for unacked packets (default: 100)
    #[serde(default = "default_resend_interval_ms")]
    pub resend_interval_ms: u64,
    /// Give up on an unanswered connection attempt after this long (default: 5000)
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Drop a peer that has been silent this long (default: 10000)
    #[serde(default = "default_peer_timeout_ms")]
    pub peer_timeout_ms: u64,
    /// Send a keepalive after this much idle time (default: 1000)
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
}

fn default_host_address() -> SocketAddr {
    SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, DEFAULT_PORT))
}
fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_resend_interval_ms() -> u64 {
    100
}
fn default_connect_timeout_ms() -> u64 {
    5_000
}
fn default_peer_timeout_ms() -> u64 {
    10_000
}
fn default_heartbeat_interval_ms() -> u64 {
    1_000
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host_address: default_host_address(),
            port: default_port(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            resend_interval_ms: default_resend_interval_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            peer_timeout_ms: default_peer_timeout_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
        }
    }
}

impl TransportConfig {
    pub fn resend_interval(&self) -> Duration {
        Duration::from_millis(self.resend_interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn peer_timeout(&self) -> Duration {
        Duration::from_millis(self.peer_timeout_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }
}

/// Configuration file errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("host address {0} is not IPv4; sessions run over IPv4 only")]
    UnsupportedHostAddress(SocketAddr),
}

impl Config {
    /// Load from an explicit path, reporting any failure
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check values the transport cannot use
    pub fn validate(&self) -> Result<(), ConfigError> {
        let host_address = self.network.host_address;
        if !host_address.is_ipv4() {
            return Err(ConfigError::UnsupportedHostAddress(host_address));
        }
        Ok(())
    }

    /// Write to an explicit path, creating parent directories as needed
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        let io_err = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        std::fs::write(path, content).map_err(io_err)
    }
}

/// Returns the platform-specific configuration directory.
///
/// On Windows: `%APPDATA%\TicTac\config`
/// On macOS: `~/Library/Application Support/io.tictac.TicTac`
/// On Linux: `~/.config/TicTac`
///
/// Returns `None` if the home directory cannot be determined.
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("io.tictac", "", "TicTac")
        .map(|dirs| dirs.config_dir().to_path_buf())
}

/// Loads the configuration from the platform config directory.
///
/// Returns default values if the file doesn't exist or cannot be parsed.
pub fn load() -> Config {
    let Some(path) = config_dir().map(|dir| dir.join(CONFIG_FILE_NAME)) else {
        return Config::default();
    };
    if !path.exists() {
        return Config::default();
    }
    match Config::load_from(&path) {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!(error = %e, "Ignoring invalid config file");
            Config::default()
        }
    }
}

/// Saves the configuration to the platform config directory.
pub fn save(config: &Config) -> Result<(), ConfigError> {
    match config_dir() {
        Some(dir) => config.save_to(&dir.join(CONFIG_FILE_NAME)),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.network.host_address.to_string(), "127.0.0.1:8888");
        assert_eq!(config.network.port, 8888);
        assert_eq!(config.transport.resend_interval(), Duration::from_millis(100));
        assert_eq!(config.transport.connect_timeout(), Duration::from_secs(5));
        assert_eq!(config.transport.peer_timeout(), Duration::from_secs(10));
        assert_eq!(config.transport.heartbeat_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_config_deserialize_empty() {
        // Empty TOML should produce defaults
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_config_deserialize_partial() {
        let toml_str = r#"
[network]
host_address = "10.0.0.7:9000"

[transport]
peer_timeout_ms = 2500
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.network.host_address.to_string(), "10.0.0.7:9000");
        assert_eq!(config.network.port, 8888); // default
        assert_eq!(config.transport.peer_timeout_ms, 2500);
        assert_eq!(config.transport.resend_interval_ms, 100); // default
    }

    #[test]
    fn test_save_and_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE_NAME);

        let mut config = Config::default();
        config.network.port = 7000;
        config.transport.heartbeat_interval_ms = 250;
        config.save_to(&path).unwrap();

        assert_eq!(Config::load_from(&path).unwrap(), config);
    }

    #[test]
    fn test_load_rejects_ipv6_host() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "[network]\nhost_address = \"[::1]:8888\"\n").unwrap();

        let err = Config::load_from(&path).unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedHostAddress(addr) if addr.is_ipv6()));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load_from(&dir.path().join("missing.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_load_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "[network]\nport = \"not a port\"\n").unwrap();

        let err = Config::load_from(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("failed to parse"));
    }
}
