//! Broker configuration.
//!
//! Values are layered: built-in defaults, then an optional TOML file,
//! then the `PARLEY_ADDR` environment variable, then command-line flags
//! (applied by the binary after [`ServerConfig::load`] returns).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use parley_protocol::MAX_LINE_SIZE;

use crate::broadcast::DeliveryPolicy;
use crate::registry::DEFAULT_CHANNEL_CAPACITY;

/// Default listen address.
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:12021";

/// Environment variable overriding `listen_addr`.
pub const ADDR_ENV_VAR: &str = "PARLEY_ADDR";

/// Default shared login password.
pub const DEFAULT_PASSWORD: &str = "nada";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Broker settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// TCP address to listen on
    pub listen_addr: String,

    /// Capacity of each client's delivery channel
    pub channel_capacity: usize,

    /// Capacity of each chat stream's inbound outbox
    pub outbox_capacity: usize,

    /// Behavior when a delivery channel is full
    pub delivery: DeliveryPolicy,

    /// Shared password for `login`
    pub password: String,

    /// Longest accepted line in bytes
    pub max_message_size: usize,

    /// Idle timeout for control connections
    pub read_timeout_secs: u64,

    /// Idle timeout for chat streams; unset means none
    pub stream_read_timeout_secs: Option<u64>,

    pub write_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            outbox_capacity: 100,
            delivery: DeliveryPolicy::Block,
            password: DEFAULT_PASSWORD.to_string(),
            max_message_size: MAX_LINE_SIZE,
            read_timeout_secs: 300,
            stream_read_timeout_secs: None,
            write_timeout_secs: 10,
        }
    }
}

impl ServerConfig {
    /// Default config file location: `<config dir>/parley/parleyd.toml`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("parley").join("parleyd.toml"))
    }

    /// Loads configuration.
    ///
    /// An explicit `path` must exist. Without one, the default location is
    /// read if present. `PARLEY_ADDR` then overrides the listen address.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match Self::default_path() {
                Some(default) if default.exists() => Self::from_file(&default)?,
                _ => Self::default(),
            },
        };

        if let Ok(addr) = std::env::var(ADDR_ENV_VAR) {
            if !addr.trim().is_empty() {
                config.listen_addr = addr;
            }
        }

        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.listen_addr.trim().is_empty() {
            return Err(ConfigError::Invalid("listen_addr must not be empty".into()));
        }
        if self.channel_capacity == 0 || self.outbox_capacity == 0 {
            return Err(ConfigError::Invalid(
                "channel_capacity and outbox_capacity must be positive".into(),
            ));
        }
        if self.max_message_size == 0 {
            return Err(ConfigError::Invalid("max_message_size must be positive".into()));
        }
        Ok(())
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub fn stream_read_timeout(&self) -> Option<Duration> {
        self.stream_read_timeout_secs.map(Duration::from_secs)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.listen_addr, "127.0.0.1:12021");
        assert_eq!(config.channel_capacity, 100);
        assert_eq!(config.delivery, DeliveryPolicy::Block);
        assert_eq!(config.password, "nada");
        assert_eq!(config.read_timeout(), Duration::from_secs(300));
        assert!(config.stream_read_timeout().is_none());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = ServerConfig::from_toml("delivery = \"drop\"\nchannel_capacity = 8\n").unwrap();
        assert_eq!(config.delivery, DeliveryPolicy::Drop);
        assert_eq!(config.channel_capacity, 8);
        assert_eq!(config.outbox_capacity, 100);
    }

    #[test]
    fn test_unknown_field_rejected() {
        assert!(ServerConfig::from_toml("listen = \"x\"").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "password = \"secret\"").unwrap();
        writeln!(file, "write_timeout_secs = 3").unwrap();

        let config = ServerConfig::from_file(file.path()).unwrap();
        assert_eq!(config.password, "secret");
        assert_eq!(config.write_timeout(), Duration::from_secs(3));
    }

    #[test]
    fn test_missing_explicit_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let result = ServerConfig::load(Some(&dir.path().join("absent.toml")));
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }

    #[test]
    fn test_default_path_under_config_dir() {
        if let Some(path) = ServerConfig::default_path() {
            assert!(path.ends_with("parley/parleyd.toml"));
        }
    }

    #[test]
    fn test_zero_capacity_invalid() {
        let config = ServerConfig {
            channel_capacity: 0,
            ..ServerConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }
}
