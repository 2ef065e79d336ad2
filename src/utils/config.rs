//! Configuration management for the wrapped-key messenger.
//!
//! TOML-based configuration layered from defaults, an optional file and
//! environment variables, with validation of every value the connection
//! handlers depend on.

use crate::utils::{ConfigError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default configuration file name
pub const DEFAULT_CONFIG_FILE: &str = "messenger.toml";

/// Environment variable prefix for configuration
pub const ENV_PREFIX: &str = "MESSENGER";

/// Smallest modulus size whose wrapped key material always stays below `n`
pub const MIN_KEY_BITS: u32 = 16;

/// Largest modulus size trial division can reasonably factor-check
pub const MAX_KEY_BITS: u32 = 80;

/// Complete configuration for the messenger application
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MessengerConfig {
    /// Network configuration
    pub network: NetworkConfig,
    /// Key generation configuration
    pub crypto: CryptoConfig,
    /// Interactive session configuration
    pub session: SessionConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Network configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Host to bind (listener) or connect to (initiator)
    pub host: String,
    /// TCP port
    pub port: u16,
    /// Upper bound on concurrently served connections (unbounded when absent)
    pub max_connections: Option<usize>,
}

/// Key generation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoConfig {
    /// Modulus size for the per-connection keypair
    pub key_bits: u32,
}

/// Interactive session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Input line that ends the initiator's send loop
    pub quit_command: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    pub level: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host: crate::defaults::DEFAULT_HOST.to_string(),
            port: crate::defaults::DEFAULT_PORT,
            max_connections: None,
        }
    }
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            key_bits: crate::defaults::DEFAULT_KEY_BITS,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            quit_command: crate::defaults::DEFAULT_QUIT_COMMAND.to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl MessengerConfig {
    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns error if file cannot be read, parsed or fails validation
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
            path: path.display().to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(ConfigError::from)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration with multiple sources (default, file, environment)
    ///
    /// An explicit `config_file` that does not exist is an error; the default
    /// locations are only used when present.
    pub fn load(config_file: Option<&Path>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(path) = config_file {
            config = config.merge(Self::from_file(path)?);
        } else {
            let default_locations = [
                PathBuf::from(DEFAULT_CONFIG_FILE),
                dirs::config_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join("wrapkey-messenger")
                    .join(DEFAULT_CONFIG_FILE),
            ];

            for location in &default_locations {
                if location.exists() {
                    config = config.merge(Self::from_file(location)?);
                    break;
                }
            }
        }

        config = config.merge_from_env()?;
        config.validate()?;

        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        std::fs::write(path, self.to_toml_string()?)?;
        Ok(())
    }

    /// Merge this configuration with another, preferring values from other
    pub fn merge(mut self, other: Self) -> Self {
        self.network = other.network;
        self.crypto = other.crypto;
        self.session = other.session;
        self.logging = other.logging;
        self
    }

    /// Merge configuration from `MESSENGER_*` environment variables
    fn merge_from_env(self) -> Result<Self> {
        self.merge_from_vars(|name| std::env::var(name).ok())
    }

    /// Merge `MESSENGER_*` values supplied by `lookup`
    fn merge_from_vars<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup(&format!("{ENV_PREFIX}_NETWORK_HOST")) {
            self.network.host = host;
        }

        if let Some(port) = lookup(&format!("{ENV_PREFIX}_NETWORK_PORT")) {
            self.network.port = port.parse().map_err(|_| ConfigError::InvalidValue {
                field: format!("{ENV_PREFIX}_NETWORK_PORT"),
                value: port,
            })?;
        }

        if let Some(bits) = lookup(&format!("{ENV_PREFIX}_CRYPTO_KEY_BITS")) {
            self.crypto.key_bits = bits.parse().map_err(|_| ConfigError::InvalidValue {
                field: format!("{ENV_PREFIX}_CRYPTO_KEY_BITS"),
                value: bits,
            })?;
        }

        if let Some(level) = lookup(&format!("{ENV_PREFIX}_LOGGING_LEVEL")) {
            self.logging.level = level;
        }

        Ok(self)
    }

    /// Validate the configuration for consistency and correctness
    pub fn validate(&self) -> Result<()> {
        if self.network.host.trim().is_empty() {
            return Err(invalid("network.host", &self.network.host));
        }

        if self.network.port == 0 {
            return Err(invalid("network.port", "0"));
        }

        if self.network.max_connections == Some(0) {
            return Err(invalid("network.max_connections", "0"));
        }

        if !(MIN_KEY_BITS..=MAX_KEY_BITS).contains(&self.crypto.key_bits) {
            return Err(invalid(
                "crypto.key_bits",
                &self.crypto.key_bits.to_string(),
            ));
        }

        if self.session.quit_command.trim().is_empty() {
            return Err(invalid("session.quit_command", &self.session.quit_command));
        }

        match self.logging.level.as_str() {
            "error" | "warn" | "info" | "debug" | "trace" => {}
            _ => return Err(invalid("logging.level", &self.logging.level)),
        }

        Ok(())
    }

    /// `host:port` string for binding or connecting
    pub fn address(&self) -> String {
        format!("{}:{}", self.network.host, self.network.port)
    }

    /// Get the configuration as a pretty-printed TOML string
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| {
            ConfigError::ParseError {
                reason: e.to_string(),
            }
            .into()
        })
    }
}

fn invalid(field: &str, value: &str) -> crate::utils::MessengerError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = MessengerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.network.port, crate::defaults::DEFAULT_PORT);
        assert_eq!(config.crypto.key_bits, 64);
        assert_eq!(config.session.quit_command, "quit");
        assert!(config.network.max_connections.is_none());
        assert_eq!(config.address(), "127.0.0.1:5555");
    }

    #[test]
    fn test_config_serialization() {
        let config = MessengerConfig::default();
        let toml_str = config.to_toml_string().unwrap();
        assert!(toml_str.contains("key_bits"));
        assert!(toml_str.contains("quit_command"));
    }

    #[test]
    fn test_config_file_operations() {
        let mut config = MessengerConfig::default();
        config.network.port = 6001;
        config.crypto.key_bits = 48;
        let temp_file = NamedTempFile::new().unwrap();

        config.save(temp_file.path()).unwrap();
        let loaded = MessengerConfig::from_file(temp_file.path()).unwrap();

        assert_eq!(loaded.network.port, 6001);
        assert_eq!(loaded.crypto.key_bits, 48);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let temp_file = NamedTempFile::new().unwrap();
        std::fs::write(temp_file.path(), "[network]\nport = 7000\n").unwrap();

        let loaded = MessengerConfig::from_file(temp_file.path()).unwrap();
        assert_eq!(loaded.network.port, 7000);
        assert_eq!(loaded.network.host, "127.0.0.1");
        assert_eq!(loaded.crypto.key_bits, 64);
    }

    #[test]
    fn test_missing_explicit_file() {
        let result = MessengerConfig::load(Some(Path::new("/definitely/not/here.toml")));
        assert!(result.is_err());
    }

    #[test]
    fn test_config_validation() {
        let mut config = MessengerConfig::default();
        config.network.port = 0;
        assert!(config.validate().is_err());

        config = MessengerConfig::default();
        config.crypto.key_bits = 4;
        assert!(config.validate().is_err());

        config = MessengerConfig::default();
        config.crypto.key_bits = 4096;
        assert!(config.validate().is_err());

        config = MessengerConfig::default();
        config.network.max_connections = Some(0);
        assert!(config.validate().is_err());

        config = MessengerConfig::default();
        config.logging.level = "invalid".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_merge() {
        let config1 = MessengerConfig::default();
        let mut config2 = MessengerConfig::default();
        config2.network.port = 4002;

        let merged = config1.merge(config2);
        assert_eq!(merged.network.port, 4002);
    }

    #[test]
    fn test_env_override() {
        let vars: std::collections::HashMap<String, String> = [
            ("MESSENGER_CRYPTO_KEY_BITS", "40"),
            ("MESSENGER_NETWORK_HOST", "0.0.0.0"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let config = MessengerConfig::default()
            .merge_from_vars(|name| vars.get(name).cloned())
            .unwrap();
        assert_eq!(config.crypto.key_bits, 40);
        assert_eq!(config.network.host, "0.0.0.0");
        assert_eq!(config.network.port, crate::defaults::DEFAULT_PORT);
    }

    #[test]
    fn test_env_override_rejects_bad_port() {
        let err = MessengerConfig::default()
            .merge_from_vars(|name| {
                (name == "MESSENGER_NETWORK_PORT").then(|| "not-a-port".to_string())
            })
            .unwrap_err();
        assert_eq!(err.kind(), crate::utils::FailureKind::Config);
    }
}
