//! Daemon configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tether_core::{DiscoveryFailurePolicy, ReconnectPolicy};

/// Daemon configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server settings.
    pub server: ServerConfig,
    /// Target persistence settings.
    pub storage: StorageConfig,
    /// Link maintenance settings.
    pub link: LinkSettings,
}

impl Config {
    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = default_config_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Read {
            path: path.as_ref().to_path_buf(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Save configuration to a file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;

        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        std::fs::write(path.as_ref(), content).map_err(|e| ConfigError::Write {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Validate the configuration and return any errors.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();
        errors.extend(self.server.validate());
        errors.extend(self.storage.validate());
        errors.extend(self.link.validate());

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (e.g., "127.0.0.1:8737").
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8737".to_string(),
        }
    }
}

impl ServerConfig {
    /// Validate server configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.bind.is_empty() {
            errors.push(ValidationError {
                field: "server.bind".to_string(),
                message: "bind address cannot be empty".to_string(),
            });
            return errors;
        }

        let parts: Vec<&str> = self.bind.rsplitn(2, ':').collect();
        if parts.len() != 2 {
            errors.push(ValidationError {
                field: "server.bind".to_string(),
                message: format!(
                    "invalid bind address '{}': expected format 'host:port'",
                    self.bind
                ),
            });
        } else {
            match parts[0].parse::<u16>() {
                Ok(0) => errors.push(ValidationError {
                    field: "server.bind".to_string(),
                    message: "port cannot be 0".to_string(),
                }),
                Err(_) => errors.push(ValidationError {
                    field: "server.bind".to_string(),
                    message: format!("invalid port '{}': must be a number 1-65535", parts[0]),
                }),
                Ok(_) => {}
            }
        }

        errors
    }
}

/// Target persistence configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Target file path.
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: crate::store::default_store_path(),
        }
    }
}

impl StorageConfig {
    /// Validate storage configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.path.as_os_str().is_empty() {
            errors.push(ValidationError {
                field: "storage.path".to_string(),
                message: "target file path cannot be empty".to_string(),
            });
        }

        errors
    }
}

/// How a discovery failure is handled, in config form.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnDiscoveryFailure {
    /// Log and keep the link up.
    #[default]
    Wait,
    /// Drop the link and retry.
    Retry,
}

/// Minimum retry delay in seconds.
pub const MIN_RETRY_DELAY: u64 = 1;
/// Maximum retry delay in seconds (5 minutes).
pub const MAX_RETRY_DELAY: u64 = 300;

fn default_retry_delay() -> u64 {
    5
}

fn default_max_attempts() -> u32 {
    5
}

/// Link maintenance configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkSettings {
    /// Delay between reconnect attempts, in seconds.
    pub retry_delay: u64,
    /// Consecutive failed attempts before giving up. 0 retries forever.
    pub max_attempts: u32,
    /// Add random jitter to retry delays.
    pub jitter: bool,
    /// What a service discovery failure does to the cycle.
    pub on_discovery_failure: OnDiscoveryFailure,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            retry_delay: default_retry_delay(),
            max_attempts: default_max_attempts(),
            jitter: false,
            on_discovery_failure: OnDiscoveryFailure::default(),
        }
    }
}

impl LinkSettings {
    /// Validate link configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.retry_delay < MIN_RETRY_DELAY {
            errors.push(ValidationError {
                field: "link.retry_delay".to_string(),
                message: format!(
                    "retry delay {} is too short (minimum {} second)",
                    self.retry_delay, MIN_RETRY_DELAY
                ),
            });
        } else if self.retry_delay > MAX_RETRY_DELAY {
            errors.push(ValidationError {
                field: "link.retry_delay".to_string(),
                message: format!(
                    "retry delay {} is too long (maximum {} seconds / 5 minutes)",
                    self.retry_delay, MAX_RETRY_DELAY
                ),
            });
        }

        errors
    }

    /// Build the reconnect policy this configuration describes.
    pub fn to_policy(&self) -> ReconnectPolicy {
        let policy = ReconnectPolicy::default()
            .delay(Duration::from_secs(self.retry_delay))
            .jitter(self.jitter)
            .on_discovery_failure(match self.on_discovery_failure {
                OnDiscoveryFailure::Wait => DiscoveryFailurePolicy::LogAndWait,
                OnDiscoveryFailure::Retry => DiscoveryFailurePolicy::DropAndRetry,
            });
        match self.max_attempts {
            0 => policy.unlimited(),
            n => policy.max_attempts(n),
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Failed to serialize config: {0}")]
    Serialize(toml::ser::Error),
    #[error("Failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Configuration validation failed:\n{}", format_validation_errors(.0))]
    Validation(Vec<ValidationError>),
}

/// A single validation error with context.
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// The field path (e.g., `server.bind`).
    pub field: String,
    /// Description of the validation failure.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn format_validation_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tether")
        .join("service.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.server.bind, "127.0.0.1:8737");
        assert_eq!(config.link.retry_delay, 5);
        assert_eq!(config.link.max_attempts, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_link_settings_to_policy() {
        let settings = LinkSettings {
            retry_delay: 10,
            max_attempts: 3,
            jitter: true,
            on_discovery_failure: OnDiscoveryFailure::Retry,
        };
        let policy = settings.to_policy();
        assert_eq!(policy.delay, Duration::from_secs(10));
        assert_eq!(policy.max_attempts, Some(3));
        assert!(policy.jitter);
        assert_eq!(
            policy.on_discovery_failure,
            DiscoveryFailurePolicy::DropAndRetry
        );
    }

    #[test]
    fn test_zero_max_attempts_means_unlimited() {
        let settings = LinkSettings {
            max_attempts: 0,
            ..Default::default()
        };
        assert_eq!(settings.to_policy().max_attempts, None);
    }

    #[test]
    fn test_config_save_and_load() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config_path = temp_dir.path().join("service.toml");

        let config = Config {
            server: ServerConfig {
                bind: "0.0.0.0:9090".to_string(),
            },
            storage: StorageConfig {
                path: PathBuf::from("/tmp/target.json"),
            },
            link: LinkSettings {
                retry_delay: 30,
                max_attempts: 0,
                jitter: true,
                on_discovery_failure: OnDiscoveryFailure::Retry,
            },
        };

        config.save(&config_path).unwrap();
        let loaded = Config::load(&config_path).unwrap();

        assert_eq!(loaded.server.bind, "0.0.0.0:9090");
        assert_eq!(loaded.storage.path, PathBuf::from("/tmp/target.json"));
        assert_eq!(loaded.link.retry_delay, 30);
        assert_eq!(loaded.link.max_attempts, 0);
        assert_eq!(loaded.link.on_discovery_failure, OnDiscoveryFailure::Retry);
    }

    #[test]
    fn test_config_full_toml() {
        let toml = r#"
            [server]
            bind = "192.168.1.1:8888"

            [storage]
            path = "/data/target.json"

            [link]
            retry_delay = 15
            max_attempts = 10
            on_discovery_failure = "retry"
        "#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.server.bind, "192.168.1.1:8888");
        assert_eq!(config.link.retry_delay, 15);
        assert_eq!(config.link.max_attempts, 10);
        assert!(!config.link.jitter);
    }

    #[test]
    fn test_config_load_nonexistent() {
        let result = Config::load("/nonexistent/path/config.toml");
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }

    #[test]
    fn test_server_bind_validation() {
        let no_port = ServerConfig {
            bind: "127.0.0.1".to_string(),
        };
        let errors = no_port.validate();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("host:port"));

        let port_zero = ServerConfig {
            bind: "127.0.0.1:0".to_string(),
        };
        assert!(port_zero.validate()[0].message.contains("cannot be 0"));

        let valid_ipv6 = ServerConfig {
            bind: "[::1]:8737".to_string(),
        };
        assert!(valid_ipv6.validate().is_empty());
    }

    #[test]
    fn test_retry_delay_validation() {
        let too_short = LinkSettings {
            retry_delay: 0,
            ..Default::default()
        };
        assert!(too_short.validate()[0].message.contains("too short"));

        let too_long = LinkSettings {
            retry_delay: 3600,
            ..Default::default()
        };
        assert!(too_long.validate()[0].message.contains("too long"));
    }

    #[test]
    fn test_default_config_path() {
        let path = default_config_path();
        assert!(path.ends_with("tether/service.toml"));
    }
}
