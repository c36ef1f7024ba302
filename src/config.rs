//! Configuration for the merge buffer
//!
//! Loaded from a TOML file or from environment variables:
//!
//! | Variable                            | Default                  |
//! |-------------------------------------|--------------------------|
//! | `MERGE_BUFFER_NAMESPACE`            | `merge-buffer`           |
//! | `MERGE_BUFFER_STORE`                | `redis`                  |
//! | `MERGE_BUFFER_REDIS_URL`            | `redis://127.0.0.1:6379` |
//! | `MERGE_BUFFER_RESOLVE_TIMEOUT_MS`   | `1000`                   |
//! | `MERGE_BUFFER_RESOLVE_BACKOFF_MS`   | `1`                      |

use crate::keys::{validate_namespace, DEFAULT_NAMESPACE};
use crate::store::ResolvePolicy;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Error loading configuration
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "failed to read config: {}", e),
            ConfigError::Parse(e) => write!(f, "failed to parse config: {}", e),
            ConfigError::Invalid(msg) => write!(f, "invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io(e) => Some(e),
            ConfigError::Parse(e) => Some(e),
            ConfigError::Invalid(_) => None,
        }
    }
}

/// Main configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeBufferConfig {
    /// Prefix shared by every key the buffer writes
    pub namespace: String,
    /// Give up waiting for a deferred transaction reply after this long
    #[serde(with = "duration_millis")]
    pub resolve_timeout: Duration,
    /// Pause between polls of a deferred reply
    #[serde(with = "duration_millis")]
    pub resolve_backoff: Duration,
    pub store: StoreConfig,
}

impl Default for MergeBufferConfig {
    fn default() -> Self {
        MergeBufferConfig {
            namespace: DEFAULT_NAMESPACE.to_string(),
            resolve_timeout: Duration::from_secs(1),
            resolve_backoff: Duration::from_millis(1),
            store: StoreConfig::default(),
        }
    }
}

impl MergeBufferConfig {
    /// Configuration for tests (in-memory store, short waits)
    pub fn test() -> Self {
        MergeBufferConfig {
            namespace: "merge-buffer-test".to_string(),
            resolve_timeout: Duration::from_millis(100),
            resolve_backoff: Duration::from_millis(1),
            store: StoreConfig {
                kind: StoreKind::Memory,
                ..StoreConfig::default()
            },
        }
    }

    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: MergeBufferConfig = toml::from_str(s).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        Self::from_toml_str(&contents)
    }

    /// Defaults overridden by `MERGE_BUFFER_*` environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_overrides(|name| std::env::var(name).ok())
    }

    /// Apply `MERGE_BUFFER_*` overrides from an arbitrary lookup
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(ns) = lookup("MERGE_BUFFER_NAMESPACE") {
            self.namespace = ns;
        }
        if let Some(kind) = lookup("MERGE_BUFFER_STORE") {
            self.store.kind = match kind.to_ascii_lowercase().as_str() {
                "redis" => StoreKind::Redis,
                "memory" => StoreKind::Memory,
                other => {
                    return Err(ConfigError::Invalid(format!("unknown store kind '{}'", other)))
                }
            };
        }
        if let Some(url) = lookup("MERGE_BUFFER_REDIS_URL") {
            self.store.redis_url = url;
        }
        if let Some(ms) = lookup("MERGE_BUFFER_RESOLVE_TIMEOUT_MS") {
            self.resolve_timeout = parse_millis("MERGE_BUFFER_RESOLVE_TIMEOUT_MS", &ms)?;
        }
        if let Some(ms) = lookup("MERGE_BUFFER_RESOLVE_BACKOFF_MS") {
            self.resolve_backoff = parse_millis("MERGE_BUFFER_RESOLVE_BACKOFF_MS", &ms)?;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_namespace(&self.namespace)?;
        if self.resolve_timeout.is_zero() {
            return Err(ConfigError::Invalid("resolve_timeout must be positive".to_string()));
        }
        Ok(())
    }

    pub fn resolve_policy(&self) -> ResolvePolicy {
        ResolvePolicy {
            timeout: self.resolve_timeout,
            backoff: self.resolve_backoff,
        }
    }
}

fn parse_millis(name: &str, value: &str) -> Result<Duration, ConfigError> {
    value
        .trim()
        .parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|_| ConfigError::Invalid(format!("{} must be milliseconds, got '{}'", name, value)))
}

/// Which store backend to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    Redis,
    /// Process-local; only useful for tests and single-process embedding
    Memory,
}

/// Store connection settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub kind: StoreKind,
    pub redis_url: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            kind: StoreKind::Redis,
            redis_url: "redis://127.0.0.1:6379".to_string(),
        }
    }
}

/// Serde helper for Duration as milliseconds
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
