//! Key namespace for merge groups
//!
//! Every merge group owns four keys under a shared namespace, and all groups
//! share one registry set:
//!
//! | Key                         | Type   | Holds                          |
//! |-----------------------------|--------|--------------------------------|
//! | `{ns}:merges`               | set    | active group keys              |
//! | `{ns}:unique_msg:{group}`   | set    | distinct encoded messages      |
//! | `{ns}:msg:{group}`          | list   | pending messages, newest first |
//! | `{ns}:time:{group}`         | string | scheduled flush time           |
//! | `{ns}:lock:{group}`         | string | drain lock, with a TTL         |

use crate::config::ConfigError;

pub const DEFAULT_NAMESPACE: &str = "merge-buffer";

const GLOB_CHARS: [char; 5] = ['*', '?', '[', ']', '\\'];

/// Derives store keys for merge groups under one namespace.
///
/// Group keys are used verbatim, including the empty string. The namespace
/// must be non-empty and free of glob characters, since bulk reset deletes by
/// pattern.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeySpace {
    namespace: String,
}

impl KeySpace {
    pub fn new(namespace: impl Into<String>) -> Result<Self, ConfigError> {
        let namespace = namespace.into();
        validate_namespace(&namespace)?;
        Ok(KeySpace { namespace })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn merges_key(&self) -> String {
        format!("{}:merges", self.namespace)
    }

    pub fn unique_msg_key(&self, group: &str) -> String {
        format!("{}:unique_msg:{}", self.namespace, group)
    }

    pub fn msg_key(&self, group: &str) -> String {
        format!("{}:msg:{}", self.namespace, group)
    }

    pub fn time_key(&self, group: &str) -> String {
        format!("{}:time:{}", self.namespace, group)
    }

    pub fn lock_key(&self, group: &str) -> String {
        format!("{}:lock:{}", self.namespace, group)
    }

    /// Glob patterns covering every key this namespace can own.
    pub fn purge_patterns(&self) -> Vec<String> {
        vec![
            self.merges_key(),
            self.unique_msg_key("*"),
            self.msg_key("*"),
            self.time_key("*"),
            self.lock_key("*"),
        ]
    }
}

impl Default for KeySpace {
    fn default() -> Self {
        KeySpace {
            namespace: DEFAULT_NAMESPACE.to_string(),
        }
    }
}

pub(crate) fn validate_namespace(namespace: &str) -> Result<(), ConfigError> {
    if namespace.is_empty() {
        return Err(ConfigError::Invalid("namespace must not be empty".to_string()));
    }
    if namespace.contains(GLOB_CHARS) {
        return Err(ConfigError::Invalid(format!(
            "namespace '{}' contains glob characters",
            namespace
        )));
    }
    Ok(())
}
