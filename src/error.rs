//! Error types for store access and merge buffer operations
//!
//! Store failures are surfaced unchanged; the merge buffer never retries.
//! Lock contention and draining an absent group are not errors.

use std::time::Duration;

/// Error returned by a `MergeStore` backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Connection refused, dropped, or otherwise unusable
    Connection(String),
    /// The store did not answer in time
    Timeout(String),
    /// The store rejected a command (server error reply)
    Command(String),
    /// The reply did not have the expected shape
    Protocol(String),
    /// The transaction was discarded by the store
    Aborted,
    /// The operation was applied but its reply never arrived
    ReplyLost,
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Connection(msg) => write!(f, "store connection error: {}", msg),
            StoreError::Timeout(msg) => write!(f, "store timeout: {}", msg),
            StoreError::Command(msg) => write!(f, "store command failed: {}", msg),
            StoreError::Protocol(msg) => write!(f, "unexpected store reply: {}", msg),
            StoreError::Aborted => write!(f, "store transaction aborted"),
            StoreError::ReplyLost => write!(f, "store reply lost after commit"),
        }
    }
}

impl std::error::Error for StoreError {}

impl StoreError {
    /// True when the failure happened before the store applied anything.
    pub fn is_before_apply(&self) -> bool {
        matches!(
            self,
            StoreError::Connection(_) | StoreError::Timeout(_) | StoreError::Aborted
        )
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Error returned by merge buffer operations
#[derive(Debug)]
pub enum MergeError {
    /// The underlying store failed
    Store(StoreError),
    /// A message could not be serialized
    Encode(serde_json::Error),
    /// A stored message could not be decoded
    Decode {
        group: String,
        source: serde_json::Error,
    },
    /// The stored scheduled time is not an integer
    InvalidTimestamp { group: String, raw: String },
    /// Lock TTL outside 1ms..=i64::MAX ms
    InvalidTtl(Duration),
    /// A deferred transaction reply never materialized
    ResolveTimeout { waited: Duration },
}

impl std::fmt::Display for MergeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MergeError::Store(e) => write!(f, "{}", e),
            MergeError::Encode(e) => write!(f, "failed to encode message: {}", e),
            MergeError::Decode { group, source } => {
                write!(f, "corrupt message in group '{}': {}", group, source)
            }
            MergeError::InvalidTimestamp { group, raw } => {
                write!(f, "corrupt scheduled time in group '{}': {:?}", group, raw)
            }
            MergeError::InvalidTtl(ttl) => {
                write!(f, "lock ttl must be between 1ms and i64::MAX ms, got {:?}", ttl)
            }
            MergeError::ResolveTimeout { waited } => {
                write!(f, "deferred reply not resolved after {:?}", waited)
            }
        }
    }
}

impl std::error::Error for MergeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MergeError::Store(e) => Some(e),
            MergeError::Encode(e) => Some(e),
            MergeError::Decode { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<StoreError> for MergeError {
    fn from(e: StoreError) -> Self {
        MergeError::Store(e)
    }
}

impl MergeError {
    /// True for data-integrity failures, as opposed to connectivity ones.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            MergeError::Decode { .. } | MergeError::InvalidTimestamp { .. }
        )
    }

    pub fn store_error(&self) -> Option<&StoreError> {
        match self {
            MergeError::Store(e) => Some(e),
            _ => None,
        }
    }
}

pub type MergeResult<T> = Result<T, MergeError>;
