//! Error types for cachet operations

use std::time::Duration;
use thiserror::Error;

use crate::key_err::KeyErr;

/// Backend (transport/protocol) errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    #[error("Connection failed: {reason}")]
    Connection { reason: String },

    #[error("{command} failed for key {key}: {reason}")]
    CommandFailed {
        command: String,
        key: String,
        reason: String,
    },

    #[error("Unexpected reply to {command} for key {key}: {reply}")]
    UnexpectedReply {
        command: String,
        key: String,
        reply: String,
    },

    #[error("Pipeline reply count mismatch: sent {sent}, received {received}")]
    PipelineMismatch { sent: usize, received: usize },

    #[error("Backend lock poisoned")]
    LockPoisoned,
}

/// Value encoding/decoding errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("Encode failed: {reason}")]
    Encode { reason: String },

    #[error("Decode into {target} failed: {reason}")]
    Decode { target: String, reason: String },
}

/// Unsupported loader-return or destination shapes.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ShapeError {
    #[error("load function must return a list or key-value map, single value returned for {absent_keys} absent keys")]
    WrongLoadFnType { absent_keys: usize },
}

/// Configuration and call-setup errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("cache key extractor must be set or only cache items can be returned from the loader")]
    ItemToCacheKeyFnRequired,

    #[error("Item {key} sets both if_exists and if_not_exists")]
    ConflictingConditions { key: String },

    #[error("Item {key} with field {field}: if_exists is not supported for hash fields")]
    UnsupportedHashCondition { key: String, field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Failure reported by an absent-keys loader.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct LoadError {
    message: String,
}

impl LoadError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<String> for LoadError {
    fn from(message: String) -> Self {
        Self { message }
    }
}

impl From<&str> for LoadError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

/// Why a single key (or key/field) could not be read.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KeyFailure {
    #[error("cache: key is missing")]
    Miss,

    #[error("{0}")]
    Backend(BackendError),

    #[error("{0}")]
    Decode(CodecError),
}

impl KeyFailure {
    pub fn is_miss(&self) -> bool {
        matches!(self, KeyFailure::Miss)
    }
}

impl From<BackendError> for KeyFailure {
    fn from(e: BackendError) -> Self {
        KeyFailure::Backend(e)
    }
}

impl From<CodecError> for KeyFailure {
    fn from(e: CodecError) -> Self {
        KeyFailure::Decode(e)
    }
}

/// Master error type for all cachet errors.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CacheError {
    #[error("cache: key is missing")]
    CacheMiss,

    #[error("{0}")]
    Keys(#[from] KeyErr),

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Shape error: {0}")]
    Shape(#[from] ShapeError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Loader error: {0}")]
    Loader(#[from] LoadError),

    #[error("Backend call timed out after {after:?}")]
    Timeout { after: Duration },
}

impl CacheError {
    /// True for the sentinel miss and for an aggregate made only of misses.
    pub fn is_cache_miss(&self) -> bool {
        match self {
            CacheError::CacheMiss => true,
            CacheError::Keys(key_err) => !key_err.is_empty() && !key_err.has_non_cache_miss_errs(),
            _ => false,
        }
    }

    /// The per-key aggregate, if this error carries one.
    pub fn key_err(&self) -> Option<&KeyErr> {
        match self {
            CacheError::Keys(key_err) => Some(key_err),
            _ => None,
        }
    }
}

/// Result type alias for cachet operations.
pub type CacheResult<T> = Result<T, CacheError>;

// =============================================================================
// TESTS
// =============================================================================
