//! Error types for voxcache

use crate::ledger::EntryKind;
use crate::load::LoadError;

/// Result type alias for cache operations
pub type Result<T> = std::result::Result<T, CacheError>;

/// Error types for cache operations
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Malformed argument, such as an empty key
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Budget must be a positive number of bytes
    #[error("invalid budget: {0} bytes (must be greater than zero)")]
    InvalidBudget(u64),

    /// Put on a key that is already reserved or loaded
    #[error("{kind} {key} already in cache")]
    DuplicateKey {
        /// Store the key was put into
        kind: EntryKind,
        /// Offending key
        key: String,
    },

    /// Get or remove on an absent key
    #[error("{kind} {key} was not present in the cache")]
    NotFound {
        /// Store that was searched
        kind: EntryKind,
        /// Missing key
        key: String,
    },

    /// Attempt to individually remove an image owned by a volume
    #[error("image {image_id} is shared with volume {volume_id}; remove the volume first")]
    SharedKeyViolation {
        /// Image that was targeted
        image_id: String,
        /// Volume holding the shared cache key
        volume_id: String,
    },

    /// Resolved payload did not report a usable byte size
    #[error("{kind} {key} resolved without a valid size in bytes")]
    InvalidSize {
        /// Store the payload was destined for
        kind: EntryKind,
        /// Key of the payload
        key: String,
    },

    /// Admission impossible even after eviction
    #[error("cache size exceeded: {requested} bytes requested, {available} available")]
    CacheSizeExceeded {
        /// Size of the rejected payload
        requested: u64,
        /// Bytes available to new images at the time of the decision
        available: i64,
    },

    /// Eviction ran out of candidates before meeting its target
    #[error("eviction exhausted: {target} bytes requested, {available} available")]
    Exhausted {
        /// Byte target of the reclaim request
        target: u64,
        /// Bytes available after every candidate was evicted
        available: i64,
    },

    /// The load object's future rejected
    #[error("{kind} {key} failed to load: {source}")]
    Load {
        /// Store the payload was destined for
        kind: EntryKind,
        /// Key of the failed load
        key: String,
        /// Error produced by the loader
        #[source]
        source: LoadError,
    },
}

impl CacheError {
    pub(crate) fn duplicate(kind: EntryKind, key: &str) -> Self {
        CacheError::DuplicateKey {
            kind,
            key: key.to_string(),
        }
    }

    pub(crate) fn not_found(kind: EntryKind, key: &str) -> Self {
        CacheError::NotFound {
            kind,
            key: key.to_string(),
        }
    }
}

/// Errors raised while building a [`CacheConfig`](crate::CacheConfig)
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Environment variable held something other than a positive integer
    #[error("invalid value for {var}: {value:?}")]
    InvalidValue {
        /// Variable name
        var: &'static str,
        /// Raw value found
        value: String,
    },
}
