//! kvsync Error Hierarchy
//!
//! Errors are grouped by the layer that produces them:
//! - [`StoreError`]: failures reported by the versioned key-value store
//! - [`WriteError`]: outcomes of a conflict-safe read-modify-write cycle
//! - [`SyncError`]: change propagation (subscription, decoding, task) failures
//!
//! Revision conflicts are the only class resolved locally (by retry); every
//! other class reaches the caller with the key or prefix it concerns.

use config::ConfigError;
use tokio::task::JoinError;

use crate::Revision;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

/// Result type returned by [`crate::VersionedStore`] implementations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Boxed error produced by caller-supplied transformation functions
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Versioned store failures surfaced without a write/sync context
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Conflict-safe write failures
    #[error(transparent)]
    Write(#[from] WriteError),

    /// Change propagation failures
    #[error(transparent)]
    Sync(#[from] SyncError),

    /// Settings loading or validation failures
    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// Conditional create lost against a live entry
    #[error("Key {key:?} already exists")]
    AlreadyExists { key: String },

    /// Conditional update carried a stale revision
    #[error("Revision mismatch on key {key:?} (expected: {expected}, actual: {actual:?})")]
    RevisionMismatch {
        key: String,
        expected: Revision,
        actual: Option<Revision>,
    },

    /// Key rejected by the store
    #[error("Invalid key: {0:?}")]
    InvalidKey(String),

    /// I/O or connectivity failure
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// True for the transient conflict class: a concurrent creator won the
    /// race or another writer advanced the revision.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            StoreError::AlreadyExists { .. } | StoreError::RevisionMismatch { .. }
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    /// Key empty or rejected by the store; a caller error, never retried
    #[error("Invalid key {key:?}")]
    InvalidKey { key: String },

    /// Caller logic declined to produce a value (never retried)
    #[error("Transformation rejected for key {key:?}: {source}")]
    TransformationRejected {
        key: String,
        #[source]
        source: BoxError,
    },

    /// Typed value could not be decoded or encoded (never retried)
    #[error("Codec failure for key {key:?}: {source}")]
    Codec {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// Conflict persisted past the attempt budget
    #[error("Max retries reached for key {key:?} after {attempts} attempts")]
    RetriesExhausted { key: String, attempts: usize },

    /// Store failure during one of the cycle's operations (never retried)
    #[error("Failed to {operation} key {key:?}: {source}")]
    StoreUnavailable {
        key: String,
        operation: &'static str,
        #[source]
        source: StoreError,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Initial watch setup failed
    #[error("Unable to start watch on {pattern:?}: {source}")]
    SubscriptionFailed {
        pattern: String,
        #[source]
        source: StoreError,
    },

    /// Typed sync payload could not be decoded
    #[error("Failed to decode value of key {key:?}: {source}")]
    DecodeFailed {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// Delivery task panicked or was aborted
    #[error("Delivery task failed: {0}")]
    TaskFailed(#[from] JoinError),
}

// ============== Conversion Implementations ============== //
impl From<JoinError> for Error {
    fn from(err: JoinError) -> Self {
        SyncError::TaskFailed(err).into()
    }
}
