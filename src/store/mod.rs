//! Versioned key-value store abstraction
//!
//! The only external collaborator of this crate. A store is assumed to be
//! linearizable per key and durable; it stamps every successful write with a
//! monotonically increasing per-key [`Revision`] that doubles as the CAS token
//! for [`VersionedStore::update`].
//!
//! Watch patterns follow the subject-style convention: `prefix` followed by
//! [`KEY_WILDCARD`] selects every key under `prefix`, anything else selects
//! exactly one key.

mod mem_store;


pub use mem_store::*;

use std::pin::Pin;

use bytes::Bytes;
use futures::Stream;
#[cfg(test)]
use mockall::automock;

use crate::constants::KEY_WILDCARD;
use crate::StoreResult;

/// Per-key write counter assigned by the store
pub type Revision = u64;

/// Revision-ordered change feed returned by [`VersionedStore::watch`].
///
/// Dropping the stream releases the underlying subscription.
pub type WatchStream = Pin<Box<dyn Stream<Item = UpdateEvent> + Send>>;

/// A live key with the revision of its last write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub key: String,
    pub value: Bytes,
    pub revision: Revision,
}

/// Kind of change carried by an [`UpdateEvent`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Key was created or updated
    Put,
    /// Key was deleted
    Delete,
}

/// Change notification emitted by a watch feed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateEvent {
    pub key: String,
    /// New value; `None` for deletions
    pub value: Option<Bytes>,
    pub operation: Operation,
    pub revision: Revision,
}

impl UpdateEvent {
    pub fn put(
        key: impl Into<String>,
        value: impl Into<Bytes>,
        revision: Revision,
    ) -> Self {
        Self {
            key: key.into(),
            value: Some(value.into()),
            operation: Operation::Put,
            revision,
        }
    }

    pub fn delete(
        key: impl Into<String>,
        revision: Revision,
    ) -> Self {
        Self {
            key: key.into(),
            value: None,
            operation: Operation::Delete,
            revision,
        }
    }

    /// Consumes the event, returning the value only for put events that
    /// carry one.
    pub fn into_put_value(self) -> Option<(String, Bytes)> {
        match (self.operation, self.value) {
            (Operation::Put, Some(value)) => Some((self.key, value)),
            _ => None,
        }
    }
}

/// Versioned key-value store consumed by the writer and the sync pump.
#[cfg_attr(test, automock)]
#[async_trait::async_trait]
pub trait VersionedStore: Send + Sync + 'static {
    /// Reads the live entry for `key`, `Ok(None)` when absent.
    async fn get(
        &self,
        key: &str,
    ) -> StoreResult<Option<Entry>>;

    /// Creates `key` only if it has no live entry.
    ///
    /// # Errors
    /// - [`crate::StoreError::AlreadyExists`] if a concurrent creator won
    async fn create(
        &self,
        key: &str,
        value: Bytes,
    ) -> StoreResult<Revision>;

    /// Replaces the value of `key` only if its revision equals `expected`.
    ///
    /// # Errors
    /// - [`crate::StoreError::RevisionMismatch`] if another writer advanced the key
    async fn update(
        &self,
        key: &str,
        value: Bytes,
        expected: Revision,
    ) -> StoreResult<Revision>;

    /// Unconditional write
    async fn put(
        &self,
        key: &str,
        value: Bytes,
    ) -> StoreResult<Revision>;

    /// Removes `key`; deleting an absent key is not an error.
    async fn delete(
        &self,
        key: &str,
    ) -> StoreResult<()>;

    /// Lists every live key.
    async fn keys(&self) -> StoreResult<Vec<String>>;

    /// Opens a change feed for `pattern` (see module docs).
    async fn watch(
        &self,
        pattern: &str,
    ) -> StoreResult<WatchStream>;
}

/// Watch pattern selecting every key under `prefix`.
pub fn prefix_pattern(prefix: &str) -> String {
    format!("{prefix}{KEY_WILDCARD}")
}

/// True if `key` is selected by the watch `pattern`.
pub fn pattern_matches(
    pattern: &str,
    key: &str,
) -> bool {
    match pattern.strip_suffix(KEY_WILDCARD) {
        Some(prefix) => key.starts_with(prefix),
        None => key == pattern,
    }
}
