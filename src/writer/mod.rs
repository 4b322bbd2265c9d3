//! Conflict-safe read-modify-write against a single key
//!
//! [`ConflictSafeWriter`] applies a caller transformation to the current
//! value of a key under optimistic concurrency control:
//!
//! ```text
//! loop (bounded by RetryPolicy):
//!   get(key) ──absent──► transform(None)  ──► create(key, new)
//!            └─present─► transform(Some)  ──► update(key, new, revision)
//!   conflict (AlreadyExists / RevisionMismatch) ──► back off, re-read
//!   anything else ──► return to caller
//! ```
//!
//! The transformation may run once per attempt, so it must not touch
//! external state.


use std::sync::Arc;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::time::sleep;
use tracing::debug;
use tracing::error;
use tracing::warn;

use crate::metrics::WRITE_CONFLICTS;
use crate::metrics::WRITE_OUTCOMES;
use crate::utils::call_timer::CallTimer;
use crate::BackoffPolicy;
use crate::BoxError;
use crate::Error;
use crate::FixedBackoff;
use crate::Result;
use crate::RetryPolicy;
use crate::Revision;
use crate::StoreError;
use crate::VersionedStore;
use crate::WriteError;

/// Optimistic read-modify-write executor bound to one store.
///
/// The store may be shared with any number of writers and sync pumps;
/// serialization between writers is enforced by the store's revision check.
pub struct ConflictSafeWriter<S: VersionedStore + ?Sized> {
    store: Arc<S>,
    policy: Arc<dyn RetryPolicy>,
}

impl<S: VersionedStore + ?Sized> Clone for ConflictSafeWriter<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            policy: self.policy.clone(),
        }
    }
}

impl<S: VersionedStore + ?Sized> ConflictSafeWriter<S> {
    /// Writer with the reference policy: 3 attempts, 50ms fixed delay.
    pub fn new(store: Arc<S>) -> Self {
        Self::with_policy(store, Arc::new(FixedBackoff::default()))
    }

    pub fn with_policy(
        store: Arc<S>,
        policy: Arc<dyn RetryPolicy>,
    ) -> Self {
        Self { store, policy }
    }

    /// Writer whose policy is built from a configuration template.
    pub fn from_backoff_policy(
        store: Arc<S>,
        backoff: &BackoffPolicy,
    ) -> Self {
        Self::with_policy(store, backoff.build())
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Applies `transform` to the value of `key` and writes the result with
    /// a conditional create or update, retrying on revision conflicts.
    ///
    /// Returns the revision assigned by the store to the written value.
    ///
    /// # Errors
    /// - [`WriteError::InvalidKey`] for an empty key or one the store rejects
    /// - [`WriteError::TransformationRejected`] as soon as `transform` fails
    /// - [`WriteError::StoreUnavailable`] for any non-conflict store failure
    /// - [`WriteError::RetriesExhausted`] once the policy gives up
    pub async fn safe_write<F>(
        &self,
        key: &str,
        mut transform: F,
    ) -> Result<Revision>
    where
        F: FnMut(Option<&Bytes>) -> std::result::Result<Bytes, BoxError>,
    {
        if key.is_empty() {
            return Err(WriteError::InvalidKey { key: String::new() }.into());
        }
        let _timer = CallTimer::start("safe_write", key);

        let mut attempt = 0;
        loop {
            attempt += 1;

            let (operation, outcome) = match self.store.get(key).await {
                Ok(None) => {
                    let value = apply(key, &mut transform, None)?;
                    ("create", self.store.create(key, value).await)
                }
                Ok(Some(entry)) => {
                    let value = apply(key, &mut transform, Some(&entry.value))?;
                    ("update", self.store.update(key, value, entry.revision).await)
                }
                Err(e) => return Err(store_failure(key, "get", e)),
            };

            match outcome {
                Ok(revision) => {
                    WRITE_OUTCOMES.with_label_values(&["success"]).inc();
                    debug!(key, attempt, revision, operation, "safe write committed");
                    return Ok(revision);
                }
                Err(e) if e.is_conflict() => {
                    WRITE_CONFLICTS.with_label_values(&[operation]).inc();

                    let Some(delay) = self.policy.next_delay(attempt) else {
                        WRITE_OUTCOMES.with_label_values(&["exhausted"]).inc();
                        warn!(key, attempts = attempt, "safe write gave up on conflicts");
                        return Err(WriteError::RetriesExhausted {
                            key: key.to_string(),
                            attempts: attempt,
                        }
                        .into());
                    };

                    debug!(key, attempt, ?delay, operation, "write conflict, retrying: {}", e);
                    sleep(delay).await;
                }
                Err(e) => return Err(store_failure(key, operation, e)),
            }
        }
    }

    /// [`Self::safe_write`] over JSON-encoded values of type `T`.
    ///
    /// # Errors
    /// Same as [`Self::safe_write`], plus [`WriteError::Codec`] when the
    /// current value does not decode as `T` or the new one does not encode.
    pub async fn safe_write_json<T, F>(
        &self,
        key: &str,
        mut transform: F,
    ) -> Result<Revision>
    where
        T: Serialize + DeserializeOwned,
        F: FnMut(Option<T>) -> std::result::Result<T, BoxError>,
    {
        let mut codec_failure: Option<serde_json::Error> = None;

        let result = self
            .safe_write(key, |current| {
                let decoded = match current.map(|raw| serde_json::from_slice::<T>(raw)).transpose() {
                    Ok(decoded) => decoded,
                    Err(e) => {
                        let message = e.to_string();
                        codec_failure = Some(e);
                        return Err(message.into());
                    }
                };

                let next = transform(decoded)?;
                match serde_json::to_vec(&next) {
                    Ok(encoded) => Ok(Bytes::from(encoded)),
                    Err(e) => {
                        let message = e.to_string();
                        codec_failure = Some(e);
                        Err(message.into())
                    }
                }
            })
            .await;

        match (result, codec_failure) {
            (Err(Error::Write(WriteError::TransformationRejected { .. })), Some(source)) => Err(WriteError::Codec {
                key: key.to_string(),
                source,
            }
            .into()),
            (result, _) => result,
        }
    }
}

fn apply<F>(
    key: &str,
    transform: &mut F,
    current: Option<&Bytes>,
) -> Result<Bytes>
where
    F: FnMut(Option<&Bytes>) -> std::result::Result<Bytes, BoxError>,
{
    transform(current).map_err(|source| {
        WRITE_OUTCOMES.with_label_values(&["rejected"]).inc();
        debug!(key, "transformation rejected: {}", source);
        WriteError::TransformationRejected {
            key: key.to_string(),
            source,
        }
        .into()
    })
}

fn store_failure(
    key: &str,
    operation: &'static str,
    source: StoreError,
) -> Error {
    if let StoreError::InvalidKey(_) = source {
        WRITE_OUTCOMES.with_label_values(&["rejected"]).inc();
        debug!(key, operation, "store rejected key");
        return WriteError::InvalidKey { key: key.to_string() }.into();
    }

    WRITE_OUTCOMES.with_label_values(&["store_error"]).inc();
    error!(key, operation, "safe write failed: {}", source);
    WriteError::StoreUnavailable {
        key: key.to_string(),
        operation,
        source,
    }
    .into()
}
