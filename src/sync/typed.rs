use std::sync::Arc;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::ChangeSyncPump;
use super::SyncScope;
use super::SyncStart;
use crate::metrics::SYNC_DECODE_FAILURES;
use crate::Result;
use crate::SyncError;
use crate::VersionedStore;

/// Observer for payloads that failed to decode
pub type DecodeErrorHandler = Arc<dyn Fn(&str, &SyncError) + Send + Sync>;

/// [`ChangeSyncPump`] that decodes each JSON payload into `T` before the
/// callback sees it.
///
/// Payloads that do not decode are dropped; the loop keeps running. An
/// optional handler observes them.
pub struct TypedChangeSyncPump<S: VersionedStore + ?Sized> {
    pump: ChangeSyncPump<S>,
    on_decode_error: Option<DecodeErrorHandler>,
}

impl<S: VersionedStore + ?Sized> Clone for TypedChangeSyncPump<S> {
    fn clone(&self) -> Self {
        Self {
            pump: self.pump.clone(),
            on_decode_error: self.on_decode_error.clone(),
        }
    }
}

impl<S: VersionedStore + ?Sized> TypedChangeSyncPump<S> {
    pub fn new(pump: ChangeSyncPump<S>) -> Self {
        Self {
            pump,
            on_decode_error: None,
        }
    }

    pub fn with_decode_error_handler(
        mut self,
        handler: impl Fn(&str, &SyncError) + Send + Sync + 'static,
    ) -> Self {
        self.on_decode_error = Some(Arc::new(handler));
        self
    }

    pub fn pump(&self) -> &ChangeSyncPump<S> {
        &self.pump
    }

    /// Typed counterpart of [`ChangeSyncPump::start_sync`]. Payloads that do
    /// not decode count as dropped in the loop's report.
    pub async fn start_typed_sync<T, F>(
        &self,
        prefix: &str,
        on_update: F,
        cancel: &CancellationToken,
    ) -> Result<SyncStart>
    where
        T: DeserializeOwned + 'static,
        F: FnMut(&str, T) + Send + 'static,
    {
        let decoding = self.decoding(on_update);
        self.pump.start(SyncScope::prefix(prefix), decoding, cancel).await
    }

    /// Typed counterpart of [`ChangeSyncPump::start_key_sync`].
    pub async fn start_typed_key_sync<T, F>(
        &self,
        key: &str,
        on_update: F,
        cancel: &CancellationToken,
    ) -> Result<SyncStart>
    where
        T: DeserializeOwned + 'static,
        F: FnMut(&str, T) + Send + 'static,
    {
        let decoding = self.decoding(on_update);
        self.pump.start(SyncScope::key(key), decoding, cancel).await
    }

    fn decoding<T, F>(
        &self,
        mut on_update: F,
    ) -> impl FnMut(&str, Bytes) -> bool + Send + 'static
    where
        T: DeserializeOwned + 'static,
        F: FnMut(&str, T) + Send + 'static,
    {
        let on_decode_error = self.on_decode_error.clone();

        move |key: &str, value: Bytes| match serde_json::from_slice::<T>(&value) {
            Ok(decoded) => {
                on_update(key, decoded);
                true
            }
            Err(source) => {
                SYNC_DECODE_FAILURES.inc();
                debug!(key, "dropping undecodable payload: {}", source);
                if let Some(handler) = &on_decode_error {
                    let err = SyncError::DecodeFailed {
                        key: key.to_string(),
                        source,
                    };
                    handler(key, &err);
                }
                false
            }
        }
    }
}
