//! In-process [`VersionedStore`]
//!
//! Revisions are tracked per key, start at 1 and grow by one on every write.
//! Deleting a key leaves a tombstone, so re-creating it continues the key's
//! revision sequence instead of restarting it.
//!
//! Watch events are pushed while the entry table is write-locked, which makes
//! the order observed on every feed equal to the revision order per key.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::task::Context;
use std::task::Poll;

use bytes::Bytes;
use dashmap::DashMap;
use futures::Stream;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::debug;
use tracing::trace;

use super::pattern_matches;
use super::Entry;
use super::Revision;
use super::UpdateEvent;
use super::VersionedStore;
use super::WatchStream;
use crate::constants::INITIAL_REVISION;
use crate::constants::KEY_WILDCARD;
use crate::StoreError;
use crate::StoreResult;

/// Stored value; `None` marks a tombstone
#[derive(Debug)]
struct Slot {
    value: Option<Bytes>,
    revision: Revision,
}

#[derive(Debug)]
struct Watcher {
    pattern: String,
    sender: mpsc::UnboundedSender<UpdateEvent>,
}

#[derive(Debug, Default)]
struct MemStoreInner {
    entries: RwLock<HashMap<String, Slot>>,

    /// Live feeds keyed by watcher id
    watchers: DashMap<u64, Watcher>,

    next_watcher_id: AtomicU64,

    /// Outage switch, see [`MemStore::set_unavailable`]
    unavailable: AtomicBool,
}

impl MemStoreInner {
    fn check_available(&self) -> StoreResult<()> {
        if self.unavailable.load(Ordering::Acquire) {
            return Err(StoreError::Unavailable("store is offline".to_string()));
        }
        Ok(())
    }

    /// Must be called with the entry table write-locked.
    fn notify(
        &self,
        event: UpdateEvent,
    ) {
        for watcher in self.watchers.iter() {
            if pattern_matches(&watcher.pattern, &event.key) {
                // A closed receiver is removed by its feed's Drop
                let _ = watcher.sender.send(event.clone());
            }
        }
        trace!(key = %event.key, revision = event.revision, op = ?event.operation, "event published");
    }
}

/// Thread-safe in-memory versioned store; clones share state.
#[derive(Debug, Clone, Default)]
pub struct MemStore {
    inner: Arc<MemStoreInner>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// While set, every operation fails with [`StoreError::Unavailable`].
    pub fn set_unavailable(
        &self,
        unavailable: bool,
    ) {
        self.inner.unavailable.store(unavailable, Ordering::Release);
    }

    /// Ends every open watch feed as if the store had dropped them.
    pub fn close_watchers(&self) {
        let closed = self.inner.watchers.len();
        self.inner.watchers.clear();
        debug!(closed, "all watch feeds closed");
    }

    /// Number of open watch feeds
    pub fn watcher_count(&self) -> usize {
        self.inner.watchers.len()
    }

    /// Current revision of `key`, tombstones included.
    pub fn revision(
        &self,
        key: &str,
    ) -> Option<Revision> {
        self.inner.entries.read().get(key).map(|slot| slot.revision)
    }

    fn validate_key(key: &str) -> StoreResult<()> {
        if key.is_empty() || key.contains(KEY_WILDCARD) {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(())
    }

    /// Writes `value` over whatever `slot` holds and publishes the put.
    fn write_slot(
        inner: &MemStoreInner,
        entries: &mut HashMap<String, Slot>,
        key: &str,
        value: Bytes,
    ) -> Revision {
        let revision = match entries.get_mut(key) {
            Some(slot) => {
                slot.revision += 1;
                slot.value = Some(value.clone());
                slot.revision
            }
            None => {
                entries.insert(
                    key.to_string(),
                    Slot {
                        value: Some(value.clone()),
                        revision: INITIAL_REVISION,
                    },
                );
                INITIAL_REVISION
            }
        };
        inner.notify(UpdateEvent::put(key, value, revision));
        revision
    }
}

#[async_trait::async_trait]
impl VersionedStore for MemStore {
    async fn get(
        &self,
        key: &str,
    ) -> StoreResult<Option<Entry>> {
        self.inner.check_available()?;
        Self::validate_key(key)?;

        let entries = self.inner.entries.read();
        Ok(entries.get(key).and_then(|slot| {
            slot.value.as_ref().map(|value| Entry {
                key: key.to_string(),
                value: value.clone(),
                revision: slot.revision,
            })
        }))
    }

    async fn create(
        &self,
        key: &str,
        value: Bytes,
    ) -> StoreResult<Revision> {
        self.inner.check_available()?;
        Self::validate_key(key)?;

        let mut entries = self.inner.entries.write();
        if entries.get(key).is_some_and(|slot| slot.value.is_some()) {
            return Err(StoreError::AlreadyExists { key: key.to_string() });
        }
        Ok(Self::write_slot(&self.inner, &mut entries, key, value))
    }

    async fn update(
        &self,
        key: &str,
        value: Bytes,
        expected: Revision,
    ) -> StoreResult<Revision> {
        self.inner.check_available()?;
        Self::validate_key(key)?;

        let mut entries = self.inner.entries.write();
        let actual = entries
            .get(key)
            .filter(|slot| slot.value.is_some())
            .map(|slot| slot.revision);
        if actual != Some(expected) {
            return Err(StoreError::RevisionMismatch {
                key: key.to_string(),
                expected,
                actual,
            });
        }
        Ok(Self::write_slot(&self.inner, &mut entries, key, value))
    }

    async fn put(
        &self,
        key: &str,
        value: Bytes,
    ) -> StoreResult<Revision> {
        self.inner.check_available()?;
        Self::validate_key(key)?;

        let mut entries = self.inner.entries.write();
        Ok(Self::write_slot(&self.inner, &mut entries, key, value))
    }

    async fn delete(
        &self,
        key: &str,
    ) -> StoreResult<()> {
        self.inner.check_available()?;
        Self::validate_key(key)?;

        let mut entries = self.inner.entries.write();
        if let Some(slot) = entries.get_mut(key) {
            if slot.value.take().is_some() {
                slot.revision += 1;
                let revision = slot.revision;
                self.inner.notify(UpdateEvent::delete(key, revision));
            }
        }
        Ok(())
    }

    async fn keys(&self) -> StoreResult<Vec<String>> {
        self.inner.check_available()?;

        let entries = self.inner.entries.read();
        let mut keys: Vec<String> = entries
            .iter()
            .filter(|(_, slot)| slot.value.is_some())
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn watch(
        &self,
        pattern: &str,
    ) -> StoreResult<WatchStream> {
        self.inner.check_available()?;
        if pattern.is_empty() {
            return Err(StoreError::InvalidKey(pattern.to_string()));
        }

        let id = self.inner.next_watcher_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::unbounded_channel();
        self.inner.watchers.insert(
            id,
            Watcher {
                pattern: pattern.to_string(),
                sender,
            },
        );
        debug!(watcher_id = id, pattern, "watch feed opened");

        Ok(Box::pin(WatchFeed {
            id,
            inner: self.inner.clone(),
            events: UnboundedReceiverStream::new(receiver),
        }))
    }
}

/// Feed handed out by [`MemStore::watch`]; deregisters itself on drop.
struct WatchFeed {
    id: u64,
    inner: Arc<MemStoreInner>,
    events: UnboundedReceiverStream<UpdateEvent>,
}

impl Stream for WatchFeed {
    type Item = UpdateEvent;

    fn poll_next(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.events).poll_next(cx)
    }
}

impl Drop for WatchFeed {
    fn drop(&mut self) {
        self.inner.watchers.remove(&self.id);
        trace!(watcher_id = self.id, "watch feed released");
    }
}
