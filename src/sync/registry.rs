//! Subscription registry owned by one [`crate::ChangeSyncPump`]
//!
//! Each running delivery loop holds a registration for its [`SyncScope`].
//! A scope is reserved before the watch is opened, so two concurrent
//! `start_sync` calls for the same scope cannot both subscribe.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::prefix_pattern;

/// What a delivery loop watches
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SyncScope {
    /// Every key under the prefix
    Prefix(String),
    /// Exactly one key
    Key(String),
}

impl SyncScope {
    pub fn prefix(prefix: impl Into<String>) -> Self {
        SyncScope::Prefix(prefix.into())
    }

    pub fn key(key: impl Into<String>) -> Self {
        SyncScope::Key(key.into())
    }

    /// Store watch pattern for this scope
    pub fn pattern(&self) -> String {
        match self {
            SyncScope::Prefix(prefix) => prefix_pattern(prefix),
            SyncScope::Key(key) => key.clone(),
        }
    }
}

impl fmt::Display for SyncScope {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            SyncScope::Prefix(prefix) => write!(f, "prefix:{prefix}"),
            SyncScope::Key(key) => write!(f, "key:{key}"),
        }
    }
}

#[derive(Debug)]
struct Registration {
    id: u64,
    token: CancellationToken,
}

/// Map of active scopes guarded by a single lock.
///
/// Share one instance between pumps (via `ChangeSyncPump::with_registry`)
/// only when they should deduplicate against each other.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    entries: Mutex<HashMap<SyncScope, Registration>>,
    next_id: AtomicU64,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves `scope`, returning `None` if it is already active.
    pub(crate) fn try_register(
        &self,
        scope: &SyncScope,
        token: CancellationToken,
    ) -> Option<u64> {
        let mut entries = self.entries.lock();
        if entries.contains_key(scope) {
            return None;
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        entries.insert(scope.clone(), Registration { id, token });
        trace!(%scope, registration_id = id, "scope registered");
        Some(id)
    }

    /// Removes `scope` only while it still belongs to registration `id`.
    pub(crate) fn deregister(
        &self,
        scope: &SyncScope,
        id: u64,
    ) -> bool {
        let mut entries = self.entries.lock();
        match entries.get(scope) {
            Some(registration) if registration.id == id => {
                entries.remove(scope);
                trace!(%scope, registration_id = id, "scope deregistered");
                true
            }
            _ => false,
        }
    }

    /// Cancels the loop watching `scope` and frees the scope.
    /// Returns false if nothing was watching it.
    pub fn cancel(
        &self,
        scope: &SyncScope,
    ) -> bool {
        let removed = self.entries.lock().remove(scope);
        match removed {
            Some(registration) => {
                registration.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancels every registered loop.
    pub fn cancel_all(&self) {
        let drained: Vec<Registration> = self.entries.lock().drain().map(|(_, r)| r).collect();
        for registration in drained {
            registration.token.cancel();
        }
    }

    pub fn contains(
        &self,
        scope: &SyncScope,
    ) -> bool {
        self.entries.lock().contains_key(scope)
    }

    pub fn scopes(&self) -> Vec<SyncScope> {
        self.entries.lock().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

/// Frees a registration when the owning loop ends, however it ends.
pub(crate) struct RegistrationGuard {
    registry: Arc<SubscriptionRegistry>,
    scope: SyncScope,
    id: u64,
}

impl RegistrationGuard {
    pub(crate) fn new(
        registry: Arc<SubscriptionRegistry>,
        scope: SyncScope,
        id: u64,
    ) -> Self {
        Self { registry, scope, id }
    }
}

impl Drop for RegistrationGuard {
    fn drop(&mut self) {
        self.registry.deregister(&self.scope, self.id);
    }
}
