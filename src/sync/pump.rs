use std::sync::Arc;

use bytes::Bytes;
use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::trace;
use tracing::warn;

use super::registry::RegistrationGuard;
use super::SubscriptionRegistry;
use super::SyncScope;
use crate::metrics::ACTIVE_SUBSCRIPTIONS;
use crate::metrics::SYNC_EVENTS_DELIVERED;
use crate::metrics::SYNC_EVENTS_SKIPPED;
use crate::Result;
use crate::StoreError;
use crate::StoreResult;
use crate::SyncConfig;
use crate::SyncError;
use crate::UpdateEvent;
use crate::VersionedStore;
use crate::WatchStream;

/// Why a delivery loop stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The cancellation token fired
    Cancelled,
    /// The feed closed and resubscription is disabled
    FeedClosed,
    /// The feed closed and every resubscribe attempt failed
    ResubscribeFailed(StoreError),
}

/// Summary returned by a finished delivery loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub scope: SyncScope,
    pub outcome: SyncOutcome,
    /// Events the callback accepted
    pub delivered: u64,
    /// Deletions and valueless events
    pub skipped: u64,
    /// Put events the callback declined, e.g. payloads that did not decode
    pub dropped: u64,
    /// Feeds re-established after an unexpected close
    pub resubscribes: u32,
}

/// Result of asking a pump to sync a scope
#[derive(Debug)]
pub enum SyncStart {
    /// A new watch was opened and its delivery loop spawned
    Started(SyncHandle),
    /// The scope already had a running loop; nothing was subscribed and the
    /// supplied callback was dropped
    AlreadyActive(SyncScope),
}

impl SyncStart {
    pub fn is_started(&self) -> bool {
        matches!(self, SyncStart::Started(_))
    }

    pub fn scope(&self) -> &SyncScope {
        match self {
            SyncStart::Started(handle) => handle.scope(),
            SyncStart::AlreadyActive(scope) => scope,
        }
    }

    /// The handle of the loop this call started, if any.
    pub fn into_handle(self) -> Option<SyncHandle> {
        match self {
            SyncStart::Started(handle) => Some(handle),
            SyncStart::AlreadyActive(_) => None,
        }
    }
}

/// Handle to a running delivery loop.
///
/// Dropping the handle does not stop the loop; the cancellation token
/// passed to `start_sync` (or [`SyncHandle::cancel`]) does.
#[derive(Debug)]
pub struct SyncHandle {
    scope: SyncScope,
    token: CancellationToken,
    join: JoinHandle<SyncReport>,
}

impl SyncHandle {
    pub fn scope(&self) -> &SyncScope {
        &self.scope
    }

    /// Stops this loop only; the caller's token is left untouched.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Waits for the loop to end on its own (cancellation or feed close).
    ///
    /// # Errors
    /// - [`SyncError::TaskFailed`] if the loop panicked, e.g. inside the callback
    pub async fn join(self) -> Result<SyncReport> {
        Ok(self.join.await?)
    }

    /// Cancels the loop and waits until the subscription is released.
    pub async fn shutdown(self) -> Result<SyncReport> {
        self.cancel();
        self.join().await
    }
}

/// Forwards store updates under a scope to a callback until cancelled.
///
/// Each started scope gets one watch subscription and one tokio task. The
/// callback runs on that task, one event at a time, so events for a key
/// reach it in revision order. Events for different keys keep the order of
/// the feed, which the store does not promise to be meaningful.
pub struct ChangeSyncPump<S: VersionedStore + ?Sized> {
    store: Arc<S>,
    registry: Arc<SubscriptionRegistry>,
    config: SyncConfig,
}

impl<S: VersionedStore + ?Sized> Clone for ChangeSyncPump<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            registry: self.registry.clone(),
            config: self.config.clone(),
        }
    }
}

impl<S: VersionedStore + ?Sized> ChangeSyncPump<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self::with_config(store, SyncConfig::default())
    }

    pub fn with_config(
        store: Arc<S>,
        config: SyncConfig,
    ) -> Self {
        Self::with_registry(store, config, Arc::new(SubscriptionRegistry::new()))
    }

    pub fn with_registry(
        store: Arc<S>,
        config: SyncConfig,
        registry: Arc<SubscriptionRegistry>,
    ) -> Self {
        Self { store, registry, config }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }

    /// Subscribes to every key under `prefix` and returns once the watch is
    /// established; `on_update(key, value)` then runs for each put event
    /// until `cancel` (or the returned handle) is cancelled.
    ///
    /// Starting a scope this pump already runs is a no-op that returns
    /// [`SyncStart::AlreadyActive`].
    ///
    /// # Errors
    /// - [`SyncError::SubscriptionFailed`] if the store refused the watch
    pub async fn start_sync<F>(
        &self,
        prefix: &str,
        mut on_update: F,
        cancel: &CancellationToken,
    ) -> Result<SyncStart>
    where
        F: FnMut(&str, Bytes) + Send + 'static,
    {
        let accept_all = move |key: &str, value: Bytes| {
            on_update(key, value);
            true
        };
        self.start(SyncScope::prefix(prefix), accept_all, cancel).await
    }

    /// Same as [`Self::start_sync`] for a single key.
    pub async fn start_key_sync<F>(
        &self,
        key: &str,
        mut on_update: F,
        cancel: &CancellationToken,
    ) -> Result<SyncStart>
    where
        F: FnMut(&str, Bytes) + Send + 'static,
    {
        let accept_all = move |changed: &str, value: Bytes| {
            on_update(changed, value);
            true
        };
        self.start(SyncScope::key(key), accept_all, cancel).await
    }

    /// Cancels the loop watching `scope`. Returns false if none was running.
    pub fn unwatch(
        &self,
        scope: &SyncScope,
    ) -> bool {
        let cancelled = self.registry.cancel(scope);
        if cancelled {
            debug!(%scope, "unwatched");
        }
        cancelled
    }

    pub fn is_watching(
        &self,
        scope: &SyncScope,
    ) -> bool {
        self.registry.contains(scope)
    }

    pub fn active_subscriptions(&self) -> Vec<SyncScope> {
        self.registry.scopes()
    }

    /// `on_update` returns false for an event it declined; such events are
    /// counted as dropped instead of delivered.
    pub(super) async fn start<F>(
        &self,
        scope: SyncScope,
        on_update: F,
        cancel: &CancellationToken,
    ) -> Result<SyncStart>
    where
        F: FnMut(&str, Bytes) -> bool + Send + 'static,
    {
        let token = cancel.child_token();
        let Some(id) = self.registry.try_register(&scope, token.clone()) else {
            debug!(%scope, "already watching, not subscribing again");
            return Ok(SyncStart::AlreadyActive(scope));
        };
        // Frees the reservation if the watch below fails
        let guard = RegistrationGuard::new(self.registry.clone(), scope.clone(), id);

        let pattern = scope.pattern();
        let feed = match self.store.watch(&pattern).await {
            Ok(feed) => feed,
            Err(source) => {
                error!(%scope, %pattern, "unable to start watch: {}", source);
                return Err(SyncError::SubscriptionFailed { pattern, source }.into());
            }
        };
        debug!(%scope, %pattern, "watch established");

        let delivery = DeliveryLoop::new(
            self.store.clone(),
            scope.clone(),
            pattern,
            self.config.clone(),
            token.clone(),
            guard,
        );
        let join = tokio::spawn(delivery.run(feed, on_update));

        Ok(SyncStart::Started(SyncHandle { scope, token, join }))
    }
}

enum Step {
    Cancelled,
    Event(UpdateEvent),
    Closed,
}

/// State moved into the spawned delivery task
struct DeliveryLoop<S: VersionedStore + ?Sized> {
    store: Arc<S>,
    pattern: String,
    config: SyncConfig,
    token: CancellationToken,
    report: SyncReport,
    _registration: RegistrationGuard,
}

impl<S: VersionedStore + ?Sized> DeliveryLoop<S> {
    fn new(
        store: Arc<S>,
        scope: SyncScope,
        pattern: String,
        config: SyncConfig,
        token: CancellationToken,
        registration: RegistrationGuard,
    ) -> Self {
        ACTIVE_SUBSCRIPTIONS.inc();
        Self {
            store,
            pattern,
            config,
            token,
            report: SyncReport {
                scope,
                outcome: SyncOutcome::Cancelled,
                delivered: 0,
                skipped: 0,
                dropped: 0,
                resubscribes: 0,
            },
            _registration: registration,
        }
    }

    async fn run<F>(
        mut self,
        mut feed: WatchStream,
        mut on_update: F,
    ) -> SyncReport
    where
        F: FnMut(&str, Bytes) -> bool,
    {
        let outcome = loop {
            // Cancellation wins over a ready event
            let step = tokio::select! {
                biased;
                _ = self.token.cancelled() => Step::Cancelled,
                next = feed.next() => match next {
                    Some(event) => Step::Event(event),
                    None => Step::Closed,
                },
            };

            match step {
                Step::Cancelled => break SyncOutcome::Cancelled,
                Step::Event(event) => self.deliver(event, &mut on_update),
                Step::Closed => {
                    if !self.config.auto_resubscribe {
                        warn!(scope = %self.report.scope, "watch feed closed unexpectedly");
                        break SyncOutcome::FeedClosed;
                    }
                    match self.resubscribe().await {
                        Ok(Some(reopened)) => {
                            feed = reopened;
                            self.report.resubscribes += 1;
                        }
                        Ok(None) => break SyncOutcome::Cancelled,
                        Err(e) => break SyncOutcome::ResubscribeFailed(e),
                    }
                }
            }
        };

        // Release the subscription before reporting
        drop(feed);
        debug!(
            scope = %self.report.scope,
            ?outcome,
            delivered = self.report.delivered,
            skipped = self.report.skipped,
            dropped = self.report.dropped,
            "delivery loop stopped"
        );

        let mut report = self.report.clone();
        report.outcome = outcome;
        report
    }

    fn deliver<F>(
        &mut self,
        event: UpdateEvent,
        on_update: &mut F,
    ) where
        F: FnMut(&str, Bytes) -> bool,
    {
        let revision = event.revision;
        match event.into_put_value() {
            Some((key, value)) => {
                trace!(%key, revision, "delivering update");
                if on_update(&key, value) {
                    self.report.delivered += 1;
                    SYNC_EVENTS_DELIVERED.inc();
                } else {
                    self.report.dropped += 1;
                }
            }
            None => {
                trace!(revision, "skipping delete or empty event");
                self.report.skipped += 1;
                SYNC_EVENTS_SKIPPED.inc();
            }
        }
    }

    /// `Ok(None)` when cancelled while waiting between attempts.
    async fn resubscribe(&self) -> StoreResult<Option<WatchStream>> {
        let delay = self.config.resubscribe_delay();
        let mut last_error = StoreError::Unavailable("no resubscribe attempts allowed".to_string());

        for attempt in 1..=self.config.max_resubscribe_attempts {
            tokio::select! {
                biased;
                _ = self.token.cancelled() => return Ok(None),
                _ = sleep(delay) => {}
            }

            match self.store.watch(&self.pattern).await {
                Ok(feed) => {
                    info!(pattern = %self.pattern, attempt, "watch feed re-established");
                    return Ok(Some(feed));
                }
                Err(e) => {
                    warn!(pattern = %self.pattern, attempt, "resubscribe failed: {}", e);
                    last_error = e;
                }
            }
        }

        error!(pattern = %self.pattern, "giving up on resubscribe");
        Err(last_error)
    }
}

impl<S: VersionedStore + ?Sized> Drop for DeliveryLoop<S> {
    fn drop(&mut self) {
        ACTIVE_SUBSCRIPTIONS.dec();
    }
}
