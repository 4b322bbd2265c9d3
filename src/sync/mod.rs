//! Change synchronization from a store watch into caller callbacks
//!
//! [`ChangeSyncPump`] opens one watch per [`SyncScope`] and runs a delivery
//! loop on its own task. Only put events with a value reach the callback;
//! deletions are skipped. The loop ends when the caller's
//! [`tokio_util::sync::CancellationToken`] fires, when the feed closes, or
//! when resubscription gives up.
//!
//! [`TypedChangeSyncPump`] layers JSON decoding on top.

mod pump;
mod registry;
mod typed;


pub use pump::*;
pub use registry::SubscriptionRegistry;
pub use registry::SyncScope;
pub use typed::*;
