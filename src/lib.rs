//! Conflict-safe writes and change synchronization over a versioned
//! key-value store.
//!
//! - [`ConflictSafeWriter`] runs an optimistic read-modify-write against one
//!   key and retries on revision conflicts under a [`RetryPolicy`].
//! - [`ChangeSyncPump`] watches a key prefix and hands every put event to a
//!   callback until a [`tokio_util::sync::CancellationToken`] fires.
//!   [`TypedChangeSyncPump`] decodes JSON payloads first.
//!
//! Both are generic over [`VersionedStore`]; [`MemStore`] is the in-process
//! implementation.

mod config;
mod constants;
mod errors;
mod metrics;
mod retry;
mod store;
mod sync;
mod writer;

pub(crate) mod utils;

pub use self::config::*;
pub use constants::KEY_WILDCARD;
pub use errors::*;
pub use metrics::gather_metrics;
pub use retry::*;
pub use store::*;
pub use sync::*;
pub use writer::*;
