// -
// Store conventions

/// Pattern terminator meaning "every key under the preceding prefix"
pub const KEY_WILDCARD: &str = ">";

/// Revision stamped on a key by its first successful write
pub(crate) const INITIAL_REVISION: u64 = 1;

// -
// Conflict-safe write defaults

pub(crate) const DEFAULT_MAX_ATTEMPTS: usize = 3;
pub(crate) const DEFAULT_RETRY_DELAY_MS: u64 = 50;
pub(crate) const DEFAULT_MAX_RETRY_DELAY_MS: u64 = 1000;

// -
// Change sync defaults

pub(crate) const DEFAULT_RESUBSCRIBE_DELAY_MS: u64 = 500;
pub(crate) const DEFAULT_MAX_RESUBSCRIBE_ATTEMPTS: usize = 5;
