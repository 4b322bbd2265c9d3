use tokio::time::Instant;
use tracing::trace;

/// Traces how long one store-facing call took, tagged with its operation
/// and key. The measurement is emitted when the timer goes out of scope,
/// so every early return is covered.
pub(crate) struct CallTimer<'a> {
    started: Instant,
    operation: &'static str,
    key: &'a str,
}

impl<'a> CallTimer<'a> {
    pub(crate) fn start(
        operation: &'static str,
        key: &'a str,
    ) -> Self {
        Self {
            started: Instant::now(),
            operation,
            key,
        }
    }
}

impl Drop for CallTimer<'_> {
    fn drop(&mut self) {
        let elapsed_us = self.started.elapsed().as_micros() as u64;
        trace!(operation = self.operation, key = self.key, elapsed_us, "call finished");
    }
}
