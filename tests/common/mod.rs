use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use kvsync::ConflictSafeWriter;
use kvsync::FixedBackoff;
use kvsync::MemStore;
use kvsync::RetryPolicy;
use serde::Deserialize;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::timeout;

pub const WAIT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Counter {
    pub count: u64,
}

pub type Deliveries<T> = UnboundedReceiver<(String, T)>;

/// Callback that forwards every delivery into a channel.
pub fn channel_callback<T: Send + 'static>() -> (impl FnMut(&str, T) + Send + 'static, Deliveries<T>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let callback = move |key: &str, value: T| {
        let _ = tx.send((key.to_string(), value));
    };
    (callback, rx)
}

pub async fn next<T>(rx: &mut Deliveries<T>) -> (String, T) {
    timeout(WAIT, rx.recv())
        .await
        .expect("no delivery in time")
        .expect("delivery loop ended")
}

/// Writer that practically never gives up, for contention tests
pub fn patient_writer(store: Arc<MemStore>) -> ConflictSafeWriter<MemStore> {
    let policy: Arc<dyn RetryPolicy> = Arc::new(FixedBackoff::new(500, Duration::from_millis(1)));
    ConflictSafeWriter::with_policy(store, policy)
}

pub fn text(value: &Bytes) -> String {
    String::from_utf8_lossy(value).into_owned()
}
