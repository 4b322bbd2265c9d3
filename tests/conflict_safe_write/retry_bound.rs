use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use kvsync::ConflictSafeWriter;
use kvsync::Entry;
use kvsync::Error;
use kvsync::ExponentialBackoff;
use kvsync::MemStore;
use kvsync::Revision;
use kvsync::Settings;
use kvsync::StoreError;
use kvsync::StoreResult;
use kvsync::VersionedStore;
use kvsync::WatchStream;
use kvsync::WriteError;

/// Store where a competing writer touches the key right after every read,
/// so no conditional write can ever succeed.
#[derive(Default)]
struct ContendedStore {
    inner: MemStore,
    reads: AtomicUsize,
}

#[async_trait::async_trait]
impl VersionedStore for ContendedStore {
    async fn get(
        &self,
        key: &str,
    ) -> StoreResult<Option<Entry>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let entry = self.inner.get(key).await?;
        self.inner.put(key, Bytes::from("competitor")).await?;
        Ok(entry)
    }

    async fn create(
        &self,
        key: &str,
        value: Bytes,
    ) -> StoreResult<Revision> {
        self.inner.create(key, value).await
    }

    async fn update(
        &self,
        key: &str,
        value: Bytes,
        expected: Revision,
    ) -> StoreResult<Revision> {
        self.inner.update(key, value, expected).await
    }

    async fn put(
        &self,
        key: &str,
        value: Bytes,
    ) -> StoreResult<Revision> {
        self.inner.put(key, value).await
    }

    async fn delete(
        &self,
        key: &str,
    ) -> StoreResult<()> {
        self.inner.delete(key).await
    }

    async fn keys(&self) -> StoreResult<Vec<String>> {
        self.inner.keys().await
    }

    async fn watch(
        &self,
        pattern: &str,
    ) -> StoreResult<WatchStream> {
        self.inner.watch(pattern).await
    }
}

#[tokio::test]
async fn test_default_writer_stops_after_three_attempts() {
    let store = Arc::new(ContendedStore::default());
    let writer = ConflictSafeWriter::new(store.clone());
    let transforms = Arc::new(AtomicUsize::new(0));
    let counter = transforms.clone();

    let result = writer
        .safe_write("hot", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Bytes::from("mine"))
        })
        .await;

    match result {
        Err(Error::Write(WriteError::RetriesExhausted { key, attempts })) => {
            assert_eq!(key, "hot");
            assert_eq!(attempts, 3);
        }
        other => panic!("unexpected result: {other:?}"),
    }
    assert_eq!(store.reads.load(Ordering::SeqCst), 3);
    assert_eq!(transforms.load(Ordering::SeqCst), 3);

    // Only the competitor ever wrote
    let entry = store.inner.get("hot").await.unwrap().unwrap();
    assert_eq!(entry.value, Bytes::from("competitor"));
}

#[tokio::test]
async fn test_custom_policy_bounds_attempts() {
    let store = Arc::new(ContendedStore::default());
    let policy = ExponentialBackoff {
        max_attempts: 5,
        base: Duration::from_millis(1),
        max: Duration::from_millis(4),
        jitter: true,
    };
    let writer = ConflictSafeWriter::with_policy(store.clone(), Arc::new(policy));

    let result = writer.safe_write("hot", |_| Ok(Bytes::from("mine"))).await;

    assert!(matches!(
        result,
        Err(Error::Write(WriteError::RetriesExhausted { attempts: 5, .. }))
    ));
    assert_eq!(store.reads.load(Ordering::SeqCst), 5);
}

#[tokio::test]
async fn test_writer_built_from_settings_file() {
    let temp_dir = tempfile::tempdir().unwrap();
    let path = temp_dir.path().join("kvsync.toml");
    std::fs::write(
        &path,
        r#"
        [retry]
        max_attempts = 2
        base_delay_ms = 1
        max_delay_ms = 5
        "#,
    )
    .unwrap();

    let settings = Settings::load(path.to_str()).unwrap();
    let store = Arc::new(ContendedStore::default());
    let writer = ConflictSafeWriter::from_backoff_policy(store.clone(), &settings.retry);

    let result = writer.safe_write("hot", |_| Ok(Bytes::from("mine"))).await;

    assert!(matches!(
        result,
        Err(Error::Write(WriteError::RetriesExhausted { attempts: 2, .. }))
    ));
    assert_eq!(store.reads.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_outage_is_not_retried() {
    let store = Arc::new(MemStore::new());
    store.set_unavailable(true);
    let writer = ConflictSafeWriter::new(store);

    let result = writer.safe_write("k", |_| Ok(Bytes::from("v"))).await;

    match result {
        Err(Error::Write(WriteError::StoreUnavailable { operation, source, .. })) => {
            assert_eq!(operation, "get");
            assert_eq!(source, StoreError::Unavailable("store is offline".to_string()));
        }
        other => panic!("unexpected result: {other:?}"),
    }
}
