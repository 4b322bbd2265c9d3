use std::collections::BTreeSet;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use bytes::Bytes;
use futures::future::join_all;
use kvsync::ConflictSafeWriter;
use kvsync::Error;
use kvsync::MemStore;
use kvsync::VersionedStore;
use kvsync::WriteError;

use crate::common::patient_writer;
use crate::common::text;
use crate::common::Counter;

const WRITERS: u64 = 8;
const INCREMENTS: u64 = 10;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_increments_lose_no_update() {
    let store = Arc::new(MemStore::new());
    let writer = patient_writer(store.clone());

    let tasks = (0..WRITERS).map(|_| {
        let writer = writer.clone();
        tokio::spawn(async move {
            for _ in 0..INCREMENTS {
                writer
                    .safe_write_json("stats.hits", |current: Option<Counter>| {
                        let count = current.map(|c| c.count).unwrap_or(0);
                        Ok(Counter { count: count + 1 })
                    })
                    .await
                    .unwrap();
            }
        })
    });
    for joined in join_all(tasks).await {
        joined.unwrap();
    }

    let entry = store.get("stats.hits").await.unwrap().unwrap();
    let counter: Counter = serde_json::from_slice(&entry.value).unwrap();
    assert_eq!(counter.count, WRITERS * INCREMENTS);
    // One revision per committed write
    assert_eq!(entry.revision, WRITERS * INCREMENTS);
}

/// With the default 3-attempt policy some writers may give up, but every
/// success is still counted exactly once.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_exhausted_writers_do_not_corrupt_value() {
    let store = Arc::new(MemStore::new());
    let writer = ConflictSafeWriter::new(store.clone());
    let successes = Arc::new(AtomicU64::new(0));

    let tasks = (0..WRITERS).map(|_| {
        let writer = writer.clone();
        let successes = successes.clone();
        tokio::spawn(async move {
            for _ in 0..INCREMENTS {
                let result = writer
                    .safe_write_json("stats.hits", |current: Option<Counter>| {
                        let count = current.map(|c| c.count).unwrap_or(0);
                        Ok(Counter { count: count + 1 })
                    })
                    .await;
                match result {
                    Ok(_) => {
                        successes.fetch_add(1, Ordering::SeqCst);
                    }
                    Err(Error::Write(WriteError::RetriesExhausted { attempts, .. })) => assert_eq!(attempts, 3),
                    Err(e) => panic!("unexpected error: {e}"),
                }
            }
        })
    });
    for joined in join_all(tasks).await {
        joined.unwrap();
    }

    let entry = store.get("stats.hits").await.unwrap().unwrap();
    let counter: Counter = serde_json::from_slice(&entry.value).unwrap();
    assert_eq!(counter.count, successes.load(Ordering::SeqCst));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_creators_converge() {
    let store = Arc::new(MemStore::new());
    let writer = patient_writer(store.clone());

    let tasks = (0..WRITERS).map(|id| {
        let writer = writer.clone();
        tokio::spawn(async move {
            writer
                .safe_write("members", move |current| {
                    Ok(match current {
                        Some(existing) => Bytes::from(format!("{},{id}", text(existing))),
                        None => Bytes::from(id.to_string()),
                    })
                })
                .await
                .unwrap()
        })
    });
    let revisions: BTreeSet<u64> = join_all(tasks).await.into_iter().map(|r| r.unwrap()).collect();

    // Every writer committed a distinct revision
    assert_eq!(revisions, (1..=WRITERS).collect::<BTreeSet<_>>());

    let entry = store.get("members").await.unwrap().unwrap();
    let members: BTreeSet<u64> = text(&entry.value).split(',').map(|m| m.parse().unwrap()).collect();
    assert_eq!(members, (0..WRITERS).collect::<BTreeSet<_>>());
}
