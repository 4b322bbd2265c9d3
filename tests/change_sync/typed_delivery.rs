use std::sync::Arc;

use bytes::Bytes;
use kvsync::ChangeSyncPump;
use kvsync::ConflictSafeWriter;
use kvsync::MemStore;
use kvsync::SyncConfig;
use kvsync::TypedChangeSyncPump;
use kvsync::VersionedStore;
use tokio_util::sync::CancellationToken;

use crate::common::channel_callback;
use crate::common::next;
use crate::common::Counter;

#[tokio::test]
async fn test_typed_sync_follows_json_writer() {
    let store = Arc::new(MemStore::new());
    let writer = ConflictSafeWriter::new(store.clone());
    let typed = TypedChangeSyncPump::new(ChangeSyncPump::with_config(store.clone(), SyncConfig::default()));
    let cancel = CancellationToken::new();
    let (callback, mut rx) = channel_callback::<Counter>();

    typed.start_typed_sync("stats.", callback, &cancel).await.unwrap();

    // A foreign producer writes garbage first; the loop must survive it
    store.put("stats.hits", Bytes::from("garbage")).await.unwrap();
    store.delete("stats.hits").await.unwrap();

    for _ in 0..2 {
        writer
            .safe_write_json("stats.hits", |current: Option<Counter>| {
                Ok(Counter {
                    count: current.map(|c| c.count).unwrap_or(0) + 1,
                })
            })
            .await
            .unwrap();
    }

    assert_eq!(next(&mut rx).await, ("stats.hits".to_string(), Counter { count: 1 }));
    assert_eq!(next(&mut rx).await, ("stats.hits".to_string(), Counter { count: 2 }));
    cancel.cancel();
}
