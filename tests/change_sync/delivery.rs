use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use kvsync::ChangeSyncPump;
use kvsync::ConflictSafeWriter;
use kvsync::MemStore;
use kvsync::SyncOutcome;
use kvsync::SyncScope;
use kvsync::VersionedStore;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::common::channel_callback;
use crate::common::next;
use crate::common::text;

#[tokio::test]
async fn test_writer_updates_reach_sync_callback_in_order() {
    let store = Arc::new(MemStore::new());
    let writer = ConflictSafeWriter::new(store.clone());
    let pump = ChangeSyncPump::new(store.clone());
    let cancel = CancellationToken::new();
    let (callback, mut rx) = channel_callback::<Bytes>();

    let handle = pump
        .start_sync("cfg.", callback, &cancel)
        .await
        .unwrap()
        .into_handle()
        .unwrap();

    for _ in 0..3 {
        writer
            .safe_write("cfg.version", |current| {
                let version: u32 = current.map(|v| text(v).parse().unwrap_or(0)).unwrap_or(0);
                Ok(Bytes::from((version + 1).to_string()))
            })
            .await
            .unwrap();
    }

    for expected in ["1", "2", "3"] {
        let (key, value) = next(&mut rx).await;
        assert_eq!(key, "cfg.version");
        assert_eq!(text(&value), expected);
    }

    cancel.cancel();
    let report = handle.join().await.unwrap();
    assert_eq!(report.outcome, SyncOutcome::Cancelled);
    assert_eq!(report.delivered, 3);
}

#[tokio::test]
async fn test_deletes_never_reach_callback() {
    let store = Arc::new(MemStore::new());
    let pump = ChangeSyncPump::new(store.clone());
    let cancel = CancellationToken::new();
    let (callback, mut rx) = channel_callback::<Bytes>();

    pump.start_sync("cfg.", callback, &cancel).await.unwrap();

    store.put("cfg.a", Bytes::from("1")).await.unwrap();
    store.delete("cfg.a").await.unwrap();
    store.put("cfg.a", Bytes::from("2")).await.unwrap();

    assert_eq!(text(&next(&mut rx).await.1), "1");
    assert_eq!(text(&next(&mut rx).await.1), "2");
    cancel.cancel();
}

#[tokio::test]
async fn test_no_delivery_after_cancellation() {
    let store = Arc::new(MemStore::new());
    let pump = ChangeSyncPump::new(store.clone());
    let cancel = CancellationToken::new();
    let (callback, mut rx) = channel_callback::<Bytes>();

    let handle = pump
        .start_sync("cfg.", callback, &cancel)
        .await
        .unwrap()
        .into_handle()
        .unwrap();
    store.put("cfg.a", Bytes::from("before")).await.unwrap();
    assert_eq!(text(&next(&mut rx).await.1), "before");

    cancel.cancel();
    // Grace period for an in-flight event
    sleep(Duration::from_millis(50)).await;
    assert!(handle.is_finished());

    store.put("cfg.a", Bytes::from("after")).await.unwrap();
    assert!(rx.recv().await.is_none());
    assert_eq!(store.watcher_count(), 0);
}

#[tokio::test]
async fn test_independent_scopes_on_one_pump() {
    let store = Arc::new(MemStore::new());
    let pump = ChangeSyncPump::new(store.clone());
    let cancel = CancellationToken::new();
    let (users_cb, mut users) = channel_callback::<Bytes>();
    let (flag_cb, mut flag) = channel_callback::<Bytes>();

    pump.start_sync("users.", users_cb, &cancel).await.unwrap();
    pump.start_key_sync("flags.beta", flag_cb, &cancel).await.unwrap();

    // Idempotent callers may start the same scope again
    let (extra_cb, _extra) = channel_callback::<Bytes>();
    let again = pump.start_sync("users.", extra_cb, &cancel).await.unwrap();
    assert!(!again.is_started());

    store.put("flags.alpha", Bytes::from("off")).await.unwrap();
    store.put("flags.beta", Bytes::from("on")).await.unwrap();
    store.put("users.1", Bytes::from("ada")).await.unwrap();

    assert_eq!(next(&mut flag).await.0, "flags.beta");
    assert_eq!(next(&mut users).await.0, "users.1");

    let mut scopes = pump.active_subscriptions();
    scopes.sort_by_key(|scope| scope.to_string());
    assert_eq!(scopes, vec![SyncScope::key("flags.beta"), SyncScope::prefix("users.")]);

    pump.registry().cancel_all();
    sleep(Duration::from_millis(50)).await;
    assert_eq!(store.watcher_count(), 0);
}
