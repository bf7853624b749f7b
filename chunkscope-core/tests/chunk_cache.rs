use chunkscope_core::{ChunkCache, ChunkKey, Error, FailurePolicy, RetryPolicy};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn key(index: u64) -> ChunkKey {
    ChunkKey::new("/acquisition/ts/timestamps".into(), index)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_requests_share_one_fetch() {
    let cache: ChunkCache<ChunkKey, Vec<f64>> = ChunkCache::default();
    let calls = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..32 {
        let cache = cache.clone();
        let calls = calls.clone();
        handles.push(tokio::spawn(async move {
            cache
                .get(key(7), move || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async {
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok((0..10).map(f64::from).collect())
                    }
                })
                .await
        }));
    }

    for handle in handles {
        let chunk = handle.await.unwrap().unwrap();
        assert_eq!(chunk.len(), 10);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(cache.contains(&key(7)));
    assert!(!cache.is_pending(&key(7)));
}

#[tokio::test]
async fn test_pending_is_visible_while_in_flight() {
    let cache: ChunkCache<ChunkKey, u8> = ChunkCache::default();
    let (tx, rx) = tokio::sync::oneshot::channel::<()>();
    let rx = Arc::new(parking_lot::Mutex::new(Some(rx)));
    let fut = cache.get(key(0), move || {
        let rx = rx.lock().take();
        async move {
            if let Some(rx) = rx {
                let _ = rx.await;
            }
            Ok(1)
        }
    });
    let task = tokio::spawn(fut);
    tokio::task::yield_now().await;
    assert!(cache.is_pending(&key(0)));
    tx.send(()).unwrap();
    assert_eq!(*task.await.unwrap().unwrap(), 1);
    assert_eq!(cache.peek(&key(0)).as_deref(), Some(&1));
}

#[tokio::test(start_paused = true)]
async fn test_retry_exhaustion_clears_in_flight_marker() {
    let cache: ChunkCache<ChunkKey, u8> = ChunkCache::new(
        RetryPolicy::default()
            .with_max_attempts(3)
            .with_backoff(Duration::from_millis(10), Duration::from_millis(40)),
        FailurePolicy::Retry,
    );
    let calls = Arc::new(AtomicUsize::new(0));

    let c = calls.clone();
    let err = cache
        .get(key(1), move || {
            c.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::transport("/ts", "connection reset")) }
        })
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ChunkFetch { .. }));
    assert!(err.to_string().contains("connection reset"));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert!(!cache.is_pending(&key(1)));

    // a later caller may try again and succeed
    let c = calls.clone();
    let value = cache
        .get(key(1), move || {
            c.fetch_add(1, Ordering::SeqCst);
            async { Ok(9) }
        })
        .await
        .unwrap();
    assert_eq!(*value, 9);
    assert_eq!(calls.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn test_blacklist_fails_fast() {
    let cache: ChunkCache<ChunkKey, u8> =
        ChunkCache::new(RetryPolicy::none(), FailurePolicy::Blacklist);
    let calls = Arc::new(AtomicUsize::new(0));

    let c = calls.clone();
    let first = cache
        .get(key(2), move || {
            c.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::transport("/video", "status 500")) }
        })
        .await;
    assert!(matches!(first, Err(Error::ChunkFetch { .. })));

    let c = calls.clone();
    let second = cache
        .get(key(2), move || {
            c.fetch_add(1, Ordering::SeqCst);
            async { Ok(1) }
        })
        .await;
    assert!(matches!(second, Err(Error::ChunkBlacklisted { .. })));
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    assert!(cache.forget_failure(&key(2)));
    let third = cache.get(key(2), || async { Ok(3) }).await.unwrap();
    assert_eq!(*third, 3);
}

#[tokio::test]
async fn test_cancellation_is_never_retried_or_blacklisted() {
    let cache: ChunkCache<ChunkKey, u8> =
        ChunkCache::new(RetryPolicy::default(), FailurePolicy::Blacklist);
    let calls = Arc::new(AtomicUsize::new(0));
    let c = calls.clone();
    let err = cache
        .get(key(3), move || {
            c.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::Canceled) }
        })
        .await
        .unwrap_err();
    assert!(err.is_canceled());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(cache.get(key(3), || async { Ok(4) }).await.is_ok());
}

#[tokio::test]
async fn test_distinct_keys_fetch_independently() {
    let cache: ChunkCache<ChunkKey, u64> = ChunkCache::default();
    let calls = Arc::new(AtomicUsize::new(0));
    let futures: Vec<_> = (0..5)
        .map(|i| {
            let c = calls.clone();
            cache.get(key(i), move || {
                c.fetch_add(1, Ordering::SeqCst);
                async move { Ok(i * 10) }
            })
        })
        .collect();
    let values = futures::future::try_join_all(futures).await.unwrap();
    let values: Vec<u64> = values.iter().map(|v| **v).collect();
    assert_eq!(values, vec![0, 10, 20, 30, 40]);
    assert_eq!(calls.load(Ordering::SeqCst), 5);
    assert_eq!(cache.len(), 5);
}
