//! Chunk cache with request coalescing.
//!
//! Every key is in one of three states: a ready value, a pending shared fetch
//! that concurrent callers join, or (under [`FailurePolicy::Blacklist`]) a
//! remembered failure. The slot map is guarded by a `parking_lot` mutex that
//! is never held across an await point.

use crate::config::{FailurePolicy, RetryPolicy};
use crate::{Error, Result};
use futures::future::{self, BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;

type SharedFetch<V> = Shared<BoxFuture<'static, Result<Arc<V>>>>;

enum Slot<V> {
    Ready(Arc<V>),
    Pending(SharedFetch<V>),
    Failed(Error),
}

struct Slots<K, V> {
    map: HashMap<K, Slot<V>>,
    // Bumped by `clear`, so fetches started earlier do not repopulate the map.
    generation: u64,
}

/// Cache of immutable chunks keyed by `K`.
///
/// Cloning the cache is cheap and shares the underlying slots.
pub struct ChunkCache<K, V> {
    slots: Arc<Mutex<Slots<K, V>>>,
    retry: RetryPolicy,
    failure_policy: FailurePolicy,
}

impl<K, V> Clone for ChunkCache<K, V> {
    fn clone(&self) -> Self {
        Self {
            slots: Arc::clone(&self.slots),
            retry: self.retry,
            failure_policy: self.failure_policy,
        }
    }
}

impl<K, V> Default for ChunkCache<K, V> {
    fn default() -> Self {
        Self::new(RetryPolicy::default(), FailurePolicy::default())
    }
}

impl<K, V> ChunkCache<K, V> {
    /// Creates an empty cache.
    #[must_use]
    pub fn new(retry: RetryPolicy, failure_policy: FailurePolicy) -> Self {
        Self {
            slots: Arc::new(Mutex::new(Slots {
                map: HashMap::new(),
                generation: 0,
            })),
            retry,
            failure_policy,
        }
    }

    /// Number of keys with a ready value.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots
            .lock()
            .map
            .values()
            .filter(|slot| matches!(slot, Slot::Ready(_)))
            .count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every entry, including pending fetches and remembered failures.
    ///
    /// Fetches already in flight still complete for the callers awaiting them
    /// but are not stored.
    pub fn clear(&self) {
        let mut slots = self.slots.lock();
        slots.map.clear();
        slots.generation = slots.generation.wrapping_add(1);
    }
}

impl<K, V> ChunkCache<K, V>
where
    K: Eq + Hash + Clone + Display + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Returns the cached value for `key` without fetching.
    #[must_use]
    pub fn peek(&self, key: &K) -> Option<Arc<V>> {
        match self.slots.lock().map.get(key) {
            Some(Slot::Ready(value)) => Some(Arc::clone(value)),
            _ => None,
        }
    }

    #[must_use]
    pub fn contains(&self, key: &K) -> bool {
        matches!(self.slots.lock().map.get(key), Some(Slot::Ready(_)))
    }

    /// Returns true while a fetch for `key` is in flight.
    #[must_use]
    pub fn is_pending(&self, key: &K) -> bool {
        matches!(self.slots.lock().map.get(key), Some(Slot::Pending(_)))
    }

    /// Forget a remembered failure so the key may be fetched again.
    ///
    /// Returns true if a failure was removed.
    pub fn forget_failure(&self, key: &K) -> bool {
        let mut slots = self.slots.lock();
        if matches!(slots.map.get(key), Some(Slot::Failed(_))) {
            slots.map.remove(key);
            true
        } else {
            false
        }
    }

    /// Resolve `key`, calling `fetcher` only if no value is cached and no
    /// fetch is in flight.
    ///
    /// `fetcher` may be called more than once when the retry policy allows
    /// further attempts after a retryable error.
    ///
    /// # Errors
    /// Returns [`Error::ChunkFetch`] naming the key when every attempt failed,
    /// [`Error::ChunkBlacklisted`] when a previous failure is remembered, and
    /// [`Error::Canceled`] when the fetcher reports cancellation.
    pub fn get<F, Fut>(&self, key: K, fetcher: F) -> BoxFuture<'static, Result<Arc<V>>>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        let mut slots = self.slots.lock();
        let pending = match slots.map.get(&key) {
            Some(Slot::Ready(value)) => {
                return future::ready(Ok(Arc::clone(value))).boxed();
            }
            Some(Slot::Failed(err)) => {
                let err = Error::ChunkBlacklisted {
                    key: key.to_string(),
                    message: err.to_string(),
                };
                return future::ready(Err(err)).boxed();
            }
            Some(Slot::Pending(pending)) => pending.clone(),
            None => {
                let fetch = self.resolve(key.clone(), slots.generation, fetcher);
                let pending = fetch.boxed().shared();
                slots.map.insert(key, Slot::Pending(pending.clone()));
                pending
            }
        };
        drop(slots);
        pending.boxed()
    }

    fn resolve<F, Fut>(
        &self,
        key: K,
        generation: u64,
        fetcher: F,
    ) -> impl Future<Output = Result<Arc<V>>> + Send + 'static
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        let slots = Arc::clone(&self.slots);
        let retry = self.retry;
        let failure_policy = self.failure_policy;
        async move {
            let mut attempt = 0;
            let outcome = loop {
                attempt += 1;
                match fetcher().await {
                    Ok(value) => break Ok(Arc::new(value)),
                    Err(err)
                        if !err.is_retryable() || attempt >= retry.max_attempts.max(1) =>
                    {
                        break Err(err);
                    }
                    Err(err) => {
                        let delay = retry.delay_after(attempt);
                        log::warn!("fetch of {key} failed (attempt {attempt}): {err}; retrying in {delay:?}");
                        tokio::time::sleep(delay).await;
                    }
                }
            };
            let outcome = outcome.map_err(|err| match err {
                Error::Canceled | Error::ChunkFetch { .. } => err,
                other => Error::ChunkFetch {
                    key: key.to_string(),
                    message: other.to_string(),
                },
            });

            let mut guard = slots.lock();
            if guard.generation == generation {
                match &outcome {
                    Ok(value) => {
                        guard.map.insert(key, Slot::Ready(Arc::clone(value)));
                    }
                    Err(err) if failure_policy == FailurePolicy::Blacklist && !err.is_canceled() => {
                        log::warn!("remembering failure for {key}: {err}");
                        guard.map.insert(key, Slot::Failed(err.clone()));
                    }
                    Err(_) => {
                        guard.map.remove(&key);
                    }
                }
            }
            drop(guard);
            outcome
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ChunkKey;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn key(i: u64) -> ChunkKey {
        ChunkKey::new("/ts".into(), i)
    }

    #[tokio::test]
    async fn ready_value_skips_fetcher() {
        let cache: ChunkCache<ChunkKey, Vec<f64>> = ChunkCache::default();
        let calls = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let c = calls.clone();
            let v = cache
                .get(key(0), move || {
                    c.fetch_add(1, Ordering::SeqCst);
                    async { Ok(vec![1.0, 2.0]) }
                })
                .await
                .unwrap();
            assert_eq!(*v, vec![1.0, 2.0]);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(cache.contains(&key(0)));
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failure_is_retried() {
        let cache: ChunkCache<ChunkKey, u32> = ChunkCache::new(
            RetryPolicy::default().with_backoff(Duration::from_millis(5), Duration::from_millis(5)),
            FailurePolicy::Retry,
        );
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let v = cache
            .get(key(1), move || {
                let n = c.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(Error::transport("/ts", "reset"))
                    } else {
                        Ok(7)
                    }
                }
            })
            .await
            .unwrap();
        assert_eq!(*v, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn not_found_is_not_retried_and_slot_is_cleared() {
        let cache: ChunkCache<ChunkKey, u32> = ChunkCache::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let err = cache
            .get(key(2), move || {
                c.fetch_add(1, Ordering::SeqCst);
                async { Err(Error::NotFound("/ts".into())) }
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ChunkFetch { ref key, .. } if key == "/ts@1#2"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!cache.is_pending(&key(2)));
        assert!(cache.peek(&key(2)).is_none());
    }

    #[tokio::test]
    async fn clear_discards_values() {
        let cache: ChunkCache<ChunkKey, u32> = ChunkCache::default();
        cache.get(key(3), || async { Ok(3) }).await.unwrap();
        cache.clear();
        assert!(cache.is_empty());
    }
}
