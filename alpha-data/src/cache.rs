//! Time-bounded, single-flight result cache.
//!
//! Entries expire lazily: a stale entry is replaced on the next access for its key, there is no
//! background eviction task. Failed results are cached like successful ones so a downed upstream
//! is retried at most once per TTL window.

use derive_more::{Constructor, Display};
use fnv::FnvHashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::{future::Future, hash::Hash, sync::Arc, time::Duration};
use tokio::{sync::OnceCell, time::Instant};
use tracing::trace;

/// Identity of a cached operation: what was called and with which arguments.
#[derive(
    Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Display, Constructor,
)]
#[display("{operation}:{args}")]
pub struct CacheKey {
    pub operation: SmolStr,
    pub args: SmolStr,
}

/// A stored value and the window it is valid for.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub value: V,
    pub fetched_at: Instant,
    pub ttl: Duration,
}

impl<V> CacheEntry<V> {
    pub fn is_live(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.fetched_at) < self.ttl
    }
}

/// A key's slot. Empty while its producer is in flight, every concurrent caller awaits the same
/// [`OnceCell`].
type Slot<V> = Arc<OnceCell<CacheEntry<V>>>;

/// Keyed cache with per-entry TTL and collapsed concurrent misses.
#[derive(Debug)]
pub struct TtlCache<K, V> {
    slots: Mutex<FnvHashMap<K, Slot<V>>>,
}

impl<K, V> Default for TtlCache<K, V> {
    fn default() -> Self {
        Self {
            slots: Mutex::new(FnvHashMap::default()),
        }
    }
}

impl<K, V> TtlCache<K, V>
where
    K: Clone + Eq + Hash + std::fmt::Display,
    V: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the live value for `key`, or run `producer` once and cache whatever it yields.
    ///
    /// Concurrent callers missing on the same key share one `producer` invocation. If the
    /// invoking caller is cancelled mid-flight, the next waiter runs its own producer.
    pub async fn get_or_fetch<F, Fut>(&self, key: K, ttl: Duration, producer: F) -> V
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V>,
    {
        let slot = self.slot(&key);

        if let Some(entry) = slot.get() {
            trace!(%key, "cache hit");
            return entry.value.clone();
        }

        let entry = slot
            .get_or_init(|| async {
                trace!(%key, "cache miss, invoking producer");
                let value = producer().await;
                CacheEntry {
                    value,
                    fetched_at: Instant::now(),
                    ttl,
                }
            })
            .await;

        entry.value.clone()
    }

    /// Live slot for `key`, replacing it if the stored entry expired.
    fn slot(&self, key: &K) -> Slot<V> {
        let now = Instant::now();
        let mut slots = self.slots.lock();

        let live = slots
            .get(key)
            .filter(|slot| slot.get().is_none_or(|entry| entry.is_live(now)))
            .cloned();

        if let Some(slot) = live {
            return slot;
        }

        if slots.contains_key(key) {
            trace!(%key, "cache entry expired, evicting");
        }

        let slot = Slot::default();
        slots.insert(key.clone(), Arc::clone(&slot));
        slot
    }

    /// Live value for `key` without invoking any producer.
    pub fn peek(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        self.slots
            .lock()
            .get(key)
            .and_then(|slot| slot.get())
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value.clone())
    }

    pub fn invalidate(&self, key: &K) -> bool {
        self.slots.lock().remove(key).is_some()
    }

    /// Drop every expired entry, returning how many were removed. In-flight slots are kept.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut slots = self.slots.lock();
        let before = slots.len();
        slots.retain(|_, slot| slot.get().is_none_or(|entry| entry.is_live(now)));
        before - slots.len()
    }

    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const TTL: Duration = Duration::from_secs(60);

    fn key(args: &str) -> CacheKey {
        CacheKey::new(SmolStr::new_static("ticker_24hr"), SmolStr::new(args))
    }

    async fn counted(calls: &AtomicUsize, value: u32) -> u32 {
        calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(100)).await;
        value
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_misses_single_flight() {
        let cache = TtlCache::<CacheKey, u32>::new();
        let calls = AtomicUsize::new(0);

        let (a, b, c) = tokio::join!(
            cache.get_or_fetch(key("spot"), TTL, || counted(&calls, 1)),
            cache.get_or_fetch(key("spot"), TTL, || counted(&calls, 2)),
            cache.get_or_fetch(key("spot"), TTL, || counted(&calls, 3)),
        );

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!((a, b, c), (1, 1, 1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_misses_across_tasks_single_flight() {
        let cache = Arc::new(TtlCache::<CacheKey, u32>::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let handles = (0..8)
            .map(|index| {
                let cache = Arc::clone(&cache);
                let calls = Arc::clone(&calls);
                tokio::spawn(async move {
                    cache
                        .get_or_fetch(key("spot"), TTL, || async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(100)).await;
                            index
                        })
                        .await
                })
            })
            .collect::<Vec<_>>();

        let mut values = Vec::new();
        for handle in handles {
            values.push(handle.await.unwrap());
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(values.windows(2).all(|pair| pair[0] == pair[1]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_live_entry_served_then_expired_entry_refetched() {
        let cache = TtlCache::<CacheKey, u32>::new();
        let calls = AtomicUsize::new(0);

        assert_eq!(cache.get_or_fetch(key("spot"), TTL, || counted(&calls, 1)).await, 1);

        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(cache.get_or_fetch(key("spot"), TTL, || counted(&calls, 2)).await, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(cache.peek(&key("spot")), None);
        assert_eq!(cache.get_or_fetch(key("spot"), TTL, || counted(&calls, 3)).await, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_are_cached_for_ttl() {
        let cache = TtlCache::<CacheKey, Result<u32, String>>::new();
        let calls = AtomicUsize::new(0);

        let producer = || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<u32, _>("all endpoints exhausted".to_string())
        };

        assert!(cache.get_or_fetch(key("spot"), TTL, producer).await.is_err());
        assert!(cache.get_or_fetch(key("spot"), TTL, producer).await.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_distinct_keys_do_not_share_results() {
        let cache = TtlCache::<CacheKey, u32>::new();
        let calls = AtomicUsize::new(0);

        let (spot, alpha) = tokio::join!(
            cache.get_or_fetch(key("spot"), TTL, || counted(&calls, 1)),
            cache.get_or_fetch(key("alpha"), TTL, || counted(&calls, 2)),
        );

        assert_eq!((spot, alpha), (1, 2));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired_and_invalidate() {
        let cache = TtlCache::<CacheKey, u32>::new();

        cache.get_or_fetch(key("short"), Duration::from_secs(5), || async { 1 }).await;
        cache.get_or_fetch(key("long"), TTL, || async { 2 }).await;

        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.peek(&key("long")), Some(2));

        assert!(cache.invalidate(&key("long")));
        assert!(cache.is_empty());
    }
}
