//! A process-local [`CacheStore`].

use super::core::{
    CacheError, CacheKey, CacheStore, CachedEntry, FillGuard, Found, Lookup, MetadataUpdate,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::debug;

/// How long an entry is kept after it stops being usable, so that it can still be revalidated.
pub const DEFAULT_STALE_RETENTION: Duration = Duration::from_secs(300);

/// An in-memory [`CacheStore`] with request collapsing.
///
/// The first caller to miss on a key, or to find its entry stale, is handed the [`FillGuard`] for
/// that key. Until the guard is dropped, other callers for the same key wait, except that a stale
/// entry still within its `stale-while-revalidate` window is served to them as a hit.
///
/// Entries are removed once they are older than their freshness lifetime, their
/// `stale-while-revalidate` window, and the store's stale retention combined. There is no other
/// eviction, so the store grows with the number of distinct keys.
///
/// Clones share the same storage.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
    stale_retention: Duration,
}

#[derive(Default)]
struct Inner {
    slots: HashMap<CacheKey, Slot>,
    fills: HashMap<CacheKey, PendingFill>,
    next_fill_id: u64,
}

enum Slot {
    Entry {
        entry: CachedEntry,
        stored_at: Instant,
        hits: u64,
    },
    HitForPass {
        until: Instant,
    },
}

struct PendingFill {
    id: u64,
    done: watch::Receiver<()>,
}

/// What a locked lookup decided, before any waiting.
enum Step {
    Done(Lookup),
    StartFill(Option<Found>),
    Wait(watch::Receiver<()>),
}

impl MemoryStore {
    /// Create an empty store with the [default stale retention][DEFAULT_STALE_RETENTION].
    pub fn new() -> Self {
        Self {
            inner: Arc::default(),
            stale_retention: DEFAULT_STALE_RETENTION,
        }
    }

    /// Set how long entries are kept for revalidation after they stop being usable.
    pub fn with_stale_retention(mut self, retention: Duration) -> Self {
        self.stale_retention = retention;
        self
    }

    /// The number of keys holding an entry or a hit-for-pass marker, expired ones included.
    pub fn len(&self) -> usize {
        self.lock().slots.len()
    }

    /// Whether the store holds nothing.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn step(&self, key: &CacheKey) -> Step {
        let mut inner = self.lock();
        let now = Instant::now();
        let Inner { slots, fills, .. } = &mut *inner;

        let found = match slots.get_mut(key) {
            Some(Slot::HitForPass { until }) if now < *until => {
                return Step::Done(Lookup::HitForPass);
            }
            Some(Slot::Entry {
                entry,
                stored_at,
                hits,
            }) => {
                let age = now.duration_since(*stored_at);
                let max_age = entry.ttl() + entry.get_stale_while_revalidate();
                if age >= max_age + self.stale_retention {
                    None
                } else {
                    let found = Found::new(entry.clone(), age, *hits);
                    *hits += 1;
                    Some(found)
                }
            }
            _ => None,
        };
        if found.is_none() {
            slots.remove(key);
        }

        match found {
            Some(found) if !found.is_stale() => Step::Done(Lookup::Hit(found)),
            Some(found) if !found.entry().is_collapsible() => Step::Done(Lookup::Stale {
                found,
                fill: FillGuard::inert(),
            }),
            found => match (fills.get(key), found) {
                (None, found) => Step::StartFill(found),
                (Some(_), Some(found)) if found.is_usable() => Step::Done(Lookup::Hit(found)),
                (Some(pending), _) => Step::Wait(pending.done.clone()),
            },
        }
    }

    fn begin_fill(&self, key: &CacheKey) -> Option<FillGuard> {
        let mut inner = self.lock();
        if inner.fills.contains_key(key) {
            return None;
        }
        let id = inner.next_fill_id;
        inner.next_fill_id += 1;
        let (tx, rx) = watch::channel(());
        inner.fills.insert(*key, PendingFill { id, done: rx });

        let weak: Weak<Mutex<Inner>> = Arc::downgrade(&self.inner);
        let key = *key;
        Some(FillGuard::new(move || {
            if let Some(inner) = weak.upgrade() {
                let mut inner = inner.lock().unwrap_or_else(PoisonError::into_inner);
                if inner.fills.get(&key).map_or(false, |p| p.id == id) {
                    inner.fills.remove(&key);
                }
            }
            drop(tx);
        }))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn lookup(&self, key: &CacheKey) -> Result<Lookup, CacheError> {
        loop {
            let mut done = match self.step(key) {
                Step::Done(lookup) => return Ok(lookup),
                Step::StartFill(found) => match self.begin_fill(key) {
                    Some(fill) => {
                        return Ok(match found {
                            Some(found) => Lookup::Stale { found, fill },
                            None => Lookup::Miss { fill },
                        })
                    }
                    // another caller started a fill between the two locks
                    None => continue,
                },
                Step::Wait(done) => done,
            };
            debug!(%key, "waiting on collapsed fill");
            // Only ever errors: the sender is dropped, never sent on.
            let _ = done.changed().await;
        }
    }

    async fn store(&self, key: &CacheKey, entry: CachedEntry) -> Result<(), CacheError> {
        self.lock().slots.insert(
            *key,
            Slot::Entry {
                entry,
                stored_at: Instant::now(),
                hits: 0,
            },
        );
        Ok(())
    }

    async fn update_metadata(
        &self,
        key: &CacheKey,
        update: MetadataUpdate,
    ) -> Result<(), CacheError> {
        match self.lock().slots.get_mut(key) {
            Some(Slot::Entry {
                entry, stored_at, ..
            }) => {
                entry.apply_update(update);
                *stored_at = Instant::now();
                Ok(())
            }
            _ => Err(CacheError::InvalidOperation),
        }
    }

    async fn mark_hit_for_pass(&self, key: &CacheKey, ttl: Duration) -> Result<(), CacheError> {
        self.lock().slots.insert(
            *key,
            Slot::HitForPass {
                until: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn purge(&self, key: &CacheKey) -> Result<(), CacheError> {
        self.lock().slots.remove(key);
        Ok(())
    }

    async fn purge_surrogate_key(&self, surrogate_key: &str) -> Result<usize, CacheError> {
        let mut inner = self.lock();
        let before = inner.slots.len();
        inner.slots.retain(|_, slot| match slot {
            Slot::Entry { entry, .. } => !entry
                .get_surrogate_keys()
                .iter()
                .any(|sk| sk == surrogate_key),
            Slot::HitForPass { .. } => true,
        });
        Ok(before - inner.slots.len())
    }
}

#[cfg(test)]
mod memory_store_tests {
    use super::*;
    use crate::http::{HeaderMap, StatusCode};
    use bytes::Bytes;

    fn key(s: &str) -> CacheKey {
        CacheKey::from_key_str(s)
    }

    fn entry(body: &'static str, ttl: u64) -> CachedEntry {
        CachedEntry::new(
            StatusCode::OK,
            HeaderMap::new(),
            Bytes::from_static(body.as_bytes()),
            Duration::from_secs(ttl),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn miss_then_hit_then_stale() {
        let store = MemoryStore::new();
        let k = key("a");
        match store.lookup(&k).await.unwrap() {
            Lookup::Miss { fill } => {
                store.store(&k, entry("one", 10)).await.unwrap();
                drop(fill);
            }
            other => panic!("unexpected lookup: {:?}", other),
        }
        match store.lookup(&k).await.unwrap() {
            Lookup::Hit(found) => {
                assert_eq!(found.entry().body(), &Bytes::from_static(b"one"));
                assert_eq!(found.hits(), 0);
            }
            other => panic!("unexpected lookup: {:?}", other),
        }
        tokio::time::advance(Duration::from_secs(11)).await;
        match store.lookup(&k).await.unwrap() {
            Lookup::Stale { found, fill } => {
                assert!(found.is_stale());
                assert!(!fill.is_inert());
            }
            other => panic!("unexpected lookup: {:?}", other),
        }
    }

    #[tokio::test]
    async fn concurrent_misses_collapse_onto_one_fill() {
        let store = MemoryStore::new();
        let k = key("collapse");
        let fill = match store.lookup(&k).await.unwrap() {
            Lookup::Miss { fill } => fill,
            other => panic!("unexpected lookup: {:?}", other),
        };

        let waiter = {
            let store = store.clone();
            tokio::spawn(async move { store.lookup(&k).await })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        store.store(&k, entry("filled", 60)).await.unwrap();
        drop(fill);
        match waiter.await.unwrap().unwrap() {
            Lookup::Hit(found) => assert_eq!(found.entry().body(), &Bytes::from_static(b"filled")),
            other => panic!("unexpected lookup: {:?}", other),
        }
    }

    #[tokio::test]
    async fn abandoned_fill_hands_obligation_to_waiter() {
        let store = MemoryStore::new();
        let k = key("abandon");
        let fill = match store.lookup(&k).await.unwrap() {
            Lookup::Miss { fill } => fill,
            other => panic!("unexpected lookup: {:?}", other),
        };
        let waiter = {
            let store = store.clone();
            tokio::spawn(async move { store.lookup(&k).await })
        };
        tokio::task::yield_now().await;
        drop(fill);
        assert!(matches!(
            waiter.await.unwrap().unwrap(),
            Lookup::Miss { .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn hit_for_pass_never_waits_and_expires() {
        let store = MemoryStore::new();
        let k = key("hfp");
        let fill = match store.lookup(&k).await.unwrap() {
            Lookup::Miss { fill } => fill,
            other => panic!("unexpected lookup: {:?}", other),
        };
        store
            .mark_hit_for_pass(&k, Duration::from_secs(5))
            .await
            .unwrap();
        // the first caller still holds its guard, yet nobody waits on a marker
        assert!(matches!(store.lookup(&k).await.unwrap(), Lookup::HitForPass));
        assert!(matches!(store.lookup(&k).await.unwrap(), Lookup::HitForPass));

        tokio::time::advance(Duration::from_secs(6)).await;
        drop(fill);
        assert!(matches!(store.lookup(&k).await.unwrap(), Lookup::Miss { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn stale_within_swr_is_served_while_another_caller_revalidates() {
        let store = MemoryStore::new();
        let k = key("swr");
        store
            .store(&k, entry("old", 10).stale_while_revalidate(Duration::from_secs(30)))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(15)).await;

        let _fill = match store.lookup(&k).await.unwrap() {
            Lookup::Stale { fill, .. } => fill,
            other => panic!("unexpected lookup: {:?}", other),
        };
        match store.lookup(&k).await.unwrap() {
            Lookup::Hit(found) => assert!(found.is_stale()),
            other => panic!("unexpected lookup: {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn non_collapsible_entries_hand_every_caller_a_fill() {
        let store = MemoryStore::new();
        let k = key("solo");
        store
            .store(&k, entry("x", 1).collapsible(false))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(2)).await;
        for _ in 0..2 {
            match store.lookup(&k).await.unwrap() {
                Lookup::Stale { fill, .. } => assert!(fill.is_inert()),
                other => panic!("unexpected lookup: {:?}", other),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn update_metadata_refreshes_age_and_requires_entry() {
        let store = MemoryStore::new();
        let k = key("update");
        assert!(matches!(
            store
                .update_metadata(&k, MetadataUpdate::new(HeaderMap::new(), Duration::from_secs(1)))
                .await,
            Err(CacheError::InvalidOperation)
        ));

        store.store(&k, entry("body", 1)).await.unwrap();
        tokio::time::advance(Duration::from_secs(5)).await;
        store
            .update_metadata(&k, MetadataUpdate::new(HeaderMap::new(), Duration::from_secs(60)))
            .await
            .unwrap();
        match store.lookup(&k).await.unwrap() {
            Lookup::Hit(found) => {
                assert_eq!(found.age(), Duration::ZERO);
                assert_eq!(found.ttl(), Duration::from_secs(60));
                assert_eq!(found.entry().body(), &Bytes::from_static(b"body"));
            }
            other => panic!("unexpected lookup: {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entries_are_dropped_after_retention() {
        let store = MemoryStore::new().with_stale_retention(Duration::from_secs(10));
        let k = key("old");
        store.store(&k, entry("x", 1)).await.unwrap();
        tokio::time::advance(Duration::from_secs(12)).await;
        assert!(matches!(store.lookup(&k).await.unwrap(), Lookup::Miss { .. }));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn purge_by_key_and_surrogate_key() {
        let store = MemoryStore::new();
        store
            .store(&key("a"), entry("a", 60).surrogate_keys(["products"]))
            .await
            .unwrap();
        store
            .store(&key("b"), entry("b", 60).surrogate_keys(["products", "b"]))
            .await
            .unwrap();
        store.store(&key("c"), entry("c", 60)).await.unwrap();

        assert_eq!(store.purge_surrogate_key("products").await.unwrap(), 2);
        assert_eq!(store.len(), 1);
        store.purge(&key("c")).await.unwrap();
        assert!(store.is_empty());
    }
}
