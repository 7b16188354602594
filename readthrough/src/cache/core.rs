//! The store capability the readthrough cache is built on.
//!
//! Cached items consist of:
//!
//! * **A cache key**: a [`CacheKey`] derived from the request that produced the item.
//!
//! * **Metadata**: freshness lifetime, `stale-while-revalidate` window, surrogate keys for
//!   purging, and whether concurrent refreshes of the item collapse.
//!
//! * **The response itself**: status, headers, and the body as [`Bytes`], shared cheaply with
//!   every hit.
//!
//! [`CacheStore::lookup()`] reports one of four outcomes in a [`Lookup`]. When the caller is
//! expected to fetch and fill the item, the outcome carries a [`FillGuard`]; stores that collapse
//! requests make concurrent callers for the same key wait until that guard is dropped. Callers
//! therefore drop the guard only after the item has been written, marked hit-for-pass, or
//! abandoned.

use crate::http::{HeaderMap, StatusCode};
use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

pub use super::key::{CacheKey, CacheKeyConfig};

/// Errors arising from cache operations.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum CacheError {
    /// Operation failed due to a limit.
    #[error("cache operation failed due to a limit")]
    LimitExceeded,
    /// Operation was not valid to be performed given the state of the cached item.
    #[error("invalid cache operation")]
    InvalidOperation,
    /// Cache operation is not supported.
    #[error("unsupported cache operation")]
    Unsupported,
    /// The store failed in a way specific to its implementation.
    #[error("cache store error: {0}")]
    Other(#[from] anyhow::Error),
}

/// A response as written to the cache, along with its cache metadata.
#[derive(Clone, Debug)]
pub struct CachedEntry {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
    ttl: Duration,
    stale_while_revalidate: Duration,
    surrogate_keys: Vec<String>,
    collapsible: bool,
}

impl CachedEntry {
    /// Create an entry that is fresh for `ttl`, with no `stale-while-revalidate` window and no
    /// surrogate keys.
    pub fn new(status: StatusCode, headers: HeaderMap, body: Bytes, ttl: Duration) -> Self {
        Self {
            status,
            headers,
            body,
            ttl,
            stale_while_revalidate: Duration::ZERO,
            surrogate_keys: Vec::new(),
            collapsible: true,
        }
    }

    /// Set the time for which the entry may be served while it is being revalidated.
    pub fn stale_while_revalidate(mut self, duration: Duration) -> Self {
        self.stale_while_revalidate = duration;
        self
    }

    /// Set the surrogate keys that can be used to purge this entry.
    pub fn surrogate_keys<'a>(mut self, keys: impl IntoIterator<Item = &'a str>) -> Self {
        self.surrogate_keys = keys.into_iter().map(str::to_owned).collect();
        self
    }

    /// Set whether concurrent refreshes of this entry wait on a single fill.
    ///
    /// Defaults to `true`. When `false`, every caller that finds the entry stale is handed its own
    /// fill obligation.
    pub fn collapsible(mut self, collapsible: bool) -> Self {
        self.collapsible = collapsible;
        self
    }

    /// The cached status code.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// The cached headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// The cached body.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// The time for which the entry is fresh.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// The time for which the entry may be used while stale.
    pub fn get_stale_while_revalidate(&self) -> Duration {
        self.stale_while_revalidate
    }

    /// The surrogate keys of the entry.
    pub fn get_surrogate_keys(&self) -> &[String] {
        &self.surrogate_keys
    }

    /// Whether refreshes of the entry collapse.
    pub fn is_collapsible(&self) -> bool {
        self.collapsible
    }

    /// Replace the metadata of this entry, keeping its status and body.
    pub fn apply_update(&mut self, update: MetadataUpdate) {
        self.headers = update.headers;
        self.ttl = update.ttl;
        self.stale_while_revalidate = update.stale_while_revalidate;
        if let Some(keys) = update.surrogate_keys {
            self.surrogate_keys = keys;
        }
    }
}

/// The metadata written back when the origin confirms a cached entry with `304 Not Modified`.
///
/// The entry's age restarts from zero; its status and body are untouched.
#[derive(Clone, Debug)]
pub struct MetadataUpdate {
    headers: HeaderMap,
    ttl: Duration,
    stale_while_revalidate: Duration,
    surrogate_keys: Option<Vec<String>>,
}

impl MetadataUpdate {
    /// Replace the entry's headers and freshness lifetime.
    pub fn new(headers: HeaderMap, ttl: Duration) -> Self {
        Self {
            headers,
            ttl,
            stale_while_revalidate: Duration::ZERO,
            surrogate_keys: None,
        }
    }

    /// Replace the entry's `stale-while-revalidate` window.
    pub fn stale_while_revalidate(mut self, duration: Duration) -> Self {
        self.stale_while_revalidate = duration;
        self
    }

    /// Replace the entry's surrogate keys. If not called, the existing keys are kept.
    pub fn surrogate_keys<'a>(mut self, keys: impl IntoIterator<Item = &'a str>) -> Self {
        self.surrogate_keys = Some(keys.into_iter().map(str::to_owned).collect());
        self
    }

    /// The headers the entry will carry.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// The refreshed freshness lifetime.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}

/// A cached item returned by a lookup.
///
/// This provides the cached response along with [its age][Found::age()] and [whether it's
/// stale][Found::is_stale()].
#[derive(Clone, Debug)]
pub struct Found {
    entry: CachedEntry,
    age: Duration,
    hits: u64,
}

impl Found {
    /// Wrap an entry with the age and hit count observed by the store.
    pub fn new(entry: CachedEntry, age: Duration, hits: u64) -> Self {
        Self { entry, age, hits }
    }

    /// The time for which the cached item is considered fresh.
    pub fn ttl(&self) -> Duration {
        self.entry.ttl
    }

    /// The current age of the cached item.
    pub fn age(&self) -> Duration {
        self.age
    }

    /// The time for which a cached item can safely be used despite being considered stale.
    pub fn stale_while_revalidate(&self) -> Duration {
        self.entry.stale_while_revalidate
    }

    /// Determines whether the cached item is usable.
    ///
    /// A cached item is usable if its age is less than the sum of the TTL and stale-while-revalidate
    /// periods.
    pub fn is_usable(&self) -> bool {
        self.age < self.entry.ttl + self.entry.stale_while_revalidate
    }

    /// Determines whether the cached item is stale.
    ///
    /// A cached item is stale if its age is greater than or equal to its TTL period.
    pub fn is_stale(&self) -> bool {
        self.age >= self.entry.ttl
    }

    /// The number of times this item was returned by a lookup before this one.
    pub fn hits(&self) -> u64 {
        self.hits
    }

    /// The cached entry.
    pub fn entry(&self) -> &CachedEntry {
        &self.entry
    }

    /// Take ownership of the cached entry.
    pub fn into_entry(self) -> CachedEntry {
        self.entry
    }
}

/// The outcome of a [`CacheStore::lookup()`].
#[derive(Debug)]
pub enum Lookup {
    /// A fresh item, or a stale one served while another caller revalidates it.
    Hit(Found),
    /// An item whose freshness lifetime has passed. The caller should revalidate or replace it.
    Stale {
        /// The stale item.
        found: Found,
        /// The obligation to refresh the item.
        fill: FillGuard,
    },
    /// The key is marked as uncacheable. The caller should go to the origin without collapsing.
    HitForPass,
    /// Nothing is cached. The caller should fetch the item and store it.
    Miss {
        /// The obligation to fill the item.
        fill: FillGuard,
    },
}

/// The obligation to fill a cache key, handed to one caller at a time by collapsing stores.
///
/// Dropping the guard releases any callers waiting on the same key. They repeat their lookup,
/// finding either the item the guard holder wrote or, if nothing was written, an obligation of
/// their own.
#[must_use = "dropping a fill guard immediately releases waiting callers"]
pub struct FillGuard {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl FillGuard {
    /// A guard that runs `release` when dropped.
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }

    /// A guard with no waiters attached, for stores that do not collapse requests.
    pub fn inert() -> Self {
        Self { release: None }
    }

    /// Whether dropping this guard has no effect.
    pub fn is_inert(&self) -> bool {
        self.release.is_none()
    }
}

impl Drop for FillGuard {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl fmt::Debug for FillGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FillGuard")
            .field("inert", &self.is_inert())
            .finish()
    }
}

/// The key-value cache operations the readthrough cache consumes.
///
/// Eviction, replication, and persistence are up to the implementation.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Look up a key.
    ///
    /// Collapsing stores may suspend here while another caller holds the fill obligation for the
    /// key. Hit-for-pass markers never suspend.
    async fn lookup(&self, key: &CacheKey) -> Result<Lookup, CacheError>;

    /// Insert or replace the item for a key, clearing any hit-for-pass marker.
    async fn store(&self, key: &CacheKey, entry: CachedEntry) -> Result<(), CacheError>;

    /// Refresh the headers and freshness of an existing item without touching its body.
    ///
    /// Returns [`CacheError::InvalidOperation`] if nothing is cached for the key.
    async fn update_metadata(&self, key: &CacheKey, update: MetadataUpdate)
        -> Result<(), CacheError>;

    /// Replace whatever is cached for a key with a hit-for-pass marker lasting `ttl`.
    async fn mark_hit_for_pass(&self, key: &CacheKey, ttl: Duration) -> Result<(), CacheError>;

    /// Remove the item or marker cached for a key.
    async fn purge(&self, _key: &CacheKey) -> Result<(), CacheError> {
        Err(CacheError::Unsupported)
    }

    /// Remove every item tagged with the given surrogate key, returning how many were removed.
    async fn purge_surrogate_key(&self, _surrogate_key: &str) -> Result<usize, CacheError> {
        Err(CacheError::Unsupported)
    }
}

#[async_trait]
impl<S: CacheStore + ?Sized> CacheStore for Arc<S> {
    async fn lookup(&self, key: &CacheKey) -> Result<Lookup, CacheError> {
        (**self).lookup(key).await
    }

    async fn store(&self, key: &CacheKey, entry: CachedEntry) -> Result<(), CacheError> {
        (**self).store(key, entry).await
    }

    async fn update_metadata(
        &self,
        key: &CacheKey,
        update: MetadataUpdate,
    ) -> Result<(), CacheError> {
        (**self).update_metadata(key, update).await
    }

    async fn mark_hit_for_pass(&self, key: &CacheKey, ttl: Duration) -> Result<(), CacheError> {
        (**self).mark_hit_for_pass(key, ttl).await
    }

    async fn purge(&self, key: &CacheKey) -> Result<(), CacheError> {
        (**self).purge(key).await
    }

    async fn purge_surrogate_key(&self, surrogate_key: &str) -> Result<usize, CacheError> {
        (**self).purge_surrogate_key(surrogate_key).await
    }
}

#[cfg(test)]
mod found_tests {
    use super::*;

    fn entry(ttl: u64, swr: u64) -> CachedEntry {
        CachedEntry::new(
            StatusCode::OK,
            HeaderMap::new(),
            Bytes::from_static(b"x"),
            Duration::from_secs(ttl),
        )
        .stale_while_revalidate(Duration::from_secs(swr))
    }

    #[test]
    fn staleness_and_usability_follow_age() {
        let fresh = Found::new(entry(10, 5), Duration::from_secs(3), 0);
        assert!(!fresh.is_stale());
        assert!(fresh.is_usable());

        let stale = Found::new(entry(10, 5), Duration::from_secs(12), 0);
        assert!(stale.is_stale());
        assert!(stale.is_usable());

        let expired = Found::new(entry(10, 5), Duration::from_secs(15), 0);
        assert!(!expired.is_usable());
    }

    #[test]
    fn metadata_update_keeps_body_and_status() {
        let mut e = entry(10, 0).surrogate_keys(["a", "b"]);
        let mut headers = HeaderMap::new();
        headers.insert("etag", "\"v2\"".parse().unwrap());
        e.apply_update(MetadataUpdate::new(headers, Duration::from_secs(99)));
        assert_eq!(e.ttl(), Duration::from_secs(99));
        assert_eq!(e.body(), &Bytes::from_static(b"x"));
        assert_eq!(e.headers()["etag"], "\"v2\"");
        assert_eq!(e.get_surrogate_keys(), ["a", "b"]);
    }

    #[test]
    fn fill_guard_runs_release_once_on_drop() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        let released = Arc::new(AtomicUsize::new(0));
        let counter = released.clone();
        let guard = FillGuard::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert!(!guard.is_inert());
        drop(guard);
        assert_eq!(released.load(Ordering::SeqCst), 1);
        assert!(FillGuard::inert().is_inert());
    }
}
