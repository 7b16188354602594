//! Readthrough caching of HTTP responses.
//!
//! [`ReadthroughCache::send()`] is called once per inbound request. It serves fresh cached
//! responses directly, and otherwise sends the request to the origin and decides what to cache:
//!
//! 1. The cache key is derived from the request, and the [`CacheStore`] is consulted. A stale
//!    entry with an `ETag` or `Last-Modified` turns the origin fetch into a conditional request.
//! 2. [`CacheHooks::before_send()`] may rewrite the request. The origin is contacted only once the
//!    hook has returned.
//! 3. For a full response, [`CacheHooks::after_send()`] adjusts a [`CandidateResponse`]. The
//!    resulting decision either stores the response, after running any declared
//!    [`BodyTransform`], skips it, or marks the key hit-for-pass.
//! 4. For a `304 Not Modified` refreshing a stale entry, the hook runs on the cached headers
//!    overlaid with the `304`'s. Only the entry's headers and lifetime are updated; its body is
//!    served and kept as is, and declared transforms are dropped.
//!
//! Requests marked [pass][crate::Request::set_pass()], and requests with methods other than `GET`
//! and `HEAD`, skip the cache entirely; only `before_send` runs for them.

mod candidate;
mod freshness;
mod hooks;
pub mod policy;
mod transform;

pub use self::candidate::{CacheDecision, CandidateResponse, StorageAction};
pub use self::freshness::SURROGATE_KEY;
pub use self::hooks::{CacheHooks, Hooks};
pub use self::policy::ContentTypePolicy;
pub use self::transform::{BodyTransform, TransformError};

use self::candidate::Finalized;
use self::freshness::Freshness;
use crate::backend::{Backend, Origin};
use crate::cache::core::{
    CacheError, CacheKey, CacheStore, CachedEntry, FillGuard, Found, Lookup, MetadataUpdate,
};
use crate::config::{CacheConfig, Config, ConfigError};
use crate::convert::ToBackend;
use crate::http::header::{
    AGE, CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE, ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH,
    LAST_MODIFIED, TRANSFER_ENCODING,
};
use crate::http::request::{SendError, SendErrorCause};
use crate::http::{HeaderMap, HeaderName, HeaderValue, Method, Request, Response, StatusCode};
use readthrough_shared::{CacheOverride, CacheState};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// A readthrough cache in front of an origin.
///
/// Cloning is cheap; clones share the store, origin, and hooks.
#[derive(Clone)]
pub struct ReadthroughCache {
    store: Arc<dyn CacheStore>,
    origin: Arc<dyn Origin>,
    hooks: Arc<dyn CacheHooks>,
    config: CacheConfig,
}

/// A builder for [`ReadthroughCache`].
pub struct ReadthroughCacheBuilder {
    store: Arc<dyn CacheStore>,
    origin: Arc<dyn Origin>,
    hooks: Arc<dyn CacheHooks>,
    config: CacheConfig,
}

impl ReadthroughCacheBuilder {
    /// Install the hooks. Without this, no hooks run and caching follows the response headers.
    pub fn hooks(mut self, hooks: impl CacheHooks + 'static) -> Self {
        self.hooks = Arc::new(hooks);
        self
    }

    /// Replace the default [`CacheConfig`].
    pub fn config(mut self, config: CacheConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the cache.
    pub fn build(self) -> ReadthroughCache {
        ReadthroughCache {
            store: self.store,
            origin: self.origin,
            hooks: self.hooks,
            config: self.config,
        }
    }
}

/// The outcome of a single origin fetch.
struct Fetched {
    resp: Response,
    sent_req: Request,
}

/// What the request needs to remember about itself once it has been handed to the origin.
struct RequestInfo {
    method: Method,
    overrides: CacheOverride,
}

impl ReadthroughCache {
    /// Start building a cache over the given store and origin.
    pub fn builder(
        store: impl CacheStore + 'static,
        origin: impl Origin + 'static,
    ) -> ReadthroughCacheBuilder {
        ReadthroughCacheBuilder {
            store: Arc::new(store),
            origin: Arc::new(origin),
            hooks: Arc::new(Hooks::new()),
            config: CacheConfig::default(),
        }
    }

    /// Build a cache from configuration, installing its content-type policy as the hooks.
    pub fn from_config(
        store: impl CacheStore + 'static,
        origin: impl Origin + 'static,
        config: &Config,
    ) -> Result<Self, ConfigError> {
        let mut builder = Self::builder(store, origin).config(config.cache.clone());
        if let Some(policy) = &config.policy {
            builder = builder.hooks(ContentTypePolicy::from_config(policy)?);
        }
        Ok(builder.build())
    }

    /// The key a request is cached under.
    pub fn cache_key(&self, req: &Request) -> CacheKey {
        CacheKey::from_request(req, &self.config.key)
    }

    /// Remove whatever is cached for a request.
    pub async fn purge(&self, req: &Request) -> Result<(), CacheError> {
        self.store.purge(&self.cache_key(req)).await
    }

    /// Remove every response cached with the given surrogate key.
    pub async fn purge_surrogate_key(&self, surrogate_key: &str) -> Result<usize, CacheError> {
        self.store.purge_surrogate_key(surrogate_key).await
    }

    /// Send a request through the cache to the given backend.
    ///
    /// The response carries an `X-Cache` header describing how it was produced, and, if the origin
    /// was contacted, the request that was sent to it.
    ///
    /// # Errors
    ///
    /// Fails if the origin cannot be reached, or if either hook returns an error. In those cases
    /// nothing is written to the cache. Failures to transform a body or to write to the cache are
    /// logged, and the response is served uncached.
    ///
    /// # Panics
    ///
    /// Panics if `backend` is a string that is not a valid backend name.
    pub async fn send(&self, req: Request, backend: impl ToBackend) -> Result<Response, SendError> {
        self.handle(req, backend.into_owned()).await
    }

    #[instrument(
        name = "readthrough",
        skip_all,
        fields(method = %req.get_method(), url = %req.get_url(), backend = %backend)
    )]
    async fn handle(&self, mut req: Request, backend: Backend) -> Result<Response, SendError> {
        info!("pipeline start");
        let info = RequestInfo {
            method: req.get_method().clone(),
            overrides: req.get_cache_override().clone(),
        };

        if info.overrides.is_pass() || !req.is_cacheable_method() {
            let Fetched { mut resp, sent_req } = self.fetch(req, &backend).await?;
            resp.set_backend_metadata(backend, sent_req);
            resp.set_cache_state(CacheState::Pass);
            info!(state = %CacheState::Pass, status = resp.get_status().as_u16(), "pass");
            return Ok(resp);
        }

        let key = self.cache_key(&req);
        let lookup = match self.store.lookup(&key).await {
            Ok(lookup) => lookup,
            Err(e) => {
                warn!(%key, error = %e, "cache lookup failed; fetching without collapsing");
                Lookup::Miss {
                    fill: FillGuard::inert(),
                }
            }
        };
        let (stale, fill, state) = match lookup {
            Lookup::Hit(found) => {
                info!(%key, age = found.age().as_secs(), "hit");
                return Ok(cached_response(found, CacheState::Hit));
            }
            Lookup::Stale { found, fill } => (Some(found), Some(fill), CacheState::Miss),
            Lookup::HitForPass => (None, None, CacheState::HitForPass),
            Lookup::Miss { fill } => (None, Some(fill), CacheState::Miss),
        };
        debug!(%key, %state, stale = stale.is_some(), "fetching from origin");

        if let Some(found) = &stale {
            req.remove_header(IF_NONE_MATCH);
            req.remove_header(IF_MODIFIED_SINCE);
            if let Some(etag) = found.entry().headers().get(ETAG) {
                req.set_header(IF_NONE_MATCH, etag);
            }
            if let Some(last_modified) = found.entry().headers().get(LAST_MODIFIED) {
                req.set_header(IF_MODIFIED_SINCE, last_modified);
            }
        }

        let fetched = self.fetch(req, &backend).await?;
        let resp = if fetched.resp.get_status() == StatusCode::NOT_MODIFIED {
            match stale {
                Some(found) => self.revalidate(&key, found, fetched, &backend, &info).await?,
                None => {
                    debug!(%key, "passing through a 304 for a client conditional request");
                    let Fetched { mut resp, sent_req } = fetched;
                    resp.set_backend_metadata(backend, sent_req);
                    resp.set_cache_state(state);
                    resp
                }
            }
        } else {
            let mut resp = self.complete(&key, fetched, &backend, &info).await?;
            resp.set_cache_state(state);
            resp
        };
        // Waiters are released only once the write above has landed.
        drop(fill);
        Ok(resp)
    }

    /// Run `before_send` and send the request to the origin.
    async fn fetch(&self, mut req: Request, backend: &Backend) -> Result<Fetched, SendError> {
        if let Err(e) = self.hooks.before_send(&mut req) {
            debug!(error = %e, "before_send failed");
            return Err(SendError::new(
                backend.name(),
                req,
                SendErrorCause::BeforeSend(e),
            ));
        }
        debug!(headers = req.get_header_map().len(), "before_send");

        let sent_req = req.clone_without_body();
        match self.origin.send(backend, req).await {
            Ok(resp) => Ok(Fetched { resp, sent_req }),
            Err(e) => {
                debug!(error = %e, "origin fetch failed");
                Err(SendError::new(
                    backend.name(),
                    sent_req,
                    SendErrorCause::Transport(e),
                ))
            }
        }
    }

    /// Run `after_send` on a fresh origin response and act on the decision.
    async fn complete(
        &self,
        key: &CacheKey,
        fetched: Fetched,
        backend: &Backend,
        info: &RequestInfo,
    ) -> Result<Response, SendError> {
        let Fetched { mut resp, sent_req } = fetched;
        let status = resp.get_status();
        let freshness = Freshness::from_response(
            &info.method,
            status,
            resp.get_header_map(),
            &info.overrides,
            self.config.default_ttl(),
        );
        // The origin headers stay on `resp` until a transform has succeeded.
        let headers = resp.get_header_map().clone();
        let mut candidate = CandidateResponse::new(status, headers, freshness, false);
        if let Err(e) = self.hooks.after_send(&mut candidate) {
            debug!(error = %e, "after_send failed");
            return Err(SendError::new(
                backend.name(),
                sent_req,
                SendErrorCause::AfterSend(e),
            ));
        }
        debug!(action = ?candidate.get_storage_action(), "after_send");

        let Finalized {
            headers,
            mut decision,
            stale_while_revalidate,
            surrogate_keys,
            transform,
        } = candidate.finalize();
        let body = resp.take_body().into_bytes();

        let (headers, body) = match transform {
            Some(transform) => {
                let mut headers = headers;
                match transform.apply(&mut headers, body.clone()) {
                    Ok(transformed) => (headers, transformed),
                    Err(e) => {
                        warn!(%key, error = %e, "body transform failed; serving origin response uncached");
                        decision = CacheDecision::Skip;
                        (std::mem::take(resp.get_header_map_mut()), body)
                    }
                }
            }
            None => (headers, body),
        };
        info!(
            %key,
            decision = decision.as_str(),
            ttl = ?decision_ttl(&decision),
            status = status.as_u16(),
            "decision"
        );

        match decision {
            CacheDecision::Store { ttl } => {
                let entry = CachedEntry::new(status, headers.clone(), body.clone(), ttl)
                    .stale_while_revalidate(stale_while_revalidate)
                    .surrogate_keys(surrogate_keys.iter().map(String::as_str));
                if let Err(e) = self.store.store(key, entry).await {
                    warn!(%key, error = %e, "cache store failed; serving response uncached");
                }
            }
            CacheDecision::Skip => {}
            CacheDecision::HitForPass { ttl } => {
                if let Err(e) = self.store.mark_hit_for_pass(key, ttl).await {
                    warn!(%key, error = %e, "marking hit-for-pass failed");
                }
            }
        }

        *resp.get_header_map_mut() = headers;
        resp.set_body(body);
        resp.set_backend_metadata(backend.clone(), sent_req);
        Ok(resp)
    }

    /// Refresh a stale entry confirmed by a `304 Not Modified`.
    async fn revalidate(
        &self,
        key: &CacheKey,
        found: Found,
        fetched: Fetched,
        backend: &Backend,
        info: &RequestInfo,
    ) -> Result<Response, SendError> {
        let Fetched {
            resp: not_modified,
            sent_req,
        } = fetched;
        let entry = found.into_entry();
        let headers = merge_not_modified(entry.headers(), not_modified.get_header_map());
        let freshness = Freshness::from_response(
            &info.method,
            entry.status(),
            &headers,
            &info.overrides,
            self.config.default_ttl(),
        );
        let mut candidate = CandidateResponse::new(entry.status(), headers, freshness, true);
        if let Err(e) = self.hooks.after_send(&mut candidate) {
            debug!(error = %e, "after_send failed");
            return Err(SendError::new(
                backend.name(),
                sent_req,
                SendErrorCause::AfterSend(e),
            ));
        }
        debug!(action = ?candidate.get_storage_action(), "after_send");

        let Finalized {
            headers,
            decision,
            stale_while_revalidate,
            surrogate_keys,
            ..
        } = candidate.finalize();
        info!(
            %key,
            decision = decision.as_str(),
            ttl = ?decision_ttl(&decision),
            revalidation = true,
            "decision"
        );

        match decision {
            CacheDecision::Store { ttl } => {
                let update = MetadataUpdate::new(headers.clone(), ttl)
                    .stale_while_revalidate(stale_while_revalidate)
                    .surrogate_keys(surrogate_keys.iter().map(String::as_str));
                if let Err(e) = self.store.update_metadata(key, update).await {
                    warn!(%key, error = %e, "cache metadata update failed");
                }
            }
            CacheDecision::Skip => {}
            CacheDecision::HitForPass { ttl } => {
                if let Err(e) = self.store.mark_hit_for_pass(key, ttl).await {
                    warn!(%key, error = %e, "marking hit-for-pass failed");
                }
            }
        }

        let mut resp = Response::from_status(entry.status())
            .with_version(not_modified.get_version())
            .with_body(entry.body().clone());
        *resp.get_header_map_mut() = headers;
        resp.set_backend_metadata(backend.clone(), sent_req);
        resp.set_cache_state(CacheState::Revalidated);
        Ok(resp)
    }
}

impl std::fmt::Debug for ReadthroughCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadthroughCache")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn decision_ttl(decision: &CacheDecision) -> Option<std::time::Duration> {
    match decision {
        CacheDecision::Store { ttl } | CacheDecision::HitForPass { ttl } => Some(*ttl),
        CacheDecision::Skip => None,
    }
}

/// Overlay the headers of a `304 Not Modified` onto the stored headers.
///
/// Every header the `304` carries replaces all stored values of the same name, except for those
/// describing the stored body.
fn merge_not_modified(stored: &HeaderMap, not_modified: &HeaderMap) -> HeaderMap {
    let mut headers = stored.clone();
    let fresh = not_modified
        .keys()
        .filter(|name| !is_representation_header(name));
    for name in fresh {
        headers.remove(name);
        for value in not_modified.get_all(name) {
            headers.append(name.clone(), value.clone());
        }
    }
    headers
}

/// Whether a header describes the stored body, so that a `304 Not Modified` never replaces it.
fn is_representation_header(name: &HeaderName) -> bool {
    name == CONTENT_TYPE
        || name == CONTENT_LENGTH
        || name == CONTENT_ENCODING
        || name == TRANSFER_ENCODING
}

/// Build the client response for a cached entry.
fn cached_response(found: Found, state: CacheState) -> Response {
    let age = found.age().as_secs();
    let entry = found.into_entry();
    let mut resp = Response::from_status(entry.status()).with_body(entry.body().clone());
    *resp.get_header_map_mut() = entry.headers().clone();
    resp.set_header(AGE, HeaderValue::from(age));
    resp.set_cache_state(state);
    resp
}

#[cfg(test)]
mod merge_tests {
    use super::*;

    #[test]
    fn not_modified_headers_replace_all_but_representation() {
        let mut stored = HeaderMap::new();
        stored.insert(CONTENT_TYPE, HeaderValue::from_static("text/html"));
        stored.insert(CONTENT_LENGTH, HeaderValue::from_static("18"));
        stored.insert(ETAG, HeaderValue::from_static("\"v1\""));
        stored.append("x-keep", HeaderValue::from_static("1"));
        stored.append("x-multi", HeaderValue::from_static("a"));
        stored.append("x-multi", HeaderValue::from_static("b"));

        let mut not_modified = HeaderMap::new();
        not_modified.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        not_modified.insert(CONTENT_LENGTH, HeaderValue::from_static("0"));
        not_modified.insert(ETAG, HeaderValue::from_static("\"v2\""));
        not_modified.insert("x-multi", HeaderValue::from_static("c"));

        let merged = merge_not_modified(&stored, &not_modified);
        assert_eq!(merged[CONTENT_TYPE], "text/html");
        assert_eq!(merged[CONTENT_LENGTH], "18");
        assert_eq!(merged[ETAG], "\"v2\"");
        assert_eq!(merged["x-keep"], "1");
        assert_eq!(
            merged.get_all("x-multi").iter().collect::<Vec<_>>(),
            vec!["c"]
        );
    }
}
