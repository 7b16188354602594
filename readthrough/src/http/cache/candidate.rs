use super::freshness::Freshness;
use super::transform::BodyTransform;
use crate::convert::{ToHeaderName, ToHeaderValue};
use crate::http::header::CONTENT_TYPE;
use crate::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use mime::Mime;
use std::time::Duration;

/// What to do with a response once the `after_send` hook returns.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum StorageAction {
    /// Cache the response for its freshness lifetime.
    Store,
    /// Do not cache the response. Concurrent requests for the same key may still collapse.
    Skip,
    /// Do not cache the response, and record that the key is uncacheable so that requests for it
    /// stop collapsing until a cacheable response arrives.
    HitForPass,
}

/// The outcome of the policy for one response.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CacheDecision {
    /// Persist the response for `ttl`.
    Store {
        /// The freshness lifetime.
        ttl: Duration,
    },
    /// Persist nothing.
    Skip,
    /// Persist a hit-for-pass marker lasting `ttl`.
    HitForPass {
        /// How long the marker lasts.
        ttl: Duration,
    },
}

impl CacheDecision {
    /// A short name for logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Store { .. } => "store",
            Self::Skip => "skip",
            Self::HitForPass { .. } => "hit-for-pass",
        }
    }
}

/// A response from the origin, as offered to the `after_send` hook.
///
/// The hook may read and rewrite headers and adjust the cache policy: the freshness lifetime
/// ([`set_ttl()`][Self::set_ttl()]), the `stale-while-revalidate` window, surrogate keys, and
/// whether and how to store the response ([`set_cacheable()`][Self::set_cacheable()],
/// [`set_uncacheable()`][Self::set_uncacheable()]). It may also declare a [`BodyTransform`] to
/// apply to the body before it is cached. The body itself is not available here.
///
/// The policy starts from the origin's headers and the request's [`CacheOverride`][crate::CacheOverride]:
///
/// * the lifetime comes from the request's TTL override, then `Cache-Control: s-maxage` or
///   `max-age`, then `Expires` relative to `Date`, then the configured default;
/// * the response is suggested as cacheable if the request was a `GET` or `HEAD`, the status is
///   one that is cacheable by default, and there is neither `Cache-Control: no-store` or `private`
///   nor `Set-Cookie`.
///
/// Unless the hook chooses a [`StorageAction`], the suggestion decides whether the response is
/// stored or skipped.
///
/// # Revalidation
///
/// When the origin answers a conditional request with `304 Not Modified`, the candidate has the
/// cached status and headers, overlaid with the headers of the `304`, and
/// [`is_revalidation()`][Self::is_revalidation()] returns `true`. The hook can run unchanged:
/// any transform it declares is ignored, since the cached body has already been transformed.
#[derive(Debug)]
pub struct CandidateResponse {
    status: StatusCode,
    headers: HeaderMap,
    ttl: Duration,
    stale_while_revalidate: Duration,
    surrogate_keys: Vec<String>,
    suggested_cacheable: bool,
    action: Option<StorageAction>,
    transform: Option<BodyTransform>,
    revalidation: bool,
}

/// A candidate after the hook has run.
#[derive(Debug)]
pub(crate) struct Finalized {
    pub headers: HeaderMap,
    pub decision: CacheDecision,
    pub stale_while_revalidate: Duration,
    pub surrogate_keys: Vec<String>,
    pub transform: Option<BodyTransform>,
}

impl CandidateResponse {
    pub(crate) fn new(
        status: StatusCode,
        headers: HeaderMap,
        freshness: Freshness,
        revalidation: bool,
    ) -> Self {
        Self {
            status,
            headers,
            ttl: freshness.ttl,
            stale_while_revalidate: freshness.stale_while_revalidate,
            surrogate_keys: freshness.surrogate_keys,
            suggested_cacheable: freshness.cacheable,
            action: None,
            transform: None,
            revalidation,
        }
    }

    /// Get the HTTP status code of the response.
    ///
    /// For a revalidation, this is the status of the cached response rather than `304`.
    pub fn get_status(&self) -> StatusCode {
        self.status
    }

    /// Returns whether the given header name is present in the response.
    pub fn contains_header(&self, name: impl ToHeaderName) -> bool {
        self.headers.contains_key(name.into_owned())
    }

    /// Get the value of a header, or `None` if the header is not present.
    pub fn get_header(&self, name: impl ToHeaderName) -> Option<&HeaderValue> {
        self.headers.get(name.into_owned())
    }

    /// Get the value of a header as a string, or `None` if the header is not present or its value
    /// is not valid UTF-8.
    pub fn get_header_str(&self, name: impl ToHeaderName) -> Option<&str> {
        self.get_header(name).and_then(|v| v.to_str().ok())
    }

    /// Get an iterator of all the response's header names and values.
    pub fn get_headers(&self) -> impl Iterator<Item = (&HeaderName, &HeaderValue)> {
        self.headers.iter()
    }

    /// Set a response header to the given value, discarding any previous values for the given
    /// header name.
    pub fn set_header(&mut self, name: impl ToHeaderName, value: impl ToHeaderValue) {
        self.headers.insert(name.into_owned(), value.into_owned());
    }

    /// Add a response header with given value.
    pub fn append_header(&mut self, name: impl ToHeaderName, value: impl ToHeaderValue) {
        self.headers.append(name.into_owned(), value.into_owned());
    }

    /// Remove all response headers of the given name, and return one of the removed header values
    /// if any were present.
    pub fn remove_header(&mut self, name: impl ToHeaderName) -> Option<HeaderValue> {
        self.headers.remove(name.into_owned())
    }

    /// Get the MIME type described by the response's `Content-Type` header, or `None` if that
    /// header is absent or contains an invalid MIME type.
    pub fn get_content_type(&self) -> Option<Mime> {
        self.get_header_str(CONTENT_TYPE).and_then(|v| v.parse().ok())
    }

    /// The freshness lifetime the response will be cached for.
    pub fn get_ttl(&self) -> Duration {
        self.ttl
    }

    /// Set the freshness lifetime.
    ///
    /// For a hit-for-pass decision, this is how long the marker lasts.
    pub fn set_ttl(&mut self, ttl: Duration) {
        self.ttl = ttl;
    }

    /// The time the response may be served stale while it is revalidated.
    pub fn get_stale_while_revalidate(&self) -> Duration {
        self.stale_while_revalidate
    }

    /// Set the time the response may be served stale while it is revalidated.
    pub fn set_stale_while_revalidate(&mut self, swr: Duration) {
        self.stale_while_revalidate = swr;
    }

    /// The surrogate keys the response will be cached under.
    pub fn get_surrogate_keys(&self) -> &[String] {
        &self.surrogate_keys
    }

    /// Replace the surrogate keys the response will be cached under.
    pub fn set_surrogate_keys<'a>(&mut self, keys: impl IntoIterator<Item = &'a str>) {
        self.surrogate_keys = keys.into_iter().map(str::to_owned).collect();
    }

    /// Add a surrogate key.
    pub fn add_surrogate_key(&mut self, key: &str) {
        if !self.surrogate_keys.iter().any(|k| k == key) {
            self.surrogate_keys.push(key.to_owned());
        }
    }

    /// Whether the response will be stored, given the choices made so far.
    pub fn is_cacheable(&self) -> bool {
        match self.action {
            Some(action) => action == StorageAction::Store,
            None => self.suggested_cacheable,
        }
    }

    /// Store the response, overriding the suggestion derived from its headers.
    pub fn set_cacheable(&mut self) {
        self.set_storage_action(StorageAction::Store);
    }

    /// Do not store the response.
    ///
    /// If `record_uncacheable` is `true`, the key is marked hit-for-pass so that later requests for
    /// it go straight to the origin without waiting on each other.
    pub fn set_uncacheable(&mut self, record_uncacheable: bool) {
        self.set_storage_action(if record_uncacheable {
            StorageAction::HitForPass
        } else {
            StorageAction::Skip
        });
    }

    /// Choose what to do with the response.
    pub fn set_storage_action(&mut self, action: StorageAction) {
        self.action = Some(action);
    }

    /// The action chosen by the hook, or `None` if it left the decision to the response's
    /// headers.
    pub fn get_storage_action(&self) -> Option<StorageAction> {
        self.action
    }

    /// Whether this candidate is a `304 Not Modified` refreshing a cached response.
    pub fn is_revalidation(&self) -> bool {
        self.revalidation
    }

    /// Declare a transform for the body of the response.
    ///
    /// The transform runs only if the response is stored, and never for revalidations. Its output
    /// content type replaces `Content-Type` at the same time.
    pub fn set_body_transform(&mut self, transform: BodyTransform) {
        self.transform = Some(transform);
    }

    /// The transform declared so far, if any.
    pub fn get_body_transform(&self) -> Option<&BodyTransform> {
        self.transform.as_ref()
    }

    /// Remove a declared transform.
    pub fn clear_body_transform(&mut self) -> Option<BodyTransform> {
        self.transform.take()
    }

    /// Resolve the decision.
    ///
    /// An explicit action wins over the suggestion. The transform survives only a `Store`
    /// decision for a fresh response.
    pub(crate) fn finalize(self) -> Finalized {
        let action = self.action.unwrap_or(if self.suggested_cacheable {
            StorageAction::Store
        } else {
            StorageAction::Skip
        });
        let decision = match action {
            StorageAction::Store => CacheDecision::Store { ttl: self.ttl },
            StorageAction::Skip => CacheDecision::Skip,
            StorageAction::HitForPass => CacheDecision::HitForPass { ttl: self.ttl },
        };
        let transform = match decision {
            CacheDecision::Store { .. } if !self.revalidation => self.transform,
            _ => None,
        };
        Finalized {
            headers: self.headers,
            decision,
            stale_while_revalidate: self.stale_while_revalidate,
            surrogate_keys: self.surrogate_keys,
            transform,
        }
    }
}

#[cfg(test)]
mod candidate_tests {
    use super::*;

    fn candidate(cacheable: bool, revalidation: bool) -> CandidateResponse {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        CandidateResponse::new(
            StatusCode::OK,
            headers,
            Freshness {
                ttl: Duration::from_secs(2),
                stale_while_revalidate: Duration::ZERO,
                surrogate_keys: vec![],
                cacheable,
            },
            revalidation,
        )
    }

    #[test]
    fn unset_action_follows_suggestion() {
        let c = candidate(true, false);
        assert_eq!(c.get_storage_action(), None);
        assert!(c.is_cacheable());
        assert_eq!(
            c.finalize().decision,
            CacheDecision::Store {
                ttl: Duration::from_secs(2)
            }
        );
        assert_eq!(candidate(false, false).finalize().decision, CacheDecision::Skip);
    }

    #[test]
    fn explicit_action_wins() {
        let mut c = candidate(false, false);
        c.set_cacheable();
        c.set_ttl(Duration::from_secs(9));
        assert_eq!(
            c.finalize().decision,
            CacheDecision::Store {
                ttl: Duration::from_secs(9)
            }
        );

        let mut c = candidate(true, false);
        c.set_uncacheable(false);
        assert!(!c.is_cacheable());
        assert_eq!(c.finalize().decision, CacheDecision::Skip);

        let mut c = candidate(true, false);
        c.set_uncacheable(true);
        assert_eq!(c.get_storage_action(), Some(StorageAction::HitForPass));
        assert_eq!(
            c.finalize().decision,
            CacheDecision::HitForPass {
                ttl: Duration::from_secs(2)
            }
        );
    }

    #[test]
    fn transform_survives_only_fresh_store() {
        let mut c = candidate(true, false);
        c.set_body_transform(BodyTransform::json_to_html("{a}"));
        let f = c.finalize();
        assert!(f.transform.is_some());
        // the content type is rewritten by the transform itself, not at declaration
        assert_eq!(f.headers[CONTENT_TYPE], "application/json");

        let mut c = candidate(true, true);
        c.set_body_transform(BodyTransform::json_to_html("{a}"));
        assert!(c.is_revalidation());
        assert!(c.finalize().transform.is_none());

        let mut c = candidate(true, false);
        c.set_body_transform(BodyTransform::json_to_html("{a}"));
        c.set_uncacheable(true);
        assert!(c.finalize().transform.is_none());
        let mut c = candidate(true, false);
        c.set_body_transform(BodyTransform::json_to_html("{a}"));
        assert!(c.clear_body_transform().is_some());
        assert!(c.get_body_transform().is_none());
        assert!(c.finalize().transform.is_none());
    }

    #[test]
    fn header_edits_are_visible_in_the_decision() {
        let mut c = candidate(true, false);
        c.set_header("x-added", "1");
        c.remove_header(CONTENT_TYPE);
        let names: Vec<_> = c.get_headers().map(|(name, _)| name.as_str()).collect();
        assert_eq!(names, ["x-added"]);
        assert_eq!(c.finalize().headers["x-added"], "1");
    }

    #[test]
    fn surrogate_keys_are_deduplicated() {
        let mut c = candidate(true, false);
        c.set_surrogate_keys(["a", "b"]);
        c.add_surrogate_key("a");
        c.add_surrogate_key("c");
        assert_eq!(c.get_surrogate_keys(), ["a", "b", "c"]);
    }
}
