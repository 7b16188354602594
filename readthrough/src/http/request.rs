//! HTTP requests.

use super::body::Body;
use crate::cache::core::CacheKey;
use crate::convert::{ToHeaderName, ToHeaderValue, ToMethod, ToUrl};
use http::header::HeaderValue;
use http::{HeaderMap, Method, Version};
use readthrough_shared::CacheOverride;
use std::fmt;
use thiserror::Error;
use url::Url;

/// An HTTP request, including body, headers, method, and URL.
///
/// # Creation and conversion
///
/// New requests can be created programmatically with [`Request::new()`]. In addition, there are
/// convenience constructors like [`Request::get()`] which automatically select the appropriate
/// method.
///
/// For interoperability with other Rust libraries, [`Request`] can be converted to and from the
/// [`http`] crate's [`http::Request`] type using the [`From`][`Self::from()`] and
/// [`Into`][`Self::into()`] traits.
///
/// # Builder-style methods
///
/// Methods with the `with_` name prefix, such as [`with_header()`][`Self::with_header()`], return
/// `Self` to allow chaining. Setter methods, such as [`set_header()`][`Self::set_header()`], are
/// prefixed by `set_` and work better when building a request involves conditional branches:
///
/// ```no_run
/// # use readthrough::Request;
/// # let needs_translation = true;
/// let mut req = Request::get("https://example.com").with_header("my-header", "hello!");
/// if needs_translation {
///     req.set_header("my-other-header", "hola!");
/// }
/// ```
///
/// # Caching behavior
///
/// [`set_pass()`][`Self::set_pass()`], [`set_ttl()`][`Self::set_ttl()`] and friends record a
/// [`CacheOverride`] that the readthrough cache consults before any hook runs.
#[derive(Debug)]
pub struct Request {
    version: Version,
    method: Method,
    url: Url,
    headers: HeaderMap,
    body: Option<Body>,
    cache_override: CacheOverride,
    cache_key: Option<CacheKey>,
}

impl Request {
    /// Create a new request with the given method and URL, no headers, and an empty body.
    ///
    /// The method and URL arguments can be any types that implement [`ToMethod`] and [`ToUrl`],
    /// respectively. See those traits for details on which types can be used and when panics may
    /// arise during conversion.
    pub fn new(method: impl ToMethod, url: impl ToUrl) -> Self {
        Self {
            version: Version::HTTP_11,
            method: method.into_owned(),
            url: url.into_owned(),
            headers: HeaderMap::new(),
            body: None,
            cache_override: CacheOverride::default(),
            cache_key: None,
        }
    }

    /// Make a new request with the same method, url, headers, version, and caching behavior of
    /// this request, but no body.
    pub fn clone_without_body(&self) -> Request {
        Self {
            version: self.version,
            method: self.method.clone(),
            url: self.url.clone(),
            headers: self.headers.clone(),
            body: None,
            cache_override: self.cache_override.clone(),
            cache_key: self.cache_key,
        }
    }

    /// Create a new `GET` [`Request`] with the given URL, no headers, and an empty body.
    pub fn get(url: impl ToUrl) -> Self {
        Self::new(Method::GET, url)
    }

    /// Create a new `HEAD` [`Request`] with the given URL, no headers, and an empty body.
    pub fn head(url: impl ToUrl) -> Self {
        Self::new(Method::HEAD, url)
    }

    /// Create a new `POST` [`Request`] with the given URL, no headers, and an empty body.
    pub fn post(url: impl ToUrl) -> Self {
        Self::new(Method::POST, url)
    }

    /// Builder-style equivalent of [`set_body()`][`Self::set_body()`].
    pub fn with_body(mut self, body: impl Into<Body>) -> Self {
        self.set_body(body);
        self
    }

    /// Returns `true` if this request has a body.
    pub fn has_body(&self) -> bool {
        self.body.is_some()
    }

    /// Set the given value as the request's body.
    pub fn set_body(&mut self, body: impl Into<Body>) {
        self.body = Some(body.into());
    }

    /// Take and return the body from this request.
    ///
    /// After calling this method, this request will no longer have a body.
    ///
    /// If the request does not have a body, an empty body is returned.
    pub fn take_body(&mut self) -> Body {
        self.body.take().unwrap_or_default()
    }

    /// Returns whether the given header name is present in the request.
    pub fn contains_header(&self, name: impl ToHeaderName) -> bool {
        self.headers.contains_key(name.into_owned())
    }

    /// Builder-style equivalent of [`append_header()`][`Self::append_header()`].
    pub fn with_header(mut self, name: impl ToHeaderName, value: impl ToHeaderValue) -> Self {
        self.append_header(name, value);
        self
    }

    /// Get the value of a header as a string, or `None` if the header is not present or its value
    /// is not valid UTF-8.
    ///
    /// If there are multiple values for the header, only one is returned. See
    /// [`get_header_all_str()`][`Self::get_header_all_str()`] if you need all of them.
    pub fn get_header_str(&self, name: impl ToHeaderName) -> Option<&str> {
        self.get_header(name).and_then(|v| v.to_str().ok())
    }

    /// Get the value of a header, or `None` if the header is not present.
    pub fn get_header(&self, name: impl ToHeaderName) -> Option<&HeaderValue> {
        self.headers.get(name.into_owned())
    }

    /// Get all values of a header as strings, skipping values that are not valid UTF-8.
    pub fn get_header_all_str(&self, name: impl ToHeaderName) -> Vec<&str> {
        self.headers
            .get_all(name.into_owned())
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect()
    }

    /// Get the full header map of the request.
    pub fn get_header_map(&self) -> &HeaderMap {
        &self.headers
    }

    /// Set a request header to the given value, discarding any previous values for the given
    /// header name.
    pub fn set_header(&mut self, name: impl ToHeaderName, value: impl ToHeaderValue) {
        self.headers.insert(name.into_owned(), value.into_owned());
    }

    /// Add a request header with given value.
    ///
    /// Unlike [`set_header()`][`Self::set_header()`], this does not discard existing values for the
    /// same header name.
    pub fn append_header(&mut self, name: impl ToHeaderName, value: impl ToHeaderValue) {
        self.headers.append(name.into_owned(), value.into_owned());
    }

    /// Remove all request headers of the given name, and return one of the removed header values
    /// if any were present.
    pub fn remove_header(&mut self, name: impl ToHeaderName) -> Option<HeaderValue> {
        self.headers.remove(name.into_owned())
    }

    /// Get the request method.
    pub fn get_method(&self) -> &Method {
        &self.method
    }

    /// Set the request method.
    pub fn set_method(&mut self, method: impl ToMethod) {
        self.method = method.into_owned();
    }

    /// Get the request URL.
    pub fn get_url(&self) -> &Url {
        &self.url
    }

    /// Set the request URL.
    pub fn set_url(&mut self, url: impl ToUrl) {
        self.url = url.into_owned();
    }

    /// Get the path component of the request URL.
    pub fn get_path(&self) -> &str {
        self.url.path()
    }

    /// Get the value of a query parameter in the request's URL.
    ///
    /// This assumes that the query string is a `&` separated list of `parameter=value` pairs. The
    /// value of the first occurrence of `parameter` is returned, without any percent-decoding.
    pub fn get_query_parameter(&self, parameter: &str) -> Option<&str> {
        self.url.query().and_then(|qs| {
            qs.split('&').find_map(|part| {
                let (param_name, param_value) = part.split_once('=').unwrap_or((part, ""));
                (param_name == parameter).then_some(param_value)
            })
        })
    }

    /// Builder-style equivalent of [`set_version()`][`Self::set_version()`].
    pub fn with_version(mut self, version: Version) -> Self {
        self.set_version(version);
        self
    }

    /// Get the HTTP version of this request.
    pub fn get_version(&self) -> Version {
        self.version
    }

    /// Set the HTTP version of this request.
    pub fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    /// Returns `true` if responses to this request's method may be cached.
    ///
    /// Only `GET` and `HEAD` requests are looked up in and written to the cache; all other
    /// methods are passed to the backend.
    pub fn is_cacheable_method(&self) -> bool {
        self.method == Method::GET || self.method == Method::HEAD
    }

    /// Builder-style equivalent of [`set_pass()`][`Self::set_pass()`].
    pub fn with_pass(mut self, pass: bool) -> Self {
        self.set_pass(pass);
        self
    }

    /// Set whether this request should be cached if sent to a backend.
    ///
    /// By default this is `false`, which means the backend will only be reached if a cached
    /// response is not available. Set this to `true` to send the request directly to the backend
    /// without caching.
    ///
    /// # Overrides
    ///
    /// Setting this to `true` overrides any other custom caching behaviors for this request, such
    /// as [`Request::set_ttl()`] or [`Request::set_surrogate_key()`].
    pub fn set_pass(&mut self, pass: bool) {
        self.cache_override.set_pass(pass);
    }

    /// Builder-style equivalent of [`set_ttl()`][`Self::set_ttl()`].
    pub fn with_ttl(mut self, ttl: u32) -> Self {
        self.set_ttl(ttl);
        self
    }

    /// Override the caching behavior of this request to use the given Time to Live (TTL), in seconds.
    ///
    /// # Overrides
    ///
    /// This overrides the lifetime derived from the response headers, though the `after_send`
    /// hook may still change it, and sets the [`pass`][`Self::set_pass()`] behavior to `false`.
    pub fn set_ttl(&mut self, ttl: u32) {
        self.cache_override.set_ttl(ttl);
    }

    /// Builder-style equivalent of [`set_stale_while_revalidate()`][`Self::set_stale_while_revalidate()`].
    pub fn with_stale_while_revalidate(mut self, swr: u32) -> Self {
        self.set_stale_while_revalidate(swr);
        self
    }

    /// Override the caching behavior of this request to use the given `stale-while-revalidate`
    /// time, in seconds.
    ///
    /// # Overrides
    ///
    /// This overrides the behavior specified in the response headers, and sets the
    /// [`pass`][`Self::set_pass()`] behavior to `false`.
    pub fn set_stale_while_revalidate(&mut self, swr: u32) {
        self.cache_override.set_stale_while_revalidate(swr);
    }

    /// Builder-style equivalent of [`set_surrogate_key()`][`Self::set_surrogate_key()`].
    pub fn with_surrogate_key(mut self, sk: HeaderValue) -> Self {
        self.set_surrogate_key(sk);
        self
    }

    /// Override the caching behavior of this request to include the given surrogate key(s),
    /// provided as a header value.
    ///
    /// The header value can contain more than one surrogate key, separated by spaces.
    ///
    /// # Overrides
    ///
    /// This sets the [`pass`][`Self::set_pass()`] behavior to `false`, and extends (but does not
    /// replace) any `Surrogate-Key` response headers from the backend.
    pub fn set_surrogate_key(&mut self, sk: HeaderValue) {
        self.cache_override.set_surrogate_key(sk);
    }

    /// Get the caching overrides recorded on this request.
    pub fn get_cache_override(&self) -> &CacheOverride {
        &self.cache_override
    }

    /// Builder-style equivalent of [`set_cache_key()`][`Self::set_cache_key()`].
    pub fn with_cache_key(mut self, key: CacheKey) -> Self {
        self.set_cache_key(key);
        self
    }

    /// Set the cache key to be used when attempting to satisfy this request from a cached
    /// response, instead of the key derived from the method, URL, and headers.
    pub fn set_cache_key(&mut self, key: CacheKey) {
        self.cache_key = Some(key);
    }

    /// Get the explicit cache key of this request, if one was set.
    pub fn get_cache_key(&self) -> Option<&CacheKey> {
        self.cache_key.as_ref()
    }
}

/// Anything that we need to make a full roundtrip through the `http` types that doesn't have a more
/// concrete corresponding type.
#[derive(Clone, Debug, Default)]
struct ReadthroughExts {
    cache_override: CacheOverride,
    cache_key: Option<CacheKey>,
}

impl From<Request> for http::Request<Body> {
    fn from(from: Request) -> Self {
        let mut req = http::Request::new(from.body.unwrap_or_default());
        req.extensions_mut().insert(ReadthroughExts {
            cache_override: from.cache_override,
            cache_key: from.cache_key,
        });
        *req.headers_mut() = from.headers;
        *req.method_mut() = from.method;
        *req.uri_mut() = String::from(from.url)
            .parse()
            .expect("Url to Uri conversion shouldn't fail, but did");
        *req.version_mut() = from.version;
        req
    }
}

impl TryFrom<http::Request<Body>> for Request {
    type Error = url::ParseError;

    fn try_from(from: http::Request<Body>) -> Result<Self, Self::Error> {
        let (mut parts, body) = from.into_parts();
        let ReadthroughExts {
            cache_override,
            cache_key,
        } = parts.extensions.remove().unwrap_or_default();
        Ok(Request {
            version: parts.version,
            method: parts.method,
            url: Url::parse(&parts.uri.to_string())?,
            headers: parts.headers,
            body: Some(body),
            cache_override,
            cache_key,
        })
    }
}

/// The reason that a request sent through the readthrough cache failed.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum SendErrorCause {
    /// The origin could not be reached, or did not produce a response.
    #[error("origin transport failed: {0}")]
    Transport(#[source] anyhow::Error),
    /// The `before_send` hook returned an error; the origin was not contacted.
    #[error("before_send hook failed: {0}")]
    BeforeSend(#[source] anyhow::Error),
    /// The `after_send` hook returned an error; nothing was written to the cache.
    #[error("after_send hook failed: {0}")]
    AfterSend(#[source] anyhow::Error),
}

/// An error that occurred while sending a request.
///
/// You can recover the headers and other request metadata of the request that failed, including
/// any changes made by the `before_send` hook, using [`SendError::into_sent_req()`].
///
/// Use [`SendError::root_cause()`] to inspect details about what caused the error.
#[derive(Debug, Error)]
#[error("error sending request: {error} to backend {backend}")]
pub struct SendError {
    backend: String,
    sent_req: Request,
    #[source]
    error: SendErrorCause,
}

impl SendError {
    pub(crate) fn new(backend: impl Into<String>, sent_req: Request, error: SendErrorCause) -> Self {
        SendError {
            backend: backend.into(),
            sent_req,
            error,
        }
    }

    /// Get the name of the backend the request was meant for.
    pub fn backend_name(&self) -> &str {
        self.backend.as_str()
    }

    /// Get the underlying cause of this `SendError`.
    pub fn root_cause(&self) -> &SendErrorCause {
        &self.error
    }

    /// Convert the error back into the request that was being sent.
    pub fn into_sent_req(self) -> Request {
        self.sent_req
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}

#[cfg(test)]
mod request_tests {
    use super::*;

    #[test]
    fn cache_overrides_round_trip_through_http_types() {
        let req = Request::get("https://example.com/a?b=c")
            .with_header("x-one", "1")
            .with_ttl(30);
        let http_req: http::Request<Body> = req.into();
        assert_eq!(http_req.uri(), "https://example.com/a?b=c");

        let req = Request::try_from(http_req).unwrap();
        assert_eq!(req.get_cache_override().get_ttl(), Some(30));
        assert_eq!(req.get_header_str("x-one"), Some("1"));
        assert_eq!(req.get_query_parameter("b"), Some("c"));
    }

    #[test]
    fn clone_without_body_keeps_metadata() {
        let req = Request::post("https://example.com/")
            .with_body("payload")
            .with_pass(true);
        let clone = req.clone_without_body();
        assert!(!clone.has_body());
        assert!(clone.get_cache_override().is_pass());
        assert!(!clone.is_cacheable_method());
    }

    #[test]
    fn rewriting_method_and_url() {
        let mut req = Request::get("https://example.com/old?x=1");
        req.set_url("https://origin.internal/new");
        req.set_method(Method::DELETE);
        assert_eq!(req.get_url().host_str(), Some("origin.internal"));
        assert_eq!(req.get_path(), "/new");
        assert_eq!(req.get_query_parameter("x"), None);
        assert_eq!(req.get_method(), &Method::DELETE);
        assert!(!req.is_cacheable_method());
    }

    #[test]
    fn override_builders_combine() {
        let req = Request::get("https://example.com/")
            .with_ttl(60)
            .with_stale_while_revalidate(10)
            .with_surrogate_key(HeaderValue::from_static("home feed"));
        let overrides = req.get_cache_override();
        assert_eq!(overrides.get_ttl(), Some(60));
        assert_eq!(overrides.get_stale_while_revalidate(), Some(10));
        assert_eq!(
            overrides.get_surrogate_key(),
            Some(&HeaderValue::from_static("home feed"))
        );

        let req = req.with_pass(true);
        assert!(req.get_cache_override().is_pass());
        assert_eq!(req.get_cache_override().get_ttl(), None);
    }
}
