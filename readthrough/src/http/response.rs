//! HTTP responses.

use super::body::Body;
use super::request::Request;
use bytes::Bytes;
use crate::backend::Backend;
use crate::convert::{ToHeaderName, ToHeaderValue, ToStatusCode};
use http::header::{HeaderValue, CONTENT_LENGTH, CONTENT_TYPE};
use http::{HeaderMap, StatusCode, Version};
use mime::Mime;
use readthrough_shared::{CacheState, CACHE_STATE_HEADER};

/// An HTTP response, including body, headers, and status code.
///
/// # Getting the client response
///
/// Responses are returned from [`ReadthroughCache::send()`][crate::ReadthroughCache::send()],
/// either fetched from the backend or assembled from a cached entry. Responses that went through
/// the cache carry the [`CacheState`] that produced them, and those fetched from a backend keep a
/// copy of the request that was actually sent, including any changes made by the `before_send`
/// hook.
///
/// # Creation and conversion
///
/// Origin implementations build responses with [`Response::new()`], [`Response::from_body()`]
/// and [`Response::from_status()`]. [`Response`] converts to and from the [`http`] crate's
/// [`http::Response`] type with the [`From`] and [`Into`] traits.
///
/// # Builder-style methods
///
/// As with [`Request`], methods prefixed with `with_` return `Self` so construction can be
/// chained, and `set_` methods modify the response in place:
///
/// ```no_run
/// # use readthrough::Response;
/// let resp = Response::from_body("hello")
///     .with_status(418)
///     .with_header("content-type", "text/plain");
/// ```
#[derive(Debug)]
pub struct Response {
    version: Version,
    status: StatusCode,
    headers: HeaderMap,
    body: Option<Body>,
    metadata: Option<BackendMetadata>,
    cache_state: Option<CacheState>,
}

impl Response {
    /// Create a new [`Response`].
    ///
    /// The new response is created with status code `200 OK`, no headers, and an empty body.
    pub fn new() -> Self {
        Self {
            version: Version::HTTP_11,
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: None,
            metadata: None,
            cache_state: None,
        }
    }

    /// Make a new response with the same headers, status, version and metadata of this response,
    /// but no body.
    pub fn clone_without_body(&self) -> Response {
        Self {
            version: self.version,
            status: self.status,
            headers: self.headers.clone(),
            body: None,
            metadata: self.metadata.clone(),
            cache_state: self.cache_state,
        }
    }

    /// Create a new [`Response`] with the given value as the body.
    pub fn from_body(body: impl Into<Body>) -> Self {
        Self::new().with_body(body)
    }

    /// Create a new response with the given status code.
    pub fn from_status(status: impl ToStatusCode) -> Self {
        Self::new().with_status(status)
    }

    /// Builder-style equivalent of [`set_body()`][`Self::set_body()`].
    pub fn with_body(mut self, body: impl Into<Body>) -> Self {
        self.set_body(body);
        self
    }

    /// Returns `true` if this response has a body.
    pub fn has_body(&self) -> bool {
        self.body.is_some()
    }

    /// Set the given value as the response's body.
    pub fn set_body(&mut self, body: impl Into<Body>) {
        self.body = Some(body.into());
    }

    /// Take and return the body from this response.
    ///
    /// After calling this method, this response will no longer have a body. If the response does
    /// not have a body, an empty body is returned.
    pub fn take_body(&mut self) -> Body {
        self.body.take().unwrap_or_default()
    }

    /// Consume the response and return its body as [`Bytes`].
    pub fn into_body_bytes(mut self) -> Bytes {
        self.take_body().into_bytes()
    }

    /// Consume the response and return its body as a string.
    ///
    /// # Panics
    ///
    /// If the response body is not valid UTF-8, this function will panic.
    pub fn into_body_str(mut self) -> String {
        self.take_body().into_string()
    }

    /// Get the MIME type described by the response's `Content-Type` header, or `None` if that
    /// header is absent or contains an invalid MIME type.
    pub fn get_content_type(&self) -> Option<Mime> {
        self.get_header_str(CONTENT_TYPE).and_then(|v| v.parse().ok())
    }

    /// Get the value of the response's `Content-Length` header, if it is present and valid.
    pub fn get_content_length(&self) -> Option<usize> {
        self.get_header_str(CONTENT_LENGTH)
            .and_then(|v| v.parse().ok())
    }

    /// Returns whether the given header name is present in the response.
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

    /// Get the full header map of the response.
    pub fn get_header_map(&self) -> &HeaderMap {
        &self.headers
    }

    pub(crate) fn get_header_map_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// Set a response header to the given value, discarding any previous values for the given
    /// header name.
    pub fn set_header(&mut self, name: impl ToHeaderName, value: impl ToHeaderValue) {
        self.headers.insert(name.into_owned(), value.into_owned());
    }

    /// Add a response header with given value.
    ///
    /// Unlike [`set_header()`][`Self::set_header()`], this does not discard existing values for the
    /// same header name.
    pub fn append_header(&mut self, name: impl ToHeaderName, value: impl ToHeaderValue) {
        self.headers.append(name.into_owned(), value.into_owned());
    }

    /// Remove all response headers of the given name, and return one of the removed header values
    /// if any were present.
    pub fn remove_header(&mut self, name: impl ToHeaderName) -> Option<HeaderValue> {
        self.headers.remove(name.into_owned())
    }

    /// Builder-style equivalent of [`set_status()`][`Self::set_status()`].
    pub fn with_status(mut self, status: impl ToStatusCode) -> Self {
        self.set_status(status);
        self
    }

    /// Get the HTTP status code of the response.
    pub fn get_status(&self) -> StatusCode {
        self.status
    }

    /// Set the HTTP status code of the response.
    ///
    /// # Panics
    ///
    /// Panics if a `u16` outside the range of valid status codes is given.
    pub fn set_status(&mut self, status: impl ToStatusCode) {
        self.status = status.to_status_code();
    }

    /// Builder-style equivalent of [`set_version()`][`Self::set_version()`].
    pub fn with_version(mut self, version: Version) -> Self {
        self.set_version(version);
        self
    }

    /// Get the HTTP version of this response.
    pub fn get_version(&self) -> Version {
        self.version
    }

    /// Set the HTTP version of this response.
    pub fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    /// Get the name of the backend this response was fetched from, if any.
    pub fn get_backend_name(&self) -> Option<&str> {
        self.get_backend().map(|b| b.name())
    }

    /// Get the backend this response was fetched from, if any.
    pub fn get_backend(&self) -> Option<&Backend> {
        self.metadata.as_ref().map(|md| &md.backend)
    }

    /// Get the request this response was fetched with, if it came from a backend.
    ///
    /// The request's body has already been sent, so the returned request has none. Its headers
    /// include any changes made by the `before_send` hook.
    pub fn get_backend_request(&self) -> Option<&Request> {
        self.metadata.as_ref().and_then(|md| md.sent_req.as_ref())
    }

    pub(crate) fn set_backend_metadata(&mut self, backend: Backend, sent_req: Request) {
        self.metadata = Some(BackendMetadata {
            backend,
            sent_req: Some(sent_req),
        });
    }

    /// Get how the readthrough cache produced this response, if it went through one.
    pub fn get_cache_state(&self) -> Option<CacheState> {
        self.cache_state
    }

    pub(crate) fn set_cache_state(&mut self, state: CacheState) {
        self.cache_state = Some(state);
        self.set_header(CACHE_STATE_HEADER, state.header_value());
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::new()
    }
}

/// The backend a response came from, and the request that fetched it.
#[derive(Debug)]
struct BackendMetadata {
    backend: Backend,
    sent_req: Option<Request>,
}

impl Clone for BackendMetadata {
    fn clone(&self) -> Self {
        Self {
            backend: self.backend.clone(),
            // sent_req never has a body
            sent_req: self.sent_req.as_ref().map(Request::clone_without_body),
        }
    }
}

#[derive(Debug, Default)]
struct ResponseExts {
    metadata: Option<BackendMetadata>,
    cache_state: Option<CacheState>,
}

impl From<Response> for http::Response<Body> {
    fn from(from: Response) -> Self {
        let mut resp = http::Response::new(from.body.unwrap_or_default());
        resp.extensions_mut().insert(ResponseExts {
            metadata: from.metadata,
            cache_state: from.cache_state,
        });
        *resp.headers_mut() = from.headers;
        *resp.status_mut() = from.status;
        *resp.version_mut() = from.version;
        resp
    }
}

impl From<http::Response<Body>> for Response {
    fn from(from: http::Response<Body>) -> Self {
        let (mut parts, body) = from.into_parts();
        let exts: ResponseExts = parts.extensions.remove().unwrap_or_default();
        Response {
            version: parts.version,
            status: parts.status,
            headers: parts.headers,
            body: Some(body),
            metadata: exts.metadata,
            cache_state: exts.cache_state,
        }
    }
}

#[cfg(test)]
mod response_tests {
    use super::*;

    #[test]
    fn clone_without_body_keeps_backend_request() {
        let mut resp = Response::from_body("hello").with_status(203);
        resp.set_backend_metadata(
            Backend::from_name("origin").unwrap(),
            Request::get("https://example.com/").with_header("x-injected", "1"),
        );
        resp.set_cache_state(CacheState::Miss);

        let clone = resp.clone_without_body();
        assert!(!clone.has_body());
        assert_eq!(clone.get_status(), StatusCode::NON_AUTHORITATIVE_INFORMATION);
        assert_eq!(clone.get_backend_name(), Some("origin"));
        assert_eq!(
            clone
                .get_backend_request()
                .and_then(|req| req.get_header_str("x-injected")),
            Some("1")
        );
        assert_eq!(clone.get_header_str(CACHE_STATE_HEADER), Some("MISS"));
    }

    #[test]
    fn round_trips_through_http_types() {
        let mut resp = Response::from_status(404).with_header("x-a", "b");
        resp.set_cache_state(CacheState::Pass);
        let http_resp: http::Response<Body> = resp.into();
        let resp = Response::from(http_resp);
        assert_eq!(resp.get_cache_state(), Some(CacheState::Pass));
        assert_eq!(resp.get_header_str("x-a"), Some("b"));
    }
}
