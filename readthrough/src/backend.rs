//! Backend servers and the transport used to reach them.
#[cfg(feature = "reqwest-origin")]
mod http_origin;

#[cfg(feature = "reqwest-origin")]
pub use http_origin::HttpOrigin;

use crate::http::{Request, Response};
use async_trait::async_trait;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// The maximum length in characters of a backend name.
pub(crate) const MAX_BACKEND_NAME_LEN: usize = 255;

/// A named backend.
///
/// This represents an origin server that the readthrough cache sends requests to, potentially
/// caching the responses received. Which host a name resolves to is up to the [`Origin`]
/// implementation.
///
/// Any string type ([`&str`][`str`], [`String`, or `&String`][`String`]) is automatically turned
/// into the backend of the same name where a [`ToBackend`][crate::convert::ToBackend] argument is
/// expected, panicking if the name is invalid. Use [`Backend::from_name()`] to handle invalid
/// names explicitly.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Backend {
    name: String,
}

impl Backend {
    /// Get a backend by its name.
    ///
    /// This function will return a [`BackendError`] if an invalid name was given.
    ///
    /// Backend names:
    ///   * cannot be empty
    ///   * cannot be longer than 255 characters
    ///   * cannot ASCII control characters such as `'\n'` or `DELETE`.
    ///   * cannot contain special Unicode characters
    ///   * should only contain visible ASCII characters or spaces
    pub fn from_name(s: &str) -> Result<Self, BackendError> {
        s.parse()
    }

    /// Get the name of this backend.
    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    /// Turn the backend into its name as a string.
    pub fn into_string(self) -> String {
        self.name
    }
}

/// [`Backend`]-related errors.
#[derive(Copy, Clone, Debug, thiserror::Error, PartialEq, Eq)]
pub enum BackendError {
    /// The backend name was empty.
    #[error("an empty string is not a valid backend")]
    EmptyName,
    /// The backend name was too long.
    #[error("backend names must be <= 255 characters")]
    TooLong,
    /// The backend name contained invalid characters.
    #[error("backend names must only contain visible ASCII characters or spaces")]
    InvalidName,
}

impl FromStr for Backend {
    type Err = BackendError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        validate_backend(s)?;
        Ok(Self { name: s.to_owned() })
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name.as_str())
    }
}

/// Validate that a string looks like an acceptable [`Backend`] value.
///
/// This function will return a [`BackendError`] if an invalid name was given. See
/// [`Backend::from_name()`] for the rules.
pub fn validate_backend(backend: &str) -> Result<(), BackendError> {
    if backend.is_empty() {
        Err(BackendError::EmptyName)
    } else if backend.len() > MAX_BACKEND_NAME_LEN {
        Err(BackendError::TooLong)
    } else if backend.chars().any(is_invalid_char) {
        Err(BackendError::InvalidName)
    } else {
        Ok(())
    }
}

/// Return true if a character is not allowed in a [`Backend`] name.
#[inline]
fn is_invalid_char(c: char) -> bool {
    c != ' ' && !c.is_ascii_graphic()
}

/// The transport that carries requests to a named backend.
///
/// The readthrough cache issues exactly one `send` per inbound request that is not served from
/// the cache. Retries, connection pooling, and TLS are the implementation's concern.
///
/// Errors returned here are surfaced to the caller as
/// [`SendErrorCause::Transport`][crate::error::SendErrorCause::Transport], and nothing is
/// written to the cache.
#[async_trait]
pub trait Origin: Send + Sync {
    /// Send the request to the given backend and return its response.
    async fn send(&self, backend: &Backend, req: Request) -> Result<Response, anyhow::Error>;
}

#[async_trait]
impl<O: Origin + ?Sized> Origin for Arc<O> {
    async fn send(&self, backend: &Backend, req: Request) -> Result<Response, anyhow::Error> {
        (**self).send(backend, req).await
    }
}

type Route = Box<dyn Fn(&Request) -> Response + Send + Sync>;

/// An [`Origin`] that answers from handlers registered per backend and path.
///
/// Useful for local development and tests, where it stands in for a real transport. Requests for
/// unregistered backends fail with a transport error; unregistered paths get a `404 Not Found`.
///
/// ```no_run
/// use readthrough::{Response, StaticOrigin};
/// let origin = StaticOrigin::new().route("example_backend", "/", |_req| {
///     Response::from_body("hello").with_header("content-type", "text/plain")
/// });
/// ```
#[derive(Default)]
pub struct StaticOrigin {
    routes: HashMap<String, HashMap<String, Route>>,
    requests: Mutex<Vec<Request>>,
    sent: AtomicUsize,
}

impl StaticOrigin {
    /// Create an origin with no routes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the handler answering requests for `path` on `backend`.
    pub fn route(
        mut self,
        backend: &str,
        path: &str,
        handler: impl Fn(&Request) -> Response + Send + Sync + 'static,
    ) -> Self {
        self.routes
            .entry(backend.to_owned())
            .or_default()
            .insert(path.to_owned(), Box::new(handler));
        self
    }

    /// The number of requests that reached this origin.
    pub fn request_count(&self) -> usize {
        self.sent.load(Ordering::SeqCst)
    }

    /// The requests that reached this origin, bodies excluded, in arrival order.
    pub fn received_requests(&self) -> Vec<Request> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(Request::clone_without_body)
            .collect()
    }
}

#[async_trait]
impl Origin for StaticOrigin {
    async fn send(&self, backend: &Backend, req: Request) -> Result<Response, anyhow::Error> {
        let routes = self
            .routes
            .get(backend.name())
            .ok_or_else(|| anyhow::anyhow!("no route to backend {}", backend))?;
        self.sent.fetch_add(1, Ordering::SeqCst);
        let resp = match routes.get(req.get_path()) {
            Some(handler) => handler(&req),
            None => Response::from_status(http::StatusCode::NOT_FOUND),
        };
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(req);
        Ok(resp)
    }
}

#[cfg(test)]
mod validate_backend_tests {
    use super::*;

    #[test]
    fn valid_backend_names_are_accepted() {
        let valid_backend_names = [
            "valid_backend_1",
            "1_backend_with_leading_integer",
            "backend-with-kebab-case",
            "backend with spaces",
            "backend.with.periods",
            "tilde~backend",
        ];
        for backend in valid_backend_names.iter() {
            match validate_backend(backend) {
                Ok(_) => {}
                x => panic!(
                    "backend string \"{}\" yielded unexpected result: {:?}",
                    backend, x
                ),
            }
        }
    }

    #[test]
    fn empty_str_is_not_accepted() {
        match validate_backend("") {
            Err(BackendError::EmptyName) => {}
            x => panic!("unexpected result: {:?}", x),
        }
    }

    #[test]
    fn name_longer_than_character_limit_are_not_accepted() {
        let invalid_backend = "a".repeat(MAX_BACKEND_NAME_LEN + 1);
        match validate_backend(&invalid_backend) {
            Err(BackendError::TooLong) => {}
            x => panic!("unexpected result: {:?}", x),
        }
        assert!(validate_backend(&"a".repeat(MAX_BACKEND_NAME_LEN)).is_ok());
    }

    #[test]
    fn unprintable_and_unicode_characters_are_not_accepted() {
        for invalid_backend in ["\n", "♓"] {
            match validate_backend(invalid_backend) {
                Err(BackendError::InvalidName) => {}
                x => panic!("unexpected result: {:?}", x),
            }
        }
    }
}

#[cfg(test)]
mod static_origin_tests {
    use super::*;

    #[tokio::test]
    async fn routes_by_backend_and_path() {
        let origin = StaticOrigin::new().route("origin", "/a", |_| Response::from_body("a"));
        let backend = Backend::from_name("origin").unwrap();

        let resp = origin
            .send(&backend, Request::get("https://example.com/a"))
            .await
            .unwrap();
        assert_eq!(resp.into_body_str(), "a");

        let resp = origin
            .send(&backend, Request::get("https://example.com/missing"))
            .await
            .unwrap();
        assert_eq!(resp.get_status(), http::StatusCode::NOT_FOUND);
        assert_eq!(origin.request_count(), 2);
        assert_eq!(origin.received_requests()[0].get_path(), "/a");
    }

    #[tokio::test]
    async fn unknown_backend_is_a_transport_error() {
        let origin = StaticOrigin::new();
        let backend = Backend::from_name("nowhere").unwrap();
        assert!(origin
            .send(&backend, Request::get("https://example.com/"))
            .await
            .is_err());
        assert_eq!(origin.request_count(), 0);
    }
}
