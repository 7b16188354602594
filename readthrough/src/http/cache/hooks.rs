use super::candidate::CandidateResponse;
use crate::http::Request;
use std::sync::Arc;

/// Application hooks around each origin fetch.
///
/// Both methods default to doing nothing. An error from either aborts the request, and nothing is
/// written to the cache.
pub trait CacheHooks: Send + Sync {
    /// Called with the outbound request before it is sent to the origin.
    ///
    /// Runs for every origin fetch, including passes and revalidations. Changes made here are
    /// visible in the request returned by
    /// [`Response::get_backend_request()`][crate::Response::get_backend_request()], but not in the
    /// cache key, which is computed beforehand.
    fn before_send(&self, _req: &mut Request) -> Result<(), anyhow::Error> {
        Ok(())
    }

    /// Called with the origin response before the caching decision is made.
    ///
    /// Not called for passed requests.
    fn after_send(&self, _candidate: &mut CandidateResponse) -> Result<(), anyhow::Error> {
        Ok(())
    }
}

impl<H: CacheHooks + ?Sized> CacheHooks for Arc<H> {
    fn before_send(&self, req: &mut Request) -> Result<(), anyhow::Error> {
        (**self).before_send(req)
    }

    fn after_send(&self, candidate: &mut CandidateResponse) -> Result<(), anyhow::Error> {
        (**self).after_send(candidate)
    }
}

impl<H: CacheHooks + ?Sized> CacheHooks for Box<H> {
    fn before_send(&self, req: &mut Request) -> Result<(), anyhow::Error> {
        (**self).before_send(req)
    }

    fn after_send(&self, candidate: &mut CandidateResponse) -> Result<(), anyhow::Error> {
        (**self).after_send(candidate)
    }
}

/// Runs `A`'s hooks, then `B`'s.
///
/// Whatever `B` decides in `after_send` overrides `A`.
impl<A: CacheHooks, B: CacheHooks> CacheHooks for (A, B) {
    fn before_send(&self, req: &mut Request) -> Result<(), anyhow::Error> {
        self.0.before_send(req)?;
        self.1.before_send(req)
    }

    fn after_send(&self, candidate: &mut CandidateResponse) -> Result<(), anyhow::Error> {
        self.0.after_send(candidate)?;
        self.1.after_send(candidate)
    }
}

type BeforeSendFn = dyn Fn(&mut Request) -> Result<(), anyhow::Error> + Send + Sync;
type AfterSendFn = dyn Fn(&mut CandidateResponse) -> Result<(), anyhow::Error> + Send + Sync;

/// [`CacheHooks`] built from closures.
///
/// ```no_run
/// use readthrough::http::cache::Hooks;
/// let hooks = Hooks::new()
///     .before_send(|req| {
///         req.set_header("authorization", "Bearer secret");
///         Ok(())
///     })
///     .after_send(|candidate| {
///         if candidate.contains_header("my-private-header") {
///             candidate.set_uncacheable(true);
///         }
///         Ok(())
///     });
/// ```
#[derive(Clone, Default)]
pub struct Hooks {
    before_send: Option<Arc<BeforeSendFn>>,
    after_send: Option<Arc<AfterSendFn>>,
}

impl Hooks {
    /// Hooks that do nothing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the `before_send` hook.
    pub fn before_send(
        mut self,
        f: impl Fn(&mut Request) -> Result<(), anyhow::Error> + Send + Sync + 'static,
    ) -> Self {
        self.before_send = Some(Arc::new(f));
        self
    }

    /// Set the `after_send` hook.
    pub fn after_send(
        mut self,
        f: impl Fn(&mut CandidateResponse) -> Result<(), anyhow::Error> + Send + Sync + 'static,
    ) -> Self {
        self.after_send = Some(Arc::new(f));
        self
    }
}

impl CacheHooks for Hooks {
    fn before_send(&self, req: &mut Request) -> Result<(), anyhow::Error> {
        match &self.before_send {
            Some(f) => f(req),
            None => Ok(()),
        }
    }

    fn after_send(&self, candidate: &mut CandidateResponse) -> Result<(), anyhow::Error> {
        match &self.after_send {
            Some(f) => f(candidate),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for Hooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hooks")
            .field("before_send", &self.before_send.is_some())
            .field("after_send", &self.after_send.is_some())
            .finish()
    }
}

#[cfg(test)]
mod hooks_tests {
    use super::*;
    use anyhow::bail;

    #[test]
    fn pairs_run_in_order_and_stop_at_first_error() {
        let first = Hooks::new().before_send(|req| {
            req.set_header("x-order", "first");
            Ok(())
        });
        let second = Hooks::new().before_send(|req| {
            req.append_header("x-order", "second");
            Ok(())
        });
        let mut req = Request::get("https://example.com/");
        (first.clone(), second).before_send(&mut req).unwrap();
        assert_eq!(req.get_header_all_str("x-order"), ["first", "second"]);

        let failing = Hooks::new().before_send(|_| bail!("denied"));
        let mut req = Request::get("https://example.com/");
        let err = (failing, first).before_send(&mut req).unwrap_err();
        assert_eq!(err.to_string(), "denied");
        assert!(!req.contains_header("x-order"));
    }
}
