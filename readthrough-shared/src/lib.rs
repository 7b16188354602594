// Warnings (other than unused variables) in doctests are promoted to errors.
#![doc(test(attr(deny(warnings))))]
#![doc(test(attr(allow(dead_code))))]
#![doc(test(attr(allow(unused_variables))))]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(rustdoc::invalid_codeblock_attributes)]

//! Definitions shared between the readthrough cache and the code that configures it.

use std::fmt;

use http::HeaderValue;

/// The name of the response header that reports how a response was produced.
pub const CACHE_STATE_HEADER: &str = "x-cache";

/// Request-level overrides of the readthrough caching behavior.
///
/// The default is [`CacheOverride::None`], which leaves every decision to the response headers and
/// the `after_send` hook.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum CacheOverride {
    /// Do not override the behavior specified in the origin response's cache control headers.
    #[default]
    None,
    /// Do not cache the response to this request, regardless of the origin response's headers.
    ///
    /// A passed request skips the cache lookup, and its response is never offered to the
    /// `after_send` hook.
    Pass,
    /// Override particular cache control settings.
    ///
    /// The origin response's cache control headers will be used for ttl and stale_while_revalidate if `None`.
    Override {
        ttl: Option<u32>,
        stale_while_revalidate: Option<u32>,
        surrogate_key: Option<HeaderValue>,
    },
}

impl CacheOverride {
    pub const fn none() -> Self {
        Self::None
    }

    pub const fn pass() -> Self {
        Self::Pass
    }

    pub fn is_pass(&self) -> bool {
        matches!(self, Self::Pass)
    }

    pub const fn ttl(ttl: u32) -> Self {
        Self::Override {
            ttl: Some(ttl),
            stale_while_revalidate: None,
            surrogate_key: None,
        }
    }

    pub const fn stale_while_revalidate(swr: u32) -> Self {
        Self::Override {
            ttl: None,
            stale_while_revalidate: Some(swr),
            surrogate_key: None,
        }
    }

    pub const fn surrogate_key(sk: HeaderValue) -> Self {
        Self::Override {
            ttl: None,
            stale_while_revalidate: None,
            surrogate_key: Some(sk),
        }
    }

    pub fn set_pass(&mut self, pass: bool) {
        if pass {
            *self = Self::Pass;
        } else if let Self::Pass = self {
            *self = Self::None;
        }
    }

    pub fn get_ttl(&self) -> Option<u32> {
        if let Self::Override { ttl, .. } = self {
            *ttl
        } else {
            None
        }
    }

    pub fn set_ttl(&mut self, new_ttl: u32) {
        match self {
            Self::Override { ttl, .. } => *ttl = Some(new_ttl),
            _ => *self = Self::ttl(new_ttl),
        }
    }

    pub fn get_stale_while_revalidate(&self) -> Option<u32> {
        if let Self::Override {
            stale_while_revalidate,
            ..
        } = self
        {
            *stale_while_revalidate
        } else {
            None
        }
    }

    pub fn set_stale_while_revalidate(&mut self, new_swr: u32) {
        match self {
            Self::Override {
                stale_while_revalidate,
                ..
            } => *stale_while_revalidate = Some(new_swr),
            _ => *self = Self::stale_while_revalidate(new_swr),
        }
    }

    pub fn get_surrogate_key(&self) -> Option<&HeaderValue> {
        if let Self::Override { surrogate_key, .. } = self {
            surrogate_key.as_ref()
        } else {
            None
        }
    }

    pub fn set_surrogate_key(&mut self, new_sk: HeaderValue) {
        match self {
            Self::Override { surrogate_key, .. } => *surrogate_key = Some(new_sk),
            _ => *self = Self::surrogate_key(new_sk),
        }
    }
}

/// How the response handed back to the client was produced.
///
/// The readthrough cache reports this in the [`CACHE_STATE_HEADER`] response header.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum CacheState {
    /// Served from a fresh cached entry without contacting the origin.
    Hit,
    /// Fetched from the origin because no usable entry was cached.
    Miss,
    /// Fetched from the origin without consulting the cache at all.
    Pass,
    /// Fetched from the origin because the key is marked hit-for-pass.
    HitForPass,
    /// Served from a stale cached entry the origin confirmed with `304 Not Modified`.
    Revalidated,
}

impl CacheState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hit => "HIT",
            Self::Miss => "MISS",
            Self::Pass => "PASS",
            Self::HitForPass => "HIT-FOR-PASS",
            Self::Revalidated => "REVALIDATED",
        }
    }

    pub fn header_value(&self) -> HeaderValue {
        HeaderValue::from_static(self.as_str())
    }
}

impl fmt::Display for CacheState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod cache_override_tests {
    use super::*;

    #[test]
    fn pass_replaces_overrides() {
        let mut co = CacheOverride::ttl(10);
        co.set_pass(true);
        assert!(co.is_pass());
        assert_eq!(co.get_ttl(), None);
        co.set_pass(false);
        assert_eq!(co, CacheOverride::None);
    }

    #[test]
    fn setters_accumulate_into_override() {
        let mut co = CacheOverride::default();
        co.set_ttl(30);
        co.set_stale_while_revalidate(5);
        co.set_surrogate_key(HeaderValue::from_static("a b"));
        assert_eq!(co.get_ttl(), Some(30));
        assert_eq!(co.get_stale_while_revalidate(), Some(5));
        assert_eq!(
            co.get_surrogate_key().map(HeaderValue::as_bytes),
            Some(&b"a b"[..])
        );
    }

    #[test]
    fn setting_ttl_clears_pass() {
        let mut co = CacheOverride::pass();
        co.set_ttl(1);
        assert!(!co.is_pass());
        assert_eq!(co.get_ttl(), Some(1));
    }
}
