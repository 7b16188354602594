//! Freshness and cacheability derived from origin response headers.

use crate::http::header::{CACHE_CONTROL, DATE, EXPIRES, SET_COOKIE};
use crate::http::{HeaderMap, Method, StatusCode};
use readthrough_shared::CacheOverride;
use std::time::Duration;
use time::format_description::FormatItem;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime};

/// The name of the response header listing surrogate keys, separated by spaces.
pub const SURROGATE_KEY: &str = "surrogate-key";

/// `IMF-fixdate`, the preferred HTTP date format.
const HTTP_DATE: &[FormatItem<'static>] = format_description!(
    "[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second] GMT"
);

/// Status codes cacheable by default.
const HEURISTICALLY_CACHEABLE: [u16; 11] = [200, 203, 204, 300, 301, 308, 404, 405, 410, 414, 501];

/// The cache policy a response starts with, before the `after_send` hook sees it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Freshness {
    pub ttl: Duration,
    pub stale_while_revalidate: Duration,
    pub surrogate_keys: Vec<String>,
    pub cacheable: bool,
}

impl Freshness {
    /// Derive the starting policy for a response to a request with the given method and overrides.
    pub fn from_response(
        method: &Method,
        status: StatusCode,
        headers: &HeaderMap,
        overrides: &CacheOverride,
        default_ttl: Duration,
    ) -> Self {
        let directives = CacheControl::parse(headers);
        let ttl = overrides
            .get_ttl()
            .map(|secs| Duration::from_secs(secs.into()))
            .or_else(|| directives.max_age())
            .or_else(|| expires_ttl(headers))
            .unwrap_or(default_ttl);
        let stale_while_revalidate = overrides
            .get_stale_while_revalidate()
            .map(|secs| Duration::from_secs(secs.into()))
            .or(directives.stale_while_revalidate)
            .unwrap_or_default();

        let listed = headers
            .get_all(SURROGATE_KEY)
            .iter()
            .chain(overrides.get_surrogate_key());
        let mut surrogate_keys: Vec<String> = Vec::new();
        for key in split_surrogate_keys(listed) {
            if !surrogate_keys.contains(&key) {
                surrogate_keys.push(key);
            }
        }

        let cacheable = (method == Method::GET || method == Method::HEAD)
            && HEURISTICALLY_CACHEABLE.contains(&status.as_u16())
            && !directives.no_store
            && !directives.private
            && !headers.contains_key(SET_COOKIE);

        Self {
            ttl,
            stale_while_revalidate,
            surrogate_keys,
            cacheable,
        }
    }
}

/// The `Cache-Control` directives that affect caching decisions.
#[derive(Debug, Default)]
struct CacheControl {
    s_maxage: Option<Duration>,
    max_age: Option<Duration>,
    stale_while_revalidate: Option<Duration>,
    no_store: bool,
    private: bool,
}

impl CacheControl {
    fn parse(headers: &HeaderMap) -> Self {
        let mut cc = Self::default();
        let directives = headers
            .get_all(CACHE_CONTROL)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(','));
        for directive in directives {
            let (name, value) = match directive.split_once('=') {
                Some((name, value)) => (name.trim(), Some(value.trim().trim_matches('"'))),
                None => (directive.trim(), None),
            };
            let secs = value
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs);
            match name.to_ascii_lowercase().as_str() {
                "s-maxage" => cc.s_maxage = secs,
                "max-age" => cc.max_age = secs,
                "stale-while-revalidate" => cc.stale_while_revalidate = secs,
                "no-store" => cc.no_store = true,
                "private" => cc.private = true,
                _ => {}
            }
        }
        cc
    }

    /// Shared caches prefer `s-maxage` over `max-age`.
    fn max_age(&self) -> Option<Duration> {
        self.s_maxage.or(self.max_age)
    }
}

/// The lifetime implied by `Expires` relative to `Date`, or to now when `Date` is absent.
///
/// An `Expires` in the past, or one that does not parse, means the response is already stale.
fn expires_ttl(headers: &HeaderMap) -> Option<Duration> {
    let expires = headers.get(EXPIRES)?.to_str().ok();
    let Some(expires) = expires.and_then(parse_http_date) else {
        return Some(Duration::ZERO);
    };
    let date = headers
        .get(DATE)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_http_date)
        .unwrap_or_else(OffsetDateTime::now_utc);
    Some((expires - date).try_into().unwrap_or(Duration::ZERO))
}

pub(crate) fn parse_http_date(s: &str) -> Option<OffsetDateTime> {
    PrimitiveDateTime::parse(s.trim(), HTTP_DATE)
        .ok()
        .map(PrimitiveDateTime::assume_utc)
}

fn split_surrogate_keys<'a>(
    values: impl Iterator<Item = &'a http::HeaderValue>,
) -> Vec<String> {
    values
        .filter_map(|v| v.to_str().ok())
        .flat_map(str::split_ascii_whitespace)
        .map(str::to_owned)
        .collect()
}

#[cfg(test)]
mod freshness_tests {
    use super::*;
    use http::{HeaderName, HeaderValue};

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        pairs
            .iter()
            .map(|&(k, v)| (HeaderName::from_static(k), HeaderValue::from_static(v)))
            .collect()
    }

    fn freshness(headers: &HeaderMap) -> Freshness {
        Freshness::from_response(
            &Method::GET,
            StatusCode::OK,
            headers,
            &CacheOverride::None,
            Duration::from_secs(2),
        )
    }

    #[test]
    fn s_maxage_beats_max_age_and_default() {
        let f = freshness(&headers(&[("cache-control", "max-age=60, s-maxage=90")]));
        assert_eq!(f.ttl, Duration::from_secs(90));
        let f = freshness(&headers(&[("cache-control", "public, max-age=60")]));
        assert_eq!(f.ttl, Duration::from_secs(60));
        let f = freshness(&HeaderMap::new());
        assert_eq!(f.ttl, Duration::from_secs(2));
        assert!(f.cacheable);
    }

    #[test]
    fn expires_is_relative_to_date() {
        let f = freshness(&headers(&[
            ("date", "Sun, 06 Nov 1994 08:49:37 GMT"),
            ("expires", "Sun, 06 Nov 1994 08:50:37 GMT"),
        ]));
        assert_eq!(f.ttl, Duration::from_secs(60));
        let f = freshness(&headers(&[("expires", "0")]));
        assert_eq!(f.ttl, Duration::ZERO);
    }

    #[test]
    fn request_overrides_win() {
        let mut overrides = CacheOverride::ttl(5);
        overrides.set_stale_while_revalidate(7);
        overrides.set_surrogate_key(HeaderValue::from_static("extra"));
        let f = Freshness::from_response(
            &Method::GET,
            StatusCode::OK,
            &headers(&[("cache-control", "max-age=60"), ("surrogate-key", "a b")]),
            &overrides,
            Duration::from_secs(2),
        );
        assert_eq!(f.ttl, Duration::from_secs(5));
        assert_eq!(f.stale_while_revalidate, Duration::from_secs(7));
        assert_eq!(f.surrogate_keys, vec!["a", "b", "extra"]);
    }

    #[test]
    fn surrogate_keys_are_unique_in_first_seen_order() {
        let mut overrides = CacheOverride::None;
        overrides.set_surrogate_key(HeaderValue::from_static("b c"));
        let mut map = headers(&[("surrogate-key", "a b a")]);
        map.append("surrogate-key", HeaderValue::from_static("c a"));
        let f = Freshness::from_response(
            &Method::GET,
            StatusCode::OK,
            &map,
            &overrides,
            Duration::from_secs(2),
        );
        assert_eq!(f.surrogate_keys, vec!["a", "b", "c"]);
    }

    #[test]
    fn suggested_cacheability() {
        assert!(!freshness(&headers(&[("cache-control", "no-store")])).cacheable);
        assert!(!freshness(&headers(&[("cache-control", "private")])).cacheable);
        assert!(!freshness(&headers(&[("set-cookie", "a=b")])).cacheable);
        let f = Freshness::from_response(
            &Method::POST,
            StatusCode::OK,
            &HeaderMap::new(),
            &CacheOverride::None,
            Duration::ZERO,
        );
        assert!(!f.cacheable);
        let f = Freshness::from_response(
            &Method::GET,
            StatusCode::INTERNAL_SERVER_ERROR,
            &HeaderMap::new(),
            &CacheOverride::None,
            Duration::ZERO,
        );
        assert!(!f.cacheable);
    }
}
