use crate::http::{HeaderName, Request};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt::{self, Write};
use url::Url;

/// The identity of a cached response.
///
/// A key is the SHA-256 digest of the request method, the normalised request URL, and the values
/// of the request headers named in [`CacheKeyConfig::vary_headers`]. Two requests that differ only
/// in query parameter order, URL fragment, or explicit default port map to the same key.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey([u8; 32]);

impl CacheKey {
    /// Derive the key for a request.
    ///
    /// A key set on the request with [`Request::set_cache_key()`] is returned as is.
    pub fn from_request(req: &Request, config: &CacheKeyConfig) -> Self {
        if let Some(key) = req.get_cache_key() {
            return *key;
        }
        let mut sha = Sha256::new();
        sha.update(req.get_method().as_str());
        sha.update(b"\n");
        sha.update(normalize_url(req.get_url()).as_str());
        for name in config.vary_headers.iter() {
            sha.update(b"\n");
            sha.update(name.as_str());
            sha.update(b":");
            for value in req.get_header_map().get_all(name) {
                sha.update(value.as_bytes());
                sha.update(b",");
            }
        }
        Self(*sha.finalize().as_ref())
    }

    /// Hash an arbitrary string into a key.
    ///
    /// Keys made this way never collide with keys derived by [`CacheKey::from_request()`].
    pub fn from_key_str(key_str: impl AsRef<[u8]>) -> Self {
        let mut sha = Sha256::new();
        sha.update(key_str);
        sha.update(b"\x00key-str\x00");
        Self(*sha.finalize().as_ref())
    }

    /// Use the given digest as a key.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// The raw digest.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.0.iter() {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut short = String::with_capacity(16);
        for b in self.0[..8].iter() {
            write!(&mut short, "{b:02x}")?;
        }
        write!(f, "CacheKey({short})")
    }
}

/// Which parts of a request, beyond method and URL, distinguish cached responses.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheKeyConfig {
    /// Request headers whose values are folded into the key, in order.
    #[serde(with = "header_names")]
    pub vary_headers: Vec<HeaderName>,
}

impl CacheKeyConfig {
    /// Builder-style addition of a header to [`vary_headers`][Self::vary_headers].
    pub fn vary_by(mut self, name: HeaderName) -> Self {
        self.vary_headers.push(name);
        self
    }
}

/// Normalise a URL for use in a cache key.
///
/// Scheme and host case and default ports are already normalised by [`Url`]'s parser. Here the
/// fragment is dropped and query pairs are sorted; a query that does not parse as
/// `application/x-www-form-urlencoded` is kept verbatim.
pub(crate) fn normalize_url(url: &Url) -> Url {
    let mut url = url.clone();
    url.set_fragment(None);
    let sorted = url.query().and_then(|q| {
        let mut pairs: Vec<(String, String)> = serde_urlencoded::from_str(q).ok()?;
        pairs.sort();
        serde_urlencoded::to_string(pairs).ok()
    });
    match sorted {
        Some(q) if q.is_empty() => url.set_query(None),
        Some(q) => url.set_query(Some(&q)),
        None if url.query() == Some("") => url.set_query(None),
        None => {}
    }
    url
}

mod header_names {
    use http::HeaderName;
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(names: &[HeaderName], ser: S) -> Result<S::Ok, S::Error> {
        ser.collect_seq(names.iter().map(HeaderName::as_str))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<HeaderName>, D::Error> {
        Vec::<String>::deserialize(de)?
            .iter()
            .map(|s| HeaderName::from_bytes(s.as_bytes()).map_err(D::Error::custom))
            .collect()
    }
}
