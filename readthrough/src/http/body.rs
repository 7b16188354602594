//! HTTP bodies.

use bytes::Bytes;
use std::fmt::Debug;

/// An HTTP body.
///
/// Bodies are buffered in memory as [`Bytes`], so cloning a body, or building one from a cached
/// entry, shares the underlying buffer instead of copying it.
#[derive(Clone, Default)]
pub struct Body {
    buf: Bytes,
}

impl Debug for Body {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<Body of {} bytes>", self.buf.len())
    }
}

impl Body {
    /// Get a new, empty HTTP body.
    pub fn new() -> Self {
        Self::default()
    }

    /// The number of bytes in the body.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Return `true` if the body is empty.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Turn the body into a [`Bytes`] buffer, without copying.
    pub fn into_bytes(self) -> Bytes {
        self.buf
    }

    /// Read the entirety of the body into a `String`, interpreting the bytes as UTF-8.
    ///
    /// # Panics
    ///
    /// If the body does not contain a valid UTF-8 string, this function will panic. To explicitly
    /// handle the possibility of invalid UTF-8 data, use [`into_bytes()`][`Self::into_bytes()`]
    /// and then convert the bytes explicitly with a function like [`std::str::from_utf8()`].
    pub fn into_string(self) -> String {
        String::from_utf8(self.buf.to_vec()).expect("Body contents are not valid UTF-8")
    }
}

impl From<Bytes> for Body {
    fn from(buf: Bytes) -> Self {
        Self { buf }
    }
}

impl From<&[u8]> for Body {
    fn from(s: &[u8]) -> Self {
        Bytes::copy_from_slice(s).into()
    }
}

impl From<Vec<u8>> for Body {
    fn from(v: Vec<u8>) -> Self {
        Bytes::from(v).into()
    }
}

impl From<&str> for Body {
    fn from(s: &str) -> Self {
        s.as_bytes().into()
    }
}

impl From<String> for Body {
    fn from(s: String) -> Self {
        Bytes::from(s).into()
    }
}
