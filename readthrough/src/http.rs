//! HTTP types and the readthrough cache built on them.

pub mod body;
pub mod cache;
pub mod request;
pub mod response;

pub use body::Body;
pub use request::Request;
pub use response::Response;

#[doc(no_inline)]
pub use http::header::{self, HeaderMap, HeaderName, HeaderValue};
#[doc(no_inline)]
pub use http::{Method, StatusCode, Version};
