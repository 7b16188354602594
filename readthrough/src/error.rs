//! Error-handling utilities.
//!
//! Only two kinds of failure ever reach the caller of
//! [`ReadthroughCache::send()`][crate::ReadthroughCache::send()]: the origin could not be reached
//! ([`SendErrorCause::Transport`]) or one of the hooks returned an error
//! ([`SendErrorCause::BeforeSend`], [`SendErrorCause::AfterSend`]). Transform and storage failures
//! ([`TransformError`], [`CacheError`]) are logged and degrade to serving the response uncached.

pub use crate::backend::BackendError;
pub use crate::cache::core::CacheError;
pub use crate::config::ConfigError;
pub use crate::http::cache::TransformError;
pub use crate::http::request::{SendError, SendErrorCause};
pub use anyhow::{anyhow, bail, ensure, Context, Error};
