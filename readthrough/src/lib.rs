// Warnings (other than unused variables) in doctests are promoted to errors.
#![doc(test(attr(deny(warnings))))]
#![doc(test(attr(allow(dead_code))))]
#![doc(test(attr(allow(unused_variables))))]
#![warn(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(rustdoc::private_intra_doc_links)]
#![deny(rustdoc::invalid_codeblock_attributes)]

//! # Readthrough HTTP caching.
//!
//! This crate sits between a client-facing edge and an origin backend. Each inbound request is
//! handed to [`ReadthroughCache::send()`], which looks the request up in a [`CacheStore`], fetches
//! from the [`Origin`] on a miss, and decides whether and how to cache the origin's response.
//!
//! Applications steer that decision with two hooks, supplied at construction through
//! [`CacheHooks`]:
//!
//! * `before_send` may rewrite the outbound request before the origin sees it;
//! * `after_send` inspects the origin response as a [`CandidateResponse`], adjusts its headers and
//!   freshness lifetime, chooses a [`StorageAction`], and may declare a [`BodyTransform`] to apply
//!   to the body before it is cached.
//!
//! Revalidation is handled structurally: when the origin confirms a stale entry with `304 Not
//! Modified`, only the entry's headers and lifetime are refreshed, and declared transforms are
//! never run against the cached body.
//!
//! ```no_run
//! # async fn f() -> Result<(), readthrough::Error> {
//! use readthrough::cache::memory::MemoryStore;
//! use readthrough::http::cache::{Hooks, ReadthroughCache};
//! use readthrough::{Request, StaticOrigin};
//! use std::time::Duration;
//!
//! let cache = ReadthroughCache::builder(MemoryStore::new(), StaticOrigin::new())
//!     .hooks(Hooks::new().after_send(|candidate| {
//!         candidate.set_ttl(Duration::from_secs(60));
//!         Ok(())
//!     }))
//!     .build();
//! let resp = cache
//!     .send(Request::get("https://example.com/"), "example_backend")
//!     .await?;
//! # Ok(()) }
//! ```

pub mod backend;
pub mod cache;
pub mod config;
pub mod convert;
pub mod error;
pub mod http;
pub mod limits;

pub use crate::backend::{Backend, Origin, StaticOrigin};
#[doc(inline)]
pub use crate::cache::core::{CacheKey, CacheStore};
#[doc(inline)]
pub use crate::error::Error;
#[doc(inline)]
pub use crate::config::Config;
#[doc(inline)]
pub use crate::http::cache::{
    BodyTransform, CacheDecision, CacheHooks, CandidateResponse, ContentTypePolicy,
    ReadthroughCache, StorageAction,
};
#[doc(inline)]
pub use crate::http::{Body, Request, Response};
pub use readthrough_shared::{CacheOverride, CacheState};
