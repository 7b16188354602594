//! Cache storage for the readthrough cache.
//!
//! ## Store capability
//!
//! The [`core`] module defines [`CacheStore`][core::CacheStore], the set of primitive operations
//! the readthrough cache needs from a key-value cache: lookup with request collapsing, insertion,
//! metadata-only updates for revalidation, and hit-for-pass markers. Any engine that can provide
//! those operations can back a [`ReadthroughCache`][crate::ReadthroughCache].
//!
//! ## In-memory store
//!
//! The [`memory`] module contains [`MemoryStore`][memory::MemoryStore], a process-local
//! implementation suitable for tests and single-process deployments.

pub mod core;
mod key;
pub mod memory;
