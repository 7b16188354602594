//! Automatically enforced limits for body transforms.
//!
//! A declared [`BodyTransform`][crate::BodyTransform] buffers the whole origin body before it runs.
//! Bodies larger than the configured limit are not transformed; the transform fails, and the
//! response is served without being cached.
//!
//! # Examples
//!
//! ```no_run
//! use readthrough::limits::TransformLimits;
//! TransformLimits::set_max_body_bytes(Some(1024 * 1024));
//! ```
use lazy_static::lazy_static;
use std::sync::{PoisonError, RwLock};

/// The default body size limit for [`TransformLimits`].
pub const DEFAULT_MAX_TRANSFORM_BODY_BYTES: usize = 16 * 1024 * 1024;

lazy_static! {
    pub(crate) static ref TRANSFORM_LIMITS: RwLock<TransformLimits> =
        RwLock::new(TransformLimits::default());
}

/// The limits applied when running a body transform.
///
/// # Default values
///
/// | Limit     | Default value                         |
/// |-----------|---------------------------------------|
/// | Body size | [`DEFAULT_MAX_TRANSFORM_BODY_BYTES`]  |
#[derive(Clone, Copy, Debug)]
pub struct TransformLimits {
    pub(crate) max_body_bytes: Option<usize>,
}

impl TransformLimits {
    const fn default() -> Self {
        TransformLimits {
            max_body_bytes: Some(DEFAULT_MAX_TRANSFORM_BODY_BYTES),
        }
    }

    /// Get the current transform body size limit.
    pub fn get_max_body_bytes() -> Option<usize> {
        TRANSFORM_LIMITS
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .max_body_bytes
    }

    /// Set the transform body size limit.
    pub fn set_max_body_bytes(max: Option<usize>) {
        TRANSFORM_LIMITS
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .max_body_bytes = max;
    }
}
