//! Configuration for a [`ReadthroughCache`][crate::ReadthroughCache].
//!
//! Configuration is plain data, deserialized from JSON with [`serde`]:
//!
//! ```json
//! {
//!   "cache": { "default_ttl": 2, "key": { "vary_headers": ["accept-encoding"] } },
//!   "policy": { "default_ttl": 2, "private_header": "my-private-header", "rules": [] }
//! }
//! ```
//!
//! The `policy` section is optional; see [`PolicyConfig`] for its format.

use crate::cache::core::CacheKeyConfig;
pub use crate::http::cache::policy::{PolicyConfig, RuleConfig, TransformConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Errors arising from loading or validating configuration.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("could not read configuration file {}: {source}", path.display())]
    Io {
        /// The file that could not be read.
        path: PathBuf,
        /// The underlying error.
        source: std::io::Error,
    },
    /// The configuration is not valid JSON, or does not have the expected shape.
    #[error("invalid configuration: {0}")]
    Parse(#[from] serde_json::Error),
    /// A policy rule names something that is not a content type.
    #[error("invalid content type in policy rule: {0:?}")]
    InvalidContentType(String),
    /// A header name in the configuration is not valid.
    #[error("invalid header name: {0:?}")]
    InvalidHeaderName(String),
}

/// Top-level configuration.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Settings of the cache itself.
    pub cache: CacheConfig,
    /// The content-type policy to install as hooks, if any.
    pub policy: Option<PolicyConfig>,
}

impl Config {
    /// Parse configuration from JSON.
    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(s)?)
    }

    /// Read and parse a JSON configuration file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_json_str(&read_config_file(path.as_ref())?)
    }
}

/// The default freshness lifetime, in seconds, for responses whose headers do not give one.
pub const DEFAULT_TTL_SECS: u32 = 2;

/// Settings of the cache itself, independent of the hooks.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    /// Lifetime in seconds for responses that carry no `Cache-Control` lifetime or `Expires`, and
    /// whose request sets no TTL.
    pub default_ttl: u32,
    /// What distinguishes cache keys.
    pub key: CacheKeyConfig,
}

impl CacheConfig {
    /// [`default_ttl`][Self::default_ttl] as a [`Duration`].
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl.into())
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: DEFAULT_TTL_SECS,
            key: CacheKeyConfig::default(),
        }
    }
}

pub(crate) fn read_config_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_owned(),
        source,
    })
}
