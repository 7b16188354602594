//! A content-type driven caching policy, configured as data.

use super::candidate::CandidateResponse;
use super::hooks::CacheHooks;
use super::transform::BodyTransform;
use crate::config::{ConfigError, DEFAULT_TTL_SECS};
use crate::http::HeaderName;
use mime::Mime;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// The serialized form of a [`ContentTypePolicy`].
///
/// ```json
/// {
///   "default_ttl": 2,
///   "private_header": "my-private-header",
///   "rules": [
///     { "content_type": "image/*", "ttl": 67 },
///     { "content_type": "application/xml", "uncacheable": true },
///     { "content_type": "application/json",
///       "transform": { "json_to_html": { "template": "<div>{firstName} {lastName}</div>" } } }
///   ]
/// }
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyConfig {
    /// Lifetime in seconds for content types no rule matches, and for rules without a `ttl`.
    ///
    /// Defaults to [`DEFAULT_TTL_SECS`].
    #[serde(default = "default_ttl_secs")]
    pub default_ttl: u32,
    /// A response header whose presence marks the response hit-for-pass, whatever its type.
    #[serde(default)]
    pub private_header: Option<String>,
    /// Rules by content type.
    #[serde(default)]
    pub rules: Vec<RuleConfig>,
}

/// One row of a [`PolicyConfig`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleConfig {
    /// A MIME essence such as `text/html`, or a top-level type as `image/*` or `image`.
    pub content_type: String,
    /// Lifetime in seconds.
    #[serde(default)]
    pub ttl: Option<u32>,
    /// Skip caching responses of this type.
    #[serde(default)]
    pub uncacheable: bool,
    /// A transform to apply before caching.
    #[serde(default)]
    pub transform: Option<TransformConfig>,
}

/// The transforms that can be named in a [`RuleConfig`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformConfig {
    /// See [`BodyTransform::json_to_html()`].
    JsonToHtml {
        /// The HTML template.
        template: String,
    },
}

fn default_ttl_secs() -> u32 {
    DEFAULT_TTL_SECS
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            default_ttl: DEFAULT_TTL_SECS,
            private_header: None,
            rules: Vec::new(),
        }
    }
}

impl TransformConfig {
    fn build(&self) -> BodyTransform {
        match self {
            Self::JsonToHtml { template } => BodyTransform::json_to_html(template.as_str()),
        }
    }
}

impl PolicyConfig {
    /// Parse a policy from JSON.
    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(s)?)
    }

    /// Read and parse a JSON policy file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_json_str(&crate::config::read_config_file(path.as_ref())?)
    }

    /// The reference policy: images for 67 seconds, HTML for 321, XML uncached, JSON rendered into
    /// HTML, everything else for 2 seconds, and `my-private-header` marking responses
    /// hit-for-pass.
    pub fn reference() -> Self {
        let rule = |content_type: &str| RuleConfig {
            content_type: content_type.to_owned(),
            ttl: None,
            uncacheable: false,
            transform: None,
        };
        Self {
            default_ttl: DEFAULT_TTL_SECS,
            private_header: Some("my-private-header".to_owned()),
            rules: vec![
                RuleConfig {
                    ttl: Some(67),
                    ..rule("image/*")
                },
                RuleConfig {
                    ttl: Some(321),
                    ..rule("text/html")
                },
                RuleConfig {
                    uncacheable: true,
                    ..rule("application/xml")
                },
                RuleConfig {
                    transform: Some(TransformConfig::JsonToHtml {
                        template: "<div>{firstName} {lastName}</div>".to_owned(),
                    }),
                    ..rule("application/json")
                },
            ],
        }
    }
}

#[derive(Clone, Debug)]
struct Rule {
    ttl: Option<Duration>,
    uncacheable: bool,
    transform: Option<BodyTransform>,
}

/// [`CacheHooks`] that set the lifetime, cacheability, and body transform of a response from its
/// `Content-Type`.
///
/// Rules are matched by MIME essence (`text/html; charset=utf-8` matches `text/html`), then by
/// top-level type (`image/png` matches `image/*`). Responses matching no rule, or with no valid
/// `Content-Type`, get the default lifetime and keep their header-derived cacheability.
///
/// After the content-type rule is applied, a response carrying the private header is marked
/// hit-for-pass, overriding whatever the rule decided.
#[derive(Clone, Debug)]
pub struct ContentTypePolicy {
    default_ttl: Duration,
    private_header: Option<HeaderName>,
    by_essence: HashMap<String, Rule>,
    by_type: HashMap<String, Rule>,
}

impl ContentTypePolicy {
    /// Build a policy from its configuration, validating content types and header names.
    pub fn from_config(config: &PolicyConfig) -> Result<Self, ConfigError> {
        let private_header = config
            .private_header
            .as_deref()
            .map(|name| {
                HeaderName::from_bytes(name.as_bytes())
                    .map_err(|_| ConfigError::InvalidHeaderName(name.to_owned()))
            })
            .transpose()?;

        let mut policy = Self {
            default_ttl: Duration::from_secs(config.default_ttl.into()),
            private_header,
            by_essence: HashMap::new(),
            by_type: HashMap::new(),
        };
        for rule_config in config.rules.iter() {
            let rule = Rule {
                ttl: rule_config.ttl.map(|secs| Duration::from_secs(secs.into())),
                uncacheable: rule_config.uncacheable,
                transform: rule_config.transform.as_ref().map(TransformConfig::build),
            };
            let pattern = rule_config.content_type.trim().to_ascii_lowercase();
            match pattern.strip_suffix("/*") {
                Some(top) if is_token(top) => {
                    policy.by_type.insert(top.to_owned(), rule);
                }
                _ if is_token(&pattern) => {
                    policy.by_type.insert(pattern, rule);
                }
                _ => {
                    let mime: Mime = pattern
                        .parse()
                        .map_err(|_| ConfigError::InvalidContentType(pattern.clone()))?;
                    policy
                        .by_essence
                        .insert(mime.essence_str().to_owned(), rule);
                }
            }
        }
        Ok(policy)
    }

    /// The [reference policy][PolicyConfig::reference()].
    pub fn reference() -> Self {
        Self::from_config(&PolicyConfig::reference())
            .expect("the reference policy configuration is valid")
    }

    fn rule_for(&self, mime: &Mime) -> Option<&Rule> {
        self.by_essence
            .get(mime.essence_str())
            .or_else(|| self.by_type.get(mime.type_().as_str()))
    }
}

impl CacheHooks for ContentTypePolicy {
    fn after_send(&self, candidate: &mut CandidateResponse) -> Result<(), anyhow::Error> {
        let content_type = candidate.get_content_type();
        match content_type.as_ref().and_then(|mime| self.rule_for(mime)) {
            Some(rule) => {
                candidate.set_ttl(rule.ttl.unwrap_or(self.default_ttl));
                if rule.uncacheable {
                    candidate.set_uncacheable(false);
                }
                if let Some(transform) = &rule.transform {
                    candidate.set_body_transform(transform.clone());
                }
            }
            None => candidate.set_ttl(self.default_ttl),
        }

        let private = self
            .private_header
            .as_ref()
            .map_or(false, |name| candidate.contains_header(name));
        if private {
            candidate.set_uncacheable(true);
        }
        debug!(
            content_type = content_type.as_ref().map(Mime::essence_str),
            ttl = candidate.get_ttl().as_secs(),
            private,
            "applied content-type policy"
        );
        Ok(())
    }
}

fn is_token(s: &str) -> bool {
    !s.is_empty()
        && s
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b"!#$&-^_.+".contains(&b))
}

#[cfg(test)]
mod policy_tests {
    use super::*;
    use crate::http::cache::freshness::Freshness;
    use crate::http::cache::StorageAction;
    use crate::http::{HeaderMap, HeaderValue, StatusCode};

    fn candidate(pairs: &[(&'static str, &'static str)]) -> CandidateResponse {
        let headers: HeaderMap = pairs
            .iter()
            .map(|&(k, v)| (HeaderName::from_static(k), HeaderValue::from_static(v)))
            .collect();
        CandidateResponse::new(
            StatusCode::OK,
            headers,
            Freshness {
                ttl: Duration::from_secs(3600),
                stale_while_revalidate: Duration::ZERO,
                surrogate_keys: vec![],
                cacheable: true,
            },
            false,
        )
    }

    fn apply(pairs: &[(&'static str, &'static str)]) -> CandidateResponse {
        let mut c = candidate(pairs);
        ContentTypePolicy::reference().after_send(&mut c).unwrap();
        c
    }

    #[test]
    fn table_lifetimes() {
        for (content_type, ttl) in [
            ("image/png", 67),
            ("image/svg+xml", 67),
            ("text/html; charset=utf-8", 321),
            ("text/plain", 2),
            ("application/octet-stream", 2),
        ] {
            let c = apply(&[("content-type", content_type)]);
            assert_eq!(c.get_ttl(), Duration::from_secs(ttl), "{}", content_type);
            assert_eq!(c.get_storage_action(), None, "{}", content_type);
        }
        assert_eq!(apply(&[]).get_ttl(), Duration::from_secs(2));
    }

    #[test]
    fn uncacheable_types_are_skipped() {
        let c = apply(&[("content-type", "application/xml")]);
        assert_eq!(c.get_storage_action(), Some(StorageAction::Skip));
        assert_eq!(c.get_ttl(), Duration::from_secs(2));
    }

    #[test]
    fn json_declares_html_transform() {
        let c = apply(&[("content-type", "application/json")]);
        assert_eq!(
            c.get_body_transform().map(BodyTransform::content_type),
            Some(&mime::TEXT_HTML)
        );
        assert_eq!(c.get_header_str("content-type"), Some("application/json"));
    }

    #[test]
    fn private_marker_wins_after_content_type() {
        for content_type in ["text/html", "application/xml", "image/gif"] {
            let c = apply(&[
                ("content-type", content_type),
                ("my-private-header", "1"),
            ]);
            assert_eq!(c.get_storage_action(), Some(StorageAction::HitForPass));
        }
        let c = apply(&[("content-type", "text/html"), ("my-private-header", "")]);
        assert_eq!(c.get_ttl(), Duration::from_secs(321));
    }

    #[test]
    fn parses_reference_file_and_rejects_bad_config() {
        let config =
            PolicyConfig::from_json_str(include_str!("../../../policy.example.json")).unwrap();
        assert_eq!(config, PolicyConfig::reference());

        for bad in [
            r#"{"rules": [{"content_type": "not a type"}]}"#,
            r#"{"private_header": "bad header"}"#,
        ] {
            let config = PolicyConfig::from_json_str(bad).unwrap();
            assert!(ContentTypePolicy::from_config(&config).is_err(), "{}", bad);
        }
        assert!(PolicyConfig::from_json_str(r#"{"rulez": []}"#).is_err());
    }

    #[test]
    fn omitted_default_ttl_is_not_zero() {
        let config =
            PolicyConfig::from_json_str(r#"{"rules": [{"content_type": "text/html", "ttl": 321}]}"#)
                .unwrap();
        assert_eq!(config.default_ttl, DEFAULT_TTL_SECS);
        assert_eq!(PolicyConfig::default().default_ttl, DEFAULT_TTL_SECS);

        let policy = ContentTypePolicy::from_config(&config).unwrap();
        let mut c = candidate(&[("content-type", "text/plain")]);
        policy.after_send(&mut c).unwrap();
        assert_eq!(c.get_ttl(), Duration::from_secs(DEFAULT_TTL_SECS.into()));
    }
}
