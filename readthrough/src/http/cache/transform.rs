//! Body transforms applied to responses before they are cached.

use crate::http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use crate::http::{HeaderMap, HeaderValue};
use crate::limits::TransformLimits;
use bytes::Bytes;
use mime::Mime;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Errors arising while transforming a response body.
///
/// A failed transform never fails the request: the response is served exactly as the origin sent
/// it, and nothing is cached.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum TransformError {
    /// The body is larger than [`TransformLimits::get_max_body_bytes()`].
    #[error("body of {size} bytes exceeds the transform limit of {limit} bytes")]
    BodyTooLarge {
        /// The size of the body.
        size: usize,
        /// The limit in force.
        limit: usize,
    },
    /// The body was expected to be JSON but did not parse.
    #[error("body is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    /// The body parsed as JSON, but not into the shape the transform needs.
    #[error("unexpected JSON body: {0}")]
    UnexpectedJson(String),
    /// Any other failure raised by a transform function.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

type TransformFn = dyn Fn(Bytes) -> Result<Bytes, TransformError> + Send + Sync;

/// A function from the origin body to the body that is cached and served, together with the
/// content type of its output.
///
/// Transforms are declared by the `after_send` hook with
/// [`CandidateResponse::set_body_transform()`][super::CandidateResponse::set_body_transform()] and
/// run at most once, after the hook returns, and only for fresh responses that end up stored. The
/// `Content-Type` and `Content-Length` headers are rewritten together with the body, and only if
/// the transform succeeds.
///
/// ```no_run
/// use readthrough::BodyTransform;
/// let shout = BodyTransform::new(mime::TEXT_PLAIN, |body| {
///     Ok(body.to_ascii_uppercase().into())
/// });
/// ```
#[derive(Clone)]
pub struct BodyTransform {
    content_type: Mime,
    f: Arc<TransformFn>,
}

impl BodyTransform {
    /// Create a transform producing bodies of the given content type.
    pub fn new(
        content_type: Mime,
        f: impl Fn(Bytes) -> Result<Bytes, TransformError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            content_type,
            f: Arc::new(f),
        }
    }

    /// Render a JSON object into an HTML template.
    ///
    /// Each `{name}` placeholder in the template is replaced by the HTML-escaped value of the
    /// top-level field `name`. Strings are inserted without quotes, `null` as nothing, and other
    /// values as their JSON text. `{{` and `}}` produce literal braces. A body that is not a JSON
    /// object, or that lacks a field the template names, fails the transform.
    ///
    /// ```no_run
    /// use readthrough::BodyTransform;
    /// let transform = BodyTransform::json_to_html("<div>{firstName} {lastName}</div>");
    /// ```
    pub fn json_to_html(template: impl Into<String>) -> Self {
        let template = template.into();
        Self::new(mime::TEXT_HTML, move |body| {
            let value: Value = serde_json::from_slice(&body)?;
            let Value::Object(fields) = value else {
                return Err(TransformError::UnexpectedJson(
                    "expected a JSON object".to_owned(),
                ));
            };
            render_template(&template, |name| match fields.get(name) {
                Some(Value::String(s)) => Ok(s.clone()),
                Some(Value::Null) => Ok(String::new()),
                Some(other) => Ok(other.to_string()),
                None => Err(TransformError::UnexpectedJson(format!(
                    "missing field `{}`",
                    name
                ))),
            })
            .map(Bytes::from)
        })
    }

    /// The content type of the transformed body.
    pub fn content_type(&self) -> &Mime {
        &self.content_type
    }

    /// Run the transform over a body, rewriting the representation headers to match the output.
    ///
    /// The headers are left untouched if the transform fails.
    pub(crate) fn apply(
        &self,
        headers: &mut HeaderMap,
        body: Bytes,
    ) -> Result<Bytes, TransformError> {
        if let Some(limit) = TransformLimits::get_max_body_bytes() {
            if body.len() > limit {
                return Err(TransformError::BodyTooLarge {
                    size: body.len(),
                    limit,
                });
            }
        }
        let content_type = HeaderValue::from_str(self.content_type.as_ref())
            .map_err(|e| TransformError::Other(e.into()))?;
        let out = (self.f)(body)?;
        headers.insert(CONTENT_TYPE, content_type);
        headers.insert(CONTENT_LENGTH, HeaderValue::from(out.len()));
        Ok(out)
    }
}

impl fmt::Debug for BodyTransform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BodyTransform")
            .field("content_type", &self.content_type)
            .finish_non_exhaustive()
    }
}

fn render_template(
    template: &str,
    mut lookup: impl FnMut(&str) -> Result<String, TransformError>,
) -> Result<String, TransformError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(i) = rest.find(|c: char| c == '{' || c == '}') {
        out.push_str(&rest[..i]);
        let tail = &rest[i..];
        if tail.starts_with("{{") || tail.starts_with("}}") {
            out.push_str(&tail[..1]);
            rest = &tail[2..];
        } else if tail.starts_with('{') {
            match tail.find('}') {
                Some(end) => {
                    escape_html(&mut out, &lookup(tail[1..end].trim())?);
                    rest = &tail[end + 1..];
                }
                None => {
                    out.push_str(tail);
                    rest = "";
                }
            }
        } else {
            out.push('}');
            rest = &tail[1..];
        }
    }
    out.push_str(rest);
    Ok(out)
}

fn escape_html(out: &mut String, s: &str) {
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
}

#[cfg(test)]
mod transform_tests {
    use super::*;

    fn run(
        transform: &BodyTransform,
        body: &'static str,
    ) -> Result<(HeaderMap, Bytes), TransformError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let out = transform.apply(&mut headers, Bytes::from_static(body.as_bytes()))?;
        Ok((headers, out))
    }

    #[test]
    fn renders_fields_into_template() {
        let t = BodyTransform::json_to_html("<div>{firstName} {lastName}</div>");
        let (headers, out) = run(&t, r#"{"firstName":"Ann","lastName":"Lee"}"#).unwrap();
        assert_eq!(&out[..], b"<div>Ann Lee</div>");
        assert_eq!(headers[CONTENT_TYPE], "text/html");
        assert_eq!(headers[CONTENT_LENGTH], "18");
    }

    #[test]
    fn escapes_values_and_handles_literal_braces() {
        let t = BodyTransform::json_to_html("{{{name}}} {age} {nothing}");
        let (_, out) = run(&t, r#"{"name":"<b>&</b>","age":4,"nothing":null}"#).unwrap();
        assert_eq!(&out[..], b"{&lt;b&gt;&amp;&lt;/b&gt;} 4 ");
    }

    #[test]
    fn failures_leave_headers_untouched() {
        let t = BodyTransform::json_to_html("<p>{missing}</p>");
        for body in ["not json", "[1, 2]", r#"{"present": true}"#] {
            let mut headers = HeaderMap::new();
            headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            assert!(t.apply(&mut headers, Bytes::from_static(body.as_bytes())).is_err());
            assert_eq!(headers[CONTENT_TYPE], "application/json");
            assert!(!headers.contains_key(CONTENT_LENGTH));
        }
    }

    #[test]
    fn bodies_over_the_limit_are_rejected() {
        let t = BodyTransform::new(mime::TEXT_PLAIN, Ok);
        let limit = crate::limits::DEFAULT_MAX_TRANSFORM_BODY_BYTES;
        let big = Bytes::from(vec![b'a'; limit + 1]);
        match t.apply(&mut HeaderMap::new(), big) {
            Err(TransformError::BodyTooLarge { size, .. }) => assert_eq!(size, limit + 1),
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
