use super::{Backend, Origin};
use crate::http::{Request, Response};
use anyhow::Context;
use async_trait::async_trait;
use std::collections::HashMap;
use url::Url;

/// An [`Origin`] that sends requests over the network with [`reqwest`].
///
/// Each backend name maps to a target base URL. The scheme, host, and port of the outbound request
/// are replaced by the target's; path and query are kept, as is the `Host` header if the request
/// carries one.
#[derive(Clone, Debug, Default)]
pub struct HttpOrigin {
    client: reqwest::Client,
    targets: HashMap<String, Url>,
}

impl HttpOrigin {
    /// Create an origin with no backends, using a default [`reqwest::Client`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an origin that sends through the given client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client,
            targets: HashMap::new(),
        }
    }

    /// Map a backend name to the base URL requests for it are sent to.
    pub fn backend(mut self, name: &str, target: Url) -> Self {
        self.targets.insert(name.to_owned(), target);
        self
    }

    fn target_url(&self, backend: &Backend, req: &Request) -> Result<Url, anyhow::Error> {
        let target = self
            .targets
            .get(backend.name())
            .with_context(|| format!("backend {} has no target", backend))?;
        let mut url = req.get_url().clone();
        url.set_scheme(target.scheme())
            .map_err(|()| anyhow::anyhow!("cannot use scheme {}", target.scheme()))?;
        url.set_host(target.host_str())
            .context("backend target has an invalid host")?;
        url.set_port(target.port())
            .map_err(|()| anyhow::anyhow!("backend target has an invalid port"))?;
        Ok(url)
    }
}

#[async_trait]
impl Origin for HttpOrigin {
    async fn send(&self, backend: &Backend, mut req: Request) -> Result<Response, anyhow::Error> {
        let url = self.target_url(backend, &req)?;
        let body = req.take_body().into_bytes();
        let beresp = self
            .client
            .request(req.get_method().clone(), url)
            .headers(req.get_header_map().clone())
            .body(body)
            .send()
            .await
            .with_context(|| format!("error sending request to backend {}", backend))?;

        let mut resp = Response::from_status(beresp.status()).with_version(beresp.version());
        for (name, value) in beresp.headers() {
            resp.append_header(name, value);
        }
        let body = beresp
            .bytes()
            .await
            .with_context(|| format!("error reading response body from backend {}", backend))?;
        Ok(resp.with_body(body))
    }
}

#[cfg(test)]
mod http_origin_tests {
    use super::*;

    #[test]
    fn target_replaces_scheme_host_and_port() {
        let origin = HttpOrigin::with_client(reqwest::Client::new()).backend(
            "api",
            Url::parse("http://10.0.0.7:8080").unwrap(),
        );
        let req = Request::get("https://example.com/v1/items?page=2");
        let url = origin
            .target_url(&Backend::from_name("api").unwrap(), &req)
            .unwrap();
        assert_eq!(url.as_str(), "http://10.0.0.7:8080/v1/items?page=2");

        let err = origin
            .target_url(&Backend::from_name("missing").unwrap(), &req)
            .unwrap_err();
        assert!(err.to_string().contains("missing"));
    }
}
