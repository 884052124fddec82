//! reqwest-backed transports.
//!
//! The primary transport uses a pooled client that negotiates HTTP/2 when the
//! server offers it. The fallback transport is deliberately plainer: HTTP/1.1
//! only, no idle connection reuse and `Connection: close` on every request, so
//! it still works behind proxies and middleboxes that break the primary path.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use loanflow_types::TransportStrategy;
use reqwest::header::{CONNECTION, HeaderName, HeaderValue};
use reqwest::{Client, Method};
use thiserror::Error;
use url::Url;

use crate::error::TransportFailure;
use crate::transport::{GatewayRequest, HttpMethod, RawResponse, Transport};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum TransportBuildError {
    #[error("invalid base url '{url}': {source}")]
    BaseUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("base url '{0}' cannot carry paths")]
    OpaqueBaseUrl(String),
    #[error("build http client: {0}")]
    Client(#[from] reqwest::Error),
}

pub struct HttpTransport {
    client: Client,
    base_url: Url,
    strategy: TransportStrategy,
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("base_url", &self.base_url.as_str())
            .field("strategy", &self.strategy)
            .finish()
    }
}

impl HttpTransport {
    pub fn primary(base_url: &str) -> Result<Self, TransportBuildError> {
        let client = Client::builder().connect_timeout(CONNECT_TIMEOUT).build()?;
        Self::with_client(base_url, client, TransportStrategy::Primary)
    }

    pub fn fallback(base_url: &str) -> Result<Self, TransportBuildError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .http1_only()
            .pool_max_idle_per_host(0)
            .build()?;
        Self::with_client(base_url, client, TransportStrategy::Fallback)
    }

    pub fn with_client(
        base_url: &str,
        client: Client,
        strategy: TransportStrategy,
    ) -> Result<Self, TransportBuildError> {
        Ok(Self {
            client,
            base_url: normalize_base_url(base_url)?,
            strategy,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn url_for(&self, path: &str) -> Result<Url, TransportFailure> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|err| {
                TransportFailure::invalid_request(format!("invalid path '{path}': {err}"))
            })
    }
}

// A trailing slash keeps `join` from replacing the last path segment.
fn normalize_base_url(raw: &str) -> Result<Url, TransportBuildError> {
    let mut url = Url::parse(raw).map_err(|source| TransportBuildError::BaseUrl {
        url: raw.to_string(),
        source,
    })?;
    if url.cannot_be_a_base() {
        return Err(TransportBuildError::OpaqueBaseUrl(raw.to_string()));
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

fn reqwest_method(method: HttpMethod) -> Method {
    match method {
        HttpMethod::Get => Method::GET,
        HttpMethod::Post => Method::POST,
        HttpMethod::Put => Method::PUT,
        HttpMethod::Patch => Method::PATCH,
        HttpMethod::Delete => Method::DELETE,
    }
}

fn classify(err: reqwest::Error) -> TransportFailure {
    if err.is_timeout() {
        TransportFailure::timeout(err.to_string())
    } else if err.is_builder() {
        TransportFailure::invalid_request(err.to_string())
    } else {
        TransportFailure::network(err.to_string())
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn strategy(&self) -> TransportStrategy {
        self.strategy
    }

    async fn send(&self, request: &GatewayRequest) -> Result<RawResponse, TransportFailure> {
        let url = self.url_for(&request.path)?;
        let mut builder = self.client.request(reqwest_method(request.method), url);

        for (name, value) in &request.headers {
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(value)) => builder = builder.header(name, value),
                _ => {
                    return Err(TransportFailure::invalid_request(format!(
                        "invalid header {name}"
                    )));
                }
            }
        }
        if self.strategy == TransportStrategy::Fallback {
            builder = builder.header(CONNECTION, HeaderValue::from_static("close"));
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(classify)?;
        let status = response.status().as_u16();
        let mut headers = BTreeMap::new();
        for (name, value) in response.headers() {
            if let Ok(v) = value.to_str() {
                headers.insert(name.to_string(), v.to_string());
            }
        }
        let body = response.bytes().await.map_err(classify)?;

        Ok(RawResponse {
            status,
            headers,
            body: body.to_vec(),
        })
    }
}
