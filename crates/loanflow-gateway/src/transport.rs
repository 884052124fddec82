use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use loanflow_types::TransportStrategy;
use serde_json::Value;
use tokio::sync::watch;

use crate::error::TransportFailure;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }
}

/// One logical request, relative to the service origin.
#[derive(Clone, Debug, PartialEq)]
pub struct GatewayRequest {
    pub method: HttpMethod,
    pub path: String,
    pub body: Option<Value>,
    pub headers: Vec<(String, String)>,
}

impl GatewayRequest {
    pub fn new(method: HttpMethod, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
            headers: Vec::new(),
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Post, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Put, path)
    }

    pub fn with_json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Whatever came back over the wire, before any status interpretation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
}

/// A request execution mechanism.
///
/// Implementations perform exactly one try; deadlines, retries and fallback
/// are owned by the gateway. Dropping the returned future must abandon the
/// in-flight call.
#[async_trait]
pub trait Transport: Send + Sync {
    fn strategy(&self) -> TransportStrategy;
    async fn send(&self, request: &GatewayRequest) -> Result<RawResponse, TransportFailure>;
}

/// Environment-reported connectivity.
pub trait Connectivity: Send + Sync {
    fn is_online(&self) -> bool;

    /// Change feed for sources that can report going offline mid-request.
    /// `None` means changes are only seen through [`is_online`](Self::is_online).
    fn changes(&self) -> Option<watch::Receiver<bool>> {
        None
    }
}

/// Resolves once `connectivity` reports offline; pends forever for sources
/// without a change feed.
pub(crate) async fn wait_for_offline(connectivity: &dyn Connectivity) {
    if let Some(mut changes) = connectivity.changes() {
        let went_offline = changes.wait_for(|online| !*online).await.is_ok();
        if went_offline {
            return;
        }
    }
    std::future::pending::<()>().await
}

/// Connectivity source for environments that cannot report it.
#[derive(Clone, Copy, Debug, Default)]
pub struct AssumeOnline;

impl Connectivity for AssumeOnline {
    fn is_online(&self) -> bool {
        true
    }
}

/// Connectivity toggled by the embedding environment.
///
/// Going offline wakes any attempt currently waiting on the network.
#[derive(Clone, Debug)]
pub struct ConnectivityFlag {
    online: Arc<watch::Sender<bool>>,
}

impl ConnectivityFlag {
    pub fn new(online: bool) -> Self {
        Self {
            online: Arc::new(watch::Sender::new(online)),
        }
    }

    pub fn set_online(&self, online: bool) {
        self.online.send_replace(online);
    }
}

impl Default for ConnectivityFlag {
    fn default() -> Self {
        Self::new(true)
    }
}

impl Connectivity for ConnectivityFlag {
    fn is_online(&self) -> bool {
        *self.online.borrow()
    }

    fn changes(&self) -> Option<watch::Receiver<bool>> {
        Some(self.online.subscribe())
    }
}
