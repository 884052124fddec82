//! Scripted transport for tests.
//!
//! [`MockTransport`] answers each request with the next queued [`MockReply`],
//! or with a handler when the queue is empty, and records every request it
//! receives.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use loanflow_types::TransportStrategy;
use serde_json::Value;

use crate::error::TransportFailure;
use crate::transport::{GatewayRequest, RawResponse, Transport};

/// Canned reply for one request.
#[derive(Clone, Debug)]
pub enum MockReply {
    Respond(RawResponse),
    Fail(TransportFailure),
    /// Never completes; only a deadline or cancellation ends the attempt.
    Hang,
    Delayed(Duration, Box<MockReply>),
}

impl MockReply {
    pub fn json(status: u16, body: Value) -> Self {
        let mut headers = BTreeMap::new();
        headers.insert("content-type".into(), "application/json".into());
        MockReply::Respond(RawResponse {
            status,
            headers,
            body: body.to_string().into_bytes(),
        })
    }

    pub fn text(status: u16, body: impl Into<String>) -> Self {
        let mut headers = BTreeMap::new();
        headers.insert("content-type".into(), "text/plain".into());
        MockReply::Respond(RawResponse {
            status,
            headers,
            body: body.into().into_bytes(),
        })
    }

    pub fn network_error(message: impl Into<String>) -> Self {
        MockReply::Fail(TransportFailure::network(message))
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        MockReply::Fail(TransportFailure::invalid_request(message))
    }

    pub fn hang() -> Self {
        MockReply::Hang
    }

    pub fn delayed(delay: Duration, reply: MockReply) -> Self {
        MockReply::Delayed(delay, Box::new(reply))
    }
}

type Handler = Arc<dyn Fn(&GatewayRequest) -> MockReply + Send + Sync>;

pub struct MockTransport {
    strategy: TransportStrategy,
    script: Mutex<VecDeque<MockReply>>,
    handler: Option<Handler>,
    requests: Mutex<Vec<GatewayRequest>>,
}

impl MockTransport {
    pub fn new(strategy: TransportStrategy) -> Self {
        Self {
            strategy,
            script: Mutex::new(VecDeque::new()),
            handler: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn primary() -> Arc<Self> {
        Arc::new(Self::new(TransportStrategy::Primary))
    }

    pub fn fallback() -> Arc<Self> {
        Arc::new(Self::new(TransportStrategy::Fallback))
    }

    /// Answers unscripted requests by calling `handler`.
    pub fn with_handler<F>(strategy: TransportStrategy, handler: F) -> Arc<Self>
    where
        F: Fn(&GatewayRequest) -> MockReply + Send + Sync + 'static,
    {
        Arc::new(Self {
            handler: Some(Arc::new(handler)),
            ..Self::new(strategy)
        })
    }

    pub fn push(&self, reply: MockReply) {
        self.script
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push_back(reply);
    }

    pub fn requests(&self) -> Vec<GatewayRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    fn next_reply(&self, request: &GatewayRequest) -> MockReply {
        let scripted = self
            .script
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop_front();
        match (scripted, &self.handler) {
            (Some(reply), _) => reply,
            (None, Some(handler)) => handler(request),
            (None, None) => {
                MockReply::json(500, serde_json::json!({ "error": "unscripted request" }))
            }
        }
    }
}

async fn play(reply: MockReply) -> Result<RawResponse, TransportFailure> {
    let mut reply = reply;
    loop {
        match reply {
            MockReply::Respond(raw) => return Ok(raw),
            MockReply::Fail(failure) => return Err(failure),
            MockReply::Hang => std::future::pending::<()>().await,
            MockReply::Delayed(delay, inner) => {
                tokio::time::sleep(delay).await;
                reply = *inner;
            }
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn strategy(&self) -> TransportStrategy {
        self.strategy
    }

    async fn send(&self, request: &GatewayRequest) -> Result<RawResponse, TransportFailure> {
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(request.clone());
        let reply = self.next_reply(request);
        play(reply).await
    }
}
