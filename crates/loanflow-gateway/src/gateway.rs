use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use loanflow_types::{AttemptOutcome, TransportAttempt, TransportStrategy};
use serde::de::DeserializeOwned;
use tokio::time::{Instant, sleep, timeout};
use tracing::{debug, info, warn};

use crate::abort::{AbortSignal, wait_for_abort};
use crate::error::{
    DecodeError, FailureKind, TransportError, is_retryable_status, is_success_status,
};
use crate::policy::RequestPolicy;
use crate::transport::{
    AssumeOnline, Connectivity, GatewayRequest, RawResponse, Transport, wait_for_offline,
};

const ATTEMPT_LOG_CAPACITY: usize = 256;

/// Successful transport outcome: the service answered with a 2xx status.
///
/// Decoding is separate; a body that does not match the expected shape is a
/// [`DecodeError`], not a transport failure.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GatewayResponse {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
    pub strategy: TransportStrategy,
    pub attempts: u32,
}

impl GatewayResponse {
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, DecodeError> {
        serde_json::from_slice(&self.body).map_err(|err| DecodeError {
            status: self.status,
            message: err.to_string(),
        })
    }
}

/// Result of one logical request plus every attempt it made.
#[derive(Clone, Debug)]
pub struct Execution {
    pub outcome: Result<GatewayResponse, TransportError>,
    pub attempts: Vec<TransportAttempt>,
}

/// Bounded record of recent attempts across all requests.
#[derive(Clone, Debug, Default)]
pub struct AttemptLog {
    entries: Arc<Mutex<VecDeque<TransportAttempt>>>,
}

impl AttemptLog {
    fn push(&self, attempt: TransportAttempt) {
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if entries.len() == ATTEMPT_LOG_CAPACITY {
            entries.pop_front();
        }
        entries.push_back(attempt);
    }

    pub fn snapshot(&self) -> Vec<TransportAttempt> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
    }
}

enum TryResult {
    Response(RawResponse),
    Network(String),
    Timeout,
    Offline,
    Cancelled,
    Invalid(String),
}

/// Executes logical requests with bounded, classified resilience.
#[derive(Clone)]
pub struct PersistenceGateway {
    primary: Arc<dyn Transport>,
    fallback: Option<Arc<dyn Transport>>,
    connectivity: Arc<dyn Connectivity>,
    log: AttemptLog,
}

impl std::fmt::Debug for PersistenceGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceGateway")
            .field("primary", &self.primary.strategy())
            .field("fallback", &self.fallback.as_ref().map(|t| t.strategy()))
            .finish()
    }
}

impl PersistenceGateway {
    pub fn new(primary: Arc<dyn Transport>) -> Self {
        Self {
            primary,
            fallback: None,
            connectivity: Arc::new(AssumeOnline),
            log: AttemptLog::default(),
        }
    }

    pub fn with_fallback(mut self, fallback: Arc<dyn Transport>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn with_connectivity(mut self, connectivity: Arc<dyn Connectivity>) -> Self {
        self.connectivity = connectivity;
        self
    }

    /// Most recent attempts, oldest first.
    pub fn attempts(&self) -> Vec<TransportAttempt> {
        self.log.snapshot()
    }

    pub fn attempt_log(&self) -> &AttemptLog {
        &self.log
    }

    pub async fn execute(
        &self,
        request: &GatewayRequest,
        policy: &RequestPolicy,
    ) -> Result<GatewayResponse, TransportError> {
        self.run(request, policy, None).await.outcome
    }

    /// Like [`execute`](Self::execute), stopping with `Cancelled` once `abort` fires.
    pub async fn execute_with_abort(
        &self,
        request: &GatewayRequest,
        policy: &RequestPolicy,
        abort: &AbortSignal,
    ) -> Result<GatewayResponse, TransportError> {
        self.run(request, policy, Some(abort)).await.outcome
    }

    pub async fn run(
        &self,
        request: &GatewayRequest,
        policy: &RequestPolicy,
        abort: Option<&AbortSignal>,
    ) -> Execution {
        self.run_with(|| request.clone(), policy, abort).await
    }

    /// Like [`run`](Self::run), but `build` is called before every attempt,
    /// so a retry picks up a target that changed while backing off.
    pub async fn run_with<F>(
        &self,
        build: F,
        policy: &RequestPolicy,
        abort: Option<&AbortSignal>,
    ) -> Execution
    where
        F: Fn() -> GatewayRequest + Send + Sync,
    {
        let started = Instant::now();
        let mut attempts = Vec::new();
        let outcome = self
            .run_attempts(&build, policy, abort, started, &mut attempts)
            .await;
        let path = attempts.last().map(|a| a.endpoint.as_str()).unwrap_or("-");
        match &outcome {
            Ok(response) => debug!(
                path,
                status = response.status,
                attempts = attempts.len(),
                "request succeeded"
            ),
            Err(err) => warn!(
                path,
                error = %err,
                attempts = attempts.len(),
                "request failed"
            ),
        }
        Execution { outcome, attempts }
    }

    async fn run_attempts<F>(
        &self,
        build: &F,
        policy: &RequestPolicy,
        abort: Option<&AbortSignal>,
        started: Instant,
        attempts: &mut Vec<TransportAttempt>,
    ) -> Result<GatewayResponse, TransportError>
    where
        F: Fn() -> GatewayRequest + Send + Sync,
    {
        let budget = policy.attempt_budget();
        let mut backoff = Duration::ZERO;
        let mut last_error = None;

        for attempt in 1..=budget {
            if abort.is_some_and(AbortSignal::is_aborted) {
                return Err(TransportError::Cancelled);
            }
            let request = build();
            if !self.connectivity.is_online() {
                warn!(path = %request.path, "no connectivity; failing fast");
                return Err(TransportError::NetworkUnreachable);
            }

            let mut strategy = TransportStrategy::Primary;
            let mut result = self
                .try_once(&self.primary, &request, policy, abort, started, backoff, attempts)
                .await;

            // Environment failures get one more try on the fallback mechanism.
            let reason = match &result {
                TryResult::Network(message) => Some(message.as_str()),
                TryResult::Timeout => Some("timed out"),
                _ => None,
            };
            let fallback = self
                .fallback
                .as_ref()
                .filter(|_| policy.allow_fallback_transport);
            if let (Some(reason), Some(fallback)) = (reason, fallback) {
                if !self.connectivity.is_online() {
                    return Err(TransportError::NetworkUnreachable);
                }
                info!(
                    path = %request.path,
                    attempt,
                    error = reason,
                    "primary transport failed; retrying on fallback"
                );
                strategy = fallback.strategy();
                result = self
                    .try_once(fallback, &request, policy, abort, started, Duration::ZERO, attempts)
                    .await;
            }

            match result {
                TryResult::Response(raw) if is_success_status(raw.status) => {
                    return Ok(GatewayResponse {
                        status: raw.status,
                        headers: raw.headers,
                        body: raw.body,
                        strategy,
                        attempts: attempt,
                    });
                }
                TryResult::Response(raw) => {
                    if !is_retryable_status(raw.status) {
                        return Err(TransportError::HttpStatus(raw.status));
                    }
                    last_error = Some(TransportError::HttpStatus(raw.status));
                }
                TryResult::Network(_) => last_error = Some(TransportError::NetworkUnreachable),
                TryResult::Timeout => last_error = Some(TransportError::Timeout),
                TryResult::Offline => {
                    warn!(path = %request.path, "connectivity lost mid-attempt; failing fast");
                    return Err(TransportError::NetworkUnreachable);
                }
                TryResult::Cancelled => return Err(TransportError::Cancelled),
                TryResult::Invalid(message) => return Err(TransportError::InvalidRequest(message)),
            }

            if attempt == budget {
                break;
            }
            backoff = policy.backoff_after(attempt);
            debug!(
                path = %request.path,
                attempt,
                backoff_ms = backoff.as_millis() as u64,
                error = ?last_error,
                "backing off before next attempt"
            );
            tokio::select! {
                _ = sleep(backoff) => {}
                _ = wait_for_abort(abort) => return Err(TransportError::Cancelled),
                _ = wait_for_offline(self.connectivity.as_ref()) => {
                    warn!(path = %request.path, "connectivity lost while backing off");
                    return Err(TransportError::NetworkUnreachable);
                }
            }
        }

        Err(last_error.unwrap_or(TransportError::NetworkUnreachable))
    }

    #[allow(clippy::too_many_arguments)]
    async fn try_once(
        &self,
        transport: &Arc<dyn Transport>,
        request: &GatewayRequest,
        policy: &RequestPolicy,
        abort: Option<&AbortSignal>,
        started: Instant,
        backoff: Duration,
        attempts: &mut Vec<TransportAttempt>,
    ) -> TryResult {
        let attempt_start = Instant::now();
        // Every losing branch drops the send future, which abandons the call.
        let result = tokio::select! {
            sent = timeout(policy.timeout(), transport.send(request)) => match sent {
                Ok(Ok(raw)) => TryResult::Response(raw),
                Ok(Err(failure)) => match failure.kind {
                    FailureKind::Network => TryResult::Network(failure.message),
                    FailureKind::Timeout => TryResult::Timeout,
                    FailureKind::InvalidRequest => TryResult::Invalid(failure.message),
                },
                Err(_elapsed) => TryResult::Timeout,
            },
            _ = wait_for_abort(abort) => TryResult::Cancelled,
            _ = wait_for_offline(self.connectivity.as_ref()) => TryResult::Offline,
        };

        let outcome = match &result {
            TryResult::Response(raw) if is_success_status(raw.status) => AttemptOutcome::Success,
            TryResult::Response(raw) => AttemptOutcome::HttpError(raw.status),
            TryResult::Network(_) | TryResult::Invalid(_) | TryResult::Offline => {
                AttemptOutcome::NetworkError
            }
            TryResult::Timeout => AttemptOutcome::Timeout,
            TryResult::Cancelled => AttemptOutcome::Cancelled,
        };
        let record = TransportAttempt {
            endpoint: request.path.clone(),
            method: request.method.as_str().to_string(),
            started_at_ms: attempt_start.duration_since(started).as_millis() as u64,
            duration_ms: attempt_start.elapsed().as_millis() as u64,
            backoff_ms: backoff.as_millis() as u64,
            outcome,
            strategy: transport.strategy(),
        };
        debug!(
            endpoint = %record.endpoint,
            method = %record.method,
            strategy = record.strategy.as_str(),
            outcome = ?record.outcome,
            duration_ms = record.duration_ms,
            "transport attempt"
        );
        self.log.push(record.clone());
        attempts.push(record);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abort::AbortController;
    use crate::mock::{MockReply, MockTransport};
    use crate::transport::ConnectivityFlag;
    use serde_json::json;

    fn policy(max_attempts: u32) -> RequestPolicy {
        RequestPolicy {
            timeout_ms: 1_000,
            max_attempts,
            backoff_base_ms: 100,
            allow_fallback_transport: false,
        }
    }

    fn step_request() -> GatewayRequest {
        GatewayRequest::put("/applications/a1/step").with_json(json!({ "step": 1, "data": {} }))
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn client_error_is_not_retried() {
        let primary = MockTransport::primary();
        primary.push(MockReply::json(422, json!({ "error": "invalid" })));
        let gateway = PersistenceGateway::new(primary.clone());

        let execution = gateway.run(&step_request(), &policy(3), None).await;

        assert_eq!(execution.outcome, Err(TransportError::HttpStatus(422)));
        assert_eq!(execution.attempts.len(), 1);
        assert_eq!(primary.request_count(), 1);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn server_errors_retry_with_increasing_backoff() {
        let primary = MockTransport::primary();
        primary.push(MockReply::json(503, json!({})));
        primary.push(MockReply::json(503, json!({})));
        primary.push(MockReply::json(200, json!({ "ok": true })));
        let gateway = PersistenceGateway::new(primary.clone());

        let execution = gateway.run(&step_request(), &policy(3), None).await;

        let response = execution.outcome.expect("success");
        assert_eq!(response.status, 200);
        assert_eq!(response.attempts, 3);
        assert_eq!(primary.request_count(), 3);
        let backoffs: Vec<u64> = execution.attempts.iter().map(|a| a.backoff_ms).collect();
        assert_eq!(backoffs, vec![0, 100, 200]);
        let starts: Vec<u64> = execution.attempts.iter().map(|a| a.started_at_ms).collect();
        assert!(starts[1] - starts[0] < starts[2] - starts[1]);
        assert_eq!(
            execution.attempts.iter().map(|a| a.outcome).collect::<Vec<_>>(),
            vec![
                AttemptOutcome::HttpError(503),
                AttemptOutcome::HttpError(503),
                AttemptOutcome::Success
            ]
        );
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn retry_budget_exhaustion_reports_last_status() {
        let primary = MockTransport::primary();
        for _ in 0..3 {
            primary.push(MockReply::json(429, json!({})));
        }
        let gateway = PersistenceGateway::new(primary.clone());

        let outcome = gateway.execute(&step_request(), &policy(3)).await;

        assert_eq!(outcome, Err(TransportError::HttpStatus(429)));
        assert_eq!(primary.request_count(), 3);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn timeout_consumes_one_attempt_then_retries() {
        let primary = MockTransport::primary();
        primary.push(MockReply::hang());
        primary.push(MockReply::json(200, json!({ "ok": true })));
        let gateway = PersistenceGateway::new(primary.clone());

        let execution = gateway.run(&step_request(), &policy(2), None).await;

        assert!(execution.outcome.is_ok());
        assert_eq!(execution.attempts[0].outcome, AttemptOutcome::Timeout);
        assert!(execution.attempts[0].duration_ms >= 1_000);
        assert_eq!(execution.attempts[1].outcome, AttemptOutcome::Success);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn repeated_timeouts_surface_as_timeout() {
        let primary = MockTransport::primary();
        primary.push(MockReply::hang());
        primary.push(MockReply::hang());
        let gateway = PersistenceGateway::new(primary);

        let outcome = gateway.execute(&step_request(), &policy(2)).await;

        assert_eq!(outcome, Err(TransportError::Timeout));
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn network_failure_switches_to_fallback_within_same_attempt() {
        let primary = MockTransport::primary();
        primary.push(MockReply::network_error("connection reset"));
        let fallback = MockTransport::fallback();
        fallback.push(MockReply::json(200, json!({ "ok": true })));
        let gateway = PersistenceGateway::new(primary.clone()).with_fallback(fallback.clone());
        let policy = RequestPolicy {
            allow_fallback_transport: true,
            ..policy(3)
        };

        let execution = gateway.run(&step_request(), &policy, None).await;

        let response = execution.outcome.expect("success");
        assert_eq!(response.strategy, TransportStrategy::Fallback);
        assert_eq!(response.attempts, 1);
        assert_eq!(primary.request_count(), 1);
        assert_eq!(fallback.request_count(), 1);
        assert_eq!(execution.attempts[1].strategy, TransportStrategy::Fallback);
        assert_eq!(execution.attempts[1].backoff_ms, 0);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn fallback_is_not_used_for_http_status() {
        let primary = MockTransport::primary();
        primary.push(MockReply::json(404, json!({})));
        let fallback = MockTransport::fallback();
        let gateway = PersistenceGateway::new(primary).with_fallback(fallback.clone());
        let policy = RequestPolicy {
            allow_fallback_transport: true,
            ..policy(3)
        };

        let outcome = gateway.execute(&step_request(), &policy).await;

        assert_eq!(outcome, Err(TransportError::HttpStatus(404)));
        assert_eq!(fallback.request_count(), 0);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn fallback_is_skipped_when_policy_disallows_it() {
        let primary = MockTransport::primary();
        primary.push(MockReply::network_error("reset"));
        primary.push(MockReply::network_error("reset"));
        let fallback = MockTransport::fallback();
        let gateway = PersistenceGateway::new(primary).with_fallback(fallback.clone());

        let outcome = gateway.execute(&step_request(), &policy(2)).await;

        assert_eq!(outcome, Err(TransportError::NetworkUnreachable));
        assert_eq!(fallback.request_count(), 0);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn offline_environment_fails_fast() {
        let primary = MockTransport::primary();
        let connectivity = ConnectivityFlag::new(false);
        let gateway =
            PersistenceGateway::new(primary.clone()).with_connectivity(Arc::new(connectivity));
        let policy = RequestPolicy {
            timeout_ms: 60_000,
            ..policy(5)
        };

        let before = Instant::now();
        let outcome = gateway.execute(&step_request(), &policy).await;

        assert_eq!(outcome, Err(TransportError::NetworkUnreachable));
        assert_eq!(before.elapsed(), Duration::ZERO);
        assert_eq!(primary.request_count(), 0);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn losing_connectivity_mid_attempt_fails_fast() {
        let primary = MockTransport::primary();
        primary.push(MockReply::hang());
        let connectivity = ConnectivityFlag::new(true);
        let gateway = PersistenceGateway::new(primary.clone())
            .with_connectivity(Arc::new(connectivity.clone()));
        let policy = RequestPolicy {
            timeout_ms: 60_000,
            ..policy(5)
        };

        let request = step_request();
        let before = Instant::now();
        let (execution, ()) = tokio::join!(gateway.run(&request, &policy, None), async {
            sleep(Duration::from_millis(5)).await;
            connectivity.set_online(false);
        });

        assert_eq!(execution.outcome, Err(TransportError::NetworkUnreachable));
        assert!(before.elapsed() < Duration::from_secs(1));
        assert_eq!(primary.request_count(), 1);
        assert_eq!(execution.attempts.len(), 1);
        assert_eq!(execution.attempts[0].outcome, AttemptOutcome::NetworkError);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn losing_connectivity_during_backoff_stops_retries() {
        let primary = MockTransport::primary();
        primary.push(MockReply::json(503, json!({})));
        let connectivity = ConnectivityFlag::new(true);
        let gateway = PersistenceGateway::new(primary.clone())
            .with_connectivity(Arc::new(connectivity.clone()));
        let slow_backoff = RequestPolicy {
            backoff_base_ms: 10_000,
            ..policy(3)
        };

        let request = step_request();
        let before = Instant::now();
        let (outcome, ()) = tokio::join!(gateway.execute(&request, &slow_backoff), async {
            sleep(Duration::from_millis(50)).await;
            connectivity.set_online(false);
        });

        assert_eq!(outcome, Err(TransportError::NetworkUnreachable));
        assert!(before.elapsed() < Duration::from_secs(1));
        assert_eq!(primary.request_count(), 1);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn timeout_switches_to_fallback_within_same_attempt() {
        let primary = MockTransport::primary();
        primary.push(MockReply::hang());
        let fallback = MockTransport::fallback();
        fallback.push(MockReply::json(200, json!({ "ok": true })));
        let gateway = PersistenceGateway::new(primary.clone()).with_fallback(fallback.clone());
        let policy = RequestPolicy {
            allow_fallback_transport: true,
            ..policy(3)
        };

        let execution = gateway.run(&step_request(), &policy, None).await;

        let response = execution.outcome.expect("success");
        assert_eq!(response.strategy, TransportStrategy::Fallback);
        assert_eq!(response.attempts, 1);
        assert_eq!(execution.attempts[0].outcome, AttemptOutcome::Timeout);
        assert_eq!(execution.attempts[1].strategy, TransportStrategy::Fallback);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn run_with_rebuilds_the_request_for_each_attempt() {
        let primary = MockTransport::primary();
        primary.push(MockReply::json(503, json!({})));
        primary.push(MockReply::json(200, json!({ "ok": true })));
        let gateway = PersistenceGateway::new(primary.clone());
        let target = Mutex::new("a1");

        let execution = gateway
            .run_with(
                || {
                    let id = *target.lock().unwrap();
                    // The first build is the only one that sees `a1`.
                    *target.lock().unwrap() = "u9";
                    GatewayRequest::put(format!("/applications/{id}/step"))
                },
                &policy(2),
                None,
            )
            .await;

        assert!(execution.outcome.is_ok());
        let endpoints: Vec<&str> = execution
            .attempts
            .iter()
            .map(|a| a.endpoint.as_str())
            .collect();
        assert_eq!(endpoints, ["/applications/a1/step", "/applications/u9/step"]);
        let sent: Vec<String> = primary.requests().into_iter().map(|r| r.path).collect();
        assert_eq!(sent, ["/applications/a1/step", "/applications/u9/step"]);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn cancellation_is_never_retried() {
        let primary = MockTransport::primary();
        primary.push(MockReply::hang());
        let gateway = PersistenceGateway::new(primary.clone());
        let controller = AbortController::new();
        let signal = controller.signal();

        let request = step_request();
        let policy = policy(3);

        let (outcome, ()) = tokio::join!(
            gateway.execute_with_abort(&request, &policy, &signal),
            async {
                sleep(Duration::from_millis(10)).await;
                controller.abort();
            }
        );

        assert_eq!(outcome, Err(TransportError::Cancelled));
        assert_eq!(primary.request_count(), 1);
        assert_eq!(
            gateway.attempts().last().map(|a| a.outcome),
            Some(AttemptOutcome::Cancelled)
        );
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn cancellation_during_backoff_stops_retries() {
        let primary = MockTransport::primary();
        primary.push(MockReply::json(503, json!({})));
        let gateway = PersistenceGateway::new(primary.clone());
        let controller = AbortController::new();
        let signal = controller.signal();
        let slow_backoff = RequestPolicy {
            backoff_base_ms: 10_000,
            ..policy(3)
        };

        let request = step_request();

        let (outcome, ()) = tokio::join!(
            gateway.execute_with_abort(&request, &slow_backoff, &signal),
            async {
                sleep(Duration::from_millis(50)).await;
                controller.abort();
            }
        );

        assert_eq!(outcome, Err(TransportError::Cancelled));
        assert_eq!(primary.request_count(), 1);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn undecodable_body_is_a_decode_error_not_a_transport_error() {
        let primary = MockTransport::primary();
        primary.push(MockReply::text(200, "<html>maintenance</html>"));
        let gateway = PersistenceGateway::new(primary);

        let response = gateway
            .execute(&step_request(), &policy(3))
            .await
            .expect("transport success");
        let decoded: Result<serde_json::Value, DecodeError> = response.json();

        assert_eq!(response.status, 200);
        assert!(matches!(decoded, Err(DecodeError { status: 200, .. })));
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn invalid_request_is_not_retried() {
        let primary = MockTransport::primary();
        primary.push(MockReply::invalid_request("bad header"));
        let gateway = PersistenceGateway::new(primary.clone());

        let outcome = gateway.execute(&step_request(), &policy(3)).await;

        assert_eq!(
            outcome,
            Err(TransportError::InvalidRequest("bad header".into()))
        );
        assert_eq!(primary.request_count(), 1);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn attempt_log_is_bounded() {
        let primary = MockTransport::primary();
        let gateway = PersistenceGateway::new(primary.clone());
        for _ in 0..(ATTEMPT_LOG_CAPACITY + 10) {
            primary.push(MockReply::json(200, json!({})));
            gateway
                .execute(&step_request(), &policy(1))
                .await
                .expect("ok");
        }
        assert_eq!(gateway.attempts().len(), ATTEMPT_LOG_CAPACITY);
        gateway.attempt_log().clear();
        assert!(gateway.attempts().is_empty());
    }
}
