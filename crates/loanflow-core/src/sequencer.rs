//! Ordered step navigation with gated persistence.
//!
//! The sequencer never advances past a step the service has not confirmed.
//! A step write runs as one shared future: every `request_advance` that
//! arrives while it is pending awaits the same outcome instead of issuing a
//! second write. `teardown` aborts that write and bumps a generation counter;
//! a result carrying an older generation is dropped without touching state.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use loanflow_gateway::{AbortController, AbortSignal, GatewayResponse, TransportError};
use loanflow_types::wire::{ApplicationView, StepUpdate, StepUpdateAck};
use loanflow_types::{StepNumber, StepSubmission, now_wallclock_ms};
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::aggregate::ApplicationAggregate;
use crate::analytics::{AnalyticsSink, FlowEvent, TracingAnalytics, dispatch};
use crate::error::{FlowError, PersistFailure, ValidationError};
use crate::service::ApplicationService;
use crate::session::SessionBinder;
use crate::validate::{AcceptAll, PayloadValidator};
use crate::view::ViewState;

/// What a completed `request_advance` did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AdvanceOutcome {
    /// `step` persisted; the flow now shows `current_step`.
    Advanced {
        step: StepNumber,
        current_step: StepNumber,
    },
    /// The final step persisted.
    Completed { step: StepNumber },
    /// The sequencer was torn down before the write settled.
    Discarded,
}

type PendingAdvance = Shared<BoxFuture<'static, Result<AdvanceOutcome, FlowError>>>;

struct InFlight {
    application_id: String,
    step: StepNumber,
    abort: AbortController,
    outcome: PendingAdvance,
}

struct Ticket {
    generation: u64,
    session_id: String,
    application_id: String,
    submission: StepSubmission,
}

#[derive(Debug)]
struct Progress {
    current_step: StepNumber,
    max_step_reached: StepNumber,
    completed: bool,
    last_error: Option<FlowError>,
    retained: Option<StepSubmission>,
}

struct Inner {
    total_steps: StepNumber,
    binder: Arc<SessionBinder>,
    service: ApplicationService,
    validator: Arc<dyn PayloadValidator>,
    analytics: Arc<dyn AnalyticsSink>,
    aggregate: RwLock<ApplicationAggregate>,
    progress: Mutex<Progress>,
    // Lock order: `flight` before `progress`.
    flight: Mutex<Option<InFlight>>,
    busy: AtomicBool,
    generation: AtomicU64,
    view: watch::Sender<ViewState>,
}

#[derive(Clone)]
pub struct StepSequencer {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for StepSequencer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepSequencer")
            .field("total_steps", &self.inner.total_steps)
            .field("progress", &*self.inner.progress())
            .field("busy", &self.inner.busy.load(Ordering::SeqCst))
            .finish()
    }
}

impl StepSequencer {
    /// Starts at step 1 with an empty aggregate.
    pub fn initialize(
        total_steps: StepNumber,
        binder: Arc<SessionBinder>,
        service: ApplicationService,
    ) -> Result<Self, ValidationError> {
        Self::with_hooks(
            total_steps,
            binder,
            service,
            Arc::new(AcceptAll),
            Arc::new(TracingAnalytics),
        )
    }

    pub fn with_hooks(
        total_steps: StepNumber,
        binder: Arc<SessionBinder>,
        service: ApplicationService,
        validator: Arc<dyn PayloadValidator>,
        analytics: Arc<dyn AnalyticsSink>,
    ) -> Result<Self, ValidationError> {
        if total_steps == 0 {
            return Err(ValidationError::NoSteps);
        }
        let progress = Progress {
            current_step: 1,
            max_step_reached: 1,
            completed: false,
            last_error: None,
            retained: None,
        };
        let (view, _) = watch::channel(view_state(total_steps, &progress, false));
        Ok(Self {
            inner: Arc::new(Inner {
                total_steps,
                binder,
                service,
                validator,
                analytics,
                aggregate: RwLock::new(ApplicationAggregate::new()),
                progress: Mutex::new(progress),
                flight: Mutex::new(None),
                busy: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                view,
            }),
        })
    }

    pub fn total_steps(&self) -> StepNumber {
        self.inner.total_steps
    }

    pub fn current_step(&self) -> StepNumber {
        self.inner.progress().current_step
    }

    pub fn max_step_reached(&self) -> StepNumber {
        self.inner.progress().max_step_reached
    }

    pub fn is_completed(&self) -> bool {
        self.inner.progress().completed
    }

    pub fn is_in_flight(&self) -> bool {
        self.inner.busy.load(Ordering::SeqCst)
    }

    /// True when no write is pending and the flow is not finished.
    pub fn can_advance(&self) -> bool {
        !self.is_in_flight() && !self.is_completed()
    }

    pub fn last_error(&self) -> Option<FlowError> {
        self.inner.progress().last_error.clone()
    }

    /// The submission kept after a failed write, for resubmission.
    pub fn retained_submission(&self) -> Option<StepSubmission> {
        self.inner.progress().retained.clone()
    }

    /// Committed fields. Tentative merges of a pending write are not visible.
    pub fn aggregate(&self) -> ApplicationAggregate {
        self.inner.aggregate()
    }

    pub fn view_state(&self) -> ViewState {
        self.inner.view.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ViewState> {
        self.inner.view.subscribe()
    }

    /// Persists `payload` as the current step and advances on success.
    ///
    /// While a write is pending, further calls await that same write and
    /// return its outcome; their own payloads are ignored. The write only
    /// progresses while some caller awaits it; use [`teardown`](Self::teardown)
    /// to abandon it.
    pub async fn request_advance(&self, payload: Value) -> Result<AdvanceOutcome, FlowError> {
        let pending = {
            let mut slot = self.inner.flight();
            match slot.as_ref() {
                Some(flight) => {
                    debug!(
                        application_id = %flight.application_id,
                        step = flight.step,
                        "joining in-flight step write"
                    );
                    flight.outcome.clone()
                }
                None => {
                    let ticket = self.inner.prepare(payload)?;
                    let abort = AbortController::new();
                    let application_id = ticket.application_id.clone();
                    let step = ticket.submission.step_number;
                    let outcome = Inner::persist(Arc::clone(&self.inner), ticket, abort.signal())
                        .boxed()
                        .shared();
                    *slot = Some(InFlight {
                        application_id,
                        step,
                        abort,
                        outcome: outcome.clone(),
                    });
                    self.inner.busy.store(true, Ordering::SeqCst);
                    outcome
                }
            }
        };
        self.inner.publish();
        pending.await
    }

    /// Resubmits the payload retained from the last failed write.
    pub async fn retry_last(&self) -> Result<AdvanceOutcome, FlowError> {
        let retained = self
            .retained_submission()
            .ok_or(ValidationError::NothingToRetry)?;
        self.request_advance(Value::Object(retained.payload)).await
    }

    /// Moves one step back. Never changes `max_step_reached`.
    pub fn request_back(&self) -> Result<StepNumber, ValidationError> {
        let step = {
            let slot = self.inner.flight();
            if slot.is_some() {
                return Err(ValidationError::InFlight);
            }
            let mut progress = self.inner.progress();
            if progress.completed {
                return Err(ValidationError::AlreadyCompleted);
            }
            if progress.current_step <= 1 {
                return Err(ValidationError::AtFirstStep);
            }
            progress.current_step -= 1;
            progress.current_step
        };
        self.inner.publish();
        Ok(step)
    }

    /// Adopts the service's view of the application, clamped to this flow.
    pub fn resume(&self, view: &ApplicationView) -> Result<(), ValidationError> {
        {
            let slot = self.inner.flight();
            if slot.is_some() {
                return Err(ValidationError::InFlight);
            }
            let total = self.inner.total_steps;
            let mut progress = self.inner.progress();
            let max = view
                .max_step_reached
                .clamp(1, total)
                .max(progress.max_step_reached);
            progress.max_step_reached = max;
            progress.current_step = view.current_step.clamp(1, max);
            progress.completed |= view.completed;
            if progress.completed {
                progress.current_step = total;
                progress.max_step_reached = total;
            }
            progress.last_error = None;
            progress.retained = None;
            *self.inner.aggregate_mut() = ApplicationAggregate::from_fields(view.data.clone());
            debug!(
                application_id = %view.application_id,
                current_step = progress.current_step,
                max_step_reached = progress.max_step_reached,
                "resumed from service view"
            );
        }
        self.inner.publish();
        Ok(())
    }

    /// Aborts any pending write; its eventual result is discarded.
    pub fn teardown(&self) {
        let flight = {
            let mut slot = self.inner.flight();
            self.inner.generation.fetch_add(1, Ordering::SeqCst);
            self.inner.busy.store(false, Ordering::SeqCst);
            slot.take()
        };
        if let Some(flight) = flight {
            flight.abort.abort();
            info!(
                application_id = %flight.application_id,
                step = flight.step,
                "tore down in-flight step write"
            );
        }
        self.inner.publish();
    }
}

impl Inner {
    fn flight(&self) -> MutexGuard<'_, Option<InFlight>> {
        self.flight.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn progress(&self) -> MutexGuard<'_, Progress> {
        self.progress
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn aggregate(&self) -> ApplicationAggregate {
        self.aggregate
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn aggregate_mut(&self) -> std::sync::RwLockWriteGuard<'_, ApplicationAggregate> {
        self.aggregate
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn publish(&self) {
        let busy = self.busy.load(Ordering::SeqCst);
        let state = view_state(self.total_steps, &self.progress(), busy);
        self.view.send_replace(state);
    }

    /// Local checks; nothing here touches the network.
    fn prepare(&self, payload: Value) -> Result<Ticket, FlowError> {
        let progress = self.progress();
        if progress.completed {
            return Err(ValidationError::AlreadyCompleted.into());
        }
        let Value::Object(fields) = payload else {
            return Err(ValidationError::NotAnObject.into());
        };
        let step = progress.current_step;
        self.validator.validate(step, &fields)?;

        let application_id = self
            .binder
            .application_id()
            .ok_or(ValidationError::NoApplication)?;
        let session_id = self.binder.ensure_session().session_id;
        let mut submission = StepSubmission::new(step, fields, now_wallclock_ms());
        if let Some(previous) = progress.retained.as_ref().filter(|r| r.step_number == step) {
            submission.attempt_count = previous.attempt_count;
        }
        Ok(Ticket {
            generation: self.generation.load(Ordering::SeqCst),
            session_id,
            application_id,
            submission,
        })
    }

    async fn persist(
        self: Arc<Self>,
        ticket: Ticket,
        abort: AbortSignal,
    ) -> Result<AdvanceOutcome, FlowError> {
        let Ticket {
            generation,
            session_id,
            application_id,
            mut submission,
        } = ticket;
        let step = submission.step_number;
        let tentative = self.aggregate().merge(&submission.payload);
        let update = StepUpdate {
            step,
            data: submission.payload.clone(),
            phone: self.binder.phone(),
        };
        debug!(%application_id, step, "writing step");

        // An identity bind may remap the id while this write is backing off.
        let target = Mutex::new(application_id.clone());
        let resolve = || {
            let id = self
                .binder
                .application_id()
                .unwrap_or_else(|| application_id.clone());
            *target.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = id.clone();
            id
        };
        let execution = self
            .service
            .put_step(&session_id, resolve, &submission, &update, &abort)
            .await;
        let application_id = target
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let used = u32::try_from(execution.attempts.len()).unwrap_or(u32::MAX);
        submission.attempt_count = submission.attempt_count.saturating_add(used);
        let result = classify(step, execution.outcome);

        let outcome = {
            let mut slot = self.flight();
            if self.generation.load(Ordering::SeqCst) != generation {
                debug!(%application_id, step, "discarding step result after teardown");
                return Ok(AdvanceOutcome::Discarded);
            }
            let outcome = match result {
                Ok(()) => Ok(self.commit(step, tentative)),
                Err(err) => {
                    warn!(
                        %application_id,
                        step,
                        attempts = submission.attempt_count,
                        error = %err,
                        "step write failed; staying on step"
                    );
                    let mut progress = self.progress();
                    progress.last_error = Some(err.clone());
                    progress.retained = Some(submission);
                    Err(err)
                }
            };
            *slot = None;
            self.busy.store(false, Ordering::SeqCst);
            outcome
        };
        self.publish();

        if let Ok(done) = &outcome {
            self.binder.touch();
            dispatch(
                self.analytics.as_ref(),
                FlowEvent::StepCompleted {
                    application_id: application_id.clone(),
                    step,
                },
            );
            if matches!(done, AdvanceOutcome::Completed { .. }) {
                dispatch(
                    self.analytics.as_ref(),
                    FlowEvent::ApplicationCompleted { application_id },
                );
            }
        }
        outcome
    }

    fn commit(&self, step: StepNumber, tentative: ApplicationAggregate) -> AdvanceOutcome {
        *self.aggregate_mut() = tentative;
        let mut progress = self.progress();
        progress.last_error = None;
        progress.retained = None;
        if step >= self.total_steps {
            progress.completed = true;
            progress.current_step = self.total_steps;
            progress.max_step_reached = self.total_steps;
            info!(step, "application completed");
            AdvanceOutcome::Completed { step }
        } else {
            progress.current_step = step + 1;
            progress.max_step_reached = progress.max_step_reached.max(step + 1);
            info!(step, current_step = progress.current_step, "step persisted");
            AdvanceOutcome::Advanced {
                step,
                current_step: progress.current_step,
            }
        }
    }
}

fn classify(
    step: StepNumber,
    outcome: Result<GatewayResponse, TransportError>,
) -> Result<(), FlowError> {
    let persist_failed = |cause: PersistFailure| FlowError::StepPersistFailed { step, cause };
    match outcome {
        Ok(response) => match response.json::<StepUpdateAck>() {
            Ok(ack) if ack.ok => Ok(()),
            Ok(_) => Err(persist_failed(PersistFailure::Rejected)),
            Err(err) => Err(persist_failed(PersistFailure::Decode(err))),
        },
        Err(TransportError::HttpStatus(409)) => Err(FlowError::MergeConflict { step }),
        Err(err) => Err(persist_failed(PersistFailure::Transport(err))),
    }
}

fn view_state(total_steps: StepNumber, progress: &Progress, busy: bool) -> ViewState {
    ViewState {
        current_step: progress.current_step,
        max_step_reached: progress.max_step_reached,
        total_steps,
        can_advance: !busy && !progress.completed,
        completed: progress.completed,
        last_error: progress.last_error.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use loanflow_gateway::mock::{MockReply, MockTransport};
    use loanflow_gateway::{GatewayRequest, PersistenceGateway, RequestPolicy};
    use loanflow_store::MemStore;
    use loanflow_types::FieldMap;
    use serde_json::json;

    use crate::analytics::ChannelAnalytics;

    struct Fixture {
        sequencer: StepSequencer,
        transport: Arc<MockTransport>,
    }

    fn policy(max_attempts: u32) -> RequestPolicy {
        RequestPolicy {
            timeout_ms: 1_000,
            max_attempts,
            backoff_base_ms: 10,
            allow_fallback_transport: false,
        }
    }

    async fn fixture_with(
        total: StepNumber,
        max_attempts: u32,
        validator: Arc<dyn PayloadValidator>,
        analytics: Arc<dyn AnalyticsSink>,
    ) -> Fixture {
        let transport = MockTransport::primary();
        let service = ApplicationService::new(
            PersistenceGateway::new(transport.clone()),
            policy(max_attempts),
        );
        let binder = Arc::new(SessionBinder::new(
            Arc::new(MemStore::new()),
            service.clone(),
        ));
        transport.push(MockReply::json(
            200,
            json!({ "applicationId": "app-1", "sessionId": "s-1" }),
        ));
        binder.ensure_application().await.unwrap();
        let sequencer =
            StepSequencer::with_hooks(total, binder, service, validator, analytics).unwrap();
        Fixture {
            sequencer,
            transport,
        }
    }

    async fn fixture(total: StepNumber, max_attempts: u32) -> Fixture {
        fixture_with(
            total,
            max_attempts,
            Arc::new(AcceptAll),
            Arc::new(TracingAnalytics),
        )
        .await
    }

    fn ok() -> MockReply {
        MockReply::json(200, json!({ "ok": true }))
    }

    fn step_writes(transport: &MockTransport) -> Vec<GatewayRequest> {
        transport
            .requests()
            .into_iter()
            .filter(|r| r.path.ends_with("/step"))
            .collect()
    }

    #[test]
    fn zero_steps_is_rejected() {
        let transport = MockTransport::primary();
        let service = ApplicationService::new(PersistenceGateway::new(transport), policy(1));
        let binder = Arc::new(SessionBinder::new(
            Arc::new(MemStore::new()),
            service.clone(),
        ));
        assert_eq!(
            StepSequencer::initialize(0, binder, service).unwrap_err(),
            ValidationError::NoSteps
        );
    }

    #[tokio::test(flavor = "current_thread")]
    async fn advance_commits_merge_and_moves_forward() {
        let f = fixture(3, 1).await;
        f.transport.push(ok());

        let outcome = f
            .sequencer
            .request_advance(json!({ "name": "Ada" }))
            .await
            .unwrap();

        assert_eq!(
            outcome,
            AdvanceOutcome::Advanced {
                step: 1,
                current_step: 2
            }
        );
        assert_eq!(f.sequencer.max_step_reached(), 2);
        assert_eq!(f.sequencer.aggregate().get("name"), Some(&json!("Ada")));
        let writes = step_writes(&f.transport);
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].path, "/applications/app-1/step");
        assert_eq!(writes[0].header("idempotency-key"), Some("app-1:1"));
        assert_eq!(writes[0].header("x-session-id"), Some("s-1"));
        assert_eq!(
            writes[0].body,
            Some(json!({ "step": 1, "data": { "name": "Ada" } }))
        );
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn failed_write_keeps_step_and_retains_payload() {
        let f = fixture(3, 2).await;
        f.transport.push(MockReply::json(503, json!({})));
        f.transport.push(MockReply::json(503, json!({})));

        let err = f
            .sequencer
            .request_advance(json!({ "income": 4200 }))
            .await
            .unwrap_err();

        assert_eq!(
            err,
            FlowError::StepPersistFailed {
                step: 1,
                cause: PersistFailure::Transport(TransportError::HttpStatus(503)),
            }
        );
        assert_eq!(f.sequencer.current_step(), 1);
        assert_eq!(f.sequencer.max_step_reached(), 1);
        assert!(f.sequencer.aggregate().is_empty());
        assert_eq!(f.sequencer.last_error(), Some(err.clone()));
        assert_eq!(f.sequencer.view_state().last_error, Some(err));
        let retained = f.sequencer.retained_submission().unwrap();
        assert_eq!(retained.step_number, 1);
        assert_eq!(retained.payload["income"], json!(4200));
        assert_eq!(retained.attempt_count, 2);

        f.transport.push(ok());
        assert_eq!(
            f.sequencer.retry_last().await.unwrap(),
            AdvanceOutcome::Advanced {
                step: 1,
                current_step: 2
            }
        );
        assert!(f.sequencer.retained_submission().is_none());
        assert!(f.sequencer.last_error().is_none());
        assert_eq!(f.sequencer.aggregate().get("income"), Some(&json!(4200)));
        let writes = step_writes(&f.transport);
        assert_eq!(writes.len(), 3);
        assert!(
            writes
                .iter()
                .all(|w| w.header("idempotency-key") == Some("app-1:1"))
        );
    }

    #[tokio::test(flavor = "current_thread")]
    async fn retry_without_failure_is_refused() {
        let f = fixture(3, 1).await;
        assert_eq!(
            f.sequencer.retry_last().await.unwrap_err(),
            FlowError::Validation(ValidationError::NothingToRetry)
        );
    }

    #[tokio::test(flavor = "current_thread")]
    async fn unacknowledged_writes_do_not_advance() {
        let f = fixture(3, 1).await;
        f.transport
            .push(MockReply::json(200, json!({ "ok": false })));
        let err = f
            .sequencer
            .request_advance(json!({ "a": 1 }))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            FlowError::StepPersistFailed {
                step: 1,
                cause: PersistFailure::Rejected
            }
        );

        f.transport.push(MockReply::text(200, "<html>maintenance</html>"));
        let err = f
            .sequencer
            .request_advance(json!({ "a": 1 }))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            FlowError::StepPersistFailed {
                step: 1,
                cause: PersistFailure::Decode(_)
            }
        ));
        assert_eq!(f.sequencer.current_step(), 1);
        assert!(f.sequencer.aggregate().is_empty());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn conflict_is_reported_as_merge_conflict() {
        let f = fixture(3, 3).await;
        f.transport.push(MockReply::json(409, json!({})));
        let err = f
            .sequencer
            .request_advance(json!({ "a": 1 }))
            .await
            .unwrap_err();
        assert_eq!(err, FlowError::MergeConflict { step: 1 });
        assert_eq!(step_writes(&f.transport).len(), 1);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn concurrent_advances_share_one_write() {
        let f = fixture(3, 1).await;
        f.transport
            .push(MockReply::delayed(Duration::from_millis(50), ok()));

        let first = f.sequencer.request_advance(json!({ "name": "Ada" }));
        tokio::pin!(first);
        assert!(futures::poll!(&mut first).is_pending());
        assert!(f.sequencer.is_in_flight());
        assert!(!f.sequencer.can_advance());
        let second = f.sequencer.request_advance(json!({ "name": "Grace" }));

        let (first, second) = tokio::join!(first, second);

        assert_eq!(first, second);
        assert_eq!(
            first.unwrap(),
            AdvanceOutcome::Advanced {
                step: 1,
                current_step: 2
            }
        );
        assert_eq!(step_writes(&f.transport).len(), 1);
        assert_eq!(f.sequencer.aggregate().get("name"), Some(&json!("Ada")));
        assert!(f.sequencer.can_advance());
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn teardown_discards_pending_write() {
        let f = fixture(3, 1).await;
        f.transport.push(MockReply::hang());

        let pending = f.sequencer.request_advance(json!({ "a": 1 }));
        tokio::pin!(pending);
        assert!(futures::poll!(&mut pending).is_pending());
        assert_eq!(f.sequencer.request_back(), Err(ValidationError::InFlight));

        f.sequencer.teardown();

        assert_eq!(pending.await.unwrap(), AdvanceOutcome::Discarded);
        assert_eq!(f.sequencer.current_step(), 1);
        assert!(f.sequencer.aggregate().is_empty());
        assert!(f.sequencer.last_error().is_none());
        assert!(f.sequencer.can_advance());

        f.transport.push(ok());
        assert_eq!(
            f.sequencer.request_advance(json!({ "a": 2 })).await.unwrap(),
            AdvanceOutcome::Advanced {
                step: 1,
                current_step: 2
            }
        );
        assert_eq!(f.sequencer.aggregate().get("a"), Some(&json!(2)));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn invalid_payloads_never_reach_the_network() {
        let validator = |step: StepNumber, payload: &FieldMap| {
            if step == 1 && !payload.contains_key("consent") {
                Err(ValidationError::Field {
                    field: "consent".into(),
                    reason: "required".into(),
                })
            } else {
                Ok(())
            }
        };
        let f = fixture_with(3, 1, Arc::new(validator), Arc::new(TracingAnalytics)).await;

        assert_eq!(
            f.sequencer.request_advance(json!([1, 2])).await.unwrap_err(),
            FlowError::Validation(ValidationError::NotAnObject)
        );
        assert!(matches!(
            f.sequencer.request_advance(json!({ "a": 1 })).await,
            Err(FlowError::Validation(ValidationError::Field { .. }))
        ));
        assert!(step_writes(&f.transport).is_empty());
        assert!(f.sequencer.last_error().is_none());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn last_step_completes_and_notifies() {
        let (sink, mut events) = ChannelAnalytics::new();
        let f = fixture_with(2, 1, Arc::new(AcceptAll), Arc::new(sink)).await;
        f.transport.push(ok());
        f.transport.push(ok());

        f.sequencer.request_advance(json!({ "a": 1 })).await.unwrap();
        let outcome = f.sequencer.request_advance(json!({ "b": 2 })).await.unwrap();

        assert_eq!(outcome, AdvanceOutcome::Completed { step: 2 });
        assert!(f.sequencer.is_completed());
        assert!(!f.sequencer.can_advance());
        assert_eq!(f.sequencer.current_step(), 2);
        assert_eq!(f.sequencer.max_step_reached(), 2);
        assert_eq!(
            f.sequencer.request_advance(json!({})).await.unwrap_err(),
            FlowError::Validation(ValidationError::AlreadyCompleted)
        );
        assert_eq!(
            f.sequencer.request_back(),
            Err(ValidationError::AlreadyCompleted)
        );

        let app = || "app-1".to_string();
        assert_eq!(
            events.try_recv().unwrap(),
            FlowEvent::StepCompleted {
                application_id: app(),
                step: 1
            }
        );
        assert_eq!(
            events.try_recv().unwrap(),
            FlowEvent::StepCompleted {
                application_id: app(),
                step: 2
            }
        );
        assert_eq!(
            events.try_recv().unwrap(),
            FlowEvent::ApplicationCompleted {
                application_id: app()
            }
        );
        assert!(events.try_recv().is_err());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn back_navigation_keeps_max_step() {
        let f = fixture(4, 1).await;
        f.transport.push(ok());
        f.transport.push(ok());
        f.sequencer.request_advance(json!({ "a": 1 })).await.unwrap();
        f.sequencer.request_advance(json!({ "b": 2 })).await.unwrap();
        assert_eq!(f.sequencer.current_step(), 3);

        assert_eq!(f.sequencer.request_back(), Ok(2));
        assert_eq!(f.sequencer.request_back(), Ok(1));
        assert_eq!(f.sequencer.request_back(), Err(ValidationError::AtFirstStep));
        assert_eq!(f.sequencer.max_step_reached(), 3);

        f.transport.push(ok());
        assert_eq!(
            f.sequencer.request_advance(json!({ "a": 5 })).await.unwrap(),
            AdvanceOutcome::Advanced {
                step: 1,
                current_step: 2
            }
        );
        assert_eq!(f.sequencer.max_step_reached(), 3);
        let writes = step_writes(&f.transport);
        assert_eq!(writes.last().unwrap().header("idempotency-key"), Some("app-1:1"));
        assert_eq!(f.sequencer.aggregate().get("b"), Some(&json!(2)));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn resume_clamps_to_flow_bounds() {
        let f = fixture(5, 1).await;
        let mut data = FieldMap::new();
        data.insert("a".into(), json!(1));
        f.sequencer
            .resume(&ApplicationView {
                application_id: "app-1".into(),
                current_step: 9,
                max_step_reached: 20,
                completed: false,
                data,
            })
            .unwrap();
        assert_eq!(f.sequencer.current_step(), 5);
        assert_eq!(f.sequencer.max_step_reached(), 5);
        assert_eq!(f.sequencer.aggregate().get("a"), Some(&json!(1)));

        let fresh = fixture(5, 1).await;
        fresh
            .sequencer
            .resume(&ApplicationView {
                application_id: "app-1".into(),
                current_step: 0,
                max_step_reached: 0,
                completed: false,
                data: FieldMap::new(),
            })
            .unwrap();
        assert_eq!(fresh.sequencer.current_step(), 1);
        assert_eq!(fresh.sequencer.max_step_reached(), 1);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn view_subscribers_see_commits() {
        let f = fixture(3, 1).await;
        let mut states = f.sequencer.subscribe();
        assert_eq!(states.borrow_and_update().current_step, 1);
        f.transport.push(ok());

        f.sequencer.request_advance(json!({ "a": 1 })).await.unwrap();

        assert!(states.has_changed().unwrap());
        assert_eq!(
            *states.borrow_and_update(),
            ViewState {
                current_step: 2,
                max_step_reached: 2,
                total_steps: 3,
                can_advance: true,
                completed: false,
                last_error: None,
            }
        );
    }
}
