//! Flow events for external analytics.
//!
//! Sinks are notified synchronously after state has been committed. A sink
//! that panics is logged and otherwise ignored; it never affects the flow.

use std::panic::{AssertUnwindSafe, catch_unwind};

use loanflow_types::StepNumber;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{info, warn};

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum FlowEvent {
    StepCompleted {
        application_id: String,
        step: StepNumber,
    },
    ApplicationCompleted {
        application_id: String,
    },
    IdentityBound {
        application_id: String,
        user_id: String,
    },
}

pub trait AnalyticsSink: Send + Sync {
    fn notify(&self, event: &FlowEvent);
}

/// Emits every event as a structured `info` log line.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingAnalytics;

impl AnalyticsSink for TracingAnalytics {
    fn notify(&self, event: &FlowEvent) {
        match event {
            FlowEvent::StepCompleted {
                application_id,
                step,
            } => info!(%application_id, step, "analytics: step completed"),
            FlowEvent::ApplicationCompleted { application_id } => {
                info!(%application_id, "analytics: application completed")
            }
            FlowEvent::IdentityBound {
                application_id,
                user_id,
            } => info!(%application_id, %user_id, "analytics: identity bound"),
        }
    }
}

/// Forwards events into an unbounded channel. A closed receiver drops events.
#[derive(Clone, Debug)]
pub struct ChannelAnalytics {
    tx: mpsc::UnboundedSender<FlowEvent>,
}

impl ChannelAnalytics {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<FlowEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl AnalyticsSink for ChannelAnalytics {
    fn notify(&self, event: &FlowEvent) {
        let _ = self.tx.send(event.clone());
    }
}

pub(crate) fn dispatch(sink: &dyn AnalyticsSink, event: FlowEvent) {
    if catch_unwind(AssertUnwindSafe(|| sink.notify(&event))).is_err() {
        warn!(?event, "analytics sink panicked; event dropped");
    }
}
