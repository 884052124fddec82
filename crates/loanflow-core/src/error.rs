//! Flow error taxonomy.
//!
//! Everything here is `Clone` because a single in-flight step persistence
//! hands the same outcome to every caller waiting on it.

use loanflow_gateway::{DecodeError, TransportError};
use loanflow_types::StepNumber;
use thiserror::Error;

/// Local, pre-network rejection. Never reaches the gateway, never retried.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("step payload must be a JSON object")]
    NotAnObject,
    #[error("application already completed")]
    AlreadyCompleted,
    #[error("a step persistence call is in flight")]
    InFlight,
    #[error("already at the first step")]
    AtFirstStep,
    #[error("a flow needs at least one step")]
    NoSteps,
    #[error("no application exists for this session yet")]
    NoApplication,
    #[error("no failed step to resubmit")]
    NothingToRetry,
    #[error("field '{field}': {reason}")]
    Field { field: String, reason: String },
}

/// Why a step write did not durably persist.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum PersistFailure {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("service answered ok=false")]
    Rejected,
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

/// Identity verification or merge failed; the session stays a guest.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum IdentityBindError {
    #[error("identity verification request failed: {0}")]
    Transport(#[from] TransportError),
    #[error("identity verification was rejected")]
    Rejected,
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("no application exists to bind")]
    NoApplication,
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum FlowError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("step {step} was not persisted: {cause}")]
    StepPersistFailed { step: StepNumber, cause: PersistFailure },
    #[error("step {step} conflicts with the service's view of the application")]
    MergeConflict { step: StepNumber },
    #[error(transparent)]
    IdentityBind(#[from] IdentityBindError),
    #[error("request to {path} failed: {source}")]
    Request {
        path: String,
        #[source]
        source: TransportError,
    },
    #[error("unusable response from {path}: {source}")]
    Decode {
        path: String,
        #[source]
        source: DecodeError,
    },
    #[error("configuration: {0}")]
    Configuration(String),
}

impl FlowError {
    /// Whether resubmitting the same payload later may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            FlowError::StepPersistFailed { cause, .. } => !matches!(
                cause,
                PersistFailure::Transport(TransportError::InvalidRequest(_))
            ),
            FlowError::Request { source, .. } => {
                !matches!(source, TransportError::InvalidRequest(_))
            }
            FlowError::IdentityBind(_) => true,
            _ => false,
        }
    }
}
