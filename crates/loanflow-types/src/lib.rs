//! Shared data model and remote wire contract for the loan application flow.

pub mod attempt;
pub mod capabilities;
pub mod record;
pub mod wire;

pub use attempt::{AttemptOutcome, TransportAttempt, TransportStrategy};
pub use capabilities::EnvironmentCapabilities;
pub use record::{
    ApplicationRecord, FieldMap, OwnerKind, RecordInvariantError, SessionIdentity, StepNumber,
    StepSubmission,
};

use std::time::{SystemTime, UNIX_EPOCH};

/// Wallclock milliseconds since the unix epoch (0 if the clock is before it).
pub fn now_wallclock_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
