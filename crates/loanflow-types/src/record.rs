use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Field name to value map accumulated across steps.
pub type FieldMap = serde_json::Map<String, Value>;

/// 1-based step index.
pub type StepNumber = u32;

/// Who owns an application record.
///
/// Follows [`SessionIdentity::user_id`]: a session becomes `User` once a
/// verified user is bound and never goes back.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OwnerKind {
    #[default]
    Guest,
    User,
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum RecordInvariantError {
    #[error("current step {current} exceeds max step reached {max}")]
    CurrentBeyondMax { current: StepNumber, max: StepNumber },
    #[error("step numbers are 1-based, got {0}")]
    ZeroStep(StepNumber),
}

/// Identity of one in-progress application as seen by the client.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationRecord {
    pub id: String,
    pub session_id: String,
    pub owner_kind: OwnerKind,
    pub current_step: StepNumber,
    pub max_step_reached: StepNumber,
    pub fields: FieldMap,
    pub created_at: u64,
    pub updated_at: u64,
}

impl ApplicationRecord {
    pub fn check_invariants(&self) -> Result<(), RecordInvariantError> {
        if self.current_step == 0 {
            return Err(RecordInvariantError::ZeroStep(self.current_step));
        }
        if self.current_step > self.max_step_reached {
            return Err(RecordInvariantError::CurrentBeyondMax {
                current: self.current_step,
                max: self.max_step_reached,
            });
        }
        Ok(())
    }
}

/// One attempted persistence of one step.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepSubmission {
    pub step_number: StepNumber,
    pub payload: FieldMap,
    pub submitted_at: u64,
    /// Transport attempts consumed by this step so far, across resubmissions.
    pub attempt_count: u32,
}

impl StepSubmission {
    pub fn new(step_number: StepNumber, payload: FieldMap, submitted_at: u64) -> Self {
        Self {
            step_number,
            payload,
            submitted_at,
            attempt_count: 0,
        }
    }

    /// Stable key the remote uses to collapse repeated deliveries of this write.
    pub fn idempotency_key(&self, application_id: &str) -> String {
        format!("{application_id}:{}", self.step_number)
    }
}

/// Client-generated session plus the verified user once bound.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionIdentity {
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

impl SessionIdentity {
    pub fn guest(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            user_id: None,
        }
    }

    pub fn owner_kind(&self) -> OwnerKind {
        if self.user_id.is_some() {
            OwnerKind::User
        } else {
            OwnerKind::Guest
        }
    }
}
