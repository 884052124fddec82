use serde::{Deserialize, Serialize};

/// Which request mechanism executed an attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportStrategy {
    Primary,
    Fallback,
}

impl TransportStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            TransportStrategy::Primary => "primary",
            TransportStrategy::Fallback => "fallback",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "code", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    HttpError(u16),
    NetworkError,
    Timeout,
    Cancelled,
}

/// One execution try inside the persistence gateway.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportAttempt {
    pub endpoint: String,
    pub method: String,
    /// Milliseconds since the logical request began.
    pub started_at_ms: u64,
    pub duration_ms: u64,
    /// Backoff waited immediately before this attempt.
    pub backoff_ms: u64,
    pub outcome: AttemptOutcome,
    pub strategy: TransportStrategy,
}
