//! Transport error taxonomy and status classification.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Terminal outcome of a logical request that did not produce a usable status.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,
    #[error("request cancelled")]
    Cancelled,
    #[error("network unreachable")]
    NetworkUnreachable,
    #[error("http status {0}")]
    HttpStatus(u16),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

/// Why a single transport call failed before yielding a response.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureKind {
    /// Connection refused, reset, DNS failure and similar environment faults.
    Network,
    /// The transport's own deadline fired.
    Timeout,
    /// The request could not be constructed.
    InvalidRequest,
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("{kind:?}: {message}")]
pub struct TransportFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl TransportFailure {
    pub fn network(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Network,
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Timeout,
            message: message.into(),
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::InvalidRequest,
            message: message.into(),
        }
    }
}

/// The service answered, but the body was not the expected shape.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("could not decode {status} response: {message}")]
pub struct DecodeError {
    pub status: u16,
    pub message: String,
}

/// Whether a non-success status is worth another attempt.
///
/// 408, 429 and every 5xx are retried; all other statuses are final.
pub fn is_retryable_status(status: u16) -> bool {
    matches!(status, 408 | 429 | 500..=599)
}

pub fn is_success_status(status: u16) -> bool {
    (200..300).contains(&status)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_statuses_match_policy() {
        for status in [408, 429, 500, 502, 503, 504, 599] {
            assert!(is_retryable_status(status), "{status} should retry");
        }
        for status in [400, 401, 403, 404, 409, 422, 499, 301] {
            assert!(!is_retryable_status(status), "{status} should not retry");
        }
    }

    #[test]
    fn only_2xx_is_success() {
        assert!(is_success_status(200));
        assert!(is_success_status(204));
        assert!(!is_success_status(304));
        assert!(!is_success_status(199));
    }
}
