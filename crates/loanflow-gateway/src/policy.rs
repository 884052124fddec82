use std::time::Duration;

use loanflow_types::EnvironmentCapabilities;
use serde::{Deserialize, Serialize};

/// Per-attempt timeout ceiling for embedded and legacy environments.
pub const RESILIENT_TIMEOUT_CAP_MS: u64 = 8_000;
/// Attempt floor for embedded and legacy environments.
pub const RESILIENT_MIN_ATTEMPTS: u32 = 5;

/// Resilience budget for one logical request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestPolicy {
    /// Deadline for each individual attempt.
    pub timeout_ms: u64,
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub allow_fallback_transport: bool,
}

impl Default for RequestPolicy {
    fn default() -> Self {
        Self {
            timeout_ms: 15_000,
            max_attempts: 3,
            backoff_base_ms: 500,
            allow_fallback_transport: false,
        }
    }
}

impl RequestPolicy {
    /// Derive the policy for an environment from configured defaults.
    ///
    /// Embedded and legacy stacks get the fallback transport, a shorter
    /// per-attempt deadline and more attempts.
    pub fn for_environment(
        capabilities: &EnvironmentCapabilities,
        defaults: RequestPolicy,
    ) -> Self {
        if !capabilities.needs_resilient_requests() {
            return defaults;
        }
        Self {
            timeout_ms: defaults.timeout_ms.min(RESILIENT_TIMEOUT_CAP_MS),
            max_attempts: defaults.max_attempts.max(RESILIENT_MIN_ATTEMPTS),
            backoff_base_ms: defaults.backoff_base_ms,
            allow_fallback_transport: true,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Attempts actually made; a zero budget still makes one attempt.
    pub fn attempt_budget(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Wait after the given 1-based failed attempt: `base * 2^(attempt-1)`.
    pub fn backoff_after(&self, failed_attempt: u32) -> Duration {
        let exponent = failed_attempt.saturating_sub(1).min(31);
        let factor = 1u64 << exponent;
        Duration::from_millis(self.backoff_base_ms.saturating_mul(factor))
    }
}
