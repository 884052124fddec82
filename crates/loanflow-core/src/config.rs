use std::path::PathBuf;
use std::str::FromStr;

use loanflow_gateway::RequestPolicy;
use loanflow_types::{EnvironmentCapabilities, StepNumber};
use thiserror::Error;

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8080";
pub const DEFAULT_TOTAL_STEPS: StepNumber = 12;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var}={value:?}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct FlowConfig {
    /// Application service root, e.g. `https://api.example.com/v1`.
    pub base_url: String,
    pub total_steps: StepNumber,
    /// Baseline request policy before environment adjustments.
    pub policy: RequestPolicy,
    /// Directory for the durable session store; None keeps state in memory.
    pub store_dir: Option<PathBuf>,
    pub capabilities: EnvironmentCapabilities,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.into(),
            total_steps: DEFAULT_TOTAL_STEPS,
            policy: RequestPolicy::default(),
            store_dir: None,
            capabilities: EnvironmentCapabilities::default(),
        }
    }
}

impl FlowConfig {
    /// Build from `LOANFLOW_*` environment variables over the defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(url) = lookup("LOANFLOW_BASE_URL") {
            config.base_url = url;
        }
        if let Some(steps) = parse_var::<StepNumber>(&lookup, "LOANFLOW_TOTAL_STEPS")? {
            if steps == 0 {
                return Err(ConfigError::Invalid {
                    var: "LOANFLOW_TOTAL_STEPS",
                    value: steps.to_string(),
                    reason: "must be at least 1".into(),
                });
            }
            config.total_steps = steps;
        }
        if let Some(ms) = parse_var(&lookup, "LOANFLOW_TIMEOUT_MS")? {
            config.policy.timeout_ms = ms;
        }
        if let Some(n) = parse_var(&lookup, "LOANFLOW_MAX_ATTEMPTS")? {
            config.policy.max_attempts = n;
        }
        if let Some(ms) = parse_var(&lookup, "LOANFLOW_BACKOFF_BASE_MS")? {
            config.policy.backoff_base_ms = ms;
        }
        if let Some(dir) = lookup("LOANFLOW_STORE_DIR") {
            config.store_dir = Some(PathBuf::from(dir));
        }
        if let Some(embedded) = parse_flag(&lookup, "LOANFLOW_EMBEDDED")? {
            config.capabilities.is_embedded_browser_environment = embedded;
        }
        if let Some(legacy) = parse_flag(&lookup, "LOANFLOW_LEGACY_HTTP")? {
            config.capabilities.has_modern_request_api = !legacy;
        }
        if let Some(off) = parse_flag(&lookup, "LOANFLOW_NO_PERSISTENT_STORAGE")? {
            config.capabilities.has_persistent_storage = !off;
        }
        Ok(config)
    }

    /// Policy actually applied to requests in this environment.
    pub fn effective_policy(&self) -> RequestPolicy {
        RequestPolicy::for_environment(&self.capabilities, self.policy)
    }
}

fn parse_var<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let Some(raw) = lookup(var) else {
        return Ok(None);
    };
    raw.trim()
        .parse()
        .map(Some)
        .map_err(|err: T::Err| ConfigError::Invalid {
            var,
            value: raw.clone(),
            reason: err.to_string(),
        })
}

fn parse_flag(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<bool>, ConfigError> {
    let Some(raw) = lookup(var) else {
        return Ok(None);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(Some(true)),
        "0" | "false" | "no" | "off" | "" => Ok(Some(false)),
        _ => Err(ConfigError::Invalid {
            var,
            value: raw,
            reason: "expected a boolean".into(),
        }),
    }
}
