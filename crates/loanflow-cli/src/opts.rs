//! Global CLI options and flow configuration.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use loanflow_core::FlowConfig;

/// Global options for all commands.
///
/// Every option falls back to its `LOANFLOW_*` environment variable, which
/// may also be set in a `.env` file in the working directory.
#[derive(Args, Debug, Clone, Default)]
pub struct FlowOpts {
    /// Application service base URL (env: LOANFLOW_BASE_URL)
    #[arg(long, global = true)]
    pub base_url: Option<String>,

    /// Directory for durable session state (env: LOANFLOW_STORE_DIR)
    #[arg(long, global = true)]
    pub store_dir: Option<PathBuf>,

    /// Per-attempt timeout in milliseconds (env: LOANFLOW_TIMEOUT_MS)
    #[arg(long, global = true)]
    pub timeout_ms: Option<u64>,

    /// Attempts per request, including the first (env: LOANFLOW_MAX_ATTEMPTS)
    #[arg(long, global = true)]
    pub max_attempts: Option<u32>,

    /// Base backoff between attempts in milliseconds (env: LOANFLOW_BACKOFF_BASE_MS)
    #[arg(long, global = true)]
    pub backoff_base_ms: Option<u64>,

    /// Number of steps in the flow (env: LOANFLOW_TOTAL_STEPS)
    #[arg(long, global = true)]
    pub total_steps: Option<u32>,

    /// Treat the environment as an embedded browser (env: LOANFLOW_EMBEDDED)
    #[arg(long, global = true)]
    pub embedded: bool,

    /// Treat the request API as legacy (env: LOANFLOW_LEGACY_HTTP)
    #[arg(long, global = true)]
    pub legacy_http: bool,

    /// Keep session state in memory only (env: LOANFLOW_NO_PERSISTENT_STORAGE)
    #[arg(long, global = true)]
    pub no_persistent_storage: bool,

    /// JSON output envelope
    #[arg(long, global = true)]
    pub json: bool,

    /// Pretty-print JSON output (implies --json)
    #[arg(long, global = true)]
    pub pretty: bool,

    /// Suppress notices
    #[arg(long, global = true)]
    pub quiet: bool,
}

impl FlowOpts {
    /// Environment configuration with command-line overrides applied.
    pub fn config(&self) -> Result<FlowConfig> {
        let mut config = FlowConfig::from_env().context("read LOANFLOW_* environment")?;
        self.apply(&mut config)?;
        Ok(config)
    }

    fn apply(&self, config: &mut FlowConfig) -> Result<()> {
        if let Some(url) = &self.base_url {
            config.base_url = url.clone();
        }
        if let Some(dir) = &self.store_dir {
            config.store_dir = Some(dir.clone());
        }
        if let Some(ms) = self.timeout_ms {
            config.policy.timeout_ms = ms;
        }
        if let Some(n) = self.max_attempts {
            config.policy.max_attempts = n;
        }
        if let Some(ms) = self.backoff_base_ms {
            config.policy.backoff_base_ms = ms;
        }
        if let Some(steps) = self.total_steps {
            anyhow::ensure!(steps > 0, "--total-steps must be at least 1");
            config.total_steps = steps;
        }
        if self.embedded {
            config.capabilities.is_embedded_browser_environment = true;
        }
        if self.legacy_http {
            config.capabilities.has_modern_request_api = false;
        }
        if self.no_persistent_storage {
            config.capabilities.has_persistent_storage = false;
        }
        if config.store_dir.is_none() && config.capabilities.has_persistent_storage {
            config.store_dir = Some(PathBuf::from("."));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_config() {
        let opts = FlowOpts {
            base_url: Some("https://api.example.com".into()),
            max_attempts: Some(7),
            embedded: true,
            no_persistent_storage: true,
            ..FlowOpts::default()
        };
        let mut config = FlowConfig::default();
        opts.apply(&mut config).unwrap();
        assert_eq!(config.base_url, "https://api.example.com");
        assert_eq!(config.policy.max_attempts, 7);
        assert!(config.capabilities.is_embedded_browser_environment);
        assert!(!config.capabilities.has_persistent_storage);
        assert_eq!(config.store_dir, None);
    }

    #[test]
    fn durable_store_defaults_to_working_directory() {
        let mut config = FlowConfig::default();
        FlowOpts::default().apply(&mut config).unwrap();
        assert_eq!(config.store_dir, Some(PathBuf::from(".")));
    }

    #[test]
    fn zero_steps_is_rejected() {
        let opts = FlowOpts {
            total_steps: Some(0),
            ..FlowOpts::default()
        };
        assert!(opts.apply(&mut FlowConfig::default()).is_err());
    }
}
