pub mod fill;
pub mod session;
pub mod status;
pub mod submit;
pub mod verify;

use std::path::Path;

use anyhow::{Context, Result, bail};
use loanflow_core::{AdvanceOutcome, FlowError, LoanFlow, ViewState};
use serde_json::{Value, json};

use crate::opts::FlowOpts;

/// Connects and ensures a session plus application exist.
pub(crate) async fn open_flow(opts: &FlowOpts) -> Result<(LoanFlow, Vec<String>)> {
    let config = opts.config()?;
    let flow = LoanFlow::connect(config).context("configure loan flow")?;
    let mut warnings = Vec::new();
    if flow.session().is_degraded() {
        warnings.push("session state is kept in memory only and ends with this process".into());
    }
    flow.start().await.context("start application")?;
    Ok((flow, warnings))
}

pub(crate) fn read_payload(path: &Path) -> Result<Value> {
    let text = if path == Path::new("-") {
        std::io::read_to_string(std::io::stdin()).context("read payload from stdin")?
    } else {
        std::fs::read_to_string(path).with_context(|| format!("read payload {}", path.display()))?
    };
    let value: Value = serde_json::from_str(&text)
        .with_context(|| format!("parse payload {} as JSON", path.display()))?;
    if !value.is_object() {
        bail!("payload {} must be a JSON object", path.display());
    }
    Ok(value)
}

/// Submits one step, tearing the write down on Ctrl-C.
///
/// A merge conflict triggers a resync so the next command starts from the
/// service's view; the conflict is still reported.
pub(crate) async fn submit_step(flow: &LoanFlow, payload: Value) -> Result<AdvanceOutcome> {
    let result = tokio::select! {
        result = flow.submit(payload) => result,
        _ = tokio::signal::ctrl_c() => {
            flow.teardown();
            bail!("interrupted; step was not confirmed");
        }
    };
    match result {
        Ok(outcome) => Ok(outcome),
        Err(err @ FlowError::MergeConflict { .. }) => {
            flow.resync()
                .await
                .context("resync after merge conflict")?;
            Err(err).context("application changed elsewhere; resynced from service")
        }
        Err(err) => Err(err.into()),
    }
}

pub(crate) fn view_json(view: &ViewState) -> Value {
    json!({
        "currentStep": view.current_step,
        "maxStepReached": view.max_step_reached,
        "totalSteps": view.total_steps,
        "canAdvance": view.can_advance,
        "completed": view.completed,
        "lastError": view.last_error.as_ref().map(|e| e.to_string()),
    })
}

pub(crate) fn outcome_json(outcome: &AdvanceOutcome) -> Value {
    match outcome {
        AdvanceOutcome::Advanced { step, current_step } => {
            json!({ "result": "advanced", "step": step, "currentStep": current_step })
        }
        AdvanceOutcome::Completed { step } => json!({ "result": "completed", "step": step }),
        AdvanceOutcome::Discarded => json!({ "result": "discarded" }),
    }
}
