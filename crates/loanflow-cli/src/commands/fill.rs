//! `loanflow fill` command: submit every remaining step from a directory.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Result, bail};
use clap::Args;
use loanflow_core::{AdvanceOutcome, StepView, ViewState, bind_view};
use loanflow_types::StepNumber;
use serde_json::json;

use super::{open_flow, outcome_json, read_payload, submit_step, view_json};
use crate::opts::FlowOpts;
use crate::output::print_success;

#[derive(Args, Debug)]
pub struct FillArgs {
    /// Directory holding step-01.json, step-02.json, ...
    pub dir: PathBuf,
}

/// Progress lines on stderr while steps are submitted.
struct ProgressView;

impl StepView for ProgressView {
    fn render(&self, state: &ViewState) {
        if state.completed {
            eprintln!("application complete ({} steps)", state.total_steps);
        } else if let Some(err) = &state.last_error {
            eprintln!("step {}/{}: {err}", state.current_step, state.total_steps);
        } else if !state.can_advance {
            eprintln!("step {}/{}: saving...", state.current_step, state.total_steps);
        } else {
            eprintln!("step {}/{}", state.current_step, state.total_steps);
        }
    }
}

fn step_file(dir: &Path, step: StepNumber) -> PathBuf {
    dir.join(format!("step-{step:02}.json"))
}

pub async fn cmd_fill(opts: &FlowOpts, args: &FillArgs) -> Result<()> {
    if !args.dir.is_dir() {
        bail!("{} is not a directory", args.dir.display());
    }
    let (flow, warnings) = open_flow(opts).await?;
    let sequencer = flow.sequencer();
    let progress = (!opts.quiet && !opts.json && !opts.pretty)
        .then(|| bind_view(sequencer.subscribe(), Arc::new(ProgressView)));
    let mut submitted = Vec::new();

    while !sequencer.is_completed() {
        let step = sequencer.current_step();
        let path = step_file(&args.dir, step);
        if !path.exists() {
            bail!(
                "missing {} for step {step} of {}",
                path.display(),
                sequencer.total_steps()
            );
        }
        let payload = read_payload(&path)?;
        let outcome = submit_step(&flow, payload).await?;
        submitted.push(outcome_json(&outcome));
        if outcome == AdvanceOutcome::Discarded {
            break;
        }
    }
    if let Some(handle) = progress {
        handle.abort();
    }

    print_success(
        opts,
        json!({
            "submitted": submitted,
            "view": view_json(&sequencer.view_state()),
        }),
        warnings,
    )
}
