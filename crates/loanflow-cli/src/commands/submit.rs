//! `loanflow submit` command.

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use serde_json::json;

use super::{open_flow, outcome_json, read_payload, submit_step, view_json};
use crate::opts::FlowOpts;
use crate::output::print_success;

#[derive(Args, Debug)]
pub struct SubmitArgs {
    /// JSON object with this step's fields ("-" reads stdin)
    pub file: PathBuf,
}

pub async fn cmd_submit(opts: &FlowOpts, args: &SubmitArgs) -> Result<()> {
    let payload = read_payload(&args.file)?;
    let (flow, warnings) = open_flow(opts).await?;
    let outcome = submit_step(&flow, payload).await?;
    print_success(
        opts,
        json!({
            "outcome": outcome_json(&outcome),
            "view": view_json(&flow.sequencer().view_state()),
        }),
        warnings,
    )
}
