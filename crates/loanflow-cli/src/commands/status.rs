//! `loanflow status` command.

use anyhow::{Context, Result};
use serde_json::json;

use super::{open_flow, view_json};
use crate::opts::FlowOpts;
use crate::output::print_success;

pub async fn cmd_status(opts: &FlowOpts) -> Result<()> {
    let (flow, warnings) = open_flow(opts).await?;
    let view = flow.resync().await.context("fetch application")?;
    let record = flow.record().context("no application record")?;
    print_success(
        opts,
        json!({
            "application": record,
            "view": view_json(&view),
            "policy": flow.policy(),
            "attempts": flow.gateway().attempts(),
        }),
        warnings,
    )
}
