//! `loanflow verify` command.

use anyhow::{Context, Result};
use clap::Args;
use loanflow_core::IdentityProof;
use serde_json::json;

use super::open_flow;
use crate::opts::FlowOpts;
use crate::output::print_success;

#[derive(Args, Debug)]
pub struct VerifyArgs {
    /// Phone number the code was sent to
    #[arg(long)]
    pub phone: String,

    /// One-time verification code
    #[arg(long)]
    pub code: String,
}

pub async fn cmd_verify(opts: &FlowOpts, args: &VerifyArgs) -> Result<()> {
    let (flow, mut warnings) = open_flow(opts).await?;
    let bound = flow
        .bind_identity(IdentityProof::new(&args.phone, &args.code))
        .await
        .context("bind identity")?;
    if bound.remapped() {
        warnings.push(format!(
            "application {} was merged into {}",
            bound.previous_application_id, bound.application_id
        ));
    }
    print_success(
        opts,
        json!({
            "userId": bound.user_id,
            "applicationId": bound.application_id,
            "previousApplicationId": bound.previous_application_id,
            "ownerKind": flow.session().owner_kind(),
        }),
        warnings,
    )
}
