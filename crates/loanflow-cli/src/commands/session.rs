//! `loanflow session` command.

use anyhow::Result;
use serde_json::json;

use super::open_flow;
use crate::opts::FlowOpts;
use crate::output::print_success;

pub async fn cmd_session(opts: &FlowOpts) -> Result<()> {
    let (flow, warnings) = open_flow(opts).await?;
    let session = flow.session();
    let identity = session.ensure_session();
    print_success(
        opts,
        json!({
            "sessionId": identity.session_id,
            "userId": identity.user_id,
            "ownerKind": session.owner_kind(),
            "applicationId": session.application_id(),
            "durableStorage": !session.is_degraded(),
        }),
        warnings,
    )
}
