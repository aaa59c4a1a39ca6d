use crate::engine::checks::evaluate_checks;
use crate::engine::comment::{nothing_to_retest_comment, retest_comment};
use crate::engine::context::JobContext;
use crate::engine::handlers::CommandResult;

/// Re-requests every failing check of the PR head. Pending checks are left
/// alone.
pub(super) async fn run(ctx: &mut JobContext) -> CommandResult {
    let head_sha = ctx.pull_request().await?.head_sha.clone();
    let runs = ctx.client.list_check_runs(&head_sha).await?;
    let failing = evaluate_checks(&runs, &ctx.config).failing;

    if failing.is_empty() {
        let note = nothing_to_retest_comment();
        ctx.client
            .post_comment(ctx.pr_number, note.render())
            .await?;
        return Ok(());
    }

    for check in &failing {
        ctx.client.rerequest_check(check).await?;
        tracing::info!("Re-requested check `{}`", check.name);
    }
    let note = retest_comment(failing.len());
    ctx.client
        .post_comment(ctx.pr_number, note.render())
        .await?;
    Ok(())
}
