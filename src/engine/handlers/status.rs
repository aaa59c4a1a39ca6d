use crate::engine::comment::lgtm_status_comment;
use crate::engine::context::JobContext;
use crate::engine::handlers::CommandResult;
use crate::engine::lgtm;

/// `/check` without arguments: report approvals and failing checks.
pub(super) async fn run(ctx: &mut JobContext) -> CommandResult {
    let status = lgtm::status(ctx).await?;
    let note = lgtm_status_comment(&status);
    ctx.client
        .post_comment(ctx.pr_number, note.render())
        .await?;
    Ok(())
}
