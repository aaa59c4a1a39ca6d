use crate::engine::comment::closed_comment;
use crate::engine::context::JobContext;
use crate::engine::handlers::CommandResult;
use crate::platform::PullRequestStatus;

pub(super) async fn run(ctx: &mut JobContext) -> CommandResult {
    ctx.client.close_pull_request(ctx.pr_number).await?;
    ctx.record_pr_status(PullRequestStatus::Closed);
    tracing::info!("Closed PR {}", ctx.pr_number);
    let note = closed_comment();
    ctx.client
        .post_comment(ctx.pr_number, note.render())
        .await?;
    Ok(())
}
