use crate::engine::comment::rebased_comment;
use crate::engine::context::JobContext;
use crate::engine::handlers::CommandResult;

pub(super) async fn run(ctx: &mut JobContext) -> CommandResult {
    ctx.client.update_branch(ctx.pr_number).await?;
    tracing::info!("Updated head of PR {} from its base", ctx.pr_number);
    let note = rebased_comment();
    ctx.client
        .post_comment(ctx.pr_number, note.render())
        .await?;
    Ok(())
}
