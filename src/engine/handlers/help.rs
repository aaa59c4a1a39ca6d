use crate::engine::comment::help_comment;
use crate::engine::context::JobContext;
use crate::engine::handlers::CommandResult;

pub(super) async fn run(ctx: &mut JobContext) -> CommandResult {
    let help = help_comment();
    ctx.client
        .post_comment(ctx.pr_number, help.render())
        .await?;
    Ok(())
}
