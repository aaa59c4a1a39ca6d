use anyhow::anyhow;

use crate::engine::comment::Comment;
use crate::engine::context::JobContext;
use crate::engine::handlers::{CommandError, CommandResult};

pub(super) async fn assign(ctx: &mut JobContext, args: &[String]) -> CommandResult {
    let users = parse_users(ctx, args, "/assign @user").await?;
    ctx.client.request_reviewers(ctx.pr_number, &users).await?;
    tracing::info!("Requested review from {users:?}");
    let note = Comment::new(format!(
        "Requested review from {}",
        mention_list(&users)
    ));
    ctx.client.post_comment(ctx.pr_number, note.render()).await?;
    Ok(())
}

pub(super) async fn unassign(ctx: &mut JobContext, args: &[String]) -> CommandResult {
    let users = parse_users(ctx, args, "/unassign @user").await?;
    ctx.client.remove_reviewers(ctx.pr_number, &users).await?;
    tracing::info!("Removed review request for {users:?}");
    let note = Comment::new(format!(
        "Removed review request for {}",
        mention_list(&users)
    ));
    ctx.client.post_comment(ctx.pr_number, note.render()).await?;
    Ok(())
}

/// Accepts both `@user` and bare `user` tokens.
async fn parse_users(
    ctx: &mut JobContext,
    args: &[String],
    usage: &str,
) -> Result<Vec<String>, CommandError> {
    let users: Vec<String> = args
        .iter()
        .map(|arg| arg.trim_start_matches('@').to_string())
        .filter(|login| !login.is_empty())
        .collect();
    if users.is_empty() {
        let note = Comment::new(format!("Specify at least one user, e.g. `{usage}`"));
        ctx.client
            .post_comment(ctx.pr_number, note.render())
            .await?;
        return Err(CommandError::Commented(anyhow!("no users specified")));
    }
    Ok(users)
}

fn mention_list(users: &[String]) -> String {
    users
        .iter()
        .map(|login| format!("@{login}"))
        .collect::<Vec<_>>()
        .join(", ")
}
