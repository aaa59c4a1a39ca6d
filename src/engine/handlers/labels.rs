use anyhow::anyhow;

use crate::engine::comment::Comment;
use crate::engine::context::JobContext;
use crate::engine::handlers::{CommandError, CommandResult};

pub(super) async fn add(ctx: &mut JobContext, args: &[String]) -> CommandResult {
    let labels = require_labels(ctx, args, "/label <label>").await?;
    ctx.client.add_labels(ctx.pr_number, &labels).await?;
    tracing::info!("Added labels {labels:?}");
    Ok(())
}

pub(super) async fn remove(ctx: &mut JobContext, args: &[String]) -> CommandResult {
    let labels = require_labels(ctx, args, "/unlabel <label>").await?;
    ctx.client.remove_labels(ctx.pr_number, &labels).await?;
    tracing::info!("Removed labels {labels:?}");
    Ok(())
}

async fn require_labels(
    ctx: &mut JobContext,
    args: &[String],
    usage: &str,
) -> Result<Vec<String>, CommandError> {
    if args.is_empty() {
        let note = Comment::new(format!("Specify at least one label, e.g. `{usage}`"));
        ctx.client
            .post_comment(ctx.pr_number, note.render())
            .await?;
        return Err(CommandError::Commented(anyhow!("no labels specified")));
    }
    Ok(args.to_vec())
}
