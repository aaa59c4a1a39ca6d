//! The validator chain that every user-visible command passes before
//! execution: PR state, comment-sender authenticity, and permission, in that
//! fixed order. Built-in commands skip the first two entirely.

use crate::engine::command::{normalize_comment, CommandName, SingleCommand};
use crate::engine::context::JobContext;
use crate::platform::{Permission, PullRequestStatus};

#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("this command requires an open pull request (currently {state})")]
    PrNotOpen { state: PullRequestStatus },
    #[error("could not find a comment by `{sender}` containing the trigger command")]
    TriggerNotFound { sender: String },
    #[error(
        "the following command lines were not posted by `{sender}`: {}",
        .missing.join(", ")
    )]
    TriggerLinesMissing {
        sender: String,
        missing: Vec<String>,
    },
    #[error("@{sender}: insufficient permission (`{permission}`) to run this command")]
    InsufficientPermission {
        sender: String,
        permission: Permission,
    },
    #[error("as the PR author, you cannot approve your own PR")]
    SelfApprovalBlocked,
}

/// Outcome of a validator: `Err` is a policy rejection that gets posted to the
/// PR, while the outer `anyhow::Result` of the validator functions carries
/// infrastructure failures.
pub type Validated = Result<(), ValidationError>;

/// Runs the full chain for a stand-alone single command.
pub async fn validate_single(
    ctx: &mut JobContext,
    command: &SingleCommand,
) -> anyhow::Result<Validated> {
    if let Err(error) = validate_pr_state(ctx, command.name).await? {
        return Ok(Err(error));
    }
    if let Err(error) = validate_trigger(ctx).await? {
        return Ok(Err(error));
    }
    validate_permission(ctx, command).await
}

/// Runs the chain for a sub-command of a multi-command. Sender authenticity
/// is validated once for the whole multi-command via
/// [`validate_multi_trigger`].
pub async fn validate_sub(
    ctx: &mut JobContext,
    command: &SingleCommand,
) -> anyhow::Result<Validated> {
    if let Err(error) = validate_pr_state(ctx, command.name).await? {
        return Ok(Err(error));
    }
    validate_permission(ctx, command).await
}

/// Every regular command except cherry-pick requires an open PR.
async fn validate_pr_state(ctx: &mut JobContext, name: CommandName) -> anyhow::Result<Validated> {
    if name == CommandName::CherryPick {
        return Ok(Ok(()));
    }
    let pr = ctx.pull_request().await?;
    match pr.status {
        PullRequestStatus::Open => Ok(Ok(())),
        state => Ok(Err(ValidationError::PrNotOpen { state })),
    }
}

/// The sender must have posted, on this PR, at least one comment whose
/// normalized body equals or contains the normalized trigger text.
async fn validate_trigger(ctx: &mut JobContext) -> anyhow::Result<Validated> {
    if robot_bypass(ctx) {
        return Ok(Ok(()));
    }
    let sender = ctx.sender.clone();
    let trigger = ctx.trigger.clone();
    let found = ctx
        .comments()
        .await?
        .iter()
        .filter(|comment| comment.author == sender)
        .any(|comment| normalize_comment(&comment.body).contains(&trigger));
    if found {
        Ok(Ok(()))
    } else {
        Ok(Err(ValidationError::TriggerNotFound { sender }))
    }
}

/// For a multi-command, every raw sub-command line must be found inside at
/// least one comment by the sender. The rejection lists the missing lines.
pub async fn validate_multi_trigger(
    ctx: &mut JobContext,
    raw_lines: &[String],
) -> anyhow::Result<Validated> {
    if robot_bypass(ctx) {
        return Ok(Ok(()));
    }
    let sender = ctx.sender.clone();
    let bodies: Vec<String> = ctx
        .comments()
        .await?
        .iter()
        .filter(|comment| comment.author == sender)
        .map(|comment| normalize_comment(&comment.body))
        .collect();
    let missing: Vec<String> = raw_lines
        .iter()
        .filter(|line| !bodies.iter().any(|body| body.contains(line.as_str())))
        .cloned()
        .collect();
    if missing.is_empty() {
        Ok(Ok(()))
    } else {
        Ok(Err(ValidationError::TriggerLinesMissing { sender, missing }))
    }
}

fn robot_bypass(ctx: &JobContext) -> bool {
    ctx.config.debug && ctx.config.is_robot(&ctx.sender)
}

/// Command-scoped permission rules.
async fn validate_permission(
    ctx: &mut JobContext,
    command: &SingleCommand,
) -> anyhow::Result<Validated> {
    match command.name {
        CommandName::Lgtm => {
            let author = ctx.pull_request().await?.author.clone();
            if author == ctx.sender && !ctx.config.debug {
                return Ok(Err(ValidationError::SelfApprovalBlocked));
            }
            require_configured_permission(ctx).await
        }
        CommandName::RemoveLgtm => require_configured_permission(ctx).await,
        CommandName::Merge | CommandName::Ready | CommandName::CherryPick | CommandName::Close => {
            let author = ctx.pull_request().await?.author.clone();
            if author == ctx.sender {
                return Ok(Ok(()));
            }
            require_configured_permission(ctx).await
        }
        // Participation is enough for the remaining commands.
        _ => Ok(Ok(())),
    }
}

async fn require_configured_permission(ctx: &mut JobContext) -> anyhow::Result<Validated> {
    let permission = ctx.client.user_permission(&ctx.sender).await?;
    if ctx.config.lgtm_permissions.contains(&permission) {
        Ok(Ok(()))
    } else {
        Ok(Err(ValidationError::InsufficientPermission {
            sender: ctx.sender.clone(),
            permission,
        }))
    }
}
