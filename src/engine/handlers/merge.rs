use anyhow::anyhow;
use itertools::Itertools;

use crate::config::MergeMethodChoice;
use crate::engine::checks::evaluate_checks;
use crate::engine::comment::{
    already_merged_comment, merge_failed_comment, merged_comment,
};
use crate::engine::context::JobContext;
use crate::engine::event::{Event, EventPayload, Job};
use crate::engine::handlers::{cherry_pick, CommandError, CommandResult};
use crate::engine::lgtm;
use crate::engine::command::POST_MERGE_CHERRY_PICK;
use crate::platform::{MergeError, MergeMethod, PrComment, PullRequestStatus};

/// In `auto` mode the first available method wins, in this order.
const AUTO_METHOD_ORDER: [MergeMethod; 3] =
    [MergeMethod::Rebase, MergeMethod::Squash, MergeMethod::Merge];

/// Outcome of the merge gate.
#[derive(Debug, PartialEq)]
pub enum MergeDecision {
    Allowed { method: MergeMethod },
    Denied { reason: String },
}

pub(super) async fn run(ctx: &mut JobContext, args: &[String]) -> CommandResult {
    let requested = match parse_requested_method(ctx.config.merge_method, args) {
        Ok(requested) => requested,
        Err(reason) => {
            let note = merge_failed_comment(&reason);
            ctx.client
                .post_comment(ctx.pr_number, note.render())
                .await?;
            return Err(CommandError::Commented(anyhow!(reason)));
        }
    };

    match decide_merge(ctx, requested).await? {
        MergeDecision::Denied { reason } => {
            tracing::info!("Merge denied: {reason}");
            let note = merge_failed_comment(&reason);
            ctx.client
                .post_comment(ctx.pr_number, note.render())
                .await?;
            Err(CommandError::Commented(anyhow!("merge denied: {reason}")))
        }
        MergeDecision::Allowed { method } => {
            perform_merge(ctx, method).await
        }
    }
}

/// Without an argument the configured method applies.
fn parse_requested_method(
    configured: MergeMethodChoice,
    args: &[String],
) -> Result<MergeMethodChoice, String> {
    match args.first() {
        None => Ok(configured),
        Some(arg) => arg.parse(),
    }
}

/// Evaluates the merge gate: PR state, required checks (self-check excluded),
/// the LGTM threshold, and merge-method availability. The permission gate runs
/// earlier, in the validator chain.
pub(super) async fn decide_merge(
    ctx: &mut JobContext,
    requested: MergeMethodChoice,
) -> anyhow::Result<MergeDecision> {
    let pr = ctx.pull_request().await?.clone();
    if pr.status != PullRequestStatus::Open {
        return Ok(MergeDecision::Denied {
            reason: format!("the pull request is not open (currently {})", pr.status),
        });
    }

    let runs = ctx.client.list_check_runs(&pr.head_sha).await?;
    let summary = evaluate_checks(&runs, &ctx.config);
    if !summary.all_passing() {
        let mut parts = vec![];
        if !summary.failing.is_empty() {
            parts.push(format!(
                "failing checks: {}",
                summary.failing.iter().map(|check| &check.name).join(", ")
            ));
        }
        if !summary.pending.is_empty() {
            parts.push(format!(
                "pending checks: {}",
                summary.pending.iter().map(|check| &check.name).join(", ")
            ));
        }
        return Ok(MergeDecision::Denied {
            reason: parts.join("; "),
        });
    }

    let approvers = lgtm::tally(ctx).await?;
    let threshold = ctx.config.lgtm_threshold;
    if (approvers.len() as u32) < threshold {
        return Ok(MergeDecision::Denied {
            reason: format!(
                "insufficient approvals: {}/{threshold}",
                approvers.len()
            ),
        });
    }

    let available = ctx.client.allowed_merge_methods().await?;
    let method = match requested.as_method() {
        Some(method) if available.contains(&method) => method,
        Some(method) => {
            return Ok(MergeDecision::Denied {
                reason: format!("merge method `{method}` is not available in this repository"),
            });
        }
        None => match AUTO_METHOD_ORDER
            .iter()
            .find(|method| available.contains(method))
        {
            Some(method) => *method,
            None => {
                return Ok(MergeDecision::Denied {
                    reason: "no merge method is available in this repository".to_string(),
                });
            }
        },
    };

    Ok(MergeDecision::Allowed { method })
}

async fn perform_merge(ctx: &mut JobContext, method: MergeMethod) -> CommandResult {
    match ctx.client.merge_pull_request(ctx.pr_number, method).await {
        Err(MergeError::AlreadyMerged) => {
            // Replayed webhooks land here; the merge is idempotent.
            ctx.record_pr_status(PullRequestStatus::Merged);
            let note = already_merged_comment();
            ctx.client
                .post_comment(ctx.pr_number, note.render())
                .await?;
            Ok(())
        }
        Err(error) => {
            let note = merge_failed_comment(&error.to_string());
            ctx.client
                .post_comment(ctx.pr_number, note.render())
                .await?;
            Err(CommandError::Commented(anyhow!(error)))
        }
        Ok(sha) => {
            ctx.record_merged(sha.clone());
            tracing::info!("Merged PR {} as {sha} using {method}", ctx.pr_number);
            let note = merged_comment(method, &sha);
            ctx.client
                .post_comment(ctx.pr_number, note.render())
                .await?;
            ctx.results.write("merge-successful", "true").await;
            schedule_post_merge_cherry_picks(ctx).await?;
            Ok(())
        }
    }
}

/// The PR's own comments are the source of truth for scheduled cherry-picks:
/// scan them after the merge and enqueue the internal re-entry job when any
/// are found.
async fn schedule_post_merge_cherry_picks(ctx: &mut JobContext) -> Result<(), CommandError> {
    ctx.invalidate_comments();
    let comments = ctx.comments().await?.to_vec();
    let robots = &ctx.config;
    let targets = cherry_pick::scheduled_targets(
        comments
            .iter()
            .filter(|comment| !robots.is_robot(&comment.author)),
    );
    if targets.is_empty() {
        return Ok(());
    }

    tracing::info!("Found scheduled cherry-picks for branches {targets:?}");
    ctx.results.write("has-cherry-pick-comments", "true").await;

    let event = Event {
        platform: ctx.config.platform,
        repository: ctx.repo.clone(),
        pr_number: ctx.pr_number,
        sender: ctx.sender.clone(),
        delivery_id: crate::utils::correlation::fallback_delivery_id(),
        payload: EventPayload::Comment(PrComment {
            id: 0,
            author: ctx.sender.clone(),
            body: format!("/__{POST_MERGE_CHERRY_PICK}"),
        }),
    };
    if let Err(error) = ctx.queue.try_enqueue(Job::new(event)) {
        tracing::warn!("Cannot enqueue post-merge cherry-pick job ({error}); running inline");
        cherry_pick::post_merge(ctx).await?;
    }
    Ok(())
}
