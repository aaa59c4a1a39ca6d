use anyhow::anyhow;

use crate::engine::command::{parse_sub_line, CommandName, SubCommand};
use crate::engine::comment::{
    cherry_pick_done_comment, cherry_pick_failed_comment, cherry_pick_scheduled_comment,
    cherry_pick_title, Comment,
};
use crate::engine::context::JobContext;
use crate::engine::handlers::{CommandError, CommandResult};
use crate::platform::{CommitSha, PrComment, PullRequest, PullRequestStatus};

/// One cherry-pick attempt. The task is one-shot: each stage (validate the
/// target branch, apply the commit, publish the new PR) either advances or the
/// failure is reported as a comment; there are no retries within a job.
struct CherryPickTask {
    target_branch: String,
    commit: CommitSha,
}

pub(super) async fn run(ctx: &mut JobContext, args: &[String]) -> CommandResult {
    let Some(target) = args.first().cloned() else {
        let note = Comment::new(
            "Specify the target branch, e.g. `/cherry-pick release-1.2`".to_string(),
        );
        ctx.client
            .post_comment(ctx.pr_number, note.render())
            .await?;
        return Err(CommandError::Commented(anyhow!("no target branch")));
    };

    let pr = ctx.pull_request().await?.clone();
    match pr.status {
        // Apply immediately from the merge commit, falling back to the head
        // commit when the platform did not report one.
        PullRequestStatus::Merged => {
            let commit = pr.merge_commit_sha.clone().unwrap_or(pr.head_sha.clone());
            ctx.results.write("has-cherry-pick-comments", "true").await;
            attempt(
                ctx,
                &pr,
                CherryPickTask {
                    target_branch: target,
                    commit,
                },
            )
            .await
        }
        // Not applied now; the merge gate scans PR comments on merge and
        // re-enters through the post-merge built-in.
        PullRequestStatus::Open => {
            tracing::info!("Scheduling cherry-pick into `{target}` for merge time");
            let note = cherry_pick_scheduled_comment(&target);
            ctx.client
                .post_comment(ctx.pr_number, note.render())
                .await?;
            Ok(())
        }
        // A closed PR has no merge commit; pick its last commit.
        PullRequestStatus::Closed => {
            let commit = pr.head_sha.clone();
            ctx.results.write("has-cherry-pick-comments", "true").await;
            attempt(
                ctx,
                &pr,
                CherryPickTask {
                    target_branch: target,
                    commit,
                },
            )
            .await
        }
        PullRequestStatus::Unknown => {
            let note = cherry_pick_failed_comment(
                &target,
                "the pull request is in an unknown state",
            );
            ctx.client
                .post_comment(ctx.pr_number, note.render())
                .await?;
            Err(CommandError::Commented(anyhow!("PR state unknown")))
        }
    }
}

/// Merge-time re-entry: reads scheduled requests from the PR's own comments,
/// de-duplicates by target branch, and attempts each. A failing target does
/// not stop the remaining ones.
pub(super) async fn post_merge(ctx: &mut JobContext) -> CommandResult {
    let comments = ctx.comments().await?.to_vec();
    let targets = scheduled_targets(
        comments
            .iter()
            .filter(|comment| !ctx.config.is_robot(&comment.author)),
    );
    if targets.is_empty() {
        tracing::debug!("No scheduled cherry-picks found");
        return Ok(());
    }

    let pr = ctx.pull_request().await?.clone();
    let commit = pr.merge_commit_sha.clone().unwrap_or(pr.head_sha.clone());
    let mut failures = 0usize;
    for target in targets {
        let task = CherryPickTask {
            target_branch: target.clone(),
            commit: commit.clone(),
        };
        if let Err(error) = attempt(ctx, &pr, task).await {
            failures += 1;
            tracing::warn!("Cherry-pick into `{target}` failed: {error:?}");
        }
    }
    if failures > 0 {
        // Each failure was already reported on its own.
        return Err(CommandError::Commented(anyhow!(
            "{failures} cherry-pick(s) failed"
        )));
    }
    Ok(())
}

/// Collects the target branches of `/cherry-pick` lines found in the given
/// comments, in first-seen order, de-duplicated by branch.
pub(crate) fn scheduled_targets<'a>(
    comments: impl Iterator<Item = &'a PrComment>,
) -> Vec<String> {
    let mut targets: Vec<String> = vec![];
    for comment in comments {
        let body = crate::engine::command::normalize_comment(&comment.body);
        for line in body.lines().map(str::trim) {
            let Ok(SubCommand::Single(command)) = parse_sub_line(line) else {
                continue;
            };
            if command.name != CommandName::CherryPick {
                continue;
            }
            let Some(target) = command.args.first() else {
                continue;
            };
            if !targets.contains(target) {
                targets.push(target.clone());
            }
        }
    }
    targets
}

async fn attempt(ctx: &mut JobContext, pr: &PullRequest, task: CherryPickTask) -> CommandResult {
    match apply_and_publish(ctx, pr, &task).await {
        Ok(new_pr) => {
            tracing::info!(
                "Cherry-picked {} into `{}` as PR {}",
                task.commit,
                task.target_branch,
                new_pr.number
            );
            let note = cherry_pick_done_comment(&task.target_branch, &new_pr);
            ctx.client
                .post_comment(ctx.pr_number, note.render())
                .await?;
            Ok(())
        }
        Err(reason) => {
            let note = cherry_pick_failed_comment(&task.target_branch, &reason);
            ctx.client
                .post_comment(ctx.pr_number, note.render())
                .await?;
            Err(CommandError::Commented(anyhow!(
                "cherry-pick into `{}` failed: {reason}",
                task.target_branch
            )))
        }
    }
}

/// Walks the task through its stages. The returned error is the user-facing
/// failure reason.
async fn apply_and_publish(
    ctx: &mut JobContext,
    pr: &PullRequest,
    task: &CherryPickTask,
) -> Result<PullRequest, String> {
    // Validating: the target branch must exist.
    let target_sha = ctx
        .client
        .get_branch_sha(&task.target_branch)
        .await
        .map_err(|error| format!("cannot resolve the target branch: {error}"))?
        .ok_or_else(|| format!("branch `{}` does not exist", task.target_branch))?;

    // Applying: new branch off the target, then the commit on top of it.
    let new_branch = cherry_pick_branch_name(pr, &task.target_branch);
    ctx.client
        .create_branch(&new_branch, &target_sha)
        .await
        .map_err(|error| format!("cannot create branch `{new_branch}`: {error}"))?;
    ctx.client
        .cherry_pick_apply(&task.commit, &new_branch)
        .await
        .map_err(|error| error.to_string())?;

    // Publishing: open the cherry-pick PR against the target.
    let title = cherry_pick_title(pr, &task.target_branch);
    let body = format!(
        "Cherry-pick of #{} into `{}`.",
        pr.number, task.target_branch
    );
    ctx.client
        .create_pull_request(&new_branch, &task.target_branch, &title, &body)
        .await
        .map_err(|error| format!("cannot open the cherry-pick PR: {error}"))
}

fn cherry_pick_branch_name(pr: &PullRequest, target_branch: &str) -> String {
    format!(
        "cherry-pick-{}-{}",
        pr.number,
        target_branch.replace('/', "-")
    )
}
