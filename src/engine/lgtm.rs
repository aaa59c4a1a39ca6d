//! The LGTM engine: approval tallying and the approve/dismiss/status
//! operations backed by platform reviews.

use std::collections::HashMap;

use itertools::Itertools;

use crate::engine::checks::evaluate_checks;
use crate::engine::comment;
use crate::engine::context::JobContext;
use crate::platform::{CheckRun, Review, ReviewState};

#[derive(Debug)]
pub struct LgtmStatus {
    pub count: u32,
    pub threshold: u32,
    pub approvers: Vec<String>,
    pub failing_checks: Vec<CheckRun>,
}

/// Resolves each reviewer's current vote. Reviews are scanned in submission
/// order (review ID as tiebreak) and the latest non-dismissed review of a
/// reviewer is authoritative.
pub fn current_votes(reviews: &[Review]) -> HashMap<String, ReviewState> {
    let mut votes: HashMap<String, ReviewState> = HashMap::new();
    for review in reviews
        .iter()
        .sorted_by_key(|review| (review.submitted_at, review.id))
    {
        if review.state == ReviewState::Dismissed {
            votes.remove(&review.reviewer);
            continue;
        }
        votes.insert(review.reviewer.clone(), review.state);
    }
    votes
}

/// Counts distinct qualified approvers: current vote `approved`, permission in
/// the configured LGTM set, not a robot, and never the PR author.
pub async fn tally(ctx: &mut JobContext) -> anyhow::Result<Vec<String>> {
    let author = ctx.pull_request().await?.author.clone();
    let reviews = ctx.client.list_reviews(ctx.pr_number).await?;
    let votes = current_votes(&reviews);

    let mut approvers = vec![];
    for (reviewer, state) in votes.iter().sorted_by_key(|(reviewer, _)| *reviewer) {
        if *state != ReviewState::Approved {
            continue;
        }
        if *reviewer == author || ctx.config.is_robot(reviewer) {
            continue;
        }
        let permission = ctx.client.user_permission(reviewer).await?;
        if ctx.config.lgtm_permissions.contains(&permission) {
            approvers.push(reviewer.clone());
        }
    }
    Ok(approvers)
}

pub async fn status(ctx: &mut JobContext) -> anyhow::Result<LgtmStatus> {
    let approvers = tally(ctx).await?;
    let head_sha = ctx.pull_request().await?.head_sha.clone();
    let runs = ctx.client.list_check_runs(&head_sha).await?;
    let summary = evaluate_checks(&runs, &ctx.config);
    let mut failing_checks = summary.failing;
    failing_checks.extend(summary.pending);
    Ok(LgtmStatus {
        count: approvers.len() as u32,
        threshold: ctx.config.lgtm_threshold,
        approvers,
        failing_checks,
    })
}

/// Submits an approval review for the sender. Re-approving is a no-op with an
/// informational comment.
pub async fn approve(ctx: &mut JobContext) -> anyhow::Result<()> {
    let reviews = ctx.client.list_reviews(ctx.pr_number).await?;
    let votes = current_votes(&reviews);
    if votes.get(&ctx.sender) == Some(&ReviewState::Approved) {
        tracing::info!("{} already has an active approval", ctx.sender);
        let note = comment::already_approved_comment(&ctx.sender);
        ctx.client.post_comment(ctx.pr_number, note.render()).await?;
        return Ok(());
    }

    ctx.client
        .submit_review(ctx.pr_number, ctx.config.lgtm_review_event, "LGTM")
        .await?;
    tracing::info!("Submitted approval for PR {}", ctx.pr_number);

    let status = status(ctx).await?;
    let note = comment::lgtm_status_comment(&status);
    ctx.client.post_comment(ctx.pr_number, note.render()).await
}

/// Dismisses the sender's most recent approval, if there is one.
pub async fn dismiss(ctx: &mut JobContext) -> anyhow::Result<()> {
    let reviews = ctx.client.list_reviews(ctx.pr_number).await?;
    let last_approval = reviews
        .iter()
        .sorted_by_key(|review| (review.submitted_at, review.id))
        .filter(|review| {
            review.reviewer == ctx.sender && review.state == ReviewState::Approved
        })
        .next_back()
        .cloned();
    // The latest vote must still be an approval, otherwise there is nothing
    // to dismiss.
    let active = current_votes(&reviews).get(&ctx.sender) == Some(&ReviewState::Approved);

    match last_approval {
        Some(review) if active => {
            ctx.client
                .dismiss_review(
                    ctx.pr_number,
                    review.id,
                    &format!("dismissed by @{}", ctx.sender),
                )
                .await?;
            let note = comment::approval_dismissed_comment(&ctx.sender);
            ctx.client.post_comment(ctx.pr_number, note.render()).await
        }
        _ => {
            let note = comment::no_approval_to_remove_comment(&ctx.sender);
            ctx.client.post_comment(ctx.pr_number, note.render()).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn review(id: u64, reviewer: &str, state: ReviewState, minute: u32) -> Review {
        Review {
            id,
            reviewer: reviewer.to_string(),
            state,
            submitted_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, minute, 0).unwrap(),
        }
    }

    #[test]
    fn latest_review_wins() {
        let reviews = vec![
            review(1, "alice", ReviewState::Approved, 0),
            review(2, "alice", ReviewState::ChangesRequested, 1),
        ];
        let votes = current_votes(&reviews);
        assert_eq!(votes.get("alice"), Some(&ReviewState::ChangesRequested));
    }

    #[test]
    fn dismissal_clears_vote() {
        let reviews = vec![
            review(1, "alice", ReviewState::Approved, 0),
            review(2, "alice", ReviewState::Dismissed, 1),
        ];
        let votes = current_votes(&reviews);
        assert_eq!(votes.get("alice"), None);
    }

    #[test]
    fn dismissed_review_is_not_authoritative() {
        // A dismissal in the middle leaves the latest non-dismissed review in
        // charge.
        let reviews = vec![
            review(1, "alice", ReviewState::Approved, 0),
            review(2, "alice", ReviewState::Dismissed, 1),
            review(3, "alice", ReviewState::Approved, 2),
        ];
        let votes = current_votes(&reviews);
        assert_eq!(votes.get("alice"), Some(&ReviewState::Approved));
    }

    #[test]
    fn votes_are_per_reviewer() {
        let reviews = vec![
            review(1, "alice", ReviewState::Approved, 0),
            review(2, "bob", ReviewState::Commented, 1),
            review(3, "carol", ReviewState::Approved, 2),
        ];
        let votes = current_votes(&reviews);
        assert_eq!(votes.len(), 3);
        assert_eq!(votes.get("bob"), Some(&ReviewState::Commented));
    }

    #[test]
    fn same_timestamp_breaks_ties_by_id() {
        let reviews = vec![
            review(2, "alice", ReviewState::ChangesRequested, 0),
            review(1, "alice", ReviewState::Approved, 0),
        ];
        let votes = current_votes(&reviews);
        assert_eq!(votes.get("alice"), Some(&ReviewState::ChangesRequested));
    }
}
