//! User-visible comment templates. All wording posted to pull requests lives
//! here so handlers stay free of message formatting.

use crate::engine::command::CommandName;
use crate::engine::handlers::CommandOutcome;
use crate::engine::lgtm::LgtmStatus;
use crate::engine::validate::ValidationError;
use crate::platform::{CommitSha, MergeMethod, PullRequest};
use crate::utils::text::pluralize;

/// A comment that can be posted to a pull request.
pub struct Comment {
    text: String,
}

impl Comment {
    pub fn new(text: String) -> Self {
        Self { text }
    }

    pub fn render(&self) -> &str {
        &self.text
    }
}

pub fn help_comment() -> Comment {
    let rows = [
        (CommandName::Help, "-", "print this help"),
        (CommandName::Assign, "`@user…`", "add requested reviewers"),
        (CommandName::Unassign, "`@user…`", "remove requested reviewers"),
        (CommandName::Lgtm, "-", "approve this PR"),
        (
            CommandName::RemoveLgtm,
            "-",
            "dismiss your approval (alias: `/lgtm cancel`)",
        ),
        (
            CommandName::Check,
            "- or `/cmd …`",
            "show approval and check status, or run commands",
        ),
        (CommandName::Batch, "`/cmd …`", "run several commands at once"),
        (
            CommandName::Merge,
            "`[auto|merge|squash|rebase]`",
            "merge once all gates pass (alias: `/ready`)",
        ),
        (CommandName::Rebase, "-", "update the head branch from the base"),
        (
            CommandName::CherryPick,
            "`<branch>`",
            "cherry-pick to a branch, now or after merge (alias: `/cherrypick`)",
        ),
        (CommandName::Label, "`<label>…`", "add labels"),
        (CommandName::Unlabel, "`<label>…`", "remove labels"),
        (CommandName::Retest, "-", "re-request failing checks"),
        (CommandName::Close, "-", "close this PR without merging"),
    ];
    let mut text = String::from("| Command | Arguments | Effect |\n|---|---|---|\n");
    for (name, args, effect) in rows {
        text.push_str(&format!("| `{name}` | {args} | {effect} |\n"));
    }
    Comment::new(text)
}

pub fn parse_error_comment(error: &str) -> Comment {
    Comment::new(format!(":x: Cannot parse command: {error}"))
}

pub fn validation_error_comment(error: &ValidationError) -> Comment {
    Comment::new(format!(":no_entry: {error}"))
}

pub fn command_failed_comment(command: &str) -> Comment {
    Comment::new(format!(
        ":x: Encountered an error while executing `{command}`"
    ))
}

pub fn lgtm_status_comment(status: &LgtmStatus) -> Comment {
    let mut text = lgtm_progress(status);
    if !status.approvers.is_empty() {
        text.push_str(&format!("\nApproved by: {}", status.approvers.join(", ")));
    }
    if !status.failing_checks.is_empty() {
        text.push_str("\nFailing checks:");
        for check in &status.failing_checks {
            text.push_str(&format!("\n- [{}]({})", check.name, check.url));
        }
    }
    Comment::new(text)
}

fn lgtm_progress(status: &LgtmStatus) -> String {
    if status.count >= status.threshold {
        format!(
            "{}/{} approvals, ready to merge",
            status.count, status.threshold
        )
    } else {
        let missing = status.threshold - status.count;
        format!(
            "{}/{} {}, {} needed",
            status.count,
            status.threshold,
            pluralize("approval", status.threshold as usize),
            missing
        )
    }
}

pub fn already_approved_comment(sender: &str) -> Comment {
    Comment::new(format!(
        "@{sender} you already have an active approval on this PR"
    ))
}

pub fn approval_dismissed_comment(sender: &str) -> Comment {
    Comment::new(format!("Approval by @{sender} has been dismissed"))
}

pub fn no_approval_to_remove_comment(sender: &str) -> Comment {
    Comment::new(format!("@{sender} has no approval to remove"))
}

pub fn merge_failed_comment(reason: &str) -> Comment {
    Comment::new(format!(":no_entry: Cannot merge this PR: {reason}"))
}

pub fn merged_comment(method: MergeMethod, sha: &CommitSha) -> Comment {
    Comment::new(format!(
        ":tada: PR merged using the `{method}` method (commit `{sha}`)"
    ))
}

pub fn already_merged_comment() -> Comment {
    Comment::new("This PR is already merged".to_string())
}

pub fn closed_comment() -> Comment {
    Comment::new("PR closed".to_string())
}

pub fn rebased_comment() -> Comment {
    Comment::new("Head branch updated from the base branch".to_string())
}

pub fn retest_comment(count: usize) -> Comment {
    Comment::new(format!(
        "Re-requested {count} failing {}",
        pluralize("check", count)
    ))
}

pub fn nothing_to_retest_comment() -> Comment {
    Comment::new("There are no failing checks to re-run".to_string())
}

pub fn cherry_pick_scheduled_comment(branch: &str) -> Comment {
    Comment::new(format!(
        ":calendar: will cherry-pick upon merge into `{branch}`"
    ))
}

pub fn cherry_pick_done_comment(branch: &str, new_pr: &PullRequest) -> Comment {
    Comment::new(format!(
        ":cherries: Cherry-picked into `{branch}`: PR #{}",
        new_pr.number
    ))
}

pub fn cherry_pick_failed_comment(branch: &str, reason: &str) -> Comment {
    Comment::new(format!(
        ":x: Cherry-pick into `{branch}` failed: {reason}"
    ))
}

/// Title of the pull request created for a cherry-pick.
pub fn cherry_pick_title(original: &PullRequest, target_branch: &str) -> String {
    format!("cherry-pick: {} → {}", original.title, target_branch)
}

pub fn batch_summary_comment(outcomes: &[CommandOutcome]) -> Comment {
    let mut lines = Vec::with_capacity(outcomes.len());
    for outcome in outcomes {
        match &outcome.outcome {
            Ok(()) => lines.push(format!("{} ✅", outcome.display)),
            Err(reason) => lines.push(format!("{} ❌ {reason}", outcome.display)),
        }
    }
    Comment::new(lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lgtm_progress_below_threshold() {
        let status = LgtmStatus {
            count: 1,
            threshold: 2,
            approvers: vec!["alice".to_string()],
            failing_checks: vec![],
        };
        assert!(lgtm_status_comment(&status)
            .render()
            .starts_with("1/2 approvals, 1 needed"));
    }

    #[test]
    fn lgtm_progress_at_threshold() {
        let status = LgtmStatus {
            count: 2,
            threshold: 2,
            approvers: vec!["alice".to_string(), "bob".to_string()],
            failing_checks: vec![],
        };
        assert!(lgtm_status_comment(&status)
            .render()
            .starts_with("2/2 approvals, ready to merge"));
    }

    #[test]
    fn batch_summary_rows() {
        let outcomes = vec![
            CommandOutcome {
                name: "/assign".to_string(),
                display: "/assign @carol".to_string(),
                outcome: Ok(()),
            },
            CommandOutcome {
                name: "/unknown".to_string(),
                display: "/unknown".to_string(),
                outcome: Err("unknown command".to_string()),
            },
        ];
        assert_eq!(
            batch_summary_comment(&outcomes).render(),
            "/assign @carol ✅\n/unknown ❌ unknown command"
        );
    }
}
