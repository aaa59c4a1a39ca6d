//! End-to-end scenarios driven through the job handler against the in-memory
//! mock client.


use crate::config::Config;
use crate::engine::event::{Event, EventPayload, Job};
use crate::engine::process::JobQueue;
use crate::engine::{handlers, EngineContext};
use crate::platform::{
    CheckConclusion, CheckStatus, MergeMethod, Permission, PlatformKind, PrComment,
    PullRequestStatus, ReviewState,
};
use crate::results::ResultSink;
use crate::tests::mock::{test_config, test_engine_context_sink, test_engine_context_with, MockClient};

/// Runs a comment event through the engine, as if delivered by a webhook.
async fn run_comment(ctx: &EngineContext, author: &str, body: &str) -> anyhow::Result<()> {
    let event = Event {
        platform: PlatformKind::Github,
        repository: ctx.client.repository().clone(),
        pr_number: 1.into(),
        sender: author.to_string(),
        delivery_id: "delivery-1".to_string(),
        payload: EventPayload::Comment(PrComment {
            id: 999,
            author: author.to_string(),
            body: body.to_string(),
        }),
    };
    handlers::handle_job(ctx, JobQueue::detached(), Job::new(event)).await
}

/// Posts the trigger comment on the PR, then runs it. This mirrors reality:
/// the comment exists on the PR before the webhook fires, which the sender
/// authenticity validator relies on.
async fn post_and_run(
    ctx: &EngineContext,
    mock: &MockClient,
    author: &str,
    body: &str,
) -> anyhow::Result<()> {
    mock.add_comment(author, body);
    run_comment(ctx, author, body).await
}

// S1: a single LGTM below the threshold submits a review and reports
// progress.
#[tokio::test]
async fn lgtm_below_threshold() {
    let config = Config {
        lgtm_threshold: 2,
        ..test_config()
    };
    let (ctx, mock) = test_engine_context_with(config);
    mock.set_permission("alice", Permission::Write);

    post_and_run(&ctx, &mock, "alice", "/lgtm").await.unwrap();

    let reviews = mock.reviews();
    assert_eq!(reviews.len(), 1);
    assert_eq!(reviews[0].reviewer, "alice");
    assert_eq!(reviews[0].state, ReviewState::Approved);
    assert!(mock.last_comment().contains("1/2 approvals, 1 needed"));
}

// S2: the PR author cannot approve their own PR.
#[tokio::test]
async fn self_approval_is_blocked() {
    let (ctx, mock) = test_engine_context_with(test_config());
    mock.set_permission("bob", Permission::Write);

    post_and_run(&ctx, &mock, "bob", "/lgtm").await.unwrap();

    assert!(mock.reviews().is_empty());
    assert!(mock
        .last_comment()
        .contains("as the PR author, you cannot approve your own PR"));
}

// S3: a multi-command runs every sub-command, survives a failing one, and
// posts a single summary.
#[tokio::test]
async fn multi_command_with_partial_failure() {
    let config = Config {
        lgtm_threshold: 2,
        ..test_config()
    };
    let (ctx, mock) = test_engine_context_with(config);
    mock.set_permission("alice", Permission::Write);
    mock.set_permission("carol", Permission::Write);
    mock.set_permission("dan", Permission::Write);
    mock.add_review("carol", ReviewState::Approved, 1);
    mock.add_review("dan", ReviewState::Approved, 2);
    mock.add_check("build", CheckStatus::Completed, Some(CheckConclusion::Success));

    post_and_run(&ctx, &mock, "alice", "/assign @carol\n/merge squash\n/unknown")
        .await
        .unwrap();

    assert_eq!(mock.requested_reviewers(), vec!["carol"]);
    assert_eq!(mock.merged_with(), Some(MergeMethod::Squash));
    assert_eq!(
        mock.last_comment(),
        "/assign @carol ✅\n/merge squash ✅\n/unknown ❌ unknown command"
    );
}

// S4: cherry-picking a merged PR applies the merge commit immediately and
// opens a PR against the target branch.
#[tokio::test]
async fn cherry_pick_merged_pr() {
    let results_dir = tempfile::tempdir().unwrap();
    let (ctx, mock) = test_engine_context_sink(
        test_config(),
        ResultSink::new(Some(results_dir.path().to_path_buf())),
    );
    mock.set_permission("dan", Permission::Admin);
    mock.with_pr(|pr| {
        pr.number = 7.into();
        pr.status = PullRequestStatus::Merged;
        pr.merge_commit_sha = Some("merge-sha".to_string().into());
    });
    mock.add_branch("release-1.2", "release-sha");

    post_and_run(&ctx, &mock, "dan", "/cherry-pick release-1.2")
        .await
        .unwrap();

    let picks = mock.cherry_picks();
    assert_eq!(picks.len(), 1);
    assert_eq!(picks[0].0.as_ref(), "merge-sha");
    assert_eq!(picks[0].1, "cherry-pick-7-release-1.2");

    let created = mock.created_prs();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].base_ref, "release-1.2");
    assert!(created[0].title.starts_with("cherry-pick: "));

    let flag =
        std::fs::read_to_string(results_dir.path().join("has-cherry-pick-comments")).unwrap();
    assert_eq!(flag, "true\n");
}

// S5: a cherry-pick on an open PR is only scheduled; the merge gate triggers
// it afterwards through the post-merge built-in.
#[tokio::test]
async fn cherry_pick_scheduled_then_triggered_on_merge() {
    let results_dir = tempfile::tempdir().unwrap();
    let (ctx, mock) = test_engine_context_sink(
        test_config(),
        ResultSink::new(Some(results_dir.path().to_path_buf())),
    );
    mock.set_permission("alice", Permission::Write);
    mock.set_permission("carol", Permission::Write);
    mock.add_review("carol", ReviewState::Approved, 1);
    mock.add_check("build", CheckStatus::Completed, Some(CheckConclusion::Success));
    mock.add_branch("release-1.3", "release-sha");

    post_and_run(&ctx, &mock, "alice", "/cherry-pick release-1.3")
        .await
        .unwrap();
    assert!(mock.last_comment().contains("will cherry-pick upon merge"));
    assert!(mock.created_branches().is_empty());
    assert!(mock.created_prs().is_empty());

    // The enqueue of the internal job fails on the detached queue, so the
    // post-merge built-in runs inline, which keeps the test deterministic.
    post_and_run(&ctx, &mock, "alice", "/merge rebase")
        .await
        .unwrap();

    assert_eq!(mock.merged_with(), Some(MergeMethod::Rebase));
    let created = mock.created_prs();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].base_ref, "release-1.3");

    let merged =
        std::fs::read_to_string(results_dir.path().join("merge-successful")).unwrap();
    assert_eq!(merged, "true\n");
    let flag =
        std::fs::read_to_string(results_dir.path().join("has-cherry-pick-comments")).unwrap();
    assert_eq!(flag, "true\n");
}

// S6: a replayed webhook is harmless; the second LGTM is a no-op.
#[tokio::test]
async fn replayed_lgtm_is_idempotent() {
    let (ctx, mock) = test_engine_context_with(test_config());
    mock.set_permission("alice", Permission::Write);

    post_and_run(&ctx, &mock, "alice", "/lgtm").await.unwrap();
    run_comment(&ctx, "alice", "/lgtm").await.unwrap();

    let approvals: Vec<_> = mock
        .reviews()
        .into_iter()
        .filter(|review| review.state == ReviewState::Approved)
        .collect();
    assert_eq!(approvals.len(), 1);
    assert!(mock
        .last_comment()
        .contains("already have an active approval"));
}

#[tokio::test]
async fn remove_lgtm_dismisses_the_approval() {
    let (ctx, mock) = test_engine_context_with(test_config());
    mock.set_permission("alice", Permission::Write);

    post_and_run(&ctx, &mock, "alice", "/lgtm").await.unwrap();
    post_and_run(&ctx, &mock, "alice", "/lgtm cancel").await.unwrap();

    let reviews = mock.reviews();
    assert_eq!(reviews.len(), 1);
    assert_eq!(reviews[0].state, ReviewState::Dismissed);
    assert!(mock.last_comment().contains("has been dismissed"));
}

#[tokio::test]
async fn robot_comments_are_ignored() {
    let (ctx, mock) = test_engine_context_with(test_config());

    post_and_run(&ctx, &mock, "robo-bot", "/lgtm").await.unwrap();

    assert!(mock.reviews().is_empty());
    assert!(mock.posted_comments().is_empty());
}

#[tokio::test]
async fn insufficient_permission_is_reported() {
    let (ctx, mock) = test_engine_context_with(test_config());
    mock.set_permission("carol", Permission::Read);

    post_and_run(&ctx, &mock, "carol", "/lgtm").await.unwrap();

    assert!(mock.reviews().is_empty());
    assert!(mock.last_comment().contains("insufficient permission"));
}

#[tokio::test]
async fn trigger_must_be_posted_by_the_sender() {
    let (ctx, mock) = test_engine_context_with(test_config());
    mock.set_permission("alice", Permission::Write);

    // The comment exists on the PR, but under a different author.
    mock.add_comment("mallory", "/lgtm");
    run_comment(&ctx, "alice", "/lgtm").await.unwrap();

    assert!(mock.reviews().is_empty());
    assert!(mock
        .last_comment()
        .contains("could not find a comment by `alice`"));
}

#[tokio::test]
async fn merge_gate_rejects_pending_checks() {
    let (ctx, mock) = test_engine_context_with(test_config());
    mock.set_permission("alice", Permission::Write);
    mock.set_permission("carol", Permission::Write);
    mock.add_review("carol", ReviewState::Approved, 1);
    mock.add_check("build", CheckStatus::InProgress, None);

    post_and_run(&ctx, &mock, "alice", "/merge").await.unwrap();

    assert_eq!(mock.merged_with(), None);
    assert!(mock.last_comment().contains("pending checks: build"));
}

#[tokio::test]
async fn merge_gate_rejects_missing_approvals() {
    let config = Config {
        lgtm_threshold: 2,
        ..test_config()
    };
    let (ctx, mock) = test_engine_context_with(config);
    mock.set_permission("alice", Permission::Write);
    mock.set_permission("carol", Permission::Write);
    mock.add_review("carol", ReviewState::Approved, 1);
    mock.add_check("build", CheckStatus::Completed, Some(CheckConclusion::Success));

    post_and_run(&ctx, &mock, "alice", "/merge").await.unwrap();

    assert_eq!(mock.merged_with(), None);
    assert!(mock.last_comment().contains("insufficient approvals: 1/2"));
}

#[tokio::test]
async fn auto_merge_prefers_rebase() {
    let (ctx, mock) = test_engine_context_with(test_config());
    mock.set_permission("alice", Permission::Write);
    mock.set_permission("carol", Permission::Write);
    mock.add_review("carol", ReviewState::Approved, 1);
    mock.add_check("build", CheckStatus::Completed, Some(CheckConclusion::Success));
    mock.set_allowed_methods(vec![MergeMethod::Merge, MergeMethod::Rebase]);

    post_and_run(&ctx, &mock, "alice", "/merge auto").await.unwrap();

    assert_eq!(mock.merged_with(), Some(MergeMethod::Rebase));
}

#[tokio::test]
async fn merge_with_unavailable_method_fails() {
    let (ctx, mock) = test_engine_context_with(test_config());
    mock.set_permission("alice", Permission::Write);
    mock.set_permission("carol", Permission::Write);
    mock.add_review("carol", ReviewState::Approved, 1);
    mock.add_check("build", CheckStatus::Completed, Some(CheckConclusion::Success));
    mock.set_allowed_methods(vec![MergeMethod::Merge]);

    post_and_run(&ctx, &mock, "alice", "/merge squash").await.unwrap();

    assert_eq!(mock.merged_with(), None);
    assert!(mock
        .last_comment()
        .contains("merge method `squash` is not available"));
}

#[tokio::test]
async fn lgtm_is_not_allowed_inside_a_batch() {
    let (ctx, mock) = test_engine_context_with(test_config());
    mock.set_permission("alice", Permission::Write);

    post_and_run(&ctx, &mock, "alice", "/lgtm\n/rebase").await.unwrap();

    assert!(mock.reviews().is_empty());
    assert_eq!(mock.branch_updates(), 1);
    assert!(mock
        .last_comment()
        .contains("/lgtm ❌ not allowed in a multi-command batch"));
}

#[tokio::test]
async fn commands_on_closed_pr_are_rejected() {
    let (ctx, mock) = test_engine_context_with(test_config());
    mock.set_permission("alice", Permission::Write);
    mock.with_pr(|pr| pr.status = PullRequestStatus::Closed);

    post_and_run(&ctx, &mock, "alice", "/rebase").await.unwrap();

    assert_eq!(mock.branch_updates(), 0);
    assert!(mock
        .last_comment()
        .contains("requires an open pull request (currently closed)"));
}

#[tokio::test]
async fn check_status_reports_approvals_and_failures() {
    let (ctx, mock) = test_engine_context_with(test_config());
    mock.set_permission("alice", Permission::Write);
    mock.set_permission("carol", Permission::Write);
    mock.add_review("carol", ReviewState::Approved, 1);
    mock.add_check("build", CheckStatus::Completed, Some(CheckConclusion::Failure));

    post_and_run(&ctx, &mock, "alice", "/check").await.unwrap();

    let comment = mock.last_comment();
    assert!(comment.contains("1/1 approvals, ready to merge"));
    assert!(comment.contains("Approved by: carol"));
    assert!(comment.contains("build"));
}

#[tokio::test]
async fn retest_rerequests_failing_checks_only() {
    let (ctx, mock) = test_engine_context_with(test_config());
    mock.add_check("build", CheckStatus::Completed, Some(CheckConclusion::Failure));
    mock.add_check("lint", CheckStatus::Completed, Some(CheckConclusion::Success));
    mock.add_check("deploy", CheckStatus::InProgress, None);

    post_and_run(&ctx, &mock, "alice", "/retest").await.unwrap();

    assert_eq!(mock.rerequested_checks(), vec!["build"]);
    assert!(mock.last_comment().contains("Re-requested 1 failing check"));
}

#[tokio::test]
async fn labels_are_added_and_removed() {
    let (ctx, mock) = test_engine_context_with(test_config());

    post_and_run(&ctx, &mock, "alice", "/label bug needs-triage")
        .await
        .unwrap();
    assert_eq!(mock.labels(), vec!["bug", "needs-triage"]);

    post_and_run(&ctx, &mock, "alice", "/unlabel bug").await.unwrap();
    assert_eq!(mock.labels(), vec!["needs-triage"]);
}

#[tokio::test]
async fn unknown_command_gets_a_parse_error_comment() {
    let (ctx, mock) = test_engine_context_with(test_config());

    post_and_run(&ctx, &mock, "alice", "/frobnicate").await.unwrap();

    assert!(mock
        .last_comment()
        .contains("unknown command `frobnicate`"));
}

#[tokio::test]
async fn plain_comments_are_not_commands() {
    let (ctx, mock) = test_engine_context_with(test_config());

    post_and_run(&ctx, &mock, "alice", "Looks good to me!").await.unwrap();

    assert!(mock.posted_comments().is_empty());
}

#[tokio::test]
async fn cherry_pick_to_missing_branch_fails_with_comment() {
    let (ctx, mock) = test_engine_context_with(test_config());
    mock.set_permission("dan", Permission::Admin);
    mock.with_pr(|pr| {
        pr.status = PullRequestStatus::Merged;
        pr.merge_commit_sha = Some("merge-sha".to_string().into());
    });

    // The failure is reported as a comment; the job itself does not error.
    post_and_run(&ctx, &mock, "dan", "/cherry-pick no-such-branch")
        .await
        .unwrap();
    assert!(mock.created_prs().is_empty());
    assert!(mock
        .last_comment()
        .contains("branch `no-such-branch` does not exist"));
}

#[tokio::test]
async fn lifecycle_events_are_recorded_only() {
    let (ctx, mock) = test_engine_context_with(test_config());
    let event = Event {
        platform: PlatformKind::Github,
        repository: ctx.client.repository().clone(),
        pr_number: 1.into(),
        sender: "alice".to_string(),
        delivery_id: "delivery-2".to_string(),
        payload: EventPayload::Lifecycle(crate::engine::event::LifecycleAction::Opened),
    };
    handlers::handle_job(&ctx, JobQueue::detached(), Job::new(event))
        .await
        .unwrap();
    assert!(mock.posted_comments().is_empty());
}
