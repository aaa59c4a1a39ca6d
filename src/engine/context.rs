use std::sync::Arc;

use anyhow::Context;

use crate::config::Config;
use crate::engine::process::JobQueue;
use crate::platform::{
    CommitSha, PlatformClient, PrComment, PullRequest, PullRequestNumber, PullRequestStatus,
    RepoName,
};
use crate::results::ResultSink;
use crate::server::metrics::Metrics;

/// Long-lived state shared by all jobs, constructed once at startup.
pub struct EngineContext {
    pub config: Arc<Config>,
    pub client: Arc<dyn PlatformClient>,
    pub results: ResultSink,
    pub metrics: Arc<Metrics>,
}

impl EngineContext {
    pub fn new(
        config: Arc<Config>,
        client: Arc<dyn PlatformClient>,
        results: ResultSink,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            config,
            client,
            results,
            metrics,
        }
    }
}

/// Per-job state handed to validators and command handlers.
///
/// The pull request and its comments are fetched lazily and cached for the
/// lifetime of the job; the comment cache is re-fetched only on explicit
/// invalidation.
pub struct JobContext {
    pub repo: RepoName,
    pub pr_number: PullRequestNumber,
    pub client: Arc<dyn PlatformClient>,
    pub config: Arc<Config>,
    pub results: ResultSink,
    pub queue: JobQueue,
    /// The user that must have posted the trigger comment.
    pub sender: String,
    /// Normalized body of the trigger comment.
    pub trigger: String,
    pr: Option<PullRequest>,
    comments: Option<Vec<PrComment>>,
}

impl JobContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        repo: RepoName,
        pr_number: PullRequestNumber,
        client: Arc<dyn PlatformClient>,
        config: Arc<Config>,
        results: ResultSink,
        queue: JobQueue,
        sender: String,
        trigger: String,
    ) -> Self {
        Self {
            repo,
            pr_number,
            client,
            config,
            results,
            queue,
            sender,
            trigger,
            pr: None,
            comments: None,
        }
    }

    /// The pull request this job operates on, fetched on first use.
    pub async fn pull_request(&mut self) -> anyhow::Result<&PullRequest> {
        match self.pr {
            Some(ref pr) => Ok(pr),
            None => {
                let pr = self
                    .client
                    .get_pull_request(self.pr_number)
                    .await
                    .with_context(|| format!("Cannot get PR {}#{}", self.repo, self.pr_number))?;
                Ok(self.pr.insert(pr))
            }
        }
    }

    /// Records a state transition produced by a handler (e.g. a merge), so
    /// later steps of the same job observe it without a re-fetch.
    pub fn record_pr_status(&mut self, status: PullRequestStatus) {
        if let Some(pr) = self.pr.as_mut() {
            pr.status = status;
        }
    }

    /// Records a successful merge, including the merge commit, so the
    /// post-merge cherry-pick path picks the right commit without a re-fetch.
    pub fn record_merged(&mut self, sha: CommitSha) {
        if let Some(pr) = self.pr.as_mut() {
            pr.status = PullRequestStatus::Merged;
            pr.merge_commit_sha = Some(sha);
        }
    }

    /// All comments on the pull request, fetched on first use.
    pub async fn comments(&mut self) -> anyhow::Result<&[PrComment]> {
        match self.comments {
            Some(ref comments) => Ok(comments.as_slice()),
            None => {
                let comments = self
                    .client
                    .list_comments(self.pr_number)
                    .await
                    .with_context(|| {
                        format!("Cannot list comments of PR {}#{}", self.repo, self.pr_number)
                    })?;
                Ok(self.comments.insert(comments).as_slice())
            }
        }
    }

    /// Drops the comment cache so that the next access re-fetches.
    pub fn invalidate_comments(&mut self) {
        self.comments = None;
    }
}
