//! GitHub client backed by the REST v3 API.

use anyhow::{anyhow, Context};
use chrono::{DateTime, Utc};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use url::Url;

use crate::config::{Config, Secret};
use crate::platform::gitops::Git;
use crate::platform::{
    CheckConclusion, CheckRun, CheckStatus, CherryPickError, CommitSha, MergeError, MergeMethod,
    Permission, PlatformClient, PrComment, PullRequest, PullRequestNumber, PullRequestStatus,
    Review, ReviewAction, ReviewState, RepoName,
};

const DEFAULT_BASE_URL: &str = "https://api.github.com";
const PAGE_SIZE: usize = 100;

pub struct GithubClient {
    client: reqwest::Client,
    base_url: Url,
    repo: RepoName,
    token: Option<Secret>,
    comment_token: Option<Secret>,
    /// Present when cherry-picks are applied through the git CLI.
    git: Option<Git>,
}

impl GithubClient {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let base_url = if config.base_url.is_empty() {
            DEFAULT_BASE_URL
        } else {
            config.base_url.as_str()
        };
        let base_url: Url = base_url.parse().context("Invalid GitHub base URL")?;
        let client = reqwest::Client::builder()
            .timeout(config.platform_timeout())
            .user_agent("pr-cli")
            .build()
            .context("Cannot build HTTP client")?;
        let git = if config.use_git_cli_for_cherry_pick {
            Some(Git::try_init()?)
        } else {
            None
        };
        Ok(Self {
            client,
            base_url,
            repo: config.repo_name(),
            token: config.token.clone(),
            comment_token: config.comment_token.clone(),
            git,
        })
    }

    fn repo_path(&self, rest: &str) -> String {
        format!("repos/{}/{}/{rest}", self.repo.owner(), self.repo.name())
    }

    fn request(&self, method: Method, path: &str) -> anyhow::Result<RequestBuilder> {
        self.request_as(method, path, self.token.as_ref())
    }

    /// Comments go through the dedicated comment identity when configured.
    fn comment_request(&self, method: Method, path: &str) -> anyhow::Result<RequestBuilder> {
        let token = self.comment_token.as_ref().or(self.token.as_ref());
        self.request_as(method, path, token)
    }

    fn request_as(
        &self,
        method: Method,
        path: &str,
        token: Option<&Secret>,
    ) -> anyhow::Result<RequestBuilder> {
        let url = self
            .base_url
            .join(path)
            .with_context(|| format!("Invalid request path `{path}`"))?;
        let mut builder = self
            .client
            .request(method, url)
            .header("accept", "application/vnd.github+json");
        if let Some(token) = token {
            builder = builder.bearer_auth(token.expose());
        }
        Ok(builder)
    }
}

async fn send(builder: RequestBuilder) -> anyhow::Result<Response> {
    let response = builder.send().await.context("GitHub request failed")?;
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        let body = response.text().await.unwrap_or_default();
        Err(anyhow!("GitHub request failed with {status}: {body}"))
    }
}

/// The `message` field of a GitHub error body, when present.
async fn error_message(response: Response) -> String {
    #[derive(serde::Deserialize)]
    struct ErrorBody {
        message: String,
    }
    let status = response.status();
    match response.json::<ErrorBody>().await {
        Ok(body) => body.message,
        Err(_) => format!("HTTP {status}"),
    }
}

mod payload {
    use super::*;

    #[derive(serde::Deserialize)]
    pub struct User {
        pub login: String,
    }

    #[derive(serde::Deserialize)]
    pub struct GitRef {
        #[serde(rename = "ref")]
        pub name: String,
        pub sha: String,
    }

    #[derive(serde::Deserialize)]
    pub struct PullRequest {
        pub number: u64,
        pub title: String,
        pub user: User,
        pub head: GitRef,
        pub base: GitRef,
        pub state: String,
        #[serde(default)]
        pub draft: bool,
        #[serde(default)]
        pub merged: bool,
        pub merge_commit_sha: Option<String>,
    }

    #[derive(serde::Deserialize)]
    pub struct Comment {
        pub id: u64,
        pub user: User,
        pub body: Option<String>,
    }

    #[derive(serde::Deserialize)]
    pub struct Review {
        pub id: u64,
        pub user: User,
        pub state: String,
        pub submitted_at: Option<DateTime<Utc>>,
    }

    #[derive(serde::Deserialize)]
    pub struct CheckRuns {
        pub check_runs: Vec<CheckRun>,
    }

    #[derive(serde::Deserialize)]
    pub struct CheckRun {
        pub id: u64,
        pub name: String,
        pub status: String,
        pub conclusion: Option<String>,
        pub html_url: Option<String>,
    }

    #[derive(serde::Deserialize)]
    pub struct PermissionLevel {
        pub permission: String,
    }

    #[derive(serde::Deserialize)]
    pub struct RepoSettings {
        #[serde(default = "default_true")]
        pub allow_merge_commit: bool,
        #[serde(default = "default_true")]
        pub allow_squash_merge: bool,
        #[serde(default = "default_true")]
        pub allow_rebase_merge: bool,
    }

    fn default_true() -> bool {
        true
    }

    #[derive(serde::Deserialize)]
    pub struct MergeResult {
        pub sha: String,
    }

    #[derive(serde::Deserialize)]
    pub struct Branch {
        pub commit: BranchCommit,
    }

    #[derive(serde::Deserialize)]
    pub struct BranchCommit {
        pub sha: String,
    }
}

fn convert_pull_request(pr: payload::PullRequest) -> PullRequest {
    let status = if pr.merged {
        PullRequestStatus::Merged
    } else {
        match pr.state.as_str() {
            "open" => PullRequestStatus::Open,
            "closed" => PullRequestStatus::Closed,
            _ => PullRequestStatus::Unknown,
        }
    };
    PullRequest {
        number: pr.number.into(),
        title: pr.title,
        author: pr.user.login,
        head_ref: pr.head.name,
        head_sha: CommitSha(pr.head.sha),
        base_ref: pr.base.name,
        status,
        draft: pr.draft,
        merge_commit_sha: pr.merge_commit_sha.map(CommitSha),
    }
}

fn convert_review(review: payload::Review) -> Option<Review> {
    let state = match review.state.as_str() {
        "APPROVED" => ReviewState::Approved,
        "CHANGES_REQUESTED" => ReviewState::ChangesRequested,
        "DISMISSED" => ReviewState::Dismissed,
        "COMMENTED" => ReviewState::Commented,
        // Pending and other states carry no vote.
        _ => return None,
    };
    Some(Review {
        id: review.id,
        reviewer: review.user.login,
        state,
        submitted_at: review.submitted_at.unwrap_or_default(),
    })
}

fn convert_check_run(run: payload::CheckRun) -> CheckRun {
    let status = match run.status.as_str() {
        "queued" => CheckStatus::Queued,
        "in_progress" => CheckStatus::InProgress,
        _ => CheckStatus::Completed,
    };
    let conclusion = run.conclusion.as_deref().and_then(|conclusion| {
        Some(match conclusion {
            "success" => CheckConclusion::Success,
            "failure" => CheckConclusion::Failure,
            "neutral" => CheckConclusion::Neutral,
            "skipped" => CheckConclusion::Skipped,
            "cancelled" => CheckConclusion::Cancelled,
            "timed_out" => CheckConclusion::TimedOut,
            "action_required" => CheckConclusion::ActionRequired,
            _ => return None,
        })
    });
    CheckRun {
        id: run.id,
        name: run.name,
        status,
        conclusion,
        url: run.html_url.unwrap_or_default(),
    }
}

#[async_trait::async_trait]
impl PlatformClient for GithubClient {
    fn repository(&self) -> &RepoName {
        &self.repo
    }

    async fn get_pull_request(&self, pr: PullRequestNumber) -> anyhow::Result<PullRequest> {
        let response = send(self.request(Method::GET, &self.repo_path(&format!("pulls/{pr}")))?)
            .await
            .with_context(|| format!("Cannot fetch PR {pr}"))?;
        let payload: payload::PullRequest = response.json().await?;
        Ok(convert_pull_request(payload))
    }

    async fn list_comments(&self, pr: PullRequestNumber) -> anyhow::Result<Vec<PrComment>> {
        let mut comments = vec![];
        for page in 1.. {
            let path = self.repo_path(&format!(
                "issues/{pr}/comments?per_page={PAGE_SIZE}&page={page}"
            ));
            let response = send(self.request(Method::GET, &path)?)
                .await
                .with_context(|| format!("Cannot list comments of PR {pr}"))?;
            let batch: Vec<payload::Comment> = response.json().await?;
            let batch_len = batch.len();
            comments.extend(batch.into_iter().map(|comment| PrComment {
                id: comment.id,
                author: comment.user.login,
                body: comment.body.unwrap_or_default(),
            }));
            if batch_len < PAGE_SIZE {
                break;
            }
        }
        Ok(comments)
    }

    async fn post_comment(&self, pr: PullRequestNumber, text: &str) -> anyhow::Result<()> {
        let path = self.repo_path(&format!("issues/{pr}/comments"));
        send(
            self.comment_request(Method::POST, &path)?
                .json(&serde_json::json!({"body": text})),
        )
        .await
        .with_context(|| format!("Cannot post comment to PR {pr}"))?;
        Ok(())
    }

    async fn list_reviews(&self, pr: PullRequestNumber) -> anyhow::Result<Vec<Review>> {
        let mut reviews = vec![];
        for page in 1.. {
            let path = self.repo_path(&format!(
                "pulls/{pr}/reviews?per_page={PAGE_SIZE}&page={page}"
            ));
            let response = send(self.request(Method::GET, &path)?)
                .await
                .with_context(|| format!("Cannot list reviews of PR {pr}"))?;
            let batch: Vec<payload::Review> = response.json().await?;
            let batch_len = batch.len();
            reviews.extend(batch.into_iter().filter_map(convert_review));
            if batch_len < PAGE_SIZE {
                break;
            }
        }
        Ok(reviews)
    }

    async fn submit_review(
        &self,
        pr: PullRequestNumber,
        action: ReviewAction,
        body: &str,
    ) -> anyhow::Result<()> {
        let event = match action {
            ReviewAction::Approve => "APPROVE",
            ReviewAction::Comment => "COMMENT",
            ReviewAction::RequestChanges => "REQUEST_CHANGES",
        };
        let path = self.repo_path(&format!("pulls/{pr}/reviews"));
        send(
            self.request(Method::POST, &path)?
                .json(&serde_json::json!({"event": event, "body": body})),
        )
        .await
        .with_context(|| format!("Cannot submit review on PR {pr}"))?;
        Ok(())
    }

    async fn dismiss_review(
        &self,
        pr: PullRequestNumber,
        review_id: u64,
        message: &str,
    ) -> anyhow::Result<()> {
        let path = self.repo_path(&format!("pulls/{pr}/reviews/{review_id}/dismissals"));
        send(
            self.request(Method::PUT, &path)?
                .json(&serde_json::json!({"message": message})),
        )
        .await
        .with_context(|| format!("Cannot dismiss review {review_id} on PR {pr}"))?;
        Ok(())
    }

    async fn user_permission(&self, login: &str) -> anyhow::Result<Permission> {
        let path = self.repo_path(&format!("collaborators/{login}/permission"));
        let response = send(self.request(Method::GET, &path)?)
            .await
            .with_context(|| format!("Cannot fetch permission of {login}"))?;
        let payload: payload::PermissionLevel = response.json().await?;
        Ok(match payload.permission.as_str() {
            "admin" => Permission::Admin,
            "maintain" | "write" => Permission::Write,
            "triage" | "read" => Permission::Read,
            _ => Permission::None,
        })
    }

    async fn request_reviewers(
        &self,
        pr: PullRequestNumber,
        logins: &[String],
    ) -> anyhow::Result<()> {
        let path = self.repo_path(&format!("pulls/{pr}/requested_reviewers"));
        send(
            self.request(Method::POST, &path)?
                .json(&serde_json::json!({"reviewers": logins})),
        )
        .await
        .with_context(|| format!("Cannot request reviewers on PR {pr}"))?;
        Ok(())
    }

    async fn remove_reviewers(
        &self,
        pr: PullRequestNumber,
        logins: &[String],
    ) -> anyhow::Result<()> {
        let path = self.repo_path(&format!("pulls/{pr}/requested_reviewers"));
        send(
            self.request(Method::DELETE, &path)?
                .json(&serde_json::json!({"reviewers": logins})),
        )
        .await
        .with_context(|| format!("Cannot remove reviewers from PR {pr}"))?;
        Ok(())
    }

    async fn add_labels(&self, pr: PullRequestNumber, labels: &[String]) -> anyhow::Result<()> {
        let path = self.repo_path(&format!("issues/{pr}/labels"));
        send(
            self.request(Method::POST, &path)?
                .json(&serde_json::json!({"labels": labels})),
        )
        .await
        .with_context(|| format!("Cannot add labels to PR {pr}"))?;
        Ok(())
    }

    async fn remove_labels(&self, pr: PullRequestNumber, labels: &[String]) -> anyhow::Result<()> {
        for label in labels {
            let path = self.repo_path(&format!("issues/{pr}/labels/{label}"));
            let response = self
                .request(Method::DELETE, &path)?
                .send()
                .await
                .context("GitHub request failed")?;
            // Removing an absent label is a no-op.
            if !response.status().is_success() && response.status() != StatusCode::NOT_FOUND {
                return Err(anyhow!(
                    "Cannot remove label `{label}` from PR {pr}: {}",
                    error_message(response).await
                ));
            }
        }
        Ok(())
    }

    async fn list_check_runs(&self, sha: &CommitSha) -> anyhow::Result<Vec<CheckRun>> {
        let path = self.repo_path(&format!("commits/{sha}/check-runs?per_page={PAGE_SIZE}"));
        let response = send(self.request(Method::GET, &path)?)
            .await
            .with_context(|| format!("Cannot list check runs of {sha}"))?;
        let payload: payload::CheckRuns = response.json().await?;
        Ok(payload.check_runs.into_iter().map(convert_check_run).collect())
    }

    async fn rerequest_check(&self, check: &CheckRun) -> anyhow::Result<()> {
        let path = self.repo_path(&format!("check-runs/{}/rerequest", check.id));
        send(self.request(Method::POST, &path)?)
            .await
            .with_context(|| format!("Cannot re-request check `{}`", check.name))?;
        Ok(())
    }

    async fn allowed_merge_methods(&self) -> anyhow::Result<Vec<MergeMethod>> {
        let path = format!("repos/{}/{}", self.repo.owner(), self.repo.name());
        let response = send(self.request(Method::GET, &path)?)
            .await
            .context("Cannot fetch repository settings")?;
        let settings: payload::RepoSettings = response.json().await?;
        let mut methods = vec![];
        if settings.allow_merge_commit {
            methods.push(MergeMethod::Merge);
        }
        if settings.allow_squash_merge {
            methods.push(MergeMethod::Squash);
        }
        if settings.allow_rebase_merge {
            methods.push(MergeMethod::Rebase);
        }
        Ok(methods)
    }

    async fn merge_pull_request(
        &self,
        pr: PullRequestNumber,
        method: MergeMethod,
    ) -> Result<CommitSha, MergeError> {
        let path = self.repo_path(&format!("pulls/{pr}/merge"));
        let response = self
            .request(Method::PUT, &path)
            .map_err(MergeError::Network)?
            .json(&serde_json::json!({"merge_method": method.to_string()}))
            .send()
            .await
            .map_err(|error| MergeError::Network(error.into()))?;

        match response.status() {
            status if status.is_success() => {
                let result: payload::MergeResult = response
                    .json()
                    .await
                    .map_err(|error| MergeError::Network(error.into()))?;
                Ok(CommitSha(result.sha))
            }
            StatusCode::METHOD_NOT_ALLOWED | StatusCode::CONFLICT => {
                let message = error_message(response).await;
                if message.to_lowercase().contains("already merged") {
                    Err(MergeError::AlreadyMerged)
                } else {
                    Err(MergeError::NotMergeable(message))
                }
            }
            status => Err(MergeError::Network(anyhow!(
                "GitHub merge request failed with {status}"
            ))),
        }
    }

    async fn update_branch(&self, pr: PullRequestNumber) -> anyhow::Result<()> {
        let path = self.repo_path(&format!("pulls/{pr}/update-branch"));
        send(self.request(Method::PUT, &path)?)
            .await
            .with_context(|| format!("Cannot update branch of PR {pr}"))?;
        Ok(())
    }

    async fn close_pull_request(&self, pr: PullRequestNumber) -> anyhow::Result<()> {
        let path = self.repo_path(&format!("pulls/{pr}"));
        send(
            self.request(Method::PATCH, &path)?
                .json(&serde_json::json!({"state": "closed"})),
        )
        .await
        .with_context(|| format!("Cannot close PR {pr}"))?;
        Ok(())
    }

    async fn get_branch_sha(&self, branch: &str) -> anyhow::Result<Option<CommitSha>> {
        let path = self.repo_path(&format!("branches/{branch}"));
        let response = self
            .request(Method::GET, &path)?
            .send()
            .await
            .context("GitHub request failed")?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(anyhow!(
                "Cannot fetch branch `{branch}`: {}",
                error_message(response).await
            ));
        }
        let payload: payload::Branch = response.json().await?;
        Ok(Some(CommitSha(payload.commit.sha)))
    }

    async fn create_branch(&self, name: &str, from: &CommitSha) -> anyhow::Result<()> {
        let path = self.repo_path("git/refs");
        send(
            self.request(Method::POST, &path)?
                .json(&serde_json::json!({"ref": format!("refs/heads/{name}"), "sha": from.0})),
        )
        .await
        .with_context(|| format!("Cannot create branch `{name}`"))?;
        Ok(())
    }

    async fn cherry_pick_apply(
        &self,
        commit: &CommitSha,
        branch: &str,
    ) -> Result<(), CherryPickError> {
        let Some(git) = &self.git else {
            return Err(CherryPickError::Unsupported(
                "set `use_git_cli_for_cherry_pick` to apply cherry-picks on GitHub".to_string(),
            ));
        };
        let token = self
            .token
            .as_ref()
            .ok_or_else(|| CherryPickError::Unsupported("an API token is required".to_string()))?;
        let url = format!(
            "https://x-access-token:{}@github.com/{}.git",
            token.expose(),
            self.repo
        );
        git.cherry_pick_onto(&url, commit, branch).await
    }

    async fn create_pull_request(
        &self,
        head: &str,
        base: &str,
        title: &str,
        body: &str,
    ) -> anyhow::Result<PullRequest> {
        let path = self.repo_path("pulls");
        let response = send(self.request(Method::POST, &path)?.json(&serde_json::json!({
            "title": title,
            "head": head,
            "base": base,
            "body": body,
        })))
        .await
        .with_context(|| format!("Cannot open PR for `{head}` into `{base}`"))?;
        let payload: payload::PullRequest = response.json().await?;
        Ok(convert_pull_request(payload))
    }
}
