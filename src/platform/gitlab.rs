//! GitLab client backed by the REST v4 API. Pull-request wording maps onto
//! merge requests; approvals stand in for reviews.

use anyhow::{anyhow, Context};
use chrono::DateTime;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use url::Url;

use crate::config::{Config, Secret};
use crate::platform::{
    CheckConclusion, CheckRun, CheckStatus, CherryPickError, CommitSha, MergeError, MergeMethod,
    Permission, PlatformClient, PrComment, PullRequest, PullRequestNumber, PullRequestStatus,
    Review, ReviewAction, ReviewState, RepoName,
};

const DEFAULT_BASE_URL: &str = "https://gitlab.com";
const PAGE_SIZE: usize = 100;

pub struct GitlabClient {
    client: reqwest::Client,
    base_url: Url,
    repo: RepoName,
    token: Option<Secret>,
    comment_token: Option<Secret>,
}

impl GitlabClient {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let base_url = if config.base_url.is_empty() {
            DEFAULT_BASE_URL
        } else {
            config.base_url.as_str()
        };
        let base_url: Url = base_url.parse().context("Invalid GitLab base URL")?;
        let client = reqwest::Client::builder()
            .timeout(config.platform_timeout())
            .user_agent("pr-cli")
            .build()
            .context("Cannot build HTTP client")?;
        Ok(Self {
            client,
            base_url,
            repo: config.repo_name(),
            token: config.token.clone(),
            comment_token: config.comment_token.clone(),
        })
    }

    /// URL-encoded `owner/name` project identifier.
    fn project_id(&self) -> String {
        format!("{}%2F{}", self.repo.owner(), self.repo.name())
    }

    fn project_path(&self, rest: &str) -> String {
        format!("api/v4/projects/{}/{rest}", self.project_id())
    }

    fn request(&self, method: Method, path: &str) -> anyhow::Result<RequestBuilder> {
        self.request_as(method, path, self.token.as_ref())
    }

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
        let mut builder = self.client.request(method, url);
        if let Some(token) = token {
            builder = builder.header("private-token", token.expose());
        }
        Ok(builder)
    }

    async fn lookup_user_ids(&self, logins: &[String]) -> anyhow::Result<Vec<u64>> {
        let mut ids = vec![];
        for login in logins {
            let response = send(self.request(
                Method::GET,
                &format!("api/v4/users?username={login}"),
            )?)
            .await
            .with_context(|| format!("Cannot look up user {login}"))?;
            let users: Vec<payload::UserWithId> = response.json().await?;
            let user = users
                .into_iter()
                .find(|user| user.username == *login)
                .ok_or_else(|| anyhow!("User `{login}` not found"))?;
            ids.push(user.id);
        }
        Ok(ids)
    }

    async fn merge_request(&self, pr: PullRequestNumber) -> anyhow::Result<payload::MergeRequest> {
        let response = send(self.request(Method::GET, &self.project_path(&format!(
            "merge_requests/{pr}"
        )))?)
        .await
        .with_context(|| format!("Cannot fetch MR {pr}"))?;
        Ok(response.json().await?)
    }
}

async fn send(builder: RequestBuilder) -> anyhow::Result<Response> {
    let response = builder.send().await.context("GitLab request failed")?;
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        let body = response.text().await.unwrap_or_default();
        Err(anyhow!("GitLab request failed with {status}: {body}"))
    }
}

mod payload {
    #[derive(serde::Deserialize)]
    pub struct User {
        pub username: String,
    }

    #[derive(serde::Deserialize)]
    pub struct UserWithId {
        pub id: u64,
        pub username: String,
    }

    #[derive(serde::Deserialize)]
    pub struct MergeRequest {
        pub iid: u64,
        pub title: String,
        pub author: User,
        pub source_branch: String,
        pub target_branch: String,
        pub sha: Option<String>,
        pub state: String,
        #[serde(default)]
        pub draft: bool,
        pub merge_commit_sha: Option<String>,
        #[serde(default)]
        pub reviewers: Vec<UserWithId>,
    }

    #[derive(serde::Deserialize)]
    pub struct Note {
        pub id: u64,
        pub author: User,
        pub body: String,
        #[serde(default)]
        pub system: bool,
    }

    #[derive(serde::Deserialize)]
    pub struct Approvals {
        #[serde(default)]
        pub approved_by: Vec<ApprovedBy>,
    }

    #[derive(serde::Deserialize)]
    pub struct ApprovedBy {
        pub user: User,
    }

    #[derive(serde::Deserialize)]
    pub struct Member {
        pub username: String,
        pub access_level: u32,
    }

    #[derive(serde::Deserialize)]
    pub struct CommitStatus {
        pub id: u64,
        pub name: Option<String>,
        pub status: String,
        pub target_url: Option<String>,
    }

    #[derive(serde::Deserialize)]
    pub struct ProjectSettings {
        #[serde(default)]
        pub merge_method: Option<String>,
        #[serde(default)]
        pub squash_option: Option<String>,
    }

    #[derive(serde::Deserialize)]
    pub struct MergeResult {
        pub merge_commit_sha: Option<String>,
        pub sha: Option<String>,
    }

    #[derive(serde::Deserialize)]
    pub struct Branch {
        pub commit: BranchCommit,
    }

    #[derive(serde::Deserialize)]
    pub struct BranchCommit {
        pub id: String,
    }
}

fn convert_merge_request(mr: payload::MergeRequest) -> PullRequest {
    let status = match mr.state.as_str() {
        "opened" => PullRequestStatus::Open,
        "closed" => PullRequestStatus::Closed,
        "merged" => PullRequestStatus::Merged,
        _ => PullRequestStatus::Unknown,
    };
    PullRequest {
        number: mr.iid.into(),
        title: mr.title,
        author: mr.author.username,
        head_ref: mr.source_branch,
        head_sha: CommitSha(mr.sha.unwrap_or_default()),
        base_ref: mr.target_branch,
        status,
        draft: mr.draft,
        merge_commit_sha: mr.merge_commit_sha.map(CommitSha),
    }
}

fn convert_commit_status(status: payload::CommitStatus) -> CheckRun {
    let (check_status, conclusion) = match status.status.as_str() {
        "pending" | "created" | "waiting_for_resource" => (CheckStatus::Queued, None),
        "running" => (CheckStatus::InProgress, None),
        "success" => (CheckStatus::Completed, Some(CheckConclusion::Success)),
        "failed" => (CheckStatus::Completed, Some(CheckConclusion::Failure)),
        "canceled" => (CheckStatus::Completed, Some(CheckConclusion::Cancelled)),
        "skipped" => (CheckStatus::Completed, Some(CheckConclusion::Skipped)),
        "manual" => (CheckStatus::Completed, Some(CheckConclusion::ActionRequired)),
        _ => (CheckStatus::Completed, None),
    };
    CheckRun {
        id: status.id,
        name: status.name.unwrap_or_default(),
        status: check_status,
        conclusion,
        url: status.target_url.unwrap_or_default(),
    }
}

#[async_trait::async_trait]
impl PlatformClient for GitlabClient {
    fn repository(&self) -> &RepoName {
        &self.repo
    }

    async fn get_pull_request(&self, pr: PullRequestNumber) -> anyhow::Result<PullRequest> {
        Ok(convert_merge_request(self.merge_request(pr).await?))
    }

    async fn list_comments(&self, pr: PullRequestNumber) -> anyhow::Result<Vec<PrComment>> {
        let mut comments = vec![];
        for page in 1.. {
            let path = self.project_path(&format!(
                "merge_requests/{pr}/notes?sort=asc&per_page={PAGE_SIZE}&page={page}"
            ));
            let response = send(self.request(Method::GET, &path)?)
                .await
                .with_context(|| format!("Cannot list notes of MR {pr}"))?;
            let batch: Vec<payload::Note> = response.json().await?;
            let batch_len = batch.len();
            comments.extend(
                batch
                    .into_iter()
                    .filter(|note| !note.system)
                    .map(|note| PrComment {
                        id: note.id,
                        author: note.author.username,
                        body: note.body,
                    }),
            );
            if batch_len < PAGE_SIZE {
                break;
            }
        }
        Ok(comments)
    }

    async fn post_comment(&self, pr: PullRequestNumber, text: &str) -> anyhow::Result<()> {
        let path = self.project_path(&format!("merge_requests/{pr}/notes"));
        send(
            self.comment_request(Method::POST, &path)?
                .json(&serde_json::json!({"body": text})),
        )
        .await
        .with_context(|| format!("Cannot post note to MR {pr}"))?;
        Ok(())
    }

    /// GitLab exposes approvals, not timestamped reviews; each active approval
    /// becomes an `approved` review with a synthetic submission order.
    async fn list_reviews(&self, pr: PullRequestNumber) -> anyhow::Result<Vec<Review>> {
        let path = self.project_path(&format!("merge_requests/{pr}/approvals"));
        let response = send(self.request(Method::GET, &path)?)
            .await
            .with_context(|| format!("Cannot list approvals of MR {pr}"))?;
        let approvals: payload::Approvals = response.json().await?;
        Ok(approvals
            .approved_by
            .into_iter()
            .enumerate()
            .map(|(index, approval)| Review {
                id: index as u64 + 1,
                reviewer: approval.user.username,
                state: ReviewState::Approved,
                submitted_at: DateTime::from_timestamp(index as i64, 0).unwrap_or_default(),
            })
            .collect())
    }

    async fn submit_review(
        &self,
        pr: PullRequestNumber,
        action: ReviewAction,
        body: &str,
    ) -> anyhow::Result<()> {
        match action {
            ReviewAction::Approve => {
                let path = self.project_path(&format!("merge_requests/{pr}/approve"));
                send(self.request(Method::POST, &path)?)
                    .await
                    .with_context(|| format!("Cannot approve MR {pr}"))?;
                Ok(())
            }
            // GitLab has no non-approving review event; leave a note instead.
            ReviewAction::Comment | ReviewAction::RequestChanges => {
                self.post_comment(pr, body).await
            }
        }
    }

    /// GitLab can only revoke the caller's own approval; the review id is
    /// ignored.
    async fn dismiss_review(
        &self,
        pr: PullRequestNumber,
        _review_id: u64,
        _message: &str,
    ) -> anyhow::Result<()> {
        let path = self.project_path(&format!("merge_requests/{pr}/unapprove"));
        send(self.request(Method::POST, &path)?)
            .await
            .with_context(|| format!("Cannot unapprove MR {pr}"))?;
        Ok(())
    }

    async fn user_permission(&self, login: &str) -> anyhow::Result<Permission> {
        let path = self.project_path(&format!("members/all?query={login}"));
        let response = send(self.request(Method::GET, &path)?)
            .await
            .with_context(|| format!("Cannot fetch membership of {login}"))?;
        let members: Vec<payload::Member> = response.json().await?;
        let Some(member) = members.into_iter().find(|member| member.username == login) else {
            return Ok(Permission::None);
        };
        Ok(match member.access_level {
            level if level >= 40 => Permission::Admin,
            level if level >= 30 => Permission::Write,
            level if level >= 20 => Permission::Read,
            _ => Permission::None,
        })
    }

    async fn request_reviewers(
        &self,
        pr: PullRequestNumber,
        logins: &[String],
    ) -> anyhow::Result<()> {
        let mut reviewer_ids: Vec<u64> = self
            .merge_request(pr)
            .await?
            .reviewers
            .into_iter()
            .map(|reviewer| reviewer.id)
            .collect();
        for id in self.lookup_user_ids(logins).await? {
            if !reviewer_ids.contains(&id) {
                reviewer_ids.push(id);
            }
        }
        let path = self.project_path(&format!("merge_requests/{pr}"));
        send(
            self.request(Method::PUT, &path)?
                .json(&serde_json::json!({"reviewer_ids": reviewer_ids})),
        )
        .await
        .with_context(|| format!("Cannot set reviewers of MR {pr}"))?;
        Ok(())
    }

    async fn remove_reviewers(
        &self,
        pr: PullRequestNumber,
        logins: &[String],
    ) -> anyhow::Result<()> {
        let reviewer_ids: Vec<u64> = self
            .merge_request(pr)
            .await?
            .reviewers
            .into_iter()
            .filter(|reviewer| !logins.contains(&reviewer.username))
            .map(|reviewer| reviewer.id)
            .collect();
        let path = self.project_path(&format!("merge_requests/{pr}"));
        send(
            self.request(Method::PUT, &path)?
                .json(&serde_json::json!({"reviewer_ids": reviewer_ids})),
        )
        .await
        .with_context(|| format!("Cannot set reviewers of MR {pr}"))?;
        Ok(())
    }

    async fn add_labels(&self, pr: PullRequestNumber, labels: &[String]) -> anyhow::Result<()> {
        let path = self.project_path(&format!("merge_requests/{pr}"));
        send(
            self.request(Method::PUT, &path)?
                .json(&serde_json::json!({"add_labels": labels.join(",")})),
        )
        .await
        .with_context(|| format!("Cannot add labels to MR {pr}"))?;
        Ok(())
    }

    async fn remove_labels(&self, pr: PullRequestNumber, labels: &[String]) -> anyhow::Result<()> {
        let path = self.project_path(&format!("merge_requests/{pr}"));
        send(
            self.request(Method::PUT, &path)?
                .json(&serde_json::json!({"remove_labels": labels.join(",")})),
        )
        .await
        .with_context(|| format!("Cannot remove labels from MR {pr}"))?;
        Ok(())
    }

    async fn list_check_runs(&self, sha: &CommitSha) -> anyhow::Result<Vec<CheckRun>> {
        let path = self.project_path(&format!(
            "repository/commits/{sha}/statuses?per_page={PAGE_SIZE}"
        ));
        let response = send(self.request(Method::GET, &path)?)
            .await
            .with_context(|| format!("Cannot list statuses of {sha}"))?;
        let statuses: Vec<payload::CommitStatus> = response.json().await?;
        Ok(statuses.into_iter().map(convert_commit_status).collect())
    }

    async fn rerequest_check(&self, check: &CheckRun) -> anyhow::Result<()> {
        let path = self.project_path(&format!("jobs/{}/retry", check.id));
        send(self.request(Method::POST, &path)?)
            .await
            .with_context(|| format!("Cannot retry job `{}`", check.name))?;
        Ok(())
    }

    async fn allowed_merge_methods(&self) -> anyhow::Result<Vec<MergeMethod>> {
        let path = format!("api/v4/projects/{}", self.project_id());
        let response = send(self.request(Method::GET, &path)?)
            .await
            .context("Cannot fetch project settings")?;
        let settings: payload::ProjectSettings = response.json().await?;
        let mut methods = match settings.merge_method.as_deref() {
            Some("ff") => vec![MergeMethod::Rebase],
            Some("rebase_merge") => vec![MergeMethod::Rebase, MergeMethod::Merge],
            _ => vec![MergeMethod::Merge],
        };
        if settings.squash_option.as_deref() != Some("never") {
            methods.push(MergeMethod::Squash);
        }
        Ok(methods)
    }

    async fn merge_pull_request(
        &self,
        pr: PullRequestNumber,
        method: MergeMethod,
    ) -> Result<CommitSha, MergeError> {
        let path = self.project_path(&format!("merge_requests/{pr}/merge"));
        let response = self
            .request(Method::PUT, &path)
            .map_err(MergeError::Network)?
            .json(&serde_json::json!({"squash": method == MergeMethod::Squash}))
            .send()
            .await
            .map_err(|error| MergeError::Network(error.into()))?;

        let status = response.status();
        if status.is_success() {
            let result: payload::MergeResult = response
                .json()
                .await
                .map_err(|error| MergeError::Network(error.into()))?;
            let sha = result
                .merge_commit_sha
                .or(result.sha)
                .ok_or_else(|| MergeError::Network(anyhow!("merge reply without a commit SHA")))?;
            return Ok(CommitSha(sha));
        }
        if status == StatusCode::METHOD_NOT_ALLOWED || status == StatusCode::CONFLICT {
            // GitLab replies 405 both for unmergeable and already-merged MRs.
            let merged = self
                .merge_request(pr)
                .await
                .map(|mr| mr.state == "merged")
                .unwrap_or(false);
            if merged {
                return Err(MergeError::AlreadyMerged);
            }
            return Err(MergeError::NotMergeable(format!(
                "GitLab refused the merge with {status}"
            )));
        }
        Err(MergeError::Network(anyhow!(
            "GitLab merge request failed with {status}"
        )))
    }

    async fn update_branch(&self, pr: PullRequestNumber) -> anyhow::Result<()> {
        let path = self.project_path(&format!("merge_requests/{pr}/rebase"));
        send(self.request(Method::PUT, &path)?)
            .await
            .with_context(|| format!("Cannot rebase MR {pr}"))?;
        Ok(())
    }

    async fn close_pull_request(&self, pr: PullRequestNumber) -> anyhow::Result<()> {
        let path = self.project_path(&format!("merge_requests/{pr}"));
        send(
            self.request(Method::PUT, &path)?
                .json(&serde_json::json!({"state_event": "close"})),
        )
        .await
        .with_context(|| format!("Cannot close MR {pr}"))?;
        Ok(())
    }

    async fn get_branch_sha(&self, branch: &str) -> anyhow::Result<Option<CommitSha>> {
        let encoded = branch.replace('/', "%2F");
        let path = self.project_path(&format!("repository/branches/{encoded}"));
        let response = self
            .request(Method::GET, &path)?
            .send()
            .await
            .context("GitLab request failed")?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(anyhow!(
                "Cannot fetch branch `{branch}`: HTTP {}",
                response.status()
            ));
        }
        let payload: payload::Branch = response.json().await?;
        Ok(Some(CommitSha(payload.commit.id)))
    }

    async fn create_branch(&self, name: &str, from: &CommitSha) -> anyhow::Result<()> {
        let path = self.project_path(&format!("repository/branches?branch={name}&ref={from}"));
        send(self.request(Method::POST, &path)?)
            .await
            .with_context(|| format!("Cannot create branch `{name}`"))?;
        Ok(())
    }

    /// GitLab cherry-picks natively through the commits API.
    async fn cherry_pick_apply(
        &self,
        commit: &CommitSha,
        branch: &str,
    ) -> Result<(), CherryPickError> {
        let path = self.project_path(&format!("repository/commits/{commit}/cherry_pick"));
        let response = self
            .request(Method::POST, &path)
            .map_err(CherryPickError::Network)?
            .json(&serde_json::json!({"branch": branch}))
            .send()
            .await
            .map_err(|error| CherryPickError::Network(error.into()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        match status {
            StatusCode::BAD_REQUEST | StatusCode::CONFLICT => Err(CherryPickError::Conflict {
                commit: commit.clone(),
                branch: branch.to_string(),
            }),
            StatusCode::NOT_FOUND => Err(CherryPickError::NoSuchBranch(branch.to_string())),
            status => Err(CherryPickError::Network(anyhow!(
                "GitLab cherry-pick failed with {status}"
            ))),
        }
    }

    async fn create_pull_request(
        &self,
        head: &str,
        base: &str,
        title: &str,
        body: &str,
    ) -> anyhow::Result<PullRequest> {
        let path = self.project_path("merge_requests");
        let response = send(self.request(Method::POST, &path)?.json(&serde_json::json!({
            "source_branch": head,
            "target_branch": base,
            "title": title,
            "description": body,
        })))
        .await
        .with_context(|| format!("Cannot open MR for `{head}` into `{base}`"))?;
        let payload: payload::MergeRequest = response.json().await?;
        Ok(convert_merge_request(payload))
    }
}
