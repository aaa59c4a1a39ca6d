//! Contains definitions of common types (pull request, review, check run) needed
//! for working with code-hosting platforms, and the capability trait that the
//! rest of the bot is written against.
use std::fmt::{Debug, Display, Formatter};
use std::str::FromStr;

use chrono::{DateTime, Utc};

pub mod github;
pub mod gitlab;
pub mod gitops;

/// The code-hosting platform a repository lives on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlatformKind {
    Github,
    Gitlab,
}

impl Display for PlatformKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            PlatformKind::Github => f.write_str("github"),
            PlatformKind::Gitlab => f.write_str("gitlab"),
        }
    }
}

impl FromStr for PlatformKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "github" => Ok(PlatformKind::Github),
            "gitlab" => Ok(PlatformKind::Gitlab),
            other => Err(format!(
                "Invalid platform `{other}`. Possible values are github/gitlab"
            )),
        }
    }
}

/// Unique identifier of a repository on its platform.
#[derive(Debug, PartialEq, Eq, Hash, Clone)]
pub struct RepoName {
    owner: String,
    name: String,
}

impl RepoName {
    pub fn new(owner: &str, name: &str) -> Self {
        Self {
            owner: owner.trim().to_lowercase(),
            name: name.trim().to_lowercase(),
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Display for RepoName {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("{}/{}", self.owner, self.name))
    }
}

#[derive(Clone, Debug)]
pub struct CommitSha(pub String);

impl From<String> for CommitSha {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl AsRef<str> for CommitSha {
    fn as_ref(&self) -> &str {
        self.0.as_str()
    }
}

impl Display for CommitSha {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.0, f)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PullRequestNumber(pub u64);

impl From<u64> for PullRequestNumber {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl Display for PullRequestNumber {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        <u64 as Display>::fmt(&self.0, f)
    }
}

/// State of a pull request as reported by the platform.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PullRequestStatus {
    Open,
    Closed,
    Merged,
    /// The platform reported a state we do not recognize (e.g. locked).
    Unknown,
}

impl Display for PullRequestStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let state = match self {
            PullRequestStatus::Open => "open",
            PullRequestStatus::Closed => "closed",
            PullRequestStatus::Merged => "merged",
            PullRequestStatus::Unknown => "unknown",
        };
        f.write_str(state)
    }
}

#[derive(Clone, Debug)]
pub struct PullRequest {
    pub number: PullRequestNumber,
    pub title: String,
    pub author: String,
    pub head_ref: String,
    pub head_sha: CommitSha,
    pub base_ref: String,
    pub status: PullRequestStatus,
    pub draft: bool,
    /// SHA of the merge commit, present once the PR has been merged.
    pub merge_commit_sha: Option<CommitSha>,
}

/// A comment on a pull request.
#[derive(Clone, Debug)]
pub struct PrComment {
    pub id: u64,
    pub author: String,
    pub body: String,
}

/// Permission a user holds on the repository.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    Admin,
    Write,
    Read,
    None,
}

impl Display for Permission {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let permission = match self {
            Permission::Admin => "admin",
            Permission::Write => "write",
            Permission::Read => "read",
            Permission::None => "none",
        };
        f.write_str(permission)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReviewState {
    Approved,
    ChangesRequested,
    Dismissed,
    Commented,
}

/// A single review submitted on a pull request.
#[derive(Clone, Debug)]
pub struct Review {
    pub id: u64,
    pub reviewer: String,
    pub state: ReviewState,
    pub submitted_at: DateTime<Utc>,
}

/// The review event submitted on behalf of an LGTM.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewAction {
    Approve,
    Comment,
    RequestChanges,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CheckStatus {
    Queued,
    InProgress,
    Completed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CheckConclusion {
    Success,
    Failure,
    Neutral,
    Skipped,
    Cancelled,
    TimedOut,
    ActionRequired,
}

/// A check run attached to a commit.
#[derive(Clone, Debug)]
pub struct CheckRun {
    pub id: u64,
    pub name: String,
    pub status: CheckStatus,
    pub conclusion: Option<CheckConclusion>,
    pub url: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeMethod {
    Merge,
    Squash,
    Rebase,
}

impl Display for MergeMethod {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let method = match self {
            MergeMethod::Merge => "merge",
            MergeMethod::Squash => "squash",
            MergeMethod::Rebase => "rebase",
        };
        f.write_str(method)
    }
}

impl FromStr for MergeMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "merge" => Ok(MergeMethod::Merge),
            "squash" => Ok(MergeMethod::Squash),
            "rebase" => Ok(MergeMethod::Rebase),
            other => Err(format!(
                "Invalid merge method `{other}`. Possible values are auto/merge/squash/rebase"
            )),
        }
    }
}

/// Error returned by the merge operation.
#[derive(thiserror::Error, Debug)]
pub enum MergeError {
    #[error("pull request is already merged")]
    AlreadyMerged,
    #[error("pull request cannot be merged: {0}")]
    NotMergeable(String),
    #[error(transparent)]
    Network(#[from] anyhow::Error),
}

/// Error returned when applying a commit to a branch fails.
#[derive(thiserror::Error, Debug)]
pub enum CherryPickError {
    #[error("commit {commit} conflicts with branch `{branch}`")]
    Conflict { commit: CommitSha, branch: String },
    #[error("branch `{0}` does not exist")]
    NoSuchBranch(String),
    #[error("cherry-pick is not supported: {0}")]
    Unsupported(String),
    #[error(transparent)]
    Network(#[from] anyhow::Error),
}

/// Provides functionality for working with a remote repository.
/// It is behind a trait to allow easier mocking in tests and to keep the
/// engine independent of the concrete platform.
#[async_trait::async_trait]
pub trait PlatformClient: Send + Sync {
    fn repository(&self) -> &RepoName;

    /// Resolve a pull request from this repository by its number.
    async fn get_pull_request(&self, pr: PullRequestNumber) -> anyhow::Result<PullRequest>;

    /// List all comments posted on the pull request, oldest first.
    async fn list_comments(&self, pr: PullRequestNumber) -> anyhow::Result<Vec<PrComment>>;

    /// Post a comment to the pull request with the given number.
    async fn post_comment(&self, pr: PullRequestNumber, text: &str) -> anyhow::Result<()>;

    /// List all reviews submitted on the pull request, oldest first.
    async fn list_reviews(&self, pr: PullRequestNumber) -> anyhow::Result<Vec<Review>>;

    /// Submit a review using the client's own identity.
    async fn submit_review(
        &self,
        pr: PullRequestNumber,
        action: ReviewAction,
        body: &str,
    ) -> anyhow::Result<()>;

    /// Dismiss a previously submitted review.
    async fn dismiss_review(
        &self,
        pr: PullRequestNumber,
        review_id: u64,
        message: &str,
    ) -> anyhow::Result<()>;

    /// Return the permission the given user holds on this repository.
    async fn user_permission(&self, login: &str) -> anyhow::Result<Permission>;

    /// Add users as requested reviewers of a PR.
    async fn request_reviewers(
        &self,
        pr: PullRequestNumber,
        logins: &[String],
    ) -> anyhow::Result<()>;

    /// Remove users from the requested reviewers of a PR.
    async fn remove_reviewers(
        &self,
        pr: PullRequestNumber,
        logins: &[String],
    ) -> anyhow::Result<()>;

    /// Add a set of labels to a PR.
    async fn add_labels(&self, pr: PullRequestNumber, labels: &[String]) -> anyhow::Result<()>;

    /// Remove a set of labels from a PR.
    async fn remove_labels(&self, pr: PullRequestNumber, labels: &[String]) -> anyhow::Result<()>;

    /// Find all check runs attached to the given commit.
    async fn list_check_runs(&self, sha: &CommitSha) -> anyhow::Result<Vec<CheckRun>>;

    /// Ask the platform to re-run a single check.
    async fn rerequest_check(&self, check: &CheckRun) -> anyhow::Result<()>;

    /// Merge methods enabled in the repository settings.
    async fn allowed_merge_methods(&self) -> anyhow::Result<Vec<MergeMethod>>;

    /// Merge the pull request. Returns the SHA of the merge commit.
    async fn merge_pull_request(
        &self,
        pr: PullRequestNumber,
        method: MergeMethod,
    ) -> Result<CommitSha, MergeError>;

    /// Update the PR head with the latest changes from its base branch.
    async fn update_branch(&self, pr: PullRequestNumber) -> anyhow::Result<()>;

    /// Close the pull request without merging it.
    async fn close_pull_request(&self, pr: PullRequestNumber) -> anyhow::Result<()>;

    /// Resolve the head commit of a branch. `None` when the branch does not
    /// exist.
    async fn get_branch_sha(&self, branch: &str) -> anyhow::Result<Option<CommitSha>>;

    /// Create a new branch pointing at the given commit.
    async fn create_branch(&self, name: &str, from: &CommitSha) -> anyhow::Result<()>;

    /// Apply the given commit on top of the given branch.
    async fn cherry_pick_apply(
        &self,
        commit: &CommitSha,
        branch: &str,
    ) -> Result<(), CherryPickError>;

    /// Open a new pull request and return it.
    async fn create_pull_request(
        &self,
        head: &str,
        base: &str,
        title: &str,
        body: &str,
    ) -> anyhow::Result<PullRequest>;
}
