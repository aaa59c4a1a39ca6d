//! Translation of raw webhook requests into canonical events: platform
//! detection, signature verification, and payload parsing.

use axum::http::HeaderMap;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::config::Config;
use crate::engine::event::{Event, EventPayload, LifecycleAction};
use crate::platform::{PlatformKind, PrComment, RepoName};
use crate::utils::correlation::fallback_delivery_id;

type HmacSha256 = Hmac<Sha256>;

/// Ingress failures, mapped onto HTTP status codes by the server.
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("unsupported event: {0}")]
    UnsupportedEvent(String),
    #[error("webhook signature verification failed")]
    BadSignature,
    #[error("repository `{0}` is not allowed")]
    DisallowedRepo(RepoName),
    #[error("rate limited")]
    RateLimited(std::time::Duration),
    #[error("malformed payload: {0}")]
    MalformedPayload(String),
    #[error("job queue is full")]
    QueueFull,
}

/// The delivery ID of the request, taken from the platform headers or
/// generated when absent. Attached to the job span and to error responses.
pub fn delivery_id(headers: &HeaderMap) -> String {
    header_str(headers, "x-github-delivery")
        .or_else(|| header_str(headers, "x-gitlab-event-uuid"))
        .map(str::to_string)
        .unwrap_or_else(fallback_delivery_id)
}

/// Decides which platform sent the request from its headers alone.
pub fn detect_platform(headers: &HeaderMap) -> Option<PlatformKind> {
    if headers.contains_key("x-github-event") || headers.contains_key("x-hub-signature-256") {
        return Some(PlatformKind::Github);
    }
    if headers.contains_key("x-gitlab-token") || headers.contains_key("x-gitlab-event") {
        return Some(PlatformKind::Gitlab);
    }
    None
}

/// Verifies the request signature for the detected platform.
///
/// GitHub signs the raw body with HMAC-SHA256; the comparison is constant-time
/// through the MAC verifier. GitLab sends the shared token verbatim.
pub fn verify_signature(
    platform: PlatformKind,
    headers: &HeaderMap,
    body: &[u8],
    config: &Config,
) -> Result<(), WebhookError> {
    if !config.require_signature {
        return Ok(());
    }
    let Some(secret) = &config.webhook_secret else {
        tracing::error!("Signature required but no webhook secret is configured");
        return Err(WebhookError::BadSignature);
    };
    match platform {
        PlatformKind::Github => {
            let signature = headers
                .get("x-hub-signature-256")
                .map(|value| value.as_bytes())
                .ok_or(WebhookError::BadSignature)?;
            let signature = signature
                .strip_prefix(b"sha256=")
                .and_then(|hex| hex::decode(hex).ok())
                .ok_or(WebhookError::BadSignature)?;
            let mut mac = HmacSha256::new_from_slice(secret.expose().as_bytes())
                .expect("Cannot create HMAC key");
            mac.update(body);
            mac.verify_slice(&signature)
                .map_err(|_| WebhookError::BadSignature)
        }
        PlatformKind::Gitlab => {
            let token = headers
                .get("x-gitlab-token")
                .and_then(|value| value.to_str().ok())
                .ok_or(WebhookError::BadSignature)?;
            if constant_time_eq(token.as_bytes(), secret.expose().as_bytes()) {
                Ok(())
            } else {
                Err(WebhookError::BadSignature)
            }
        }
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Parses the payload into a canonical event. `Ok(None)` means the event is
/// valid but carries nothing to act on (e.g. a draft PR update) and should be
/// dropped without an error.
pub fn parse_event(
    platform: PlatformKind,
    headers: &HeaderMap,
    body: &[u8],
    delivery_id: &str,
) -> Result<Option<Event>, WebhookError> {
    match platform {
        PlatformKind::Github => parse_github_event(headers, body, delivery_id),
        PlatformKind::Gitlab => parse_gitlab_event(headers, body, delivery_id),
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

mod github {
    #[derive(serde::Deserialize)]
    pub struct User {
        pub login: String,
    }

    #[derive(serde::Deserialize)]
    pub struct Repository {
        pub name: String,
        pub owner: User,
    }

    #[derive(serde::Deserialize)]
    pub struct Issue {
        pub number: u64,
        pub pull_request: Option<serde_json::Value>,
    }

    #[derive(serde::Deserialize)]
    pub struct Comment {
        pub id: u64,
        pub user: User,
        pub body: Option<String>,
    }

    #[derive(serde::Deserialize)]
    pub struct IssueCommentEvent {
        pub action: String,
        pub issue: Issue,
        pub comment: Comment,
        pub repository: Repository,
        pub sender: User,
    }

    #[derive(serde::Deserialize)]
    pub struct PullRequest {
        pub number: u64,
        pub draft: bool,
    }

    #[derive(serde::Deserialize)]
    pub struct PullRequestEvent {
        pub action: String,
        pub pull_request: PullRequest,
        pub repository: Repository,
        pub sender: User,
    }
}

fn parse_github_event(
    headers: &HeaderMap,
    body: &[u8],
    delivery_id: &str,
) -> Result<Option<Event>, WebhookError> {
    let event_type = header_str(headers, "x-github-event")
        .ok_or_else(|| WebhookError::UnsupportedEvent("missing x-github-event".to_string()))?;

    match event_type {
        "issue_comment" => {
            let payload: github::IssueCommentEvent = serde_json::from_slice(body)
                .map_err(|error| WebhookError::MalformedPayload(error.to_string()))?;
            if payload.action != "created" {
                return Err(WebhookError::UnsupportedEvent(format!(
                    "issue_comment action `{}`",
                    payload.action
                )));
            }
            if payload.issue.pull_request.is_none() {
                return Err(WebhookError::UnsupportedEvent(
                    "comment is not attached to a pull request".to_string(),
                ));
            }
            Ok(Some(Event {
                platform: PlatformKind::Github,
                repository: RepoName::new(
                    &payload.repository.owner.login,
                    &payload.repository.name,
                ),
                pr_number: payload.issue.number.into(),
                sender: payload.sender.login.trim().to_string(),
                delivery_id: delivery_id.to_string(),
                payload: EventPayload::Comment(PrComment {
                    id: payload.comment.id,
                    author: payload.comment.user.login.trim().to_string(),
                    body: payload.comment.body.unwrap_or_default(),
                }),
            }))
        }
        "pull_request" => {
            let payload: github::PullRequestEvent = serde_json::from_slice(body)
                .map_err(|error| WebhookError::MalformedPayload(error.to_string()))?;
            let action = match payload.action.as_str() {
                "opened" => LifecycleAction::Opened,
                "synchronize" => LifecycleAction::Synchronized,
                "reopened" => LifecycleAction::Reopened,
                "ready_for_review" => LifecycleAction::ReadyForReview,
                "edited" => LifecycleAction::Edited,
                other => {
                    return Err(WebhookError::UnsupportedEvent(format!(
                        "pull_request action `{other}`"
                    )));
                }
            };
            // Draft PRs are dropped until they become ready for review.
            if payload.pull_request.draft && action != LifecycleAction::ReadyForReview {
                return Ok(None);
            }
            Ok(Some(Event {
                platform: PlatformKind::Github,
                repository: RepoName::new(
                    &payload.repository.owner.login,
                    &payload.repository.name,
                ),
                pr_number: payload.pull_request.number.into(),
                sender: payload.sender.login.trim().to_string(),
                delivery_id: delivery_id.to_string(),
                payload: EventPayload::Lifecycle(action),
            }))
        }
        other => Err(WebhookError::UnsupportedEvent(other.to_string())),
    }
}

mod gitlab {
    #[derive(serde::Deserialize)]
    pub struct User {
        pub username: String,
    }

    #[derive(serde::Deserialize)]
    pub struct Project {
        pub path_with_namespace: String,
    }

    #[derive(serde::Deserialize)]
    pub struct NoteAttributes {
        pub id: u64,
        pub note: String,
        pub noteable_type: String,
    }

    #[derive(serde::Deserialize)]
    pub struct MergeRequestRef {
        pub iid: u64,
    }

    #[derive(serde::Deserialize)]
    pub struct NoteEvent {
        pub user: User,
        pub project: Project,
        pub object_attributes: NoteAttributes,
        pub merge_request: Option<MergeRequestRef>,
    }

    #[derive(serde::Deserialize)]
    pub struct MergeRequestAttributes {
        pub iid: u64,
        pub action: Option<String>,
        #[serde(default)]
        pub draft: bool,
    }

    #[derive(serde::Deserialize)]
    pub struct MergeRequestEvent {
        pub user: User,
        pub project: Project,
        pub object_attributes: MergeRequestAttributes,
    }
}

fn split_project_path(path: &str) -> Result<RepoName, WebhookError> {
    let (owner, name) = path.split_once('/').ok_or_else(|| {
        WebhookError::MalformedPayload(format!("invalid project path `{path}`"))
    })?;
    Ok(RepoName::new(owner, name))
}

fn parse_gitlab_event(
    headers: &HeaderMap,
    body: &[u8],
    delivery_id: &str,
) -> Result<Option<Event>, WebhookError> {
    let event_type = header_str(headers, "x-gitlab-event")
        .ok_or_else(|| WebhookError::UnsupportedEvent("missing x-gitlab-event".to_string()))?;

    match event_type {
        "Note Hook" => {
            let payload: gitlab::NoteEvent = serde_json::from_slice(body)
                .map_err(|error| WebhookError::MalformedPayload(error.to_string()))?;
            if payload.object_attributes.noteable_type != "MergeRequest" {
                return Err(WebhookError::UnsupportedEvent(
                    "comment is not attached to a merge request".to_string(),
                ));
            }
            let merge_request = payload.merge_request.ok_or_else(|| {
                WebhookError::MalformedPayload("note event without merge request".to_string())
            })?;
            Ok(Some(Event {
                platform: PlatformKind::Gitlab,
                repository: split_project_path(&payload.project.path_with_namespace)?,
                pr_number: merge_request.iid.into(),
                sender: payload.user.username.trim().to_string(),
                delivery_id: delivery_id.to_string(),
                payload: EventPayload::Comment(PrComment {
                    id: payload.object_attributes.id,
                    author: payload.user.username.trim().to_string(),
                    body: payload.object_attributes.note,
                }),
            }))
        }
        "Merge Request Hook" => {
            let payload: gitlab::MergeRequestEvent = serde_json::from_slice(body)
                .map_err(|error| WebhookError::MalformedPayload(error.to_string()))?;
            let action = match payload.object_attributes.action.as_deref() {
                Some("open") => LifecycleAction::Opened,
                Some("update") => LifecycleAction::Synchronized,
                Some("reopen") => LifecycleAction::Reopened,
                other => {
                    return Err(WebhookError::UnsupportedEvent(format!(
                        "merge request action `{}`",
                        other.unwrap_or("none")
                    )));
                }
            };
            if payload.object_attributes.draft {
                return Ok(None);
            }
            Ok(Some(Event {
                platform: PlatformKind::Gitlab,
                repository: split_project_path(&payload.project.path_with_namespace)?,
                pr_number: payload.object_attributes.iid.into(),
                sender: payload.user.username.trim().to_string(),
                delivery_id: delivery_id.to_string(),
                payload: EventPayload::Lifecycle(action),
            }))
        }
        other => Err(WebhookError::UnsupportedEvent(other.to_string())),
    }
}
