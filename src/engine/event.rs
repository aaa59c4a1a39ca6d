use chrono::{DateTime, Utc};

use crate::platform::{PlatformKind, PrComment, PullRequestNumber, RepoName};

/// A canonical event, produced by the webhook parser from a raw platform
/// payload.
#[derive(Clone, Debug)]
pub struct Event {
    pub platform: PlatformKind,
    pub repository: RepoName,
    pub pr_number: PullRequestNumber,
    /// Login of the user that caused the event.
    pub sender: String,
    /// Platform delivery ID, or a locally generated fallback, recorded only
    /// for log correlation.
    pub delivery_id: String,
    pub payload: EventPayload,
}

#[derive(Clone, Debug)]
pub enum EventPayload {
    /// A comment was posted on a pull request.
    Comment(PrComment),
    /// A pull request lifecycle action.
    Lifecycle(LifecycleAction),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LifecycleAction {
    Opened,
    Synchronized,
    Reopened,
    ReadyForReview,
    Edited,
}

impl LifecycleAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleAction::Opened => "opened",
            LifecycleAction::Synchronized => "synchronized",
            LifecycleAction::Reopened => "reopened",
            LifecycleAction::ReadyForReview => "ready_for_review",
            LifecycleAction::Edited => "edited",
        }
    }
}

/// Unit of work carried through the worker pool.
#[derive(Clone, Debug)]
pub struct Job {
    pub event: Event,
    pub received_at: DateTime<Utc>,
    pub attempt: u32,
}

impl Job {
    pub fn new(event: Event) -> Self {
        Self {
            event,
            received_at: Utc::now(),
            attempt: 1,
        }
    }
}
