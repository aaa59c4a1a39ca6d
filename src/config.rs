use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use secrecy::{ExposeSecret, SecretString};

use crate::platform::{MergeMethod, Permission, PlatformKind, RepoName, ReviewAction};

pub const DEFAULT_CONFIG_FILE_PATH: &str = "pr-cli.toml";

const DEFAULT_LGTM_THRESHOLD: u32 = 1;
const DEFAULT_WORKER_COUNT: usize = 4;
const DEFAULT_QUEUE_SIZE: usize = 256;
const DEFAULT_RATE_LIMIT_RPM: u32 = 60;
const DEFAULT_WEBHOOK_PATH: &str = "/webhook";
const DEFAULT_SELF_CHECK_NAME: &str = "pr-cli";

/// Wrapper for a secret which is zeroed on drop and can be exposed only through
/// the [`Secret::expose`] method.
#[derive(Clone)]
pub struct Secret(SecretString);

impl Secret {
    pub fn new(secret: String) -> Self {
        Self(secret.into())
    }

    pub fn expose(&self) -> &str {
        self.0.expose_secret().as_str()
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("<redacted>")
    }
}

impl<'de> serde::Deserialize<'de> for Secret {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        Ok(Secret::new(String::deserialize(deserializer)?))
    }
}

/// Requested merge method, including the `auto` selection mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeMethodChoice {
    Auto,
    Merge,
    Squash,
    Rebase,
}

impl MergeMethodChoice {
    pub fn as_method(&self) -> Option<MergeMethod> {
        match self {
            MergeMethodChoice::Auto => None,
            MergeMethodChoice::Merge => Some(MergeMethod::Merge),
            MergeMethodChoice::Squash => Some(MergeMethod::Squash),
            MergeMethodChoice::Rebase => Some(MergeMethod::Rebase),
        }
    }
}

impl std::str::FromStr for MergeMethodChoice {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(MergeMethodChoice::Auto),
            "merge" => Ok(MergeMethodChoice::Merge),
            "squash" => Ok(MergeMethodChoice::Squash),
            "rebase" => Ok(MergeMethodChoice::Rebase),
            other => Err(format!(
                "Invalid merge method `{other}`. Possible values are auto/merge/squash/rebase"
            )),
        }
    }
}

#[derive(Clone, Debug, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RateLimitConfig {
    pub enabled: bool,
    /// Requests allowed per minute and source address. Also the bucket burst size.
    pub rpm: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            rpm: DEFAULT_RATE_LIMIT_RPM,
        }
    }
}

#[derive(Clone, Debug, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ChecksConfig {
    /// Whether `skipped` and `neutral` check conclusions count as passing.
    pub neutral_is_passing: bool,
}

impl Default for ChecksConfig {
    fn default() -> Self {
        Self {
            neutral_is_passing: true,
        }
    }
}

/// Configuration of the bot, loaded once at startup from a `pr-cli.toml` file
/// and threaded through every component.
#[derive(Clone, Debug, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub platform: PlatformKind,
    /// Base URL of the platform API. Empty means the platform default.
    pub base_url: String,
    /// API token used for state-changing calls.
    pub token: Option<Secret>,
    /// Separate token used for posting comments, when configured.
    pub comment_token: Option<Secret>,
    pub owner: String,
    pub repo: String,
    /// Pull request to operate on when running outside of webhook mode.
    pub pr_number: Option<u64>,
    /// User expected to have posted the trigger comment. Defaults to the
    /// author of the comment event.
    pub comment_sender: Option<String>,
    /// Trigger text to authenticate. Defaults to the comment event body.
    pub trigger_comment: Option<String>,
    pub lgtm_threshold: u32,
    /// Permissions whose holders may approve pull requests.
    pub lgtm_permissions: HashSet<Permission>,
    /// The review event submitted for an LGTM.
    pub lgtm_review_event: ReviewAction,
    /// Accounts that are robots. Their reviews never count and their comment
    /// events are ignored outside of debug mode.
    pub robot_accounts: HashSet<String>,
    pub merge_method: MergeMethodChoice,
    /// Name of the check run produced by this bot, excluded from gating.
    pub self_check_name: String,
    pub use_git_cli_for_cherry_pick: bool,
    /// `owner/name` patterns; `*` matches any single segment.
    pub allowed_repos: Vec<String>,
    pub require_signature: bool,
    pub webhook_secret: Option<Secret>,
    pub webhook_path: String,
    pub rate_limit: RateLimitConfig,
    pub checks: ChecksConfig,
    pub worker_count: usize,
    pub queue_size: usize,
    pub async_processing: bool,
    /// When the queue is saturated, run the job inline instead of replying 503.
    pub sync_fallback: bool,
    pub results_dir: Option<PathBuf>,
    /// Relaxes robot and self-approval restrictions. Never enable in production.
    pub debug: bool,
    /// Timeout of a single outbound platform call, in seconds.
    pub platform_timeout_secs: u64,
    /// Budget of the ingress-to-enqueue path, in seconds.
    pub ingress_timeout_secs: u64,
    /// How long workers may drain on shutdown, in seconds.
    pub shutdown_grace_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            platform: PlatformKind::Github,
            base_url: String::new(),
            token: None,
            comment_token: None,
            owner: String::new(),
            repo: String::new(),
            pr_number: None,
            comment_sender: None,
            trigger_comment: None,
            lgtm_threshold: DEFAULT_LGTM_THRESHOLD,
            lgtm_permissions: HashSet::from([Permission::Admin, Permission::Write]),
            lgtm_review_event: ReviewAction::Approve,
            robot_accounts: HashSet::new(),
            merge_method: MergeMethodChoice::Auto,
            self_check_name: DEFAULT_SELF_CHECK_NAME.to_string(),
            use_git_cli_for_cherry_pick: false,
            allowed_repos: vec![],
            require_signature: true,
            webhook_secret: None,
            webhook_path: DEFAULT_WEBHOOK_PATH.to_string(),
            rate_limit: RateLimitConfig::default(),
            checks: ChecksConfig::default(),
            worker_count: DEFAULT_WORKER_COUNT,
            queue_size: DEFAULT_QUEUE_SIZE,
            async_processing: true,
            sync_fallback: true,
            results_dir: None,
            debug: false,
            platform_timeout_secs: 30,
            ingress_timeout_secs: 5,
            shutdown_grace_secs: 30,
        }
    }
}

impl Config {
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot read config file {}", path.display()))?;
        let config: Config = toml::from_str(&raw)
            .with_context(|| format!("Cannot parse config file {}", path.display()))?;
        Ok(config)
    }

    pub fn repo_name(&self) -> RepoName {
        RepoName::new(&self.owner, &self.repo)
    }

    pub fn is_robot(&self, login: &str) -> bool {
        self.robot_accounts.contains(login)
    }

    /// Checks the repository allow-list. An empty list denies everything.
    pub fn is_repo_allowed(&self, repo: &RepoName) -> bool {
        self.allowed_repos
            .iter()
            .any(|pattern| repo_pattern_matches(pattern, repo))
    }

    pub fn platform_timeout(&self) -> Duration {
        Duration::from_secs(self.platform_timeout_secs)
    }

    pub fn ingress_timeout(&self) -> Duration {
        Duration::from_secs(self.ingress_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

fn repo_pattern_matches(pattern: &str, repo: &RepoName) -> bool {
    if pattern == "*" {
        return true;
    }
    let Some((owner, name)) = pattern.split_once('/') else {
        return false;
    };
    let segment_matches =
        |pattern: &str, value: &str| pattern == "*" || pattern.eq_ignore_ascii_case(value);
    segment_matches(owner, repo.owner()) && segment_matches(name, repo.name())
}
