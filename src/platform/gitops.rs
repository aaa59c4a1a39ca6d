//! Cherry-pick application through the local git CLI, for platforms without a
//! native commit cherry-pick endpoint.

use std::path::PathBuf;
use std::process::Command;

use anyhow::Context;

use crate::platform::{CherryPickError, CommitSha};

/// Represents a git binary.
#[derive(Clone)]
pub struct Git {
    git: PathBuf,
}

impl Git {
    /// Probe the `git` binary on the PATH. Returns `Git` if it is executable.
    pub fn try_init() -> anyhow::Result<Self> {
        let path = PathBuf::from("git");
        if Command::new(&path)
            .arg("-v")
            .status()
            .context("Cannot execute git")?
            .success()
        {
            Ok(Git { git: path })
        } else {
            Err(anyhow::anyhow!("Cannot execute git at `{path:?}`"))
        }
    }

    /// Applies `commit` on top of `branch` and pushes the result back.
    ///
    /// The repository is cloned into a temporary directory checked out at
    /// `branch`; the commit is fetched explicitly since the branch clone does
    /// not contain it yet.
    pub async fn cherry_pick_onto(
        &self,
        repo_url: &str,
        commit: &CommitSha,
        branch: &str,
    ) -> Result<(), CherryPickError> {
        let temp_dir = tempfile::tempdir().map_err(|error| {
            CherryPickError::Network(anyhow::Error::from(error).context("Cannot create temp dir"))
        })?;
        let root_path = temp_dir.path();
        let clone_path = root_path.join("cloned-repo");

        tracing::debug!("Cloning branch {branch}");
        let cloned = run_command(
            tokio::process::Command::new(&self.git)
                .kill_on_drop(true)
                .current_dir(root_path)
                // Do not store the token on disk
                .arg("-c")
                .arg("credential.helper=")
                .arg("clone")
                .arg("--branch")
                .arg(branch)
                .arg("--single-branch")
                .arg(repo_url)
                .arg(&clone_path),
        )
        .await;
        if cloned.is_err() {
            return Err(CherryPickError::NoSuchBranch(branch.to_string()));
        }

        tracing::debug!("Fetching commit {commit}");
        run_command(
            tokio::process::Command::new(&self.git)
                .kill_on_drop(true)
                .current_dir(&clone_path)
                .arg("fetch")
                .arg("origin")
                .arg(commit.as_ref()),
        )
        .await
        .map_err(CherryPickError::Network)?;

        tracing::debug!("Applying commit {commit} onto {branch}");
        let applied = run_command(
            tokio::process::Command::new(&self.git)
                .kill_on_drop(true)
                .current_dir(&clone_path)
                .arg("-c")
                .arg("user.name=pr-cli")
                .arg("-c")
                .arg("user.email=pr-cli@localhost")
                .arg("cherry-pick")
                .arg("--allow-empty")
                .arg(commit.as_ref()),
        )
        .await;
        if applied.is_err() {
            return Err(CherryPickError::Conflict {
                commit: commit.clone(),
                branch: branch.to_string(),
            });
        }

        tracing::debug!("Pushing {branch}");
        run_command(
            tokio::process::Command::new(&self.git)
                .kill_on_drop(true)
                .current_dir(&clone_path)
                .arg("-c")
                .arg("credential.helper=")
                .arg("push")
                .arg("origin")
                .arg(format!("HEAD:refs/heads/{branch}")),
        )
        .await
        .map_err(CherryPickError::Network)?;
        Ok(())
    }
}

async fn run_command(cmd: &mut tokio::process::Command) -> anyhow::Result<()> {
    // Use status instead of output, so that we stream the output directly into
    // logs. If we buffered it, then we would not print anything in case of a
    // timeout.
    let status = cmd.status().await?;
    if !status.success() {
        Err(anyhow::anyhow!("Command ended with status {status}"))
    } else {
        Ok(())
    }
}
