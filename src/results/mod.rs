//! The result sink: named outcomes written for upstream pipeline callers.
//!
//! Each result is a file in the configured directory, named by its key and
//! containing the literal value with a trailing newline. Without a configured
//! directory, results are dropped silently.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;

#[derive(Clone)]
pub struct ResultSink {
    dir: Option<Arc<PathBuf>>,
}

impl ResultSink {
    pub fn new(dir: Option<PathBuf>) -> Self {
        Self {
            dir: dir.map(Arc::new),
        }
    }

    /// A sink that drops every result.
    pub fn disabled() -> Self {
        Self { dir: None }
    }

    /// Writes a result. Idempotent within a job: writing the same key twice
    /// yields the same final content. Failures are logged and dropped, never
    /// propagated.
    pub async fn write(&self, key: &str, value: &str) {
        let Some(dir) = &self.dir else {
            return;
        };
        if let Err(error) = write_result(dir, key, value).await {
            tracing::warn!("Cannot write result `{key}`: {error:?}");
        }
    }
}

async fn write_result(dir: &Path, key: &str, value: &str) -> anyhow::Result<()> {
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("Cannot create results directory {}", dir.display()))?;
    let path = dir.join(key);
    tokio::fs::write(&path, format!("{value}\n"))
        .await
        .with_context(|| format!("Cannot write result file {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_creates_directory_and_file() {
        let dir = tempfile::tempdir().unwrap();
        let results_dir = dir.path().join("results");
        let sink = ResultSink::new(Some(results_dir.clone()));
        sink.write("merge-successful", "true").await;
        let content = std::fs::read_to_string(results_dir.join("merge-successful")).unwrap();
        assert_eq!(content, "true\n");
    }

    #[tokio::test]
    async fn write_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let sink = ResultSink::new(Some(dir.path().to_path_buf()));
        sink.write("has-cherry-pick-comments", "true").await;
        sink.write("has-cherry-pick-comments", "true").await;
        let content = std::fs::read_to_string(dir.path().join("has-cherry-pick-comments")).unwrap();
        assert_eq!(content, "true\n");
    }

    #[tokio::test]
    async fn disabled_sink_drops_results() {
        let sink = ResultSink::disabled();
        // Must not panic or create anything.
        sink.write("merge-successful", "true").await;
    }
}
