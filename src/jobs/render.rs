//! Turning finished reports into files.

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use crate::jobs::model::{Artifact, JobId};
use crate::types::{AppError, Result};

/// Produces downloadable artifacts from a report.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ReportRenderer: Send + Sync {
    async fn render(&self, report: &str, research_id: &JobId) -> Result<Vec<Artifact>>;
}

/// Writes `<outputs_dir>/<research_id>.md`.
pub struct MarkdownRenderer {
    outputs_dir: PathBuf,
}

impl MarkdownRenderer {
    pub fn new(outputs_dir: impl Into<PathBuf>) -> Self {
        Self {
            outputs_dir: outputs_dir.into(),
        }
    }
}

#[async_trait]
impl ReportRenderer for MarkdownRenderer {
    async fn render(&self, report: &str, research_id: &JobId) -> Result<Vec<Artifact>> {
        tokio::fs::create_dir_all(&self.outputs_dir)
            .await
            .map_err(|e| AppError::resource("creating outputs directory", e))?;

        let path = self.outputs_dir.join(format!("{}.md", research_id));
        tokio::fs::write(&path, report)
            .await
            .map_err(|e| AppError::resource("writing markdown report", e))?;

        tracing::debug!(research_id = %research_id, path = %path.display(), "report rendered");
        Ok(vec![Artifact {
            format: "md".to_string(),
            path,
        }])
    }
}

/// Locate a previously rendered artifact for `research_id`.
///
/// Only identities made of file-name-safe characters are looked up.
pub async fn find_artifact(outputs_dir: &Path, research_id: &str) -> Option<PathBuf> {
    let safe = !research_id.is_empty()
        && research_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if !safe {
        return None;
    }

    for ext in ["md", "pdf", "docx"] {
        let candidate = outputs_dir.join(format!("{}.{}", research_id, ext));
        if tokio::fs::metadata(&candidate)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false)
        {
            return Some(candidate);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_markdown_renderer_writes_file() {
        let dir = TempDir::new().unwrap();
        let renderer = MarkdownRenderer::new(dir.path().join("outputs"));

        let artifacts = renderer
            .render("# Findings", &"task_1_foo".into())
            .await
            .unwrap();

        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts[0].format, "md");
        let written = tokio::fs::read_to_string(&artifacts[0].path).await.unwrap();
        assert_eq!(written, "# Findings");
    }

    #[tokio::test]
    async fn test_find_artifact() {
        let dir = TempDir::new().unwrap();
        let renderer = MarkdownRenderer::new(dir.path());
        renderer.render("x", &"task_1_foo".into()).await.unwrap();

        assert!(find_artifact(dir.path(), "task_1_foo").await.is_some());
        assert!(find_artifact(dir.path(), "task_1_bar").await.is_none());
        assert!(find_artifact(dir.path(), "../task_1_foo").await.is_none());
        assert!(find_artifact(dir.path(), "").await.is_none());
    }

    #[tokio::test]
    async fn test_render_failure_is_resource_error() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("outputs");
        std::fs::write(&blocker, "not a directory").unwrap();

        let renderer = MarkdownRenderer::new(&blocker);
        let err = renderer.render("x", &"task_1_foo".into()).await.unwrap_err();
        assert!(matches!(err, AppError::Resource(_)));
    }
}
