use async_trait::async_trait;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::task::JoinSet;

use super::ResearchEngine;
use crate::jobs::model::{JobParams, ReportType, ResearchOutput};
use crate::jobs::runner::ProgressSink;
use crate::types::{AppError, Result};

const DOCUMENT_EXTENSIONS: [&str; 3] = ["md", "markdown", "txt"];
const MAX_SCAN_DEPTH: usize = 4;
const EXCERPTS_PER_DOCUMENT: usize = 3;

/// A document loaded for scoring.
#[derive(Debug, Clone)]
struct Document {
    path: PathBuf,
    text: String,
}

#[derive(Debug, Clone)]
struct Finding {
    source: PathBuf,
    excerpts: Vec<String>,
    score: usize,
}

/// Researches a task against local documents.
///
/// Reads every text document under the job's source directory concurrently,
/// ranks them by how many query terms they mention and, over `depth`
/// iterations, reviews the next `breadth` best documents. The report is a
/// Markdown digest of the most relevant paragraphs with their sources.
#[derive(Debug, Default)]
pub struct LocalResearchEngine;

impl LocalResearchEngine {
    pub fn new() -> Self {
        Self
    }

    /// Knowledge base docs if one was selected, the document root otherwise.
    fn source_dir(params: &JobParams) -> &Path {
        params
            .vector_store_path
            .as_deref()
            .unwrap_or(params.doc_path.as_path())
    }

    async fn load_documents(&self, root: &Path) -> Result<Vec<Document>> {
        let paths = collect_paths(root).await?;

        let mut set = JoinSet::new();
        for path in paths {
            set.spawn(async move {
                let text = tokio::fs::read_to_string(&path).await;
                (path, text)
            });
        }

        let mut documents = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((path, Ok(text))) => documents.push(Document { path, text }),
                Ok((path, Err(e))) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unreadable document")
                }
                Err(e) => tracing::warn!(error = %e, "document read task failed"),
            }
        }
        documents.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(documents)
    }
}

#[async_trait]
impl ResearchEngine for LocalResearchEngine {
    async fn execute(&self, params: &JobParams, sink: &ProgressSink) -> Result<ResearchOutput> {
        sink.log(
            "starting_research",
            format!("Starting the research task for '{}'...", params.task),
        );

        let root = Self::source_dir(params);
        let documents = self.load_documents(root).await?;
        sink.log(
            "documents_loaded",
            format!("Loaded {} documents from {}", documents.len(), root.display()),
        );

        let terms = query_terms(&params.task);
        let mut ranked: Vec<Finding> = documents
            .iter()
            .map(|doc| Finding {
                source: doc.path.clone(),
                excerpts: excerpts(&doc.text, &terms),
                score: score(&doc.text, &terms),
            })
            .filter(|finding| finding.score > 0)
            .collect();
        ranked.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| a.source.cmp(&b.source)));

        let mut reviewed = Vec::new();
        let mut remaining = ranked.into_iter();
        for iteration in 0..params.depth {
            if sink.is_cancelled() {
                break;
            }

            let batch: Vec<Finding> = remaining.by_ref().take(params.breadth as usize).collect();
            if batch.is_empty() {
                break;
            }
            sink.log(
                "research_iteration",
                format!(
                    "Iteration {}/{}: reviewing {} documents",
                    iteration + 1,
                    params.depth,
                    batch.len()
                ),
            );
            reviewed.extend(batch);
            tokio::task::yield_now().await;
        }

        let report = compose_report(params, &reviewed);
        for section in report.split_inclusive("\n## ") {
            sink.report(section);
        }

        sink.log("research_complete", "Research complete");

        Ok(ResearchOutput {
            report,
            source_urls: reviewed
                .iter()
                .map(|f| f.source.display().to_string())
                .collect(),
            visited_urls: documents
                .iter()
                .map(|d| d.path.display().to_string())
                .collect(),
            costs: 0.0,
            images: Vec::new(),
        })
    }

    fn name(&self) -> &str {
        "local"
    }
}

/// Text documents under `root`, breadth first, sorted for stable output.
async fn collect_paths(root: &Path) -> Result<Vec<PathBuf>> {
    if tokio::fs::metadata(root).await.is_err() {
        tracing::warn!(path = %root.display(), "document directory does not exist");
        return Ok(Vec::new());
    }

    let mut found = Vec::new();
    let mut pending = vec![(root.to_path_buf(), 0usize)];
    while let Some((dir, depth)) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&dir)
            .await
            .map_err(|e| AppError::resource(format!("reading {}", dir.display()), e))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| AppError::resource(format!("reading {}", dir.display()), e))?
        {
            let path = entry.path();
            let Ok(file_type) = entry.file_type().await else {
                continue;
            };
            if file_type.is_dir() {
                if depth + 1 < MAX_SCAN_DEPTH {
                    pending.push((path, depth + 1));
                }
            } else if is_document(&path) {
                found.push(path);
            }
        }
    }
    found.sort();
    Ok(found)
}

fn is_document(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| DOCUMENT_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

fn query_terms(task: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    task.split(|c: char| !c.is_alphanumeric())
        .map(|t| t.to_lowercase())
        .filter(|t| t.chars().count() >= 3)
        .filter(|t| seen.insert(t.clone()))
        .collect()
}

fn score(text: &str, terms: &[String]) -> usize {
    let lower = text.to_lowercase();
    terms.iter().map(|t| lower.matches(t.as_str()).count()).sum()
}

fn excerpts(text: &str, terms: &[String]) -> Vec<String> {
    text.split("\n\n")
        .map(str::trim)
        .filter(|para| !para.is_empty())
        .filter(|para| {
            let lower = para.to_lowercase();
            terms.iter().any(|t| lower.contains(t.as_str()))
        })
        .take(EXCERPTS_PER_DOCUMENT)
        .map(str::to_string)
        .collect()
}

fn compose_report(params: &JobParams, findings: &[Finding]) -> String {
    let mut report = format!("# {}\n\n", params.task.trim());
    report.push_str(&format!(
        "_{} report, {} tone, {} documents reviewed_\n",
        params.report_type.as_str(),
        params.tone.as_str(),
        findings.len()
    ));

    if findings.is_empty() {
        report.push_str("\n## Findings\n\nNo local documents mention this topic.\n");
        return report;
    }

    match params.report_type {
        ReportType::OutlineReport => {
            report.push_str("\n## Outline\n\n");
            for finding in findings {
                report.push_str(&format!("- {}\n", title_of(&finding.source)));
            }
        }
        ReportType::ResourceReport => {}
        _ => {
            report.push_str("\n## Findings\n\n");
            for finding in findings {
                report.push_str(&format!("### {}\n\n", title_of(&finding.source)));
                for excerpt in &finding.excerpts {
                    report.push_str(excerpt);
                    report.push_str("\n\n");
                }
            }
        }
    }

    report.push_str("\n## Sources\n\n");
    for finding in findings {
        report.push_str(&format!("- {}\n", finding.source.display()));
    }
    report
}

fn title_of(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().replace(['_', '-'], " "))
        .unwrap_or_else(|| path.display().to_string())
}
