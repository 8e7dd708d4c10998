//! Mock research engines shared by the integration tests.

use async_trait::async_trait;
use quarry::jobs::ProgressSink;
use quarry::jobs::model::{JobParams, ResearchOutput};
use quarry::research::ResearchEngine;
use quarry::types::{AppError, Result};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Semaphore;

/// Research engine with a canned report.
///
/// ```ignore
/// let engine = MockResearchEngine::new("# Findings");
/// let engine = MockResearchEngine::failing();
/// let (engine, gate) = MockResearchEngine::gated("# Findings");
/// gate.add_permits(1); // let one job finish
/// ```
pub struct MockResearchEngine {
    report: String,
    should_fail: bool,
    gate: Option<Arc<Semaphore>>,
    calls: AtomicUsize,
}

impl MockResearchEngine {
    /// Returns `report` immediately.
    pub fn new(report: &str) -> Self {
        Self {
            report: report.to_string(),
            should_fail: false,
            gate: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Always fails with an execution error.
    pub fn failing() -> Self {
        Self {
            should_fail: true,
            ..Self::new("")
        }
    }

    /// Blocks every job until a permit is added to the returned semaphore.
    pub fn gated(report: &str) -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        let engine = Self {
            gate: Some(Arc::clone(&gate)),
            ..Self::new(report)
        };
        (engine, gate)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ResearchEngine for MockResearchEngine {
    async fn execute(&self, params: &JobParams, sink: &ProgressSink) -> Result<ResearchOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        sink.log("starting_research", format!("Researching '{}'", params.task));

        if let Some(gate) = &self.gate {
            let permit = gate
                .acquire()
                .await
                .map_err(|_| AppError::Internal("gate closed".to_string()))?;
            permit.forget();
        }

        if self.should_fail {
            return Err(AppError::Execution("Mock research failure".to_string()));
        }

        sink.report(self.report.clone());
        Ok(ResearchOutput {
            report: self.report.clone(),
            source_urls: vec!["https://example.com/source".to_string()],
            visited_urls: vec!["https://example.com/source".to_string()],
            costs: 0.25,
            images: Vec::new(),
        })
    }

    fn name(&self) -> &str {
        "mock"
    }
}
