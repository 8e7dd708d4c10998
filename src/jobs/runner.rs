//! One execution of the research computation.

use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use crate::broadcast::{BroadcastChannel, JobEvent};
use crate::jobs::model::{FailureKind, JobError, JobId, JobParams, ResearchOutput};
use crate::research::ResearchEngine;
use crate::types::AppError;

/// A progress update produced by a research engine.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressUpdate {
    Log {
        content: String,
        output: String,
        metadata: serde_json::Value,
    },
    /// A chunk of streamed report text
    Report { output: String },
}

/// Where an engine sends its progress.
///
/// Updates are published immediately and in call order. Once the job is
/// cancelled, further updates are dropped.
#[derive(Clone)]
pub struct ProgressSink {
    job_id: JobId,
    channel: Arc<dyn BroadcastChannel>,
    cancel: CancellationToken,
}

impl ProgressSink {
    pub fn new(job_id: JobId, channel: Arc<dyn BroadcastChannel>, cancel: CancellationToken) -> Self {
        Self {
            job_id,
            channel,
            cancel,
        }
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    /// Publish an update. Returns `false` if it was dropped.
    pub fn emit(&self, update: ProgressUpdate) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }

        let research_id = self.job_id.clone();
        let event = match update {
            ProgressUpdate::Log {
                content,
                output,
                metadata,
            } => JobEvent::Logs {
                research_id,
                content,
                output,
                metadata,
            },
            ProgressUpdate::Report { output } => JobEvent::Report {
                research_id,
                output,
            },
        };
        self.channel.publish(&event);
        true
    }

    pub fn log(&self, content: impl Into<String>, output: impl Into<String>) -> bool {
        self.emit(ProgressUpdate::Log {
            content: content.into(),
            output: output.into(),
            metadata: serde_json::Value::Null,
        })
    }

    pub fn report(&self, output: impl Into<String>) -> bool {
        self.emit(ProgressUpdate::Report {
            output: output.into(),
        })
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves when the job is cancelled. Engines may select on it.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }
}

/// Runs the configured engine for one job.
pub struct JobRunner {
    engine: Arc<dyn ResearchEngine>,
}

impl JobRunner {
    pub fn new(engine: Arc<dyn ResearchEngine>) -> Self {
        Self { engine }
    }

    /// Execute the research computation once.
    ///
    /// Races the engine against the job's cancellation and catches panics, so
    /// the caller always gets an outcome.
    pub async fn run(
        &self,
        params: &JobParams,
        sink: &ProgressSink,
    ) -> std::result::Result<ResearchOutput, JobError> {
        let started = Instant::now();
        tracing::info!(
            research_id = %sink.job_id(),
            engine = self.engine.name(),
            report_type = params.report_type.as_str(),
            report_source = params.report_source.as_str(),
            "research started"
        );

        let execution = AssertUnwindSafe(self.engine.execute(params, sink)).catch_unwind();

        let outcome = tokio::select! {
            biased;
            _ = sink.cancelled() => Err(JobError::cancelled()),
            result = execution => match result {
                Ok(Ok(output)) => Ok(output),
                Ok(Err(e)) => Err(self.wrap_error(e)),
                Err(panic) => Err(JobError::new(
                    FailureKind::Panicked,
                    format!("{} engine panicked: {}", self.engine.name(), panic_message(&*panic)),
                )),
            },
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &outcome {
            Ok(output) => tracing::info!(
                research_id = %sink.job_id(),
                elapsed_ms,
                report_chars = output.report.len(),
                sources = output.source_urls.len(),
                "research finished"
            ),
            Err(e) => tracing::warn!(
                research_id = %sink.job_id(),
                elapsed_ms,
                error = %e,
                "research failed"
            ),
        }
        outcome
    }

    fn wrap_error(&self, err: AppError) -> JobError {
        let err = match err {
            AppError::Resource(msg) => AppError::Resource(msg),
            other => AppError::Execution(format!(
                "{} engine: {}",
                self.engine.name(),
                other.message()
            )),
        };
        JobError::from(&err)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::{ConnectionRegistry, GlobalFanout};
    use crate::jobs::model::{ReportSource, ReportType, Tone};
    use crate::types::Result;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::path::PathBuf;
    use tokio::sync::mpsc;

    enum Behaviour {
        Succeed,
        Fail,
        Panic,
        Hang,
    }

    struct ScriptedEngine(Behaviour);

    #[async_trait]
    impl ResearchEngine for ScriptedEngine {
        async fn execute(&self, _params: &JobParams, sink: &ProgressSink) -> Result<ResearchOutput> {
            sink.log("starting", "one");
            sink.log("starting", "two");
            match self.0 {
                Behaviour::Succeed => Ok(ResearchOutput {
                    report: "# Report".into(),
                    ..Default::default()
                }),
                Behaviour::Fail => Err(AppError::Internal("boom".into())),
                Behaviour::Panic => panic!("engine exploded"),
                Behaviour::Hang => futures::future::pending().await,
            }
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    fn params() -> JobParams {
        JobParams {
            task: "foo".into(),
            report_type: ReportType::ResearchReport,
            report_source: ReportSource::Local,
            tone: Tone::Objective,
            headers: HashMap::new(),
            repo_name: String::new(),
            branch_name: String::new(),
            knowledge_base: None,
            depth: 2,
            breadth: 4,
            doc_path: PathBuf::from("./my-docs"),
            vector_store_path: None,
        }
    }

    fn sink(cancel: CancellationToken) -> (ProgressSink, mpsc::Receiver<Arc<str>>, crate::broadcast::Connection) {
        let registry = Arc::new(ConnectionRegistry::new(16));
        let channel: Arc<dyn BroadcastChannel> = Arc::new(GlobalFanout::new(Arc::clone(&registry)));
        let (conn, rx) = registry.add();
        (ProgressSink::new("task_1_foo".into(), channel, cancel), rx, conn)
    }

    #[tokio::test]
    async fn test_run_forwards_progress_in_order() {
        let (sink, mut rx, _conn) = sink(CancellationToken::new());
        let runner = JobRunner::new(Arc::new(ScriptedEngine(Behaviour::Succeed)));

        let output = runner.run(&params(), &sink).await.unwrap();
        assert_eq!(output.report, "# Report");

        let first: serde_json::Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        let second: serde_json::Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(first["output"], "one");
        assert_eq!(second["output"], "two");
    }

    #[tokio::test]
    async fn test_run_wraps_errors() {
        let (sink, _rx, _conn) = sink(CancellationToken::new());
        let runner = JobRunner::new(Arc::new(ScriptedEngine(Behaviour::Fail)));

        let err = runner.run(&params(), &sink).await.unwrap_err();
        assert_eq!(err.kind, FailureKind::Execution);
        assert!(err.message.contains("scripted"));
        assert!(err.message.contains("boom"));
    }

    #[tokio::test]
    async fn test_run_catches_panics() {
        let (sink, _rx, _conn) = sink(CancellationToken::new());
        let runner = JobRunner::new(Arc::new(ScriptedEngine(Behaviour::Panic)));

        let err = runner.run(&params(), &sink).await.unwrap_err();
        assert_eq!(err.kind, FailureKind::Panicked);
        assert!(err.message.contains("engine exploded"));
    }

    #[tokio::test]
    async fn test_run_observes_cancellation() {
        let cancel = CancellationToken::new();
        let (sink, _rx, _conn) = sink(cancel.clone());
        let runner = JobRunner::new(Arc::new(ScriptedEngine(Behaviour::Hang)));

        let handle = tokio::spawn(async move { runner.run(&params(), &sink).await });
        cancel.cancel();

        let err = handle.await.unwrap().unwrap_err();
        assert_eq!(err.kind, FailureKind::Cancelled);
    }

    #[test]
    fn test_sink_drops_updates_after_cancel() {
        let cancel = CancellationToken::new();
        let (sink, mut rx, _conn) = sink(cancel.clone());

        assert!(sink.log("a", "b"));
        cancel.cancel();
        assert!(!sink.report("late"));

        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }
}
