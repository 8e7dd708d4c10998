//! Job admission, execution and bookkeeping.
//!
//! The orchestrator owns the job table. Every accepted submission gets a
//! unique identity, a Pending record and exactly one spawned execution task.
//! The task drives the record through Running to Completed or Failed,
//! renders artifacts and publishes lifecycle events; queries never wait on it.

use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::id;
use super::model::{
    CancelOutcome, FailureKind, Job, JobError, JobId, JobLookup, JobMode, JobParams, JobResult,
    JobStatus, JobSummary, ReportSource, ReportType, SubmitOutcome, Tone,
};
use super::render::ReportRenderer;
use super::runner::{JobRunner, ProgressSink};
use crate::broadcast::{BroadcastChannel, ConnectionId, JobEvent};
use crate::documents::DocumentStore;
use crate::types::{AppError, ResearchRequest, Result};
use crate::utils::toml_config::QuarryConfigManager;

/// Message returned with a background submission.
pub const QUEUED_MESSAGE: &str =
    "Your report is being generated in the background. Please check back later.";

struct JobRecord {
    job: Job,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
    done: watch::Sender<JobStatus>,
}

pub struct JobOrchestrator {
    jobs: RwLock<HashMap<JobId, JobRecord>>,
    runner: JobRunner,
    broadcast: Arc<dyn BroadcastChannel>,
    renderer: Arc<dyn ReportRenderer>,
    documents: DocumentStore,
    config: QuarryConfigManager,
    closing: CancellationToken,
}

impl JobOrchestrator {
    pub fn new(
        runner: JobRunner,
        broadcast: Arc<dyn BroadcastChannel>,
        renderer: Arc<dyn ReportRenderer>,
        documents: DocumentStore,
        config: QuarryConfigManager,
    ) -> Arc<Self> {
        Arc::new(Self {
            jobs: RwLock::new(HashMap::new()),
            runner,
            broadcast,
            renderer,
            documents,
            config,
            closing: CancellationToken::new(),
        })
    }

    pub fn broadcast(&self) -> &Arc<dyn BroadcastChannel> {
        &self.broadcast
    }

    /// Validate a request into execution parameters.
    ///
    /// Fails synchronously; nothing is recorded for a rejected request.
    pub fn admit(&self, request: &ResearchRequest) -> Result<(JobParams, JobMode)> {
        let task = request.task.trim();
        if task.is_empty() {
            return Err(AppError::Validation("task must not be empty".to_string()));
        }

        let report_type: ReportType = request.report_type.parse()?;
        let report_source: ReportSource = request.report_source.parse()?;
        let tone: Tone = request.tone.parse()?;

        let defaults = self.config.config();
        let deep = request.deep_research_config.clone().unwrap_or_default();
        let depth = positive(deep.max_iterations, defaults.research.default_depth, "max_iterations")?;
        let breadth = positive(
            deep.max_search_results_per_query,
            defaults.research.default_breadth,
            "max_search_results_per_query",
        )?;

        let knowledge_base = request
            .knowledge_base
            .as_deref()
            .map(str::trim)
            .filter(|kb| !kb.is_empty())
            .map(str::to_string);
        let vector_store_path = knowledge_base
            .as_deref()
            .map(|kb| self.documents.kb_docs_dir(kb))
            .transpose()?;

        let params = JobParams {
            task: task.to_string(),
            report_type,
            report_source,
            tone,
            headers: request.headers.clone().unwrap_or_default(),
            repo_name: request.repo_name.clone(),
            branch_name: request.branch_name.clone(),
            knowledge_base,
            depth,
            breadth,
            doc_path: self.documents.doc_root().to_path_buf(),
            vector_store_path,
        };

        let mode = if request.generate_in_background {
            JobMode::Background
        } else {
            JobMode::Foreground
        };
        Ok((params, mode))
    }

    /// Accept a research request and start it.
    ///
    /// `subscriber` is subscribed to the job before execution starts, so it
    /// sees every event of the job under a per-job broadcast policy.
    pub async fn submit(
        self: &Arc<Self>,
        request: ResearchRequest,
        subscriber: Option<ConnectionId>,
    ) -> Result<SubmitOutcome> {
        if self.closing.is_cancelled() {
            return Err(AppError::Unavailable("server is shutting down".to_string()));
        }

        let (params, mode) = self.admit(&request)?;
        let cancel = self.closing.child_token();

        let research_id = {
            let mut jobs = self.jobs.write();
            let base = id::candidate(&params.task, Utc::now());
            let research_id = id::allocate(&base, |candidate| jobs.contains_key(candidate));
            let (done, _) = watch::channel(JobStatus::Pending);
            jobs.insert(
                research_id.clone(),
                JobRecord {
                    job: Job::new(research_id.clone(), params.clone(), mode),
                    cancel: cancel.clone(),
                    handle: None,
                    done,
                },
            );
            research_id
        };

        tracing::info!(
            research_id = %research_id,
            report_type = params.report_type.as_str(),
            mode = ?mode,
            "job accepted"
        );

        if let Some(conn) = subscriber
            && let Err(e) = self.broadcast.subscribe(&conn, &research_id)
        {
            tracing::debug!(conn_id = %conn, error = %e, "subscriber left before job start");
        }
        self.broadcast.publish(&JobEvent::Status {
            research_id: research_id.clone(),
            status: JobStatus::Pending,
        });

        let handle = {
            let this = Arc::clone(self);
            let research_id = research_id.clone();
            tokio::spawn(async move { this.execute(research_id, params, cancel).await })
        };
        if let Some(record) = self.jobs.write().get_mut(&research_id) {
            record.handle = Some(handle);
        }

        match mode {
            JobMode::Background => Ok(SubmitOutcome::Queued { research_id }),
            JobMode::Foreground => match self.wait_for_completion(research_id.as_str()).await? {
                JobLookup::Completed(result) => Ok(SubmitOutcome::Finished(result)),
                JobLookup::Failed { error, .. } => Err(match error.kind {
                    FailureKind::Resource => AppError::Resource(error.message),
                    _ => AppError::Execution(error.message),
                }),
                JobLookup::Pending { status } => Err(AppError::Internal(format!(
                    "job {} stopped while {}",
                    research_id, status
                ))),
            },
        }
    }

    /// Current state of a job. Never waits for the job.
    pub fn get_result(&self, research_id: &str) -> Result<JobLookup> {
        let jobs = self.jobs.read();
        let record = jobs.get(research_id).ok_or_else(|| not_found(research_id))?;
        Ok(lookup(&record.job))
    }

    /// Resolve once the job reaches a terminal state.
    pub async fn wait_for_completion(&self, research_id: &str) -> Result<JobLookup> {
        let mut done = {
            let jobs = self.jobs.read();
            let record = jobs.get(research_id).ok_or_else(|| not_found(research_id))?;
            record.done.subscribe()
        };

        done.wait_for(|status| status.is_terminal())
            .await
            .map_err(|_| AppError::Internal(format!("job {} was dropped", research_id)))?;
        self.get_result(research_id)
    }

    /// Request cancellation. Takes effect at the computation's next await point.
    pub fn cancel(&self, research_id: &str) -> Result<CancelOutcome> {
        let jobs = self.jobs.read();
        let record = jobs.get(research_id).ok_or_else(|| not_found(research_id))?;

        if record.job.status.is_terminal() {
            return Ok(CancelOutcome::AlreadyFinished);
        }
        record.cancel.cancel();
        tracing::info!(research_id = %research_id, "cancellation requested");
        Ok(CancelOutcome::Requested)
    }

    /// Every known job, newest first.
    pub fn list(&self) -> Vec<JobSummary> {
        let mut summaries: Vec<JobSummary> =
            self.jobs.read().values().map(|r| r.job.summary()).collect();
        summaries.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.research_id.cmp(&a.research_id))
        });
        summaries
    }

    pub fn summary(&self, research_id: &str) -> Result<JobSummary> {
        let jobs = self.jobs.read();
        let record = jobs.get(research_id).ok_or_else(|| not_found(research_id))?;
        Ok(record.job.summary())
    }

    pub fn len(&self) -> usize {
        self.jobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.read().is_empty()
    }

    /// Stop accepting work, cancel live jobs and abort their tasks.
    ///
    /// Every job stopped here gets its terminal `error` event. Safe to call
    /// more than once.
    pub fn shutdown(&self) {
        if self.closing.is_cancelled() {
            return;
        }
        self.closing.cancel();

        let error = JobError::new(FailureKind::Cancelled, "server shutting down");
        let mut stopped = Vec::new();
        {
            let mut jobs = self.jobs.write();
            for (research_id, record) in jobs.iter_mut() {
                if let Some(handle) = record.handle.take() {
                    handle.abort();
                }
                if record.job.transition(JobStatus::Failed) {
                    record.job.error = Some(error.clone());
                    record.done.send_replace(JobStatus::Failed);
                    stopped.push(research_id.clone());
                }
            }
        }

        for research_id in &stopped {
            self.broadcast.publish(&JobEvent::Error {
                research_id: research_id.clone(),
                error: error.clone(),
            });
            self.broadcast.release(research_id);
        }
        tracing::info!(stopped = stopped.len(), "orchestrator shut down");
    }

    async fn execute(self: Arc<Self>, research_id: JobId, params: JobParams, cancel: CancellationToken) {
        if !self.advance(&research_id, JobStatus::Running) {
            return;
        }
        self.broadcast.publish(&JobEvent::Status {
            research_id: research_id.clone(),
            status: JobStatus::Running,
        });

        let sink = ProgressSink::new(research_id.clone(), Arc::clone(&self.broadcast), cancel.clone());
        let output = match self.runner.run(&params, &sink).await {
            Ok(output) => output,
            Err(error) => {
                self.fail(&research_id, error, None);
                return;
            }
        };
        if cancel.is_cancelled() {
            self.fail(&research_id, JobError::cancelled(), None);
            return;
        }

        let report = output.report.clone();
        let mut result = JobResult::from_output(research_id.clone(), params.report_type, output);

        match self.renderer.render(&report, &research_id).await {
            Ok(artifacts) => result.artifacts = artifacts,
            Err(e) if params.report_type.requires_artifacts() => {
                self.fail(&research_id, JobError::from(&e), Some(result));
                return;
            }
            Err(e) => {
                tracing::warn!(research_id = %research_id, error = %e, "report rendering failed");
                result.render_error = Some(e.to_string());
            }
        }

        self.complete(&research_id, result);
    }

    fn advance(&self, research_id: &JobId, next: JobStatus) -> bool {
        let mut jobs = self.jobs.write();
        let Some(record) = jobs.get_mut(research_id) else {
            return false;
        };
        if !record.job.transition(next) {
            return false;
        }
        record.done.send_replace(next);
        true
    }

    fn complete(&self, research_id: &JobId, result: JobResult) {
        {
            let mut jobs = self.jobs.write();
            let Some(record) = jobs.get_mut(research_id) else {
                return;
            };
            // A cancel answered `Requested` while rendering still wins.
            if record.cancel.is_cancelled() {
                drop(jobs);
                self.fail(research_id, JobError::cancelled(), Some(result));
                return;
            }
            if !record.job.transition(JobStatus::Completed) {
                return;
            }
            record.job.result = Some(result.clone());
            record.handle = None;
            record.done.send_replace(JobStatus::Completed);
        }

        tracing::info!(
            research_id = %research_id,
            artifacts = result.artifacts.len(),
            "job completed"
        );
        self.broadcast.publish(&JobEvent::Completed {
            research_id: research_id.clone(),
            result,
        });
        self.broadcast.release(research_id);
    }

    fn fail(&self, research_id: &JobId, error: JobError, partial: Option<JobResult>) {
        {
            let mut jobs = self.jobs.write();
            let Some(record) = jobs.get_mut(research_id) else {
                return;
            };
            if !record.job.transition(JobStatus::Failed) {
                return;
            }
            record.job.error = Some(error.clone());
            record.job.result = partial;
            record.handle = None;
            record.done.send_replace(JobStatus::Failed);
        }

        tracing::warn!(research_id = %research_id, error = %error, "job failed");
        self.broadcast.publish(&JobEvent::Error {
            research_id: research_id.clone(),
            error,
        });
        self.broadcast.release(research_id);
    }
}

fn lookup(job: &Job) -> JobLookup {
    match job.status {
        JobStatus::Pending | JobStatus::Running => JobLookup::Pending { status: job.status },
        JobStatus::Completed => match &job.result {
            Some(result) => JobLookup::Completed(result.clone()),
            None => JobLookup::Pending { status: job.status },
        },
        JobStatus::Failed => JobLookup::Failed {
            error: job
                .error
                .clone()
                .unwrap_or_else(|| JobError::new(FailureKind::Execution, "unknown failure")),
            result: job.result.clone(),
        },
    }
}

fn positive(value: Option<i64>, default: u32, field: &str) -> Result<u32> {
    match value {
        None => Ok(default),
        Some(n) if n > 0 => u32::try_from(n)
            .map_err(|_| AppError::Validation(format!("{} is too large", field))),
        Some(n) => Err(AppError::Validation(format!(
            "{} must be a positive integer, got {}",
            field, n
        ))),
    }
}

fn not_found(research_id: &str) -> AppError {
    AppError::NotFound(format!("Job '{}' not found", research_id))
}
