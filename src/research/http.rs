use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;

use super::ResearchEngine;
use crate::jobs::model::{JobParams, ResearchOutput};
use crate::jobs::runner::ProgressSink;
use crate::types::{AppError, Result};

/// Body sent to the remote research service.
#[derive(Debug, Serialize)]
struct RemoteResearchRequest<'a> {
    research_id: &'a str,
    task: &'a str,
    report_type: &'a str,
    report_source: &'a str,
    tone: &'a str,
    headers: &'a HashMap<String, String>,
    repo_name: &'a str,
    branch_name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    knowledge_base: Option<&'a str>,
    max_iterations: u32,
    max_search_results_per_query: u32,
}

/// Delegates research to a remote service.
///
/// Posts the job parameters to `<endpoint>/research` and expects a JSON
/// [`ResearchOutput`] back.
pub struct HttpResearchEngine {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpResearchEngine {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            api_key,
        })
    }
}

#[async_trait]
impl ResearchEngine for HttpResearchEngine {
    async fn execute(&self, params: &JobParams, sink: &ProgressSink) -> Result<ResearchOutput> {
        let url = format!("{}/research", self.endpoint);
        let body = RemoteResearchRequest {
            research_id: sink.job_id().as_str(),
            task: &params.task,
            report_type: params.report_type.as_str(),
            report_source: params.report_source.as_str(),
            tone: params.tone.as_str(),
            headers: &params.headers,
            repo_name: &params.repo_name,
            branch_name: &params.branch_name,
            knowledge_base: params.knowledge_base.as_deref(),
            max_iterations: params.depth,
            max_search_results_per_query: params.breadth,
        };

        sink.log("remote_research", format!("Delegating research to {}", self.endpoint));

        let mut request = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| AppError::Execution(format!("HTTP request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(AppError::Execution(format!(
                "Research service returned {}: {}",
                status, text
            )));
        }

        let output: ResearchOutput = response
            .json()
            .await
            .map_err(|e| AppError::Execution(format!("Failed to parse research response: {}", e)))?;

        sink.report(output.report.clone());
        Ok(output)
    }

    fn name(&self) -> &str {
        "http"
    }
}
