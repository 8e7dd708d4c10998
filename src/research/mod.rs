//! Research computation backends.
//!
//! A [`ResearchEngine`] turns validated [`JobParams`] into a report, emitting
//! progress through the job's [`ProgressSink`] as it goes. Two engines ship
//! with the server:
//!
//! - [`local::LocalResearchEngine`] - digests the job's document directory
//!   (or knowledge base), needs no network access
//! - [`http::HttpResearchEngine`] - delegates to a remote research service
//!
//! The engine is selected by `research.engine` in `quarry.toml`.

pub mod http;
pub mod local;

pub use http::HttpResearchEngine;
pub use local::LocalResearchEngine;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::jobs::model::{JobParams, ResearchOutput};
use crate::jobs::runner::ProgressSink;
use crate::types::{AppError, Result};
use crate::utils::toml_config::{EngineKind, QuarryConfig};

/// The long-running research computation.
///
/// Implementations should emit progress through `sink` in the order it is
/// produced and return once the report is complete. Cancellation is handled
/// by the caller; engines may check [`ProgressSink::is_cancelled`] to stop
/// early.
#[async_trait]
pub trait ResearchEngine: Send + Sync {
    async fn execute(&self, params: &JobParams, sink: &ProgressSink) -> Result<ResearchOutput>;

    /// Short identifier used in logs and error messages
    fn name(&self) -> &str;
}

/// Build the engine selected by configuration.
pub fn from_config(config: &QuarryConfig) -> Result<Arc<dyn ResearchEngine>> {
    match config.research.engine {
        EngineKind::Local => Ok(Arc::new(LocalResearchEngine::new())),
        EngineKind::Http => {
            let endpoint = config.research.endpoint.clone().ok_or_else(|| {
                AppError::Config("research.endpoint is required for the http engine".to_string())
            })?;
            let engine = HttpResearchEngine::new(
                endpoint,
                config.research_api_key(),
                Duration::from_secs(config.research.request_timeout_secs),
            )?;
            Ok(Arc::new(engine))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config_local_by_default() {
        let engine = from_config(&QuarryConfig::default()).unwrap();
        assert_eq!(engine.name(), "local");
    }

    #[test]
    fn test_from_config_http_requires_endpoint() {
        let mut config = QuarryConfig::default();
        config.research.engine = EngineKind::Http;
        assert!(matches!(from_config(&config), Err(AppError::Config(_))));

        config.research.endpoint = Some("http://localhost:9000".to_string());
        assert_eq!(from_config(&config).unwrap().name(), "http");
    }
}
