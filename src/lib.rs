//! # Quarry - Research Job Server
//!
//! Quarry accepts long-running research jobs over HTTP or WebSocket, runs
//! them in the background and streams their progress to every interested
//! client.
//!
//! ## Overview
//!
//! Quarry can be used in two ways:
//!
//! 1. **As a standalone server** - Run the `quarry-server` binary
//! 2. **As a library** - Embed the orchestrator and gateway in your own service
//!
//! ### Embedding
//!
//! ```rust,ignore
//! use quarry::{AppState, QuarryConfigManager};
//! use std::sync::Arc;
//!
//! let config_manager = Arc::new(QuarryConfigManager::new("quarry.toml")?);
//! let state = AppState::build(config_manager)?;
//! let app = quarry::app(state.clone());
//!
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:8000").await?;
//! axum::serve(listener, app).await?;
//! state.shutdown();
//! ```
//!
//! ### Plugging in a research engine
//!
//! ```rust,ignore
//! use quarry::research::ResearchEngine;
//!
//! let state = AppState::with_engine(config_manager, Arc::new(MyEngine::new()));
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Description |
//! |---------|-------------|
//! | `swagger-ui` | Interactive API docs at `/swagger-ui/` |
//!
//! ## Modules
//!
//! - [`api`] - HTTP routes and the WebSocket gateway
//! - [`broadcast`] - connection registry and event fan-out
//! - [`documents`] - document and knowledge base storage
//! - [`jobs`] - job model, orchestration, execution and rendering
//! - [`research`] - research engines
//! - [`types`] - request/response types and error handling
//! - [`utils`] - configuration

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(rustdoc::missing_crate_level_docs)]

/// HTTP routes and the WebSocket gateway.
pub mod api;
/// Connection registry and event fan-out.
pub mod broadcast;
/// CLI commands and terminal output.
pub mod cli;
/// Document and knowledge base storage.
pub mod documents;
/// Research job lifecycle.
pub mod jobs;
/// Research engines.
pub mod research;
/// Core types (requests, responses, errors).
pub mod types;
/// Configuration utilities.
pub mod utils;

// Re-export commonly used types
pub use broadcast::{BroadcastChannel, ConnectionRegistry, JobEvent};
pub use documents::DocumentStore;
pub use jobs::{JobOrchestrator, JobRunner, MarkdownRenderer, ReportRenderer};
pub use research::ResearchEngine;
pub use types::{AppError, Result};
pub use utils::toml_config::{QuarryConfig, QuarryConfigManager};

use axum::Router;
use std::path::PathBuf;
use std::sync::Arc;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// TOML-based configuration with hot-reload support
    pub config_manager: Arc<QuarryConfigManager>,
    /// Job table and execution
    pub orchestrator: Arc<JobOrchestrator>,
    /// Open client connections
    pub registry: Arc<ConnectionRegistry>,
    /// Event delivery policy
    pub broadcast: Arc<dyn BroadcastChannel>,
    /// Document root and knowledge bases
    pub documents: Arc<DocumentStore>,
    /// Where rendered reports are written
    pub outputs_dir: PathBuf,
}

impl AppState {
    /// Wire up the server from configuration, using the configured engine.
    pub fn build(config_manager: Arc<QuarryConfigManager>) -> Result<Self> {
        let engine = research::from_config(&config_manager.config())?;
        Ok(Self::with_engine(config_manager, engine))
    }

    /// Wire up the server around a specific research engine.
    pub fn with_engine(
        config_manager: Arc<QuarryConfigManager>,
        engine: Arc<dyn ResearchEngine>,
    ) -> Self {
        let outputs_dir = config_manager.config().storage.outputs_dir.clone();
        let renderer = Arc::new(MarkdownRenderer::new(outputs_dir));
        Self::with_parts(config_manager, engine, renderer)
    }

    /// Wire up the server around a specific engine and renderer.
    pub fn with_parts(
        config_manager: Arc<QuarryConfigManager>,
        engine: Arc<dyn ResearchEngine>,
        renderer: Arc<dyn ReportRenderer>,
    ) -> Self {
        let config = config_manager.config();

        let registry = Arc::new(ConnectionRegistry::new(config.broadcast.queue_capacity));
        let broadcast = broadcast::for_policy(config.broadcast.policy, Arc::clone(&registry));
        let documents = DocumentStore::from_config(&config.storage);

        let orchestrator = JobOrchestrator::new(
            JobRunner::new(engine),
            Arc::clone(&broadcast),
            renderer,
            documents.clone(),
            (*config_manager).clone(),
        );

        tracing::debug!(
            policy = ?config.broadcast.policy,
            queue_capacity = config.broadcast.queue_capacity,
            "application state ready"
        );

        Self {
            config_manager,
            orchestrator,
            registry,
            broadcast,
            documents: Arc::new(documents),
            outputs_dir: config.storage.outputs_dir.clone(),
        }
    }

    /// Cancel running jobs and close every connection. Idempotent.
    pub fn shutdown(&self) {
        self.orchestrator.shutdown();
        if !self.registry.is_empty() {
            self.broadcast.publish(&JobEvent::Notice {
                content: "server shutting down".to_string(),
            });
        }
        self.registry.shutdown();
    }
}

/// The complete HTTP application: routes, docs and middleware.
pub fn app(state: AppState) -> Router {
    api::routes::create_router(&state.config_manager.config()).with_state(state)
}
