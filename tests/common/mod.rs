//! Shared test fixtures.

#![allow(dead_code)]

pub mod mocks;

use quarry::research::ResearchEngine;
use quarry::{AppState, QuarryConfig, QuarryConfigManager};
use std::sync::Arc;
use tempfile::TempDir;

/// Default configuration with every storage path inside `dir`.
pub fn test_config(dir: &TempDir) -> QuarryConfig {
    let mut config = QuarryConfig::default();
    config.storage.outputs_dir = dir.path().join("outputs");
    config.storage.doc_path = dir.path().join("my-docs");
    config.storage.vector_store_path = dir.path().join("vector_store");
    config
}

pub fn test_state(dir: &TempDir, engine: Arc<dyn ResearchEngine>) -> AppState {
    test_state_with(test_config(dir), engine)
}

pub fn test_state_with(config: QuarryConfig, engine: Arc<dyn ResearchEngine>) -> AppState {
    AppState::with_engine(Arc::new(QuarryConfigManager::from_config(config)), engine)
}
