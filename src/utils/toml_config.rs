//! TOML-based configuration for Quarry
//!
//! This module provides declarative configuration for the server, storage
//! locations, the broadcast layer and the research engine via a TOML file
//! (`quarry.toml`).
//!
//! # Hot Reloading
//!
//! Configuration changes are automatically detected and applied at runtime.
//! Use `QuarryConfigManager` for thread-safe access to the current configuration.
//!
//! Only some keys are live:
//!
//! | Key | Applied |
//! |-----|---------|
//! | `research.default_depth`, `research.default_breadth` | next submission |
//! | `broadcast.heartbeat_secs`, `broadcast.idle_timeout_secs` | next connection |
//! | everything else | restart only |
//!
//! A reload that changes a restart-only key is applied to the stored config
//! but logged as a warning, since the running server keeps the old value.

use arc_swap::ArcSwap;
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Root configuration structure loaded from quarry.toml
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuarryConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub broadcast: BroadcastConfig,

    #[serde(default)]
    pub research: ResearchConfig,
}

// ============= Server Configuration =============

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// `pretty` or `json`
    #[serde(default = "default_log_format")]
    pub log_format: String,

    /// Origins allowed by the CORS layer
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,

    /// Maximum accepted upload size in bytes
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_cors_origins() -> Vec<String> {
    vec!["http://localhost:3000".to_string()]
}

fn default_max_upload_bytes() -> usize {
    25 * 1024 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            cors_origins: default_cors_origins(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

// ============= Storage Configuration =============

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Where rendered report artifacts are written
    #[serde(default = "default_outputs_dir")]
    pub outputs_dir: PathBuf,

    /// Global document root (overridden by `DOC_PATH`)
    #[serde(default = "default_doc_path")]
    pub doc_path: PathBuf,

    /// Root of the knowledge bases (overridden by `VECTOR_STORE_PATH`)
    #[serde(default = "default_vector_store_path")]
    pub vector_store_path: PathBuf,
}

fn default_outputs_dir() -> PathBuf {
    PathBuf::from("outputs")
}

fn default_doc_path() -> PathBuf {
    PathBuf::from("./my-docs")
}

fn default_vector_store_path() -> PathBuf {
    PathBuf::from("vector_store")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            outputs_dir: default_outputs_dir(),
            doc_path: default_doc_path(),
            vector_store_path: default_vector_store_path(),
        }
    }
}

// ============= Broadcast Configuration =============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BroadcastPolicy {
    /// Every connection receives every event
    #[default]
    Global,
    /// Connections receive events only for jobs they subscribed to
    PerJob,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastConfig {
    #[serde(default)]
    pub policy: BroadcastPolicy,

    /// Bound of each connection's outbound queue
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,

    /// A connection silent for this long is closed
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
}

fn default_queue_capacity() -> usize {
    256
}

fn default_heartbeat_secs() -> u64 {
    30
}

fn default_idle_timeout_secs() -> u64 {
    90
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            policy: BroadcastPolicy::default(),
            queue_capacity: default_queue_capacity(),
            heartbeat_secs: default_heartbeat_secs(),
            idle_timeout_secs: default_idle_timeout_secs(),
        }
    }
}

// ============= Research Configuration =============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    /// Digest of the job's local documents
    #[default]
    Local,
    /// Remote research service
    Http,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchConfig {
    #[serde(default)]
    pub engine: EngineKind,

    /// Endpoint of the remote research service (required for `http`)
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Environment variable holding the bearer token for the remote service
    #[serde(default)]
    pub api_key_env: Option<String>,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_depth")]
    pub default_depth: u32,

    #[serde(default = "default_breadth")]
    pub default_breadth: u32,
}

fn default_request_timeout_secs() -> u64 {
    600
}

fn default_depth() -> u32 {
    2
}

fn default_breadth() -> u32 {
    4
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            engine: EngineKind::default(),
            endpoint: None,
            api_key_env: None,
            request_timeout_secs: default_request_timeout_secs(),
            default_depth: default_depth(),
            default_breadth: default_breadth(),
        }
    }
}

// ============= Configuration Loading & Validation =============

/// Errors that can occur during configuration loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to read configuration file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Environment variable '{0}' referenced in config is not set")]
    MissingEnvVar(String),

    #[error("Watch error: {0}")]
    WatchError(#[from] notify::Error),
}

impl QuarryConfig {
    /// Load configuration from a TOML file, apply environment overrides and
    /// validate the result.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        let mut config: QuarryConfig = toml::from_str(&content)?;
        config.apply_env_overrides();

        config.validate()?;

        Ok(config)
    }

    /// `DOC_PATH` and `VECTOR_STORE_PATH` take precedence over the file.
    ///
    /// Only consulted at load time; jobs receive resolved paths explicitly.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(doc_path) = std::env::var("DOC_PATH")
            && !doc_path.is_empty()
        {
            self.storage.doc_path = PathBuf::from(doc_path);
        }
        if let Ok(vector_store) = std::env::var("VECTOR_STORE_PATH")
            && !vector_store.is_empty()
        {
            self.storage.vector_store_path = PathBuf::from(vector_store);
        }
    }

    /// Validate the configuration for internal consistency and env var availability
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.broadcast.queue_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "broadcast.queue_capacity must be at least 1".to_string(),
            ));
        }

        if self.broadcast.heartbeat_secs == 0 {
            return Err(ConfigError::ValidationError(
                "broadcast.heartbeat_secs must be at least 1".to_string(),
            ));
        }

        if self.broadcast.idle_timeout_secs <= self.broadcast.heartbeat_secs {
            return Err(ConfigError::ValidationError(format!(
                "broadcast.idle_timeout_secs ({}) must exceed heartbeat_secs ({})",
                self.broadcast.idle_timeout_secs, self.broadcast.heartbeat_secs
            )));
        }

        if self.research.default_depth == 0 || self.research.default_breadth == 0 {
            return Err(ConfigError::ValidationError(
                "research.default_depth and research.default_breadth must be positive".to_string(),
            ));
        }

        if self.research.engine == EngineKind::Http {
            match self.research.endpoint.as_deref() {
                Some(endpoint) if endpoint.starts_with("http://") || endpoint.starts_with("https://") => {}
                Some(endpoint) => {
                    return Err(ConfigError::ValidationError(format!(
                        "research.endpoint must be an http(s) URL, got '{}'",
                        endpoint
                    )));
                }
                None => {
                    return Err(ConfigError::ValidationError(
                        "research.endpoint is required when research.engine = \"http\"".to_string(),
                    ));
                }
            }

            if let Some(ref env) = self.research.api_key_env {
                self.validate_env_var(env)?;
            }
        }

        if !matches!(self.server.log_format.as_str(), "pretty" | "json") {
            return Err(ConfigError::ValidationError(format!(
                "server.log_format must be 'pretty' or 'json', got '{}'",
                self.server.log_format
            )));
        }

        Ok(())
    }

    fn validate_env_var(&self, name: &str) -> Result<(), ConfigError> {
        std::env::var(name).map_err(|_| ConfigError::MissingEnvVar(name.to_string()))?;
        Ok(())
    }

    /// Get a resolved value from an env var reference
    pub fn resolve_env(&self, env_name: &str) -> Option<String> {
        std::env::var(env_name).ok()
    }

    /// Bearer token for the remote research service, if one is configured
    pub fn research_api_key(&self) -> Option<String> {
        self.research
            .api_key_env
            .as_deref()
            .and_then(|env| self.resolve_env(env))
    }

    /// Keys that differ from `next` but only take effect after a restart.
    pub fn restart_only_changes(&self, next: &QuarryConfig) -> Vec<&'static str> {
        let (a, b) = (self, next);
        let checks = [
            ("server.host", a.server.host != b.server.host),
            ("server.port", a.server.port != b.server.port),
            ("server.log_level", a.server.log_level != b.server.log_level),
            ("server.log_format", a.server.log_format != b.server.log_format),
            ("server.cors_origins", a.server.cors_origins != b.server.cors_origins),
            ("server.max_upload_bytes", a.server.max_upload_bytes != b.server.max_upload_bytes),
            ("storage.outputs_dir", a.storage.outputs_dir != b.storage.outputs_dir),
            ("storage.doc_path", a.storage.doc_path != b.storage.doc_path),
            (
                "storage.vector_store_path",
                a.storage.vector_store_path != b.storage.vector_store_path,
            ),
            ("broadcast.policy", a.broadcast.policy != b.broadcast.policy),
            ("broadcast.queue_capacity", a.broadcast.queue_capacity != b.broadcast.queue_capacity),
            ("research.engine", a.research.engine != b.research.engine),
            ("research.endpoint", a.research.endpoint != b.research.endpoint),
            ("research.api_key_env", a.research.api_key_env != b.research.api_key_env),
            (
                "research.request_timeout_secs",
                a.research.request_timeout_secs != b.research.request_timeout_secs,
            ),
        ];
        checks
            .into_iter()
            .filter_map(|(key, changed)| changed.then_some(key))
            .collect()
    }
}

// ============= Hot Reloading Configuration Manager =============

/// Thread-safe configuration manager with hot reloading support
pub struct QuarryConfigManager {
    config: Arc<ArcSwap<QuarryConfig>>,
    config_path: PathBuf,
    watcher: RwLock<Option<RecommendedWatcher>>,
}

impl QuarryConfigManager {
    /// Create a new configuration manager and load the initial config
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        // Convert to absolute path for reliable file watching
        let path = path.as_ref();
        let path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()
                .map_err(ConfigError::ReadError)?
                .join(path)
        };

        let config = QuarryConfig::load(&path)?;

        Ok(Self {
            config: Arc::new(ArcSwap::from_pointee(config)),
            config_path: path,
            watcher: RwLock::new(None),
        })
    }

    /// Get the current configuration (lockless read)
    pub fn config(&self) -> Arc<QuarryConfig> {
        self.config.load_full()
    }

    /// Manually reload the configuration from disk
    pub fn reload(&self) -> Result<(), ConfigError> {
        info!(path = ?self.config_path, "Reloading configuration");

        let new_config = QuarryConfig::load(&self.config_path)?;
        swap_in(&self.config, new_config);

        info!("Configuration reloaded successfully");
        Ok(())
    }

    /// Start watching for configuration file changes
    pub fn start_watching(&mut self) -> Result<(), ConfigError> {
        let (tx, mut rx) = mpsc::unbounded_channel::<()>();

        let config_path = self.config_path.clone();
        let config_arc = Arc::clone(&self.config);

        let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
            match res {
                Ok(event) => {
                    if event.kind.is_modify() || event.kind.is_create() {
                        // Debounced in the receiver
                        let _ = tx.send(());
                    }
                }
                Err(e) => {
                    error!(error = ?e, "Config watcher error");
                }
            }
        })?;

        // Watch the config file's parent directory
        if let Some(parent) = self.config_path.parent() {
            watcher.watch(parent, RecursiveMode::NonRecursive)?;
        }

        *self.watcher.write() = Some(watcher);

        tokio::spawn(async move {
            let mut last_reload = std::time::Instant::now();
            let debounce_duration = Duration::from_millis(500);

            while rx.recv().await.is_some() {
                if last_reload.elapsed() < debounce_duration {
                    continue;
                }

                // Wait a bit for file write to complete
                tokio::time::sleep(Duration::from_millis(100)).await;

                match QuarryConfig::load(&config_path) {
                    Ok(new_config) => {
                        swap_in(&config_arc, new_config);
                        info!("Configuration hot-reloaded successfully");
                        last_reload = std::time::Instant::now();
                    }
                    Err(e) => {
                        warn!(error = %e, "Failed to hot-reload config, keeping previous config");
                    }
                }
            }
        });

        info!("Configuration hot-reload watcher started");
        Ok(())
    }

}

/// Store `next`, warning about keys the running server will not pick up.
fn swap_in(current: &ArcSwap<QuarryConfig>, next: QuarryConfig) {
    let stale = current.load().restart_only_changes(&next);
    if !stale.is_empty() {
        warn!(keys = ?stale, "Changed config keys take effect after a restart");
    }
    current.store(Arc::new(next));
}

impl Clone for QuarryConfigManager {
    fn clone(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
            config_path: self.config_path.clone(),
            watcher: RwLock::new(None), // Watcher is not cloned
        }
    }
}

impl QuarryConfigManager {
    /// Create a config manager directly from a config (useful for testing)
    /// This won't have file watching capabilities.
    pub fn from_config(config: QuarryConfig) -> Self {
        Self {
            config: Arc::new(ArcSwap::from_pointee(config)),
            config_path: PathBuf::from("test-config.toml"),
            watcher: RwLock::new(None),
        }
    }
}
