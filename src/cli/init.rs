//! Init command implementation
//!
//! Scaffolds a Quarry project: configuration, environment template and the
//! storage directories the server reads and writes.

use super::output::Output;
use std::fs;
use std::path::{Path, PathBuf};

/// Result of the init operation
#[derive(Debug)]
pub enum InitResult {
    Success,
    /// quarry.toml exists and `--force` was not given
    AlreadyExists,
    Error(String),
}

pub struct InitConfig {
    pub path: PathBuf,
    pub force: bool,
    /// `local` or `http`
    pub engine: String,
    pub host: String,
    pub port: u16,
}

/// Storage directories, matching the defaults in quarry.toml
const DIRECTORIES: [&str; 3] = ["my-docs", "outputs", "vector_store"];

/// Run the init command
pub fn run(config: InitConfig, output: &Output) -> InitResult {
    output.banner();
    output.header("Initializing Quarry Project");

    if !matches!(config.engine.as_str(), "local" | "http") {
        output.error(&format!(
            "Unknown engine '{}', expected 'local' or 'http'",
            config.engine
        ));
        return InitResult::Error(format!("unknown engine: {}", config.engine));
    }

    let base_path = &config.path;
    let config_path = base_path.join("quarry.toml");
    if config_path.exists() && !config.force {
        output.warning("quarry.toml already exists!");
        output.hint("Use --force to overwrite existing files");
        return InitResult::AlreadyExists;
    }

    output.subheader("Creating directories");
    for dir in DIRECTORIES {
        let dir_path = base_path.join(dir);
        if dir_path.is_dir() {
            output.skipped(dir, "already exists");
            continue;
        }
        if let Err(e) = fs::create_dir_all(&dir_path) {
            output.error(&format!("Failed to create {}: {}", dir, e));
            return InitResult::Error(e.to_string());
        }
        output.created("directory", dir);
    }

    output.subheader("Creating configuration files");

    if let Err(e) = write_file(&config_path, &generate_quarry_toml(&config), config.force) {
        output.error(&format!("Failed to create quarry.toml: {}", e));
        return InitResult::Error(e.to_string());
    }
    output.created("config", "quarry.toml");

    let env_example_path = base_path.join(".env.example");
    if let Err(e) = write_file(&env_example_path, ENV_EXAMPLE, config.force) {
        output.error(&format!("Failed to create .env.example: {}", e));
        return InitResult::Error(e.to_string());
    }
    output.created("env", ".env.example");

    let gitignore_path = base_path.join(".gitignore");
    if gitignore_path.exists() {
        output.skipped(".gitignore", "already exists");
    } else if let Err(e) = write_file(&gitignore_path, GITIGNORE, false) {
        output.warning(&format!("Failed to create .gitignore: {}", e));
    } else {
        output.created("file", ".gitignore");
    }

    output.complete("Quarry project initialized successfully!");

    output.header("Next Steps");
    output.newline();
    output.info("1. Put documents to research into my-docs/");
    if config.engine == "http" {
        output.info("2. Point research.endpoint in quarry.toml at your research service");
    } else {
        output.info("2. Optionally create knowledge bases under vector_store/<name>/docs");
    }
    output.info("3. Start the server:");
    output.command("quarry-server");

    output.hint(&format!(
        "HTTP on http://{host}:{port}, WebSocket on ws://{host}:{port}/ws",
        host = config.host,
        port = config.port
    ));

    InitResult::Success
}

fn write_file(path: &Path, content: &str, force: bool) -> std::io::Result<()> {
    if path.exists() && !force {
        return Ok(());
    }
    fs::write(path, content)
}

fn generate_quarry_toml(config: &InitConfig) -> String {
    let research_section = if config.engine == "http" {
        r#"[research]
engine = "http"
endpoint = "http://localhost:9000"
# Environment variable holding a bearer token for the service
# api_key_env = "RESEARCH_API_KEY"
request_timeout_secs = 600
default_depth = 2
default_breadth = 4
"#
    } else {
        r#"[research]
# Digest the job's local documents; switch to "http" for a remote service
engine = "local"
default_depth = 2
default_breadth = 4
"#
    };

    format!(
        r#"# Quarry configuration
# =====================
# DOC_PATH and VECTOR_STORE_PATH in the environment override [storage].

[server]
host = "{host}"
port = {port}
log_level = "info"
# "pretty" or "json"
log_format = "pretty"
cors_origins = ["http://localhost:3000"]
max_upload_bytes = 26214400

[storage]
outputs_dir = "outputs"
doc_path = "./my-docs"
vector_store_path = "vector_store"

[broadcast]
# "global" sends every event to every connection,
# "per_job" only to connections subscribed to the job
policy = "global"
queue_capacity = 256
heartbeat_secs = 30
idle_timeout_secs = 90

{research_section}"#,
        host = config.host,
        port = config.port,
        research_section = research_section,
    )
}

const ENV_EXAMPLE: &str = r#"# Quarry environment variables
# Copy this file to .env and fill in the values.

# Logging (overrides server.log_level)
RUST_LOG=info,quarry=debug

# Storage overrides
# DOC_PATH=./my-docs
# VECTOR_STORE_PATH=vector_store

# Bearer token for the remote research service
# RESEARCH_API_KEY=
"#;

const GITIGNORE: &str = r#"# Quarry generated files
/outputs/

# Environment
.env
.env.local

# Rust
/target/
"#;
