//! CLI module for Quarry
//!
//! Argument parsing for the quarry-server binary. Uses clap for parsing and
//! owo-colors for terminal output.

pub mod init;
pub mod output;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Quarry - research job server
///
/// Runs research jobs in the background and streams their progress to
/// WebSocket subscribers.
#[derive(Parser, Debug)]
#[command(
    name = "quarry-server",
    version,
    about = "Quarry - research job server with live WebSocket progress",
    long_about = "Accepts research requests over HTTP and WebSocket, runs them in the\n\
                  background and broadcasts progress, reports and completion events.\n\n\
                  Run without arguments to start the server, or use 'init' to scaffold a new project.",
    after_help = "EXAMPLES:\n    \
                  quarry-server init                 # Scaffold quarry.toml and storage directories\n    \
                  quarry-server                      # Start the server (requires quarry.toml)\n    \
                  quarry-server --config prod.toml   # Use a custom config file\n    \
                  quarry-server config --validate    # Check the configuration and exit"
)]
pub struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "quarry.toml", global = true)]
    pub config: PathBuf,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize a new Quarry project
    ///
    /// Creates quarry.toml, .env.example and the document, knowledge base
    /// and output directories.
    Init {
        /// Directory to initialize (defaults to current directory)
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Overwrite existing files
        #[arg(short, long)]
        force: bool,

        /// Research engine to configure (local or http)
        #[arg(long, default_value = "local")]
        engine: String,

        /// Host address for the server
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Port for the server
        #[arg(long, default_value = "8000")]
        port: u16,
    },

    /// Show configuration information
    Config {
        /// Show the full configuration
        #[arg(short = 'f', long)]
        full: bool,

        /// Validate the configuration file
        #[arg(long)]
        validate: bool,
    },
}

impl Cli {
    /// Parse CLI arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
