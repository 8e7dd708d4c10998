use anyhow::Context;
use quarry::{
    AppState, QuarryConfig, QuarryConfigManager,
    cli::{
        Cli, Commands,
        init::{self, InitConfig, InitResult},
        output::Output,
    },
    utils::toml_config::ConfigError,
};
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    let cli = Cli::parse_args();
    let output = if cli.no_color {
        Output::no_color()
    } else {
        Output::new()
    };

    match cli.command {
        Some(Commands::Init {
            path,
            force,
            engine,
            host,
            port,
        }) => {
            let config = InitConfig {
                path,
                force,
                engine,
                host,
                port,
            };
            match init::run(config, &output) {
                InitResult::Success | InitResult::AlreadyExists => ExitCode::SUCCESS,
                InitResult::Error(_) => ExitCode::FAILURE,
            }
        }
        Some(Commands::Config { full, validate }) => show_config(&cli, full, validate, &output),
        None => match serve(&cli).await {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                output.error(&format!("{:#}", e));
                ExitCode::FAILURE
            }
        },
    }
}

fn show_config(cli: &Cli, full: bool, validate: bool, output: &Output) -> ExitCode {
    let config = match QuarryConfig::load(&cli.config) {
        Ok(config) => config,
        Err(ConfigError::FileNotFound(path)) => {
            output.error(&format!("Configuration file not found: {}", path.display()));
            output.hint("Run 'quarry-server init' to create one");
            return ExitCode::FAILURE;
        }
        Err(e) => {
            output.error(&e.to_string());
            return ExitCode::FAILURE;
        }
    };

    if validate {
        output.success(&format!("{} is valid", cli.config.display()));
        return ExitCode::SUCCESS;
    }

    if full {
        match toml::to_string_pretty(&config) {
            Ok(text) => println!("{}", text),
            Err(e) => {
                output.error(&format!("Failed to render configuration: {}", e));
                return ExitCode::FAILURE;
            }
        }
        return ExitCode::SUCCESS;
    }

    output.header("Configuration");
    output.kv("file", &cli.config.display().to_string());
    output.kv(
        "listen",
        &format!("{}:{}", config.server.host, config.server.port),
    );
    output.kv("engine", &format!("{:?}", config.research.engine).to_lowercase());
    output.kv(
        "broadcast",
        &format!(
            "{:?}, queue {}",
            config.broadcast.policy, config.broadcast.queue_capacity
        ),
    );
    output.kv("documents", &config.storage.doc_path.display().to_string());
    output.kv(
        "knowledge bases",
        &config.storage.vector_store_path.display().to_string(),
    );
    output.kv("outputs", &config.storage.outputs_dir.display().to_string());
    ExitCode::SUCCESS
}

fn init_tracing(config: &QuarryConfig, verbose: bool) {
    let level = if verbose {
        "debug"
    } else {
        config.server.log_level.as_str()
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("{level},tower_http={level}").into());

    let registry = tracing_subscriber::registry().with(filter);
    if config.server.log_format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn serve(cli: &Cli) -> anyhow::Result<()> {
    let mut config_manager = QuarryConfigManager::new(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    let config = config_manager.config();

    init_tracing(&config, cli.verbose);

    if let Err(e) = config_manager.start_watching() {
        tracing::warn!(error = %e, "config hot-reload unavailable");
    }

    let state = AppState::build(Arc::new(config_manager)).context("building application state")?;
    let app = quarry::app(state.clone());

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    tracing::info!(
        addr = %addr,
        engine = ?config.research.engine,
        policy = ?config.broadcast.policy,
        "Quarry listening"
    );

    let shutdown_state = state.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
            tracing::info!("Shutdown signal received, closing connections");
            // Upgraded sockets only end once the registry lets them go.
            shutdown_state.shutdown();
        })
        .await
        .context("server error")?;

    state.shutdown();
    tracing::info!("Quarry shut down");
    Ok(())
}
