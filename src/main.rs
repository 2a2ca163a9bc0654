//! Mentora — service entry point.
//!
//! Startup sequence:
//!   1. Load .env (if present)
//!   2. Load config
//!   3. Resolve effective log level (CLI `-v` flags > config/env)
//!   4. Init logger once
//!   5. Build the LLM provider and open the context store
//!   6. Spawn Ctrl-C → shutdown signal watcher
//!   7. Run the HTTP/WebSocket channel until shutdown

use std::fs;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use mentora::comms::AxumChannel;
use mentora::error::AppError;
use mentora::llm::providers;
use mentora::runtime::{self, Component};
use mentora::store::{ContextStore, StoreHandle, local::LocalStore};
use mentora::tutor::Tutor;
use mentora::{config, logger};

struct CliArgs {
    log_level: Option<&'static str>,
    config_path: Option<String>,
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), AppError> {
    // Load .env if present; the file is optional.
    let _ = dotenvy::dotenv();

    let args = parse_cli_args();
    let config = config::load(args.config_path.as_deref())?;

    fs::create_dir_all(&config.work_dir)?;
    if let Some(parent) = config.log_file.as_deref().and_then(|f| f.parent()) {
        fs::create_dir_all(parent)?;
    }

    let effective_log_level = args.log_level.unwrap_or(config.log_level.as_str());
    logger::init(effective_log_level, config.log_file.as_deref())?;

    info!(
        service = %config.service_name,
        work_dir = %config.work_dir.display(),
        configured_log_level = %config.log_level,
        effective_log_level = %effective_log_level,
        "config loaded"
    );

    let provider = providers::build(&config.llm, config.llm_api_key.clone())
        .map_err(|e| AppError::Config(e.to_string()))?;
    if provider.name() == "openai-compatible" && config.llm_api_key.is_none() {
        warn!("LLM_API_KEY is not set — requests will be sent without authorization");
    }

    let store: Arc<dyn ContextStore> = match config.store_path() {
        Some(path) => Arc::new(LocalStore::open(path)?),
        None => Arc::new(LocalStore::new()),
    };

    info!(
        provider = provider.name(),
        model = %config.llm.openai.model,
        store = store.store_type(),
        max_turns = config.chat.max_turns,
        "tutor ready"
    );

    let tutor = Arc::new(Tutor::new(StoreHandle::new(store), provider, &config));

    // Shared shutdown token, cancelled by Ctrl-C.
    let shutdown = CancellationToken::new();
    let ctrlc_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("ctrl-c received — initiating shutdown");
            ctrlc_token.cancel();
        }
    });

    let mut components: Vec<Box<dyn Component>> = Vec::new();
    if config.http.enabled {
        components.push(Box::new(AxumChannel::new("http0", config.http.bind.clone(), tutor)));
    }
    if components.is_empty() {
        warn!("no channels enabled — nothing to serve");
        return Ok(());
    }

    runtime::spawn_components(components, shutdown).join().await?;
    info!("shutdown complete");
    Ok(())
}

fn parse_cli_args() -> CliArgs {
    let mut verbosity = 0u8;
    let mut config_path = None;

    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        if arg == "--" {
            break;
        }

        match arg.as_str() {
            "-h" | "--help" => {
                println!("Usage: mentora [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -h, --help                 Print help");
                println!("  -f, --config <PATH>        Path to configuration file (default: config/default.toml)");
                println!("  -v, -vv, -vvv, -vvvv       Increase logging verbosity");
                std::process::exit(0);
            }
            "-f" | "--config" => {
                if let Some(path) = iter.next() {
                    config_path = Some(path);
                } else {
                    eprintln!("error: -f/--config requires a path argument");
                    std::process::exit(1);
                }
            }
            "--verbose" => verbosity = verbosity.saturating_add(1),
            a if a.starts_with('-') && a.len() > 1 && a.chars().skip(1).all(|c| c == 'v') => {
                verbosity = verbosity.saturating_add((a.len() - 1) as u8);
            }
            _ => {}
        }
    }

    // -v → warn, -vv → info, -vvv → debug, -vvvv+ → trace
    let log_level = match verbosity {
        0 => None,
        1 => Some("warn"),
        2 => Some("info"),
        3 => Some("debug"),
        _ => Some("trace"),
    };

    CliArgs { log_level, config_path }
}
