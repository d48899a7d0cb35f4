//! mod_report - profile report worker
//!
//! Listens on the report control channel, turns a profile's captured
//! traffic into a rendered report, and announces the outcome so the
//! owner can be notified and the profile retired.
//!
//! Exit codes:
//!   0 - Clean shutdown (subscription ended or shutdown signal), or a
//!       successful --init-config / --process run
//!   1 - Bootstrap failure (config, connection, subscription) or a fault
//!       in the receive loop

mod broker;
mod capture;
mod cli;
mod config;
mod error;
mod models;
mod registry;
mod report;
mod storage;
#[cfg(test)]
mod testing;
mod worker;

use anyhow::{Context, Result};
use broker::RedisBroker;
use capture::{CaptureConfig, CaptureScanner};
use cli::Args;
use config::{Config, DEFAULT_CONFIG_FILE};
use models::{ProcessOutcome, ProfileName};
use registry::RedisRegistry;
use report::{ExternalTools, TrafficProcessor};
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::{Arc, Mutex};
use storage::StorageLocator;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;
use worker::{Dispatcher, StatusAnnouncer};

const EXIT_SUCCESS: i32 = 0;
const EXIT_FAILURE: i32 = 1;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse_args();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(EXIT_FAILURE);
    }

    // Handle --init-config early (no logging needed)
    if args.init_config {
        return handle_init_config();
    }

    // Load configuration before logging: it names the log file
    let mut config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(EXIT_FAILURE);
        }
    };
    config.merge_with_args(&args);

    if let Err(e) = init_logging(&args, &config) {
        eprintln!("Error: {:#}", e);
        std::process::exit(EXIT_FAILURE);
    }

    info!("mod_report v{}", env!("CARGO_PKG_VERSION"));
    debug!("Arguments: {:?}", args);

    let cancel = CancellationToken::new();
    spawn_shutdown_listener(cancel.clone());

    let exit_code = match args.process.as_deref() {
        Some(profile) => match process_once(&config, profile, args.json, cancel).await {
            Ok(()) => EXIT_SUCCESS,
            Err(e) => {
                error!("Processing failed: {:#}", e);
                eprintln!("Error: {:#}", e);
                EXIT_FAILURE
            }
        },
        None => run_worker(&config, cancel).await,
    };

    std::process::exit(exit_code);
}

/// Handle --init-config: generate a default mod_report.toml.
fn handle_init_config() -> Result<()> {
    let path = Path::new(DEFAULT_CONFIG_FILE);

    if path.exists() {
        eprintln!(
            "{} already exists. Remove it first or edit it manually.",
            DEFAULT_CONFIG_FILE
        );
        std::process::exit(EXIT_FAILURE);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content)
        .with_context(|| format!("Failed to write {}", DEFAULT_CONFIG_FILE))?;

    println!("Created {} with default settings.", DEFAULT_CONFIG_FILE);
    Ok(())
}

/// Initialize logging to stderr or to the configured log file.
fn init_logging(args: &Args, config: &Config) -> Result<()> {
    let level = args.log_level(config.logs.verbose);

    let builder = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact();

    match config.logs.file {
        Some(ref path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file: {}", path.display()))?;
            let subscriber = builder
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .finish();
            tracing::subscriber::set_global_default(subscriber)
                .expect("Failed to set tracing subscriber");
        }
        None => {
            let subscriber = builder.with_writer(std::io::stderr).finish();
            tracing::subscriber::set_global_default(subscriber)
                .expect("Failed to set tracing subscriber");
        }
    }

    Ok(())
}

/// Load configuration from the explicit path, the default file, or defaults.
fn load_config(args: &Args) -> Result<Config> {
    if let Some(ref config_path) = args.config {
        return Config::load(config_path);
    }

    Ok(Config::load_default()?.unwrap_or_default())
}

/// Cancel `cancel` on Ctrl-C or SIGTERM.
fn spawn_shutdown_listener(cancel: CancellationToken) {
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        info!("Shutdown signal received");
        cancel.cancel();
    });
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                Ok(()) = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(e) => {
            warn!("Cannot listen for SIGTERM: {}", e);
            if tokio::signal::ctrl_c().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
}

fn build_processor(config: &Config, cancel: CancellationToken) -> TrafficProcessor {
    TrafficProcessor::new(
        StorageLocator::from_config(&config.storage, &config.report),
        CaptureScanner::new(CaptureConfig::from(&config.storage)),
        Arc::new(ExternalTools::new(&config.tools, cancel)),
    )
}

/// Connect, subscribe, and serve until the stream ends, a signal arrives,
/// or the loop faults. Returns the process exit code.
async fn run_worker(config: &Config, cancel: CancellationToken) -> i32 {
    let broker = match RedisBroker::connect(&config.redis.url).await {
        Ok(broker) => broker,
        Err(e) => {
            error!("Unable to connect to the Redis database: {}", e);
            return EXIT_FAILURE;
        }
    };

    let mut subscription = match broker.subscribe(&config.redis.control_channel).await {
        Ok(subscription) => subscription,
        Err(e) => {
            error!("Channel subscription failed: {}", e);
            return EXIT_FAILURE;
        }
    };

    info!("Connection and channel subscription to redis successful.");

    let processor = build_processor(config, cancel.clone());
    info!(
        "Profiles stored under {}",
        StorageLocator::from_config(&config.storage, &config.report)
            .root()
            .display()
    );

    let registry = RedisRegistry::new(broker.connection(), &config.registry);
    let announcer = StatusAnnouncer::new(Arc::new(broker), &config.redis);
    let dispatcher = Dispatcher::new(announcer, Arc::new(registry), processor, cancel);

    match dispatcher.serve(&mut subscription).await {
        Ok(shutdown) => {
            info!("Worker stopped: {:?}", shutdown);
            EXIT_SUCCESS
        }
        Err(e) => {
            error!("Terminating via fault in the receive loop: {}", e);
            EXIT_FAILURE
        }
    }
}

/// Handle --process: run the traffic processor for one profile and print the outcome.
async fn process_once(
    config: &Config,
    profile: &str,
    json: bool,
    cancel: CancellationToken,
) -> Result<()> {
    let profile = ProfileName::parse(profile)?;
    let processor = build_processor(config, cancel);

    let outcome = processor
        .process(&profile)
        .await
        .with_context(|| format!("Failed to process profile {}", profile))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
        return Ok(());
    }

    match outcome {
        ProcessOutcome::NoValidCapture { inspected } => {
            println!(
                "No valid capture for {} ({} captures inspected).",
                profile, inspected
            );
        }
        ProcessOutcome::Reported { capture, artifacts } => {
            println!(
                "Report for {} written to {} (from {}, {} bytes).",
                profile,
                artifacts.rendered.display(),
                capture.file_name(),
                capture.size
            );
        }
    }

    Ok(())
}
