//! kvkeeper - web browser and editor for etcd-style key-value stores
//!
//! Main entry point for the kvkeeper server.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use kvkeeper_config::{DEFAULT_CONFIG_FILE, KeeperConfig, load_config};
use kvkeeper_server::{AppState, Server, ServerConfig};
use kvkeeper_store::{MemoryBackend, MemoryConnector};

/// Crates whose log level follows `--verbose` and the configured level.
const LOG_TARGETS: &[&str] = &[
    "kvkeeper",
    "kvkeeper_server",
    "kvkeeper_store",
    "kvkeeper_session",
    "kvkeeper_config",
];

// ─────────────────────────────────────────────────────────────────────────────
// CLI Structure
// ─────────────────────────────────────────────────────────────────────────────

/// kvkeeper - browse and edit etcd-style key-value stores from a web browser
#[derive(Parser, Debug)]
#[command(name = "kvkeeper")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file (YAML, or TOML with a .toml extension)
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE, env = "KVKEEPER_CONFIG")]
    pub config: PathBuf,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// Write rotating JSON logs into this directory
    #[arg(long)]
    pub log_dir: Option<PathBuf>,

    /// Address to bind to (overrides config)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to listen on (overrides config)
    #[arg(short, long)]
    pub port: Option<u16>,
}

impl Cli {
    /// Apply command line overrides on top of the file configuration.
    fn apply(&self, config: &mut KeeperConfig) {
        if let Some(host) = &self.host {
            config.host = host.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if self.verbose {
            config.debug = true;
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Main
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let loaded = load_config(&cli.config)
        .with_context(|| format!("failed to load config from {}", cli.config.display()))?;
    let mut config = loaded.config;
    cli.apply(&mut config);
    config.validate()?;

    let _guard = init_tracing(&config, cli.log_dir.as_ref());

    if loaded.loaded {
        info!(path = %loaded.path.display(), "Loaded config file");
    } else {
        info!(path = %loaded.path.display(), "Config file not found, using defaults");
    }

    let addr: SocketAddr = config
        .bind_address()
        .parse()
        .with_context(|| format!("invalid listen address '{}'", config.bind_address()))?;

    let connector = connector_for(&config);
    for backend in &config.backends {
        info!(
            name = %backend.name,
            endpoints = %backend.endpoints,
            separator = %backend.separator,
            "Serving in-memory store for backend"
        );
    }

    let server_config = ServerConfig::new()
        .with_bind_address(addr)
        .with_request_logging(true);
    let state = AppState::new(server_config, config, connector);

    let shutdown = CancellationToken::new();
    let tasks = state.spawn_background_tasks(&shutdown);

    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl-C, shutting down"),
            Err(e) => warn!(error = %e, "Failed to listen for Ctrl-C"),
        }
        signal.cancel();
    });

    println!("kvkeeper listening on http://{}", addr);
    println!("Press Ctrl+C to stop");

    let result = Server::new(state).run(shutdown.clone()).await;

    // Stop background tasks even when the listener failed.
    shutdown.cancel();
    for task in tasks {
        if let Err(e) = task.await {
            warn!(error = %e, "Background task ended abnormally");
        }
    }

    result?;
    info!("Shutdown complete");
    Ok(())
}

/// One empty in-memory store per configured backend, keyed by its endpoints.
///
/// Data lives only as long as the process.
fn connector_for(config: &KeeperConfig) -> MemoryConnector {
    config
        .backends
        .iter()
        .fold(MemoryConnector::new(), |connector, backend| {
            connector.with_backend(
                backend.endpoints.clone(),
                MemoryBackend::new(backend.name.clone()),
            )
        })
}

/// Build the console filter for the configured level.
fn console_filter(config: &KeeperConfig) -> String {
    let level = if config.debug {
        "debug"
    } else {
        config.loglevel.as_str()
    };
    let mut directives: Vec<String> = LOG_TARGETS
        .iter()
        .map(|target| format!("{target}={level}"))
        .collect();
    directives.push(if config.debug { "info" } else { "warn" }.to_string());
    directives.join(",")
}

/// Initialize tracing: a human readable console layer, plus a daily rotating
/// JSON file when a log directory is given.
///
/// The returned guard flushes the file writer and must be held until exit.
fn init_tracing(
    config: &KeeperConfig,
    log_dir: Option<&PathBuf>,
) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::prelude::*;

    let console = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_filter(tracing_subscriber::EnvFilter::new(console_filter(config)));

    let (file, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "kvkeeper.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            let trace_filter = LOG_TARGETS
                .iter()
                .map(|target| format!("{target}=trace"))
                .chain(std::iter::once("info".to_string()))
                .collect::<Vec<_>>()
                .join(",");
            let layer = tracing_subscriber::fmt::layer()
                .json()
                .with_writer(non_blocking)
                .with_filter(tracing_subscriber::EnvFilter::new(trace_filter));
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry().with(console).with(file).init();
    guard
}
