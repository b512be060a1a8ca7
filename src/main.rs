//! capture-proxy
//!
//! Transparent traffic-capture proxy built with Tokio.
//!
//! # Architecture Overview
//!
//! ```text
//!                     ┌──────────────────────────────────────────────────────┐
//!                     │                    CAPTURE PROXY                     │
//!                     │                                                      │
//!   Client            │  ┌──────────┐    ┌──────────┐    ┌────────────────┐  │
//!   ──────────────────┼─▶│   net    │───▶│ protocol │───▶│ websocket tunnel│──┼──▶ Upstream
//!                     │  │ listener │    │ dispatch │    │ http passthrough│  │
//!                     │  └────┬─────┘    └──────────┘    │ socks5 refusal  │  │
//!                     │       │                          └───────┬────────┘  │
//!                     │       ▼                                  ▼           │
//!                     │  ┌─────────────────────────────────────────────────┐ │
//!                     │  │ hooks (lifecycle + packets) · metrics · logging │ │
//!                     │  └─────────────────────────────────────────────────┘ │
//!                     └──────────────────────────────────────────────────────┘
//! ```

use clap::Parser;

use capture_proxy::cli::Cli;
use capture_proxy::config::read_file_config;
use capture_proxy::config::{Config, ConfigError, FileConfig};
use capture_proxy::lifecycle::startup;
use capture_proxy::observability::logging::init_logging;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut file = match &cli.config {
        Some(path) => read_file_config(path)?,
        None => FileConfig::default(),
    };
    cli.apply(&mut file);

    init_logging(&file.observability.log_level);
    tracing::info!("capture-proxy v{} starting", env!("CARGO_PKG_VERSION"));

    let config = Config::from_file_config(&file).map_err(ConfigError::Validation)?;
    tracing::info!(
        listen_address = %config.listen_addr,
        max_connections = ?config.max_connections,
        workers = config.workers,
        read_timeout_secs = config.read_timeout.as_secs(),
        handshake_timeout_secs = config.handshake_timeout.as_secs(),
        "Configuration loaded"
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.workers)
        .enable_all()
        .build()?;

    runtime.block_on(startup::run(config))?;
    Ok(())
}
