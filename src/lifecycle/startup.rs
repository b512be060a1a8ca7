//! Startup orchestration.
//!
//! # Responsibilities
//! - Initialize metrics when an endpoint is configured
//! - Build the server and capture listener
//! - Install the built-in capture hooks
//! - Serve until a shutdown signal, then drain
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Listener starts last (traffic only when ready)

use std::sync::Arc;

use crate::config::Config;
use crate::hooks::CaptureLogHooks;
use crate::lifecycle::signals::wait_for_shutdown_signal;
use crate::net::listener::{CaptureListener, ListenerError};
use crate::net::server::Server;
use crate::observability::metrics;

/// Run the proxy until SIGINT/SIGTERM.
pub async fn run(config: Config) -> Result<(), ListenerError> {
    if let Some(addr) = config.metrics_address {
        metrics::init_metrics(addr);
    }

    let shutdown_timeout = config.shutdown_timeout;
    let capture_payloads = config.capture_payloads;
    let server = Arc::new(Server::new(config));

    let listener = CaptureListener::new(Arc::clone(&server));
    listener.set_hook_executor(Arc::new(CaptureLogHooks::new(capture_payloads)));

    let addr = listener.start().await?;
    tracing::info!(address = %addr, "Capture proxy ready");

    wait_for_shutdown_signal().await;
    tracing::info!(
        in_flight = listener.active_connections(),
        timeout = ?shutdown_timeout,
        "Shutting down"
    );

    listener.stop_with_timeout(shutdown_timeout).await?;
    tracing::info!("Shutdown complete");
    Ok(())
}
