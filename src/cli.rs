//! Command-line interface.
//!
//! Every flag overrides the matching config file field before validation, so
//! CLI values go through the same range checks and defaults.

use std::path::PathBuf;

use clap::Parser;

use crate::config::FileConfig;

#[derive(Debug, Parser)]
#[command(name = "capture-proxy")]
#[command(about = "Transparent traffic-capture proxy", long_about = None)]
pub struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Listen address (IP literal or "localhost")
    #[arg(short, long)]
    pub address: Option<String>,

    /// Listen port
    #[arg(short, long, allow_negative_numbers = true)]
    pub port: Option<i64>,

    /// Per-connection buffer size in bytes
    #[arg(long, allow_negative_numbers = true)]
    pub buffer_size: Option<i64>,

    /// Read timeout in seconds
    #[arg(long, allow_negative_numbers = true)]
    pub read_timeout: Option<i64>,

    /// Write timeout in seconds
    #[arg(long, allow_negative_numbers = true)]
    pub write_timeout: Option<i64>,

    /// Runtime worker threads (0 = number of CPUs)
    #[arg(long, allow_negative_numbers = true)]
    pub workers: Option<i64>,

    /// Concurrent connection limit (negative = unlimited)
    #[arg(long, allow_negative_numbers = true)]
    pub max_connections: Option<i64>,

    /// Disable proxy log output
    #[arg(long)]
    pub no_logging: bool,

    /// Log level for the proxy's own events
    #[arg(long)]
    pub log_level: Option<String>,

    /// Log previews of relayed payloads
    #[arg(long)]
    pub capture_payloads: bool,

    /// Inbound traffic is already TLS-terminated (dial wss/https upstreams)
    #[arg(long)]
    pub tls_terminated: bool,

    /// Prometheus scrape endpoint, e.g. 127.0.0.1:9090
    #[arg(long)]
    pub metrics_address: Option<String>,
}

impl Cli {
    /// Overlay the flags that were given onto a file configuration.
    pub fn apply(&self, file: &mut FileConfig) {
        if let Some(address) = &self.address {
            file.listener.address = address.clone();
        }
        if let Some(port) = self.port {
            file.listener.port = port;
        }
        if let Some(size) = self.buffer_size {
            file.listener.buffer_size = size;
        }
        if let Some(secs) = self.read_timeout {
            file.timeouts.read_secs = secs;
        }
        if let Some(secs) = self.write_timeout {
            file.timeouts.write_secs = secs;
        }
        if let Some(workers) = self.workers {
            file.listener.workers = workers;
        }
        if let Some(max) = self.max_connections {
            file.listener.max_connections = max;
        }
        if self.no_logging {
            file.observability.logging_enabled = false;
        }
        if let Some(level) = &self.log_level {
            file.observability.log_level = level.clone();
        }
        if self.capture_payloads {
            file.observability.capture_payloads = true;
        }
        if self.tls_terminated {
            file.listener.tls_terminated = true;
        }
        if let Some(addr) = &self.metrics_address {
            file.observability.metrics_address = Some(addr.clone());
        }
    }
}
