//! Configuration file schema.
//!
//! Numeric fields are signed on purpose: the file may carry zero or negative
//! values, which validation either corrects or rejects.

use serde::{Deserialize, Serialize};

/// Root of the TOML configuration file.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct FileConfig {
    /// Listen socket and per-connection resources.
    pub listener: ListenerSection,

    /// Timeout configuration.
    pub timeouts: TimeoutSection,

    /// Logging and metrics settings.
    pub observability: ObservabilitySection,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerSection {
    /// IP address to bind (e.g., "0.0.0.0"). "localhost" is accepted.
    pub address: String,

    /// TCP port, 1-65535.
    pub port: i64,

    /// Capacity of each connection's buffered reader and writer, in bytes.
    pub buffer_size: i64,

    /// Maximum concurrent connections. Negative means unlimited.
    pub max_connections: i64,

    /// Runtime worker threads. Zero or negative uses the CPU count.
    pub workers: i64,

    /// The inbound transport is already TLS-terminated in front of us.
    pub tls_terminated: bool,
}

impl Default for ListenerSection {
    fn default() -> Self {
        Self {
            address: "127.0.0.1".to_string(),
            port: 8080,
            buffer_size: 32 * 1024,
            max_connections: 10_000,
            workers: 0,
            tls_terminated: false,
        }
    }
}

/// Timeout configuration, all in seconds.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutSection {
    /// Deadline for reading the initial request bytes.
    pub read_secs: i64,

    /// Deadline for writing synthesized responses.
    pub write_secs: i64,

    /// Deadline for dialing an upstream and completing its handshake.
    pub handshake_secs: i64,

    /// Deadline for draining in-flight connections on shutdown.
    pub shutdown_secs: i64,
}

impl Default for TimeoutSection {
    fn default() -> Self {
        Self {
            read_secs: 30,
            write_secs: 30,
            handshake_secs: 10,
            shutdown_secs: 30,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilitySection {
    /// Master switch for the server's log verbs.
    pub logging_enabled: bool,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log previews of captured payloads through the built-in hooks.
    pub capture_payloads: bool,

    /// Prometheus endpoint bind address. Disabled when absent.
    pub metrics_address: Option<String>,
}

impl Default for ObservabilitySection {
    fn default() -> Self {
        Self {
            logging_enabled: true,
            log_level: "info".to_string(),
            capture_payloads: false,
            metrics_address: None,
        }
    }
}
