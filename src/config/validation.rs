//! Configuration validation.
//!
//! # Responsibilities
//! - Turn a raw `FileConfig` into an immutable `Config`
//! - Reject unusable listen addresses and out-of-range ports
//! - Replace non-positive sizes and timeouts with defaults
//!
//! # Design Decisions
//! - Returns all validation errors, not just the first
//! - Corrections are logged at warn so a typo is still visible

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use crate::config::schema::FileConfig;

/// Default buffered reader/writer capacity.
pub const DEFAULT_BUFFER_SIZE: usize = 32 * 1024;
/// Default read deadline for the initial request bytes.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);
/// Default write deadline.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(30);
/// Default upstream dial + handshake deadline.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
/// Default drain deadline on shutdown.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// A single semantic problem found in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Listen address is not an IP literal.
    InvalidAddress(String),
    /// Listen port outside 1-65535.
    PortOutOfRange(i64),
    /// Metrics endpoint address is not a socket address.
    InvalidMetricsAddress(String),
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::InvalidAddress(a) => write!(f, "invalid listen address {:?}", a),
            ValidationError::PortOutOfRange(p) => write!(f, "port {} outside 1-65535", p),
            ValidationError::InvalidMetricsAddress(a) => {
                write!(f, "invalid metrics address {:?}", a)
            }
        }
    }
}

impl std::error::Error for ValidationError {}

/// Validated, immutable proxy configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Socket the capture listener binds.
    pub listen_addr: SocketAddr,
    /// Per-connection buffer capacity.
    pub buffer_size: usize,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub handshake_timeout: Duration,
    pub shutdown_timeout: Duration,
    /// Runtime worker threads.
    pub workers: usize,
    /// Concurrent connection cap; `None` is unlimited (negative or zero in the file).
    pub max_connections: Option<usize>,
    /// Inbound traffic arrives already TLS-terminated (selects `wss`/`https`).
    pub tls_terminated: bool,
    pub logging_enabled: bool,
    pub log_level: String,
    pub capture_payloads: bool,
    pub metrics_address: Option<SocketAddr>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, 8080)),
            buffer_size: DEFAULT_BUFFER_SIZE,
            read_timeout: DEFAULT_READ_TIMEOUT,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            workers: default_workers(),
            max_connections: Some(10_000),
            tls_terminated: false,
            logging_enabled: true,
            log_level: "info".to_string(),
            capture_payloads: false,
            metrics_address: None,
        }
    }
}

impl Config {
    /// Validate a raw file configuration.
    pub fn from_file_config(raw: &FileConfig) -> Result<Self, Vec<ValidationError>> {
        let mut errors = Vec::new();

        let ip = parse_listen_ip(&raw.listener.address);
        if ip.is_none() {
            errors.push(ValidationError::InvalidAddress(raw.listener.address.clone()));
        }

        let port = u16::try_from(raw.listener.port).ok().filter(|p| *p != 0);
        if port.is_none() {
            errors.push(ValidationError::PortOutOfRange(raw.listener.port));
        }

        let metrics_address = match raw.observability.metrics_address.as_deref() {
            None => None,
            Some(addr) => match addr.parse::<SocketAddr>() {
                Ok(addr) => Some(addr),
                Err(_) => {
                    errors.push(ValidationError::InvalidMetricsAddress(addr.to_string()));
                    None
                }
            },
        };

        let (Some(ip), Some(port)) = (ip, port) else {
            return Err(errors);
        };
        if !errors.is_empty() {
            return Err(errors);
        }

        let timeouts = &raw.timeouts;
        Ok(Self {
            listen_addr: SocketAddr::new(ip, port),
            buffer_size: positive_or("buffer_size", raw.listener.buffer_size, DEFAULT_BUFFER_SIZE),
            read_timeout: secs_or("read_secs", timeouts.read_secs, DEFAULT_READ_TIMEOUT),
            write_timeout: secs_or("write_secs", timeouts.write_secs, DEFAULT_WRITE_TIMEOUT),
            handshake_timeout: secs_or(
                "handshake_secs",
                timeouts.handshake_secs,
                DEFAULT_HANDSHAKE_TIMEOUT,
            ),
            shutdown_timeout: secs_or(
                "shutdown_secs",
                timeouts.shutdown_secs,
                DEFAULT_SHUTDOWN_TIMEOUT,
            ),
            workers: usize::try_from(raw.listener.workers)
                .ok()
                .filter(|w| *w > 0)
                .unwrap_or_else(default_workers),
            max_connections: usize::try_from(raw.listener.max_connections)
                .ok()
                .filter(|m| *m > 0),
            tls_terminated: raw.listener.tls_terminated,
            logging_enabled: raw.observability.logging_enabled,
            log_level: raw.observability.log_level.clone(),
            capture_payloads: raw.observability.capture_payloads,
            metrics_address,
        })
    }
}

fn parse_listen_ip(address: &str) -> Option<IpAddr> {
    if address.eq_ignore_ascii_case("localhost") {
        return Some(IpAddr::V4(Ipv4Addr::LOCALHOST));
    }
    address.parse().ok()
}

fn positive_or(field: &'static str, value: i64, default: usize) -> usize {
    match usize::try_from(value) {
        Ok(v) if v > 0 => v,
        _ => {
            tracing::warn!(field, value, default, "Non-positive value replaced by default");
            default
        }
    }
}

fn secs_or(field: &'static str, value: i64, default: Duration) -> Duration {
    match u64::try_from(value) {
        Ok(v) if v > 0 => Duration::from_secs(v),
        _ => {
            tracing::warn!(field, value, default = ?default, "Non-positive timeout replaced by default");
            default
        }
    }
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
