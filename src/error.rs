//! Errors produced while processing a single captured connection.
//!
//! Listener and configuration failures have their own types
//! (`net::listener::ListenerError`, `config::ConfigError`); everything here is
//! local to one connection and never takes the listener down.

use std::io;
use thiserror::Error;

/// Errors that can occur while sniffing or processing a connection.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// Socket read/write failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The request head could not be parsed as HTTP/1.x.
    #[error("malformed request: {0}")]
    MalformedRequest(String),

    /// The request head did not terminate within the size limit.
    #[error("request head exceeds {0} bytes")]
    HeadTooLarge(usize),

    /// An operation did not complete before its deadline.
    #[error("timed out while {0}")]
    Timeout(&'static str),

    /// The upstream peer could not be reached or answered badly.
    #[error("upstream error: {0}")]
    Upstream(String),

    /// WebSocket protocol failure on either leg of a tunnel.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// The peer speaks a protocol this proxy detects but does not serve.
    #[error("unsupported protocol: {0}")]
    UnsupportedProtocol(&'static str),

    /// A processor panicked; the panic was contained at the dispatch boundary.
    #[error("processor {0} panicked")]
    ProcessorPanic(&'static str),
}

impl ProxyError {
    /// Short, stable label used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ProxyError::Io(_) => "io",
            ProxyError::MalformedRequest(_) => "malformed_request",
            ProxyError::HeadTooLarge(_) => "head_too_large",
            ProxyError::Timeout(_) => "timeout",
            ProxyError::Upstream(_) => "upstream",
            ProxyError::WebSocket(_) => "websocket",
            ProxyError::UnsupportedProtocol(_) => "unsupported_protocol",
            ProxyError::ProcessorPanic(_) => "panic",
        }
    }
}
