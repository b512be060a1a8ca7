//! Protocol processor contract and dispatch.
//!
//! # Data Flow
//! ```text
//! accepted Connection
//!     → dispatch.rs (peek first byte / read HTTP head, bounded by read timeout)
//!     → detectors in priority order: SOCKS5, WebSocket upgrade, plain HTTP
//!     → exactly one ProtocolProcessor::process(connection)
//! ```
//!
//! # Design Decisions
//! - Detection is a pure predicate evaluated before a processor exists, so a
//!   non-matching detector has no side effects
//! - `process` consumes the processor: it cannot run twice
//! - Panics inside a processor are caught at the dispatch boundary

pub mod dispatch;
pub mod socks5;

use std::fmt;

use async_trait::async_trait;

use crate::error::ProxyError;
use crate::net::connection::Connection;

pub use dispatch::{DispatchOutcome, Dispatcher, Sniffed};
pub use socks5::Socks5Processor;

/// A protocol-specific connection handler.
#[async_trait]
pub trait ProtocolProcessor: Send {
    /// Stable identifier used in logs and metrics.
    fn protocol_name(&self) -> &'static str;

    /// Handle the connection to completion.
    async fn process(self: Box<Self>, conn: &mut Connection) -> Result<(), ProxyError>;
}

/// Direction of a captured payload relative to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketDirection {
    /// Upstream → client.
    Inbound,
    /// Client → upstream.
    Outbound,
}

impl PacketDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            PacketDirection::Inbound => "inbound",
            PacketDirection::Outbound => "outbound",
        }
    }
}

impl fmt::Display for PacketDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
