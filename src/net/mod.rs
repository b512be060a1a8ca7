//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, connection limits, hooks)
//!     → connection.rs (stream ownership, buffered views, close)
//!     → server.rs (shared config + logging verbs)
//!     → Hand off to protocol dispatch
//!
//! Connection States:
//!     Open → Detached (stream taken by a processor) → Closed
//! ```
//!
//! # Design Decisions
//! - Bounded accept queue prevents resource exhaustion
//! - Each connection tracked for graceful shutdown
//! - Processors may take the raw stream over once they own the protocol

pub mod connection;
pub mod listener;
pub mod server;
