//! Transparent traffic-capture proxy library.
//!
//! Accepts raw TCP connections, sniffs the protocol spoken on the wire and
//! hands each connection to exactly one processor: a WebSocket tunnel, a plain
//! HTTP forward proxy, or a SOCKS5 refusal. Hook executors observe connection
//! lifecycle and relayed payloads.

pub mod cli;
pub mod config;
pub mod error;
pub mod hooks;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod protocol;

pub use config::Config;
pub use error::ProxyError;
pub use hooks::{HookError, HookExecutor, Hooks};
pub use lifecycle::Shutdown;
pub use net::listener::{CaptureListener, ListenerError, ListenerState};
pub use net::server::Server;
