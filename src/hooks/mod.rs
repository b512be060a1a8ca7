//! Plugin hook boundary.
//!
//! # Responsibilities
//! - Define the lifecycle callbacks an external hook executor implements
//! - Provide a cheap, cloneable handle connections carry around
//! - Contain hook failures: they are logged, never propagated
//!
//! # Data Flow
//! ```text
//! accept → on_connection_start → handle_connection
//!        → processor (on_packet per captured payload)
//!        → handle_error (if processing failed)
//!        → on_connection_end(duration)
//! ```
//!
//! # Design Decisions
//! - The executor is optional everywhere (`Option<Hooks>`), never a global
//! - Callbacks are synchronous; executors that need I/O spawn their own tasks
//! - A panicking callback is caught at the handle and logged like an error

pub mod capture_log;

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use crate::error::ProxyError;
use crate::net::connection::ConnectionInfo;
use crate::protocol::PacketDirection;

pub use capture_log::CaptureLogHooks;

/// Error returned by a hook executor that rejects a lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct HookError(pub String);

impl HookError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Callbacks invoked by the capture listener and processors.
pub trait HookExecutor: Send + Sync {
    /// A connection was accepted and is about to be sniffed.
    fn on_connection_start(&self, info: &ConnectionInfo) -> Result<(), HookError>;

    /// A connection was closed after `duration`.
    fn on_connection_end(&self, info: &ConnectionInfo, duration: Duration);

    /// Observation point before protocol dispatch.
    fn handle_connection(&self, _info: &ConnectionInfo) {}

    /// Processing of a connection failed.
    fn handle_error(&self, err: &ProxyError, context: &str);

    /// A payload crossed the proxy.
    fn on_packet(&self, _info: &ConnectionInfo, _direction: PacketDirection, _data: &[u8]) {}
}

/// Shared handle to an installed hook executor.
///
/// Wraps every callback so a failing executor only produces a log line.
#[derive(Clone)]
pub struct Hooks {
    inner: Arc<dyn HookExecutor>,
}

impl Hooks {
    pub fn new(executor: Arc<dyn HookExecutor>) -> Self {
        Self { inner: executor }
    }

    pub fn connection_started(&self, info: &ConnectionInfo) {
        let result = contain(info, "on_connection_start", || self.inner.on_connection_start(info));
        if let Some(Err(e)) = result {
            tracing::warn!(connection_id = %info.id, error = %e, "Connection start hook failed");
        }
    }

    pub fn connection_ended(&self, info: &ConnectionInfo, duration: Duration) {
        contain(info, "on_connection_end", || self.inner.on_connection_end(info, duration));
    }

    pub fn handle_connection(&self, info: &ConnectionInfo) {
        contain(info, "handle_connection", || self.inner.handle_connection(info));
    }

    pub fn error(&self, info: &ConnectionInfo, err: &ProxyError, context: &str) {
        contain(info, "handle_error", || self.inner.handle_error(err, context));
    }

    pub fn packet(&self, info: &ConnectionInfo, direction: PacketDirection, data: &[u8]) {
        if !data.is_empty() {
            contain(info, "on_packet", || self.inner.on_packet(info, direction, data));
        }
    }
}

/// Run one callback, turning a panic into a log line.
fn contain<R>(info: &ConnectionInfo, callback: &'static str, f: impl FnOnce() -> R) -> Option<R> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::error!(connection_id = %info.id, callback, "Hook executor panicked");
            None
        }
    }
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks").finish_non_exhaustive()
    }
}

impl<T: HookExecutor + 'static> From<Arc<T>> for Hooks {
    fn from(executor: Arc<T>) -> Self {
        Self::new(executor)
    }
}
