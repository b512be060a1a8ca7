//! TCP capture listener.
//!
//! # Responsibilities
//! - Bind to the configured address
//! - Accept incoming TCP connections
//! - Enforce max_connections limit via semaphore
//! - Run each connection through hooks and dispatch in its own task
//! - Stop accepting on request and optionally drain in-flight connections
//!
//! # Listener States
//! ```text
//! Stopped ──start──▶ Starting ──bound──▶ Running ──stop──▶ Stopping ──▶ Stopped
//!    ▲                  │
//!    └───bind failed────┘
//! ```
//!
//! # Design Decisions
//! - The accept loop never awaits per-connection work
//! - Hooks live in a lock-free slot and can be swapped while running
//! - `stop` does not force-close in-flight connections

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use arc_swap::ArcSwapOption;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::hooks::{HookExecutor, Hooks};
use crate::lifecycle::Shutdown;
use crate::net::connection::{Connection, ConnectionInfo, ConnectionTracker};
use crate::net::server::Server;
use crate::observability::metrics;
use crate::protocol::Dispatcher;

/// Pause after a failed accept before trying again.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Lifecycle state of a [`CaptureListener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl fmt::Display for ListenerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ListenerState::Stopped => "stopped",
            ListenerState::Starting => "starting",
            ListenerState::Running => "running",
            ListenerState::Stopping => "stopping",
        };
        f.write_str(name)
    }
}

/// Error type for listener operations.
#[derive(Debug)]
pub enum ListenerError {
    /// Failed to bind to address.
    Bind(io::Error),
    /// `start` called while not stopped.
    AlreadyRunning(ListenerState),
    /// `stop` called while not running.
    NotRunning(ListenerState),
    /// Connections were still open when the drain deadline passed.
    ShutdownTimeout { in_flight: u64 },
}

impl fmt::Display for ListenerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListenerError::Bind(e) => write!(f, "Failed to bind: {}", e),
            ListenerError::AlreadyRunning(state) => {
                write!(f, "Listener cannot start while {}", state)
            }
            ListenerError::NotRunning(state) => write!(f, "Listener is not running ({})", state),
            ListenerError::ShutdownTimeout { in_flight } => write!(
                f,
                "Shutdown timed out with {} connection(s) still in flight",
                in_flight
            ),
        }
    }
}

impl std::error::Error for ListenerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ListenerError::Bind(e) => Some(e),
            _ => None,
        }
    }
}

/// Shared by the accept loop and every connection task.
struct AcceptContext {
    server: Arc<Server>,
    dispatcher: Dispatcher,
    hooks: Arc<ArcSwapOption<Hooks>>,
    tracker: ConnectionTracker,
    limit: Option<Arc<Semaphore>>,
}

struct Lifecycle {
    state: ListenerState,
    local_addr: Option<SocketAddr>,
    shutdown: Option<Shutdown>,
    accept_task: Option<JoinHandle<()>>,
}

/// Raw TCP listener feeding connections to protocol dispatch.
pub struct CaptureListener {
    server: Arc<Server>,
    hooks: Arc<ArcSwapOption<Hooks>>,
    tracker: ConnectionTracker,
    lifecycle: Mutex<Lifecycle>,
}

impl CaptureListener {
    pub fn new(server: Arc<Server>) -> Self {
        Self {
            server,
            hooks: Arc::new(ArcSwapOption::empty()),
            tracker: ConnectionTracker::new(),
            lifecycle: Mutex::new(Lifecycle {
                state: ListenerState::Stopped,
                local_addr: None,
                shutdown: None,
                accept_task: None,
            }),
        }
    }

    /// Install a hook executor; connections accepted from now on use it.
    pub fn set_hook_executor(&self, executor: Arc<dyn HookExecutor>) {
        self.hooks.store(Some(Arc::new(Hooks::new(executor))));
    }

    pub fn clear_hook_executor(&self) {
        self.hooks.store(None);
    }

    pub fn state(&self) -> ListenerState {
        self.lock().state
    }

    /// Bound address while running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.lock().local_addr
    }

    /// Connections accepted and not yet finished.
    pub fn active_connections(&self) -> u64 {
        self.tracker.active_count()
    }

    /// Bind and spawn the accept loop. Returns the bound address.
    pub async fn start(&self) -> Result<SocketAddr, ListenerError> {
        {
            let mut lifecycle = self.lock();
            if lifecycle.state != ListenerState::Stopped {
                return Err(ListenerError::AlreadyRunning(lifecycle.state));
            }
            lifecycle.state = ListenerState::Starting;
        }

        let config = self.server.config();
        let bound = match TcpListener::bind(config.listen_addr).await {
            Ok(listener) => listener.local_addr().map(|addr| (listener, addr)),
            Err(e) => Err(e),
        };
        let (listener, local_addr) = match bound {
            Ok(bound) => bound,
            Err(e) => {
                self.lock().state = ListenerState::Stopped;
                tracing::error!(address = %config.listen_addr, error = %e, "Listener bind failed");
                return Err(ListenerError::Bind(e));
            }
        };

        let ctx = Arc::new(AcceptContext {
            server: Arc::clone(&self.server),
            dispatcher: Dispatcher::new(config),
            hooks: Arc::clone(&self.hooks),
            tracker: self.tracker.clone(),
            limit: config.max_connections.map(|n| Arc::new(Semaphore::new(n))),
        });

        let shutdown = Shutdown::new();
        let signal = shutdown.subscribe();
        let accept_task = tokio::spawn(accept_loop(listener, signal, ctx));

        let mut lifecycle = self.lock();
        lifecycle.state = ListenerState::Running;
        lifecycle.local_addr = Some(local_addr);
        lifecycle.shutdown = Some(shutdown);
        lifecycle.accept_task = Some(accept_task);

        tracing::info!(
            address = %local_addr,
            max_connections = ?config.max_connections,
            "Listener bound"
        );
        Ok(local_addr)
    }

    /// Stop accepting and wait for the accept loop to exit.
    ///
    /// In-flight connections keep running.
    pub async fn stop(&self) -> Result<(), ListenerError> {
        let (shutdown, accept_task) = {
            let mut lifecycle = self.lock();
            if lifecycle.state != ListenerState::Running {
                return Err(ListenerError::NotRunning(lifecycle.state));
            }
            lifecycle.state = ListenerState::Stopping;
            (lifecycle.shutdown.take(), lifecycle.accept_task.take())
        };

        if let Some(shutdown) = shutdown {
            shutdown.trigger();
        }
        if let Some(task) = accept_task {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Accept loop terminated abnormally");
            }
        }

        let mut lifecycle = self.lock();
        lifecycle.state = ListenerState::Stopped;
        lifecycle.local_addr = None;
        tracing::info!(in_flight = self.tracker.active_count(), "Listener stopped");
        Ok(())
    }

    /// Stop, then wait up to `deadline` for in-flight connections to finish.
    pub async fn stop_with_timeout(&self, deadline: Duration) -> Result<(), ListenerError> {
        self.stop().await?;

        match tokio::time::timeout(deadline, self.tracker.wait_idle()).await {
            Ok(()) => {
                tracing::info!("All connections drained");
                Ok(())
            }
            Err(_) => {
                let in_flight = self.tracker.active_count();
                tracing::warn!(in_flight, "Shutdown deadline passed with connections open");
                Err(ListenerError::ShutdownTimeout { in_flight })
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, Lifecycle> {
        // A poisoned lock only means a panic mid-update; the state is still usable.
        self.lifecycle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

async fn accept_loop(
    listener: TcpListener,
    mut shutdown: broadcast::Receiver<()>,
    ctx: Arc<AcceptContext>,
) {
    loop {
        let permit = match &ctx.limit {
            Some(limit) => tokio::select! {
                _ = shutdown.recv() => break,
                permit = Arc::clone(limit).acquire_owned() => match permit {
                    Ok(permit) => Some(permit),
                    Err(_) => break,
                },
            },
            None => None,
        };

        let (stream, peer) = tokio::select! {
            _ = shutdown.recv() => break,
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    tracing::warn!(error = %e, "Accept failed");
                    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                    continue;
                }
            },
        };

        tracing::debug!(
            peer_addr = %peer,
            available_permits = ?ctx.limit.as_ref().map(|l| l.available_permits()),
            "Connection accepted"
        );

        tokio::spawn(serve_connection(stream, peer, permit, Arc::clone(&ctx)));
    }

    tracing::debug!("Accept loop exited");
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    permit: Option<OwnedSemaphorePermit>,
    ctx: Arc<AcceptContext>,
) {
    let _permit = permit;
    let guard = ctx.tracker.track();
    let config = ctx.server.config();

    if let Err(e) = stream.set_nodelay(true) {
        tracing::debug!(error = %e, "Failed to set TCP_NODELAY");
    }
    let local = stream.local_addr().unwrap_or(config.listen_addr);
    let info = ConnectionInfo::new(guard.id(), local, peer, config);
    let hooks = ctx.hooks.load_full().map(|hooks| Hooks::clone(&hooks));

    let span = tracing::info_span!("connection", id = %info.id, peer = %peer);
    async move {
        metrics::record_connection_opened();
        ctx.server
            .log_info(format_args!("{} accepted from {}", info.id, info.peer_addr));

        if let Some(hooks) = &hooks {
            hooks.connection_started(&info);
            hooks.handle_connection(&info);
        }

        let mut conn = Connection::new(stream, info.clone(), Arc::clone(&ctx.server), hooks.clone());
        let outcome = ctx.dispatcher.dispatch(&mut conn).await;

        if let Err(e) = &outcome.result {
            let context = outcome.protocol.unwrap_or("dispatch");
            ctx.server
                .log_error(format_args!("{} {} processing failed: {}", info.id, context, e));
            if let Some(hooks) = &hooks {
                hooks.error(&info, e, context);
            }
        }

        if let Err(e) = conn.close().await {
            tracing::debug!(error = %e, "Close after processing failed");
        }

        let duration = info.elapsed();
        if let Some(hooks) = &hooks {
            hooks.connection_ended(&info, duration);
        }
        metrics::record_connection_closed(
            outcome.protocol.unwrap_or("none"),
            outcome.label(),
            duration,
        );
        ctx.server.log_debug(format_args!(
            "{} closed after {:?}",
            info.id, duration
        ));
        drop(guard);
    }
    .instrument(span)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn listener() -> CaptureListener {
        let mut config = Config::default();
        config.listen_addr = "127.0.0.1:0".parse().unwrap();
        config.logging_enabled = false;
        CaptureListener::new(Arc::new(Server::new(config)))
    }

    #[tokio::test]
    async fn start_stop_cycle() {
        let listener = listener();
        assert_eq!(listener.state(), ListenerState::Stopped);

        let addr = listener.start().await.unwrap();
        assert_eq!(listener.state(), ListenerState::Running);
        assert_eq!(listener.local_addr(), Some(addr));

        listener.stop().await.unwrap();
        assert_eq!(listener.state(), ListenerState::Stopped);
        assert_eq!(listener.local_addr(), None);

        // Restartable after a clean stop.
        listener.start().await.unwrap();
        listener.stop_with_timeout(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn double_start_is_rejected() {
        let listener = listener();
        listener.start().await.unwrap();
        let err = listener.start().await.unwrap_err();
        assert!(matches!(err, ListenerError::AlreadyRunning(ListenerState::Running)));
        listener.stop().await.unwrap();
    }

    #[tokio::test]
    async fn stop_when_stopped_is_rejected() {
        let listener = listener();
        let err = listener.stop().await.unwrap_err();
        assert!(matches!(err, ListenerError::NotRunning(ListenerState::Stopped)));
    }

    #[tokio::test]
    async fn bind_failure_returns_to_stopped() {
        let occupied = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut config = Config::default();
        config.listen_addr = occupied.local_addr().unwrap();
        let listener = CaptureListener::new(Arc::new(Server::new(config)));

        let err = listener.start().await.unwrap_err();
        assert!(matches!(err, ListenerError::Bind(_)));
        assert_eq!(listener.state(), ListenerState::Stopped);
    }

    #[test]
    fn error_display() {
        let err = ListenerError::ShutdownTimeout { in_flight: 3 };
        assert_eq!(
            err.to_string(),
            "Shutdown timed out with 3 connection(s) still in flight"
        );
        assert_eq!(ListenerState::Stopping.to_string(), "stopping");
    }
}
