//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::http::HeaderMap;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

use capture_proxy::config::Config;
use capture_proxy::net::connection::ConnectionInfo;
use capture_proxy::protocol::PacketDirection;
use capture_proxy::{CaptureListener, HookError, HookExecutor, ProxyError, Server};

/// Build a loopback config on an ephemeral port with quiet logging.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.listen_addr = "127.0.0.1:0".parse().unwrap();
    config.logging_enabled = false;
    config.read_timeout = Duration::from_secs(5);
    config.write_timeout = Duration::from_secs(5);
    config.handshake_timeout = Duration::from_secs(2);
    config
}

/// Start a capture listener; `adjust` may tweak the config first.
pub async fn start_proxy(adjust: impl FnOnce(&mut Config)) -> (CaptureListener, SocketAddr) {
    let mut config = test_config();
    adjust(&mut config);
    let listener = CaptureListener::new(Arc::new(Server::new(config)));
    let addr = listener.start().await.unwrap();
    (listener, addr)
}

/// An address nothing listens on.
pub async fn unused_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

/// Start a mock HTTP backend that answers every request with `body`.
///
/// Each received request (head plus body) is recorded as text.
pub async fn start_mock_backend(body: &'static str) -> (SocketAddr, Arc<Mutex<Vec<String>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = seen.clone();

    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            let log = log.clone();
            tokio::spawn(async move {
                let mut reader = BufReader::new(socket);
                let mut request = String::new();
                let mut content_length = 0usize;
                loop {
                    let mut line = String::new();
                    if reader.read_line(&mut line).await.unwrap_or(0) == 0 {
                        return;
                    }
                    if let Some(value) = line.to_ascii_lowercase().strip_prefix("content-length:") {
                        content_length = value.trim().parse().unwrap_or(0);
                    }
                    request.push_str(&line);
                    if line == "\r\n" {
                        break;
                    }
                }
                let mut request_body = vec![0u8; content_length];
                if reader.read_exact(&mut request_body).await.is_err() {
                    return;
                }
                request.push_str(&String::from_utf8_lossy(&request_body));
                log.lock().unwrap().push(request);

                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nX-Backend: mock\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let mut socket = reader.into_inner();
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    (addr, seen)
}

/// Start a WebSocket echo server that selects the first offered subprotocol.
pub async fn start_ws_echo_upstream() -> (SocketAddr, Arc<Mutex<Option<HeaderMap>>>) {
    start_ws_echo_upstream_with(true).await
}

/// Start a WebSocket echo server.
///
/// Records the handshake headers of the most recent client. With
/// `select_protocol` unset it accepts without choosing a subprotocol.
pub async fn start_ws_echo_upstream_with(
    select_protocol: bool,
) -> (SocketAddr, Arc<Mutex<Option<HeaderMap>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let seen = Arc::new(Mutex::new(None));
    let record = seen.clone();

    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            let record = record.clone();
            tokio::spawn(async move {
                let callback = move |request: &Request, mut response: Response| -> Result<Response, ErrorResponse> {
                    *record.lock().unwrap() = Some(request.headers().clone());
                    let selected = request
                        .headers()
                        .get("sec-websocket-protocol")
                        .filter(|_| select_protocol)
                        .and_then(|v| v.to_str().ok())
                        .and_then(|v| v.split(',').next())
                        .map(|v| v.trim().to_string());
                    if let Some(protocol) = selected {
                        response
                            .headers_mut()
                            .insert("sec-websocket-protocol", protocol.parse().unwrap());
                    }
                    Ok(response)
                };

                let Ok(mut ws) = tokio_tungstenite::accept_hdr_async(socket, callback).await else {
                    return;
                };
                while let Some(Ok(message)) = ws.next().await {
                    if (message.is_text() || message.is_binary()) && ws.send(message).await.is_err() {
                        break;
                    }
                }
            });
        }
    });

    (addr, seen)
}

/// Hook executor that records every callback.
#[derive(Default)]
pub struct RecordingHooks {
    pub started: AtomicUsize,
    pub handled: AtomicUsize,
    pub ended: AtomicUsize,
    pub errors: Mutex<Vec<String>>,
    pub packets: Mutex<Vec<(PacketDirection, Vec<u8>)>>,
}

impl RecordingHooks {
    /// Poll until `n` connections have ended, failing after a few seconds.
    pub async fn wait_for_ended(&self, n: usize) {
        for _ in 0..200 {
            if self.ended.load(Ordering::SeqCst) >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("expected {} ended connections, saw {}", n, self.ended.load(Ordering::SeqCst));
    }

    pub fn packets_in(&self, direction: PacketDirection) -> Vec<Vec<u8>> {
        self.packets
            .lock()
            .unwrap()
            .iter()
            .filter(|(d, _)| *d == direction)
            .map(|(_, data)| data.clone())
            .collect()
    }

    pub fn error_contexts(&self) -> Vec<String> {
        self.errors.lock().unwrap().clone()
    }
}

impl HookExecutor for RecordingHooks {
    fn on_connection_start(&self, _info: &ConnectionInfo) -> Result<(), HookError> {
        self.started.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn on_connection_end(&self, _info: &ConnectionInfo, _duration: Duration) {
        self.ended.fetch_add(1, Ordering::SeqCst);
    }

    fn handle_connection(&self, _info: &ConnectionInfo) {
        self.handled.fetch_add(1, Ordering::SeqCst);
    }

    fn handle_error(&self, _err: &ProxyError, context: &str) {
        self.errors.lock().unwrap().push(context.to_string());
    }

    fn on_packet(&self, _info: &ConnectionInfo, direction: PacketDirection, data: &[u8]) {
        self.packets.lock().unwrap().push((direction, data.to_vec()));
    }
}
