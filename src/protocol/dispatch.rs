//! Protocol sniffing and processor selection.

use std::panic::AssertUnwindSafe;

use axum::body::Body;
use axum::http::StatusCode;
use futures_util::FutureExt;
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::TokioExecutor;
use tokio::io::AsyncBufReadExt;
use tokio::time::timeout;

use crate::config::Config;
use crate::error::ProxyError;
use crate::http::passthrough::HttpProcessor;
use crate::http::request::{read_request_head, RequestHead};
use crate::http::response::{plain_text_response, write_takeover_response};
use crate::http::websocket::WebSocketProcessor;
use crate::net::connection::Connection;
use crate::protocol::socks5::Socks5Processor;
use crate::protocol::ProtocolProcessor;

/// What the first bytes of a connection revealed.
#[derive(Debug)]
pub enum Sniffed {
    /// The peer closed before sending anything.
    Closed,
    /// SOCKS5 version byte.
    Socks5,
    /// A parsed HTTP/1.x request head.
    Http(RequestHead),
}

/// Result of dispatching one connection.
#[derive(Debug)]
pub struct DispatchOutcome {
    /// Processor that handled the connection, if any was selected.
    pub protocol: Option<&'static str>,
    pub result: Result<(), ProxyError>,
}

impl DispatchOutcome {
    /// Metrics label for the outcome.
    pub fn label(&self) -> &'static str {
        match &self.result {
            Ok(()) => "ok",
            Err(e) => e.kind(),
        }
    }
}

/// Selects and runs the processor for each accepted connection.
pub struct Dispatcher {
    tls_terminated: bool,
    http_client: Client<HttpConnector, Body>,
}

impl Dispatcher {
    pub fn new(config: &Config) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(config.handshake_timeout));
        connector.set_nodelay(true);

        Self {
            tls_terminated: config.tls_terminated,
            http_client: Client::builder(TokioExecutor::new()).build(connector),
        }
    }

    /// Inspect the start of the stream without committing to a protocol.
    ///
    /// The SOCKS5 check only peeks; the HTTP head, once read, is consumed and
    /// carried in the result.
    pub async fn sniff(conn: &mut Connection) -> Result<Sniffed, ProxyError> {
        let read_timeout = conn.info().read_timeout;

        let first = timeout(read_timeout, conn.reader()?.fill_buf())
            .await
            .map_err(|_| ProxyError::Timeout("waiting for the first byte"))??
            .first()
            .copied();

        match first {
            None => Ok(Sniffed::Closed),
            Some(byte) if Socks5Processor::is_socks5(byte) => Ok(Sniffed::Socks5),
            Some(_) => {
                let head = timeout(read_timeout, read_request_head(conn.reader()?))
                    .await
                    .map_err(|_| ProxyError::Timeout("reading request head"))??;
                Ok(Sniffed::Http(head))
            }
        }
    }

    /// Map sniffed input to the first matching processor.
    ///
    /// Priority: SOCKS5, WebSocket upgrade, then plain HTTP as the default.
    pub fn select_processor(&self, sniffed: Sniffed) -> Option<Box<dyn ProtocolProcessor>> {
        match sniffed {
            Sniffed::Closed => None,
            Sniffed::Socks5 => Some(Box::new(Socks5Processor::new())),
            Sniffed::Http(head) if WebSocketProcessor::is_websocket_request(&head) => {
                Some(Box::new(WebSocketProcessor::new(head, self.tls_terminated)))
            }
            Sniffed::Http(head) => Some(Box::new(HttpProcessor::new(head, self.http_client.clone()))),
        }
    }

    /// Sniff, select, and run exactly one processor for the connection.
    pub async fn dispatch(&self, conn: &mut Connection) -> DispatchOutcome {
        let sniffed = match Self::sniff(conn).await {
            Ok(sniffed) => sniffed,
            Err(e) => {
                if matches!(e, ProxyError::MalformedRequest(_) | ProxyError::HeadTooLarge(_)) {
                    reject_malformed(conn).await;
                }
                return DispatchOutcome {
                    protocol: None,
                    result: Err(e),
                };
            }
        };

        let Some(processor) = self.select_processor(sniffed) else {
            tracing::debug!("Peer closed before sending any data");
            return DispatchOutcome {
                protocol: None,
                result: Ok(()),
            };
        };

        let protocol = processor.protocol_name();
        conn.server().log_debug(format_args!(
            "{} dispatched to {} processor",
            conn.info().id,
            protocol
        ));

        let result = AssertUnwindSafe(processor.process(conn))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| Err(ProxyError::ProcessorPanic(protocol)));

        DispatchOutcome {
            protocol: Some(protocol),
            result,
        }
    }
}

async fn reject_malformed(conn: &mut Connection) {
    let write_timeout = conn.info().write_timeout;
    let response = plain_text_response(StatusCode::BAD_REQUEST, "Bad Request\n");
    if let Ok(writer) = conn.writer() {
        if let Err(e) = write_takeover_response(writer, &response, write_timeout).await {
            tracing::debug!(error = %e, "Failed to send 400 response");
        }
    }
}
