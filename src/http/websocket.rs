//! WebSocket tunnel processing.
//!
//! # Responsibilities
//! - Detect WebSocket upgrade requests
//! - Rebuild the upstream URL and Origin from the inbound request
//! - Establish the WebSocket connection to the upstream
//! - Complete the upgrade handshake with the client
//! - Bidirectional message relay with capture hooks
//!
//! # Data Flow
//! ```text
//! Client ←──── WebSocket messages ────→ Proxy ←──── WebSocket messages ────→ Upstream
//!                                         │
//!                                         └──▶ hooks.on_packet / metrics
//! ```
//!
//! # Design Decisions
//! - The upstream is dialed before the client is answered, so a dead upstream
//!   still gets a plain HTTP 502 on the client socket
//! - Message-level relay; each direction runs in its own task
//! - Close messages are propagated, ping/pong are answered per leg
//! - An upstream that ignores the offered subprotocols is still tunneled; the
//!   client then gets a 101 without `Sec-WebSocket-Protocol`

use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::http::header::{
    CONNECTION, HOST, ORIGIN, SEC_WEBSOCKET_EXTENSIONS, SEC_WEBSOCKET_KEY,
    SEC_WEBSOCKET_PROTOCOL, SEC_WEBSOCKET_VERSION, UPGRADE,
};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::error::{ProtocolError, SubProtocolError};
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;
use tokio_tungstenite::tungstenite::protocol::Role;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::error::ProxyError;
use crate::hooks::Hooks;
use crate::http::request::RequestHead;
use crate::http::response::{
    plain_text_response, write_takeover_response, RawTakeover, WEBSOCKET_FAILED_BODY,
};
use crate::net::connection::{Connection, ConnectionInfo};
use crate::net::server::Server;
use crate::observability::metrics;
use crate::protocol::{PacketDirection, ProtocolProcessor};

const PROTOCOL: &str = "websocket";

type UpstreamSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Headers the tunnel never copies to the upstream handshake.
const SKIPPED_HEADERS: [HeaderName; 8] = [
    HOST,
    CONNECTION,
    UPGRADE,
    SEC_WEBSOCKET_KEY,
    SEC_WEBSOCKET_VERSION,
    SEC_WEBSOCKET_EXTENSIONS,
    ORIGIN,
    SEC_WEBSOCKET_PROTOCOL,
];

/// `ws(s)://host` followed by the path; an empty path appends nothing.
pub fn build_upstream_url(host: &str, path: &str, is_https: bool) -> String {
    let scheme = if is_https { "wss" } else { "ws" };
    format!("{}://{}{}", scheme, host, path)
}

/// Inbound `Origin` verbatim, else `http(s)://host`.
pub fn resolve_origin(headers: &HeaderMap, host: &str, is_https: bool) -> String {
    if let Some(origin) = headers.get(ORIGIN).and_then(|v| v.to_str().ok()) {
        return origin.to_string();
    }
    let scheme = if is_https { "https" } else { "http" };
    format!("{}://{}", scheme, host)
}

/// Split inbound headers into the raw subprotocol value and the headers to
/// forward upstream.
///
/// The subprotocol list is the first `Sec-WebSocket-Protocol` value as sent,
/// not split on commas. Repeated headers keep all their values.
pub fn copy_upgrade_headers(headers: &HeaderMap) -> (Option<HeaderValue>, HeaderMap) {
    let protocols = headers.get(SEC_WEBSOCKET_PROTOCOL).cloned();

    let mut forwarded = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if SKIPPED_HEADERS.contains(name) {
            continue;
        }
        forwarded.append(name.clone(), value.clone());
    }

    (protocols, forwarded)
}

/// Everything needed to open the upstream leg.
#[derive(Debug, Clone)]
pub struct OutboundHandshake {
    pub url: String,
    pub origin: String,
    pub protocols: Option<HeaderValue>,
    pub headers: HeaderMap,
}

impl IntoClientRequest for OutboundHandshake {
    fn into_client_request(self) -> tungstenite::Result<Request> {
        let mut request = self.url.as_str().into_client_request()?;
        let headers = request.headers_mut();

        for (name, value) in &self.headers {
            headers.append(name.clone(), value.clone());
        }
        let origin = HeaderValue::from_str(&self.origin)
            .map_err(|e| tungstenite::Error::HttpFormat(e.into()))?;
        headers.insert(ORIGIN, origin);
        if let Some(protocols) = self.protocols {
            headers.insert(SEC_WEBSOCKET_PROTOCOL, protocols);
        }

        Ok(request)
    }
}

/// Reverse-proxies one WebSocket upgrade to the host it names.
pub struct WebSocketProcessor {
    request: RequestHead,
    is_https: bool,
}

impl WebSocketProcessor {
    pub fn new(request: RequestHead, is_https: bool) -> Self {
        Self { request, is_https }
    }

    /// `Upgrade: websocket` and `Connection: Upgrade`, values compared exactly.
    pub fn is_websocket_request(head: &RequestHead) -> bool {
        let exact = |name: HeaderName, expected: &[u8]| {
            head.headers
                .get(name)
                .is_some_and(|v| v.as_bytes() == expected)
        };
        exact(UPGRADE, b"websocket") && exact(CONNECTION, b"Upgrade")
    }

    pub fn outbound_handshake(&self) -> OutboundHandshake {
        let (protocols, headers) = copy_upgrade_headers(&self.request.headers);
        OutboundHandshake {
            url: build_upstream_url(&self.request.host, &self.request.path, self.is_https),
            origin: resolve_origin(&self.request.headers, &self.request.host, self.is_https),
            protocols,
            headers,
        }
    }
}

#[async_trait]
impl ProtocolProcessor for WebSocketProcessor {
    fn protocol_name(&self) -> &'static str {
        PROTOCOL
    }

    async fn process(self: Box<Self>, conn: &mut Connection) -> Result<(), ProxyError> {
        let info = conn.info().clone();
        let server = Arc::clone(conn.server());
        server.log_debug(format_args!(
            "{} starting WebSocket connection to {}",
            info.id, self.request.host
        ));

        let Some(client_key) = self.request.headers.get(SEC_WEBSOCKET_KEY).cloned() else {
            let response = plain_text_response(StatusCode::BAD_REQUEST, "Missing Sec-WebSocket-Key\n");
            write_takeover_response(conn.writer()?, &response, info.write_timeout).await?;
            return Ok(());
        };

        let handshake = self.outbound_handshake();
        let url = handshake.url.clone();
        let (upstream, protocol) = match dial(handshake, server.config().handshake_timeout).await {
            Ok(dialed) => dialed,
            Err(e) => {
                server.log_error(format_args!(
                    "{} WebSocket upstream {} unreachable: {}",
                    info.id, url, e
                ));
                metrics::record_upstream_failure(PROTOCOL);
                if let Some(hooks) = conn.hooks() {
                    hooks.error(&info, &e, "websocket upstream dial");
                }
                let response = plain_text_response(StatusCode::BAD_GATEWAY, WEBSOCKET_FAILED_BODY);
                write_takeover_response(conn.writer()?, &response, info.write_timeout).await?;
                return Ok(());
            }
        };

        let mut switching = format!(
            "HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Accept: {}\r\n",
            derive_accept_key(client_key.as_bytes())
        );
        if let Some(protocol) = protocol.as_ref().and_then(|p| p.to_str().ok()) {
            let _ = write!(switching, "Sec-WebSocket-Protocol: {}\r\n", protocol);
        }
        switching.push_str("\r\n");

        let hooks = conn.hooks().cloned();
        let (stream, leftover) = conn.take_handle().await?;
        let mut takeover = RawTakeover::new(stream);
        timeout(info.write_timeout, async {
            takeover.write(switching.as_bytes()).await?;
            takeover.flush().await
        })
        .await
        .map_err(|_| ProxyError::Timeout("answering WebSocket upgrade"))??;

        let client =
            WebSocketStream::from_partially_read(takeover.hijack(), leftover, Role::Server, None)
                .await;

        server.log_info(format_args!("{} WebSocket tunnel open to {}", info.id, url));
        relay(client, upstream, RelayContext { info, hooks, server }).await;
        Ok(())
    }
}

async fn dial(
    handshake: OutboundHandshake,
    deadline: Duration,
) -> Result<(UpstreamSocket, Option<HeaderValue>), ProxyError> {
    url::Url::parse(&handshake.url)
        .map_err(|e| ProxyError::Upstream(format!("invalid upstream URL {:?}: {}", handshake.url, e)))?;

    timeout(deadline, negotiate(handshake))
        .await
        .map_err(|_| ProxyError::Timeout("dialing upstream WebSocket"))?
}

/// Open the upstream leg, offering the client's subprotocols.
///
/// An upstream may accept without selecting any of them. The client library
/// refuses that answer, so the handshake is repeated without an offer and the
/// client is later answered without a subprotocol as well.
async fn negotiate(
    handshake: OutboundHandshake,
) -> Result<(UpstreamSocket, Option<HeaderValue>), ProxyError> {
    let fallback = handshake.protocols.is_some().then(|| OutboundHandshake {
        protocols: None,
        ..handshake.clone()
    });

    let err = match connect_async(handshake).await {
        Ok((socket, response)) => {
            return Ok((socket, response.headers().get(SEC_WEBSOCKET_PROTOCOL).cloned()))
        }
        Err(e) => e,
    };

    match (err, fallback) {
        (
            tungstenite::Error::Protocol(ProtocolError::SecWebSocketSubProtocolError(
                SubProtocolError::NoSubProtocol,
            )),
            Some(retry),
        ) => {
            tracing::debug!(url = %retry.url, "Upstream selected no subprotocol, redialing without an offer");
            let (socket, _) = connect_async(retry).await?;
            Ok((socket, None))
        }
        (err, _) => Err(err.into()),
    }
}

/// Per-tunnel state shared by both relay directions.
#[derive(Clone)]
struct RelayContext {
    info: ConnectionInfo,
    hooks: Option<Hooks>,
    server: Arc<Server>,
}

/// Relay until either direction ends, then tear down the other.
async fn relay<C, U>(client: WebSocketStream<C>, upstream: WebSocketStream<U>, ctx: RelayContext)
where
    C: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
    U: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    let (client_sink, client_stream) = client.split();
    let (upstream_sink, upstream_stream) = upstream.split();

    let mut outbound = tokio::spawn(pump(
        client_stream,
        upstream_sink,
        PacketDirection::Outbound,
        ctx.clone(),
    ));
    let mut inbound = tokio::spawn(pump(
        upstream_stream,
        client_sink,
        PacketDirection::Inbound,
        ctx.clone(),
    ));

    let (finished, relayed) = tokio::select! {
        res = &mut outbound => {
            inbound.abort();
            let _ = inbound.await;
            (PacketDirection::Outbound, res)
        }
        res = &mut inbound => {
            outbound.abort();
            let _ = outbound.await;
            (PacketDirection::Inbound, res)
        }
    };

    ctx.server.log_debug(format_args!(
        "{} WebSocket tunnel closed after {} relay ended ({} bytes)",
        ctx.info.id,
        finished,
        relayed.unwrap_or_default()
    ));
}

/// Forward messages from `source` to `sink` until close or error.
///
/// Returns the number of payload bytes forwarded.
async fn pump<S, K>(mut source: S, mut sink: K, direction: PacketDirection, ctx: RelayContext) -> u64
where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
    K: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    let mut relayed = 0u64;

    while let Some(next) = source.next().await {
        let message = match next {
            Ok(message) => message,
            Err(e) => {
                tracing::debug!(connection_id = %ctx.info.id, %direction, error = %e, "WebSocket read ended");
                break;
            }
        };

        if let Some(data) = payload(&message) {
            if let Some(hooks) = &ctx.hooks {
                hooks.packet(&ctx.info, direction, data);
            }
            metrics::record_relayed_bytes(PROTOCOL, direction, data.len());
            relayed += data.len() as u64;

            if let Err(e) = sink.send(message).await {
                tracing::debug!(connection_id = %ctx.info.id, %direction, error = %e, "WebSocket write failed");
                break;
            }
        } else if let Message::Close(frame) = message {
            let _ = sink.send(Message::Close(frame)).await;
            break;
        }
    }

    let _ = sink.close().await;
    relayed
}

fn payload(message: &Message) -> Option<&[u8]> {
    match message {
        Message::Text(text) => Some(text.as_bytes()),
        Message::Binary(data) => Some(data.as_ref()),
        _ => None,
    }
}
