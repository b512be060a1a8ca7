//! Plain HTTP forward proxying.
//!
//! # Responsibilities
//! - Tunnel `CONNECT host:port` requests as opaque byte streams
//! - Forward one absolute-form or origin-form request to its host
//! - Report request and response bodies to capture hooks
//!
//! # Design Decisions
//! - One request per connection; every response carries `Connection: close`
//! - Bodies are buffered so hooks see complete payloads
//! - Chunked request bodies are refused rather than re-framed

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{HeaderMap, HeaderName, Request, StatusCode, Uri};
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::error::ProxyError;
use crate::http::request::RequestHead;
use crate::http::response::{
    encode_response_head, plain_text_response, write_takeover_response, UPSTREAM_FAILED_BODY,
};
use crate::net::connection::Connection;
use crate::observability::metrics;
use crate::protocol::{PacketDirection, ProtocolProcessor};

const PROTOCOL: &str = "http";

/// Largest request or response body buffered for forwarding.
pub const MAX_BODY_SIZE: usize = 8 * 1024 * 1024;

const CONNECT_ESTABLISHED: &[u8] = b"HTTP/1.1 200 Connection Established\r\n\r\n";

/// Headers meaningful only for a single transport hop.
const HOP_BY_HOP: [&str; 9] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP.contains(&name.as_str())
}

/// Copy of `headers` without hop-by-hop entries.
pub fn strip_hop_by_hop(headers: &HeaderMap) -> HeaderMap {
    let mut kept = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if !is_hop_by_hop(name) {
            kept.append(name.clone(), value.clone());
        }
    }
    kept
}

/// Default processor for anything that parsed as HTTP.
pub struct HttpProcessor {
    request: RequestHead,
    client: Client<HttpConnector, Body>,
}

impl HttpProcessor {
    pub fn new(request: RequestHead, client: Client<HttpConnector, Body>) -> Self {
        Self { request, client }
    }

    async fn tunnel(self, conn: &mut Connection) -> Result<(), ProxyError> {
        let info = conn.info().clone();
        let server = Arc::clone(conn.server());
        let target = self.request.host;

        let dialed = timeout(server.config().handshake_timeout, TcpStream::connect(&target))
            .await
            .map_err(|_| ProxyError::Timeout("dialing CONNECT target"))
            .and_then(|r| r.map_err(ProxyError::from));
        let mut upstream = match dialed {
            Ok(stream) => stream,
            Err(e) => {
                server.log_error(format_args!("{} CONNECT {} failed: {}", info.id, target, e));
                metrics::record_upstream_failure(PROTOCOL);
                return respond(conn, StatusCode::BAD_GATEWAY, UPSTREAM_FAILED_BODY).await;
            }
        };

        write_takeover_response(conn.writer()?, CONNECT_ESTABLISHED, info.write_timeout).await?;
        let (mut client, leftover) = conn.take_handle().await?;
        if !leftover.is_empty() {
            upstream.write_all(&leftover).await?;
        }

        server.log_info(format_args!("{} CONNECT tunnel open to {}", info.id, target));
        match tokio::io::copy_bidirectional(&mut client, &mut upstream).await {
            Ok((sent, received)) => {
                let sent = sent as usize + leftover.len();
                metrics::record_relayed_bytes(PROTOCOL, PacketDirection::Outbound, sent);
                metrics::record_relayed_bytes(PROTOCOL, PacketDirection::Inbound, received as usize);
                server.log_debug(format_args!(
                    "{} CONNECT tunnel closed (sent {} bytes, received {} bytes)",
                    info.id, sent, received
                ));
            }
            Err(e) => {
                tracing::debug!(connection_id = %info.id, error = %e, "CONNECT relay ended");
            }
        }
        Ok(())
    }

    async fn forward(self, conn: &mut Connection) -> Result<(), ProxyError> {
        let info = conn.info().clone();
        let server = Arc::clone(conn.server());
        let request = self.request;

        let chunked = request
            .header("transfer-encoding")
            .is_some_and(|te| te.to_ascii_lowercase().contains("chunked"));
        if chunked {
            return respond(
                conn,
                StatusCode::NOT_IMPLEMENTED,
                "Chunked request bodies are not supported\n",
            )
            .await;
        }

        let content_length = match request.header("content-length").map(str::parse::<usize>) {
            None => 0,
            Some(Ok(n)) if n <= MAX_BODY_SIZE => n,
            Some(Ok(_)) => return respond(conn, StatusCode::PAYLOAD_TOO_LARGE, "Payload Too Large\n").await,
            Some(Err(_)) => return respond(conn, StatusCode::BAD_REQUEST, "Invalid Content-Length\n").await,
        };

        let Ok(uri) = format!("http://{}{}", request.host, request.path).parse::<Uri>() else {
            return respond(conn, StatusCode::BAD_REQUEST, "Invalid request target\n").await;
        };

        let mut body = vec![0u8; content_length];
        timeout(info.read_timeout, conn.reader()?.read_exact(&mut body))
            .await
            .map_err(|_| ProxyError::Timeout("reading request body"))??;

        if let Some(hooks) = conn.hooks() {
            let mut captured = request.raw.clone();
            captured.extend_from_slice(&body);
            hooks.packet(&info, PacketDirection::Outbound, &captured);
        }
        metrics::record_relayed_bytes(PROTOCOL, PacketDirection::Outbound, body.len());

        server.log_debug(format_args!(
            "{} forwarding {} {}",
            info.id, request.method, uri
        ));

        let mut builder = Request::builder().method(request.method.clone()).uri(uri);
        if let Some(headers) = builder.headers_mut() {
            *headers = strip_hop_by_hop(&request.headers);
        }
        let upstream_request = builder
            .body(Body::from(body))
            .map_err(|e| ProxyError::MalformedRequest(e.to_string()))?;

        let response = match timeout(info.read_timeout, self.client.request(upstream_request)).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                server.log_error(format_args!("{} upstream {} failed: {}", info.id, request.host, e));
                metrics::record_upstream_failure(PROTOCOL);
                return respond(conn, StatusCode::BAD_GATEWAY, UPSTREAM_FAILED_BODY).await;
            }
            Err(_) => {
                server.log_error(format_args!("{} upstream {} timed out", info.id, request.host));
                metrics::record_upstream_failure(PROTOCOL);
                return respond(conn, StatusCode::GATEWAY_TIMEOUT, "Upstream request timed out\n").await;
            }
        };

        let (parts, body) = response.into_parts();
        let body = match timeout(
            info.read_timeout,
            axum::body::to_bytes(Body::new(body), MAX_BODY_SIZE),
        )
        .await
        {
            Ok(Ok(bytes)) => bytes,
            Ok(Err(e)) => {
                server.log_error(format_args!("{} upstream body from {} failed: {}", info.id, request.host, e));
                metrics::record_upstream_failure(PROTOCOL);
                return respond(conn, StatusCode::BAD_GATEWAY, UPSTREAM_FAILED_BODY).await;
            }
            Err(_) => {
                metrics::record_upstream_failure(PROTOCOL);
                return respond(conn, StatusCode::GATEWAY_TIMEOUT, "Upstream request timed out\n").await;
            }
        };

        let mut wire = encode_response_head(parts.status, &strip_hop_by_hop(&parts.headers), body.len());
        wire.extend_from_slice(&body);

        if let Some(hooks) = conn.hooks() {
            hooks.packet(&info, PacketDirection::Inbound, &wire);
        }
        metrics::record_relayed_bytes(PROTOCOL, PacketDirection::Inbound, body.len());

        write_takeover_response(conn.writer()?, &wire, info.write_timeout).await?;
        server.log_info(format_args!(
            "{} {} {} -> {}",
            info.id,
            request.method,
            request.target,
            parts.status.as_u16()
        ));
        Ok(())
    }
}

#[async_trait]
impl ProtocolProcessor for HttpProcessor {
    fn protocol_name(&self) -> &'static str {
        PROTOCOL
    }

    async fn process(self: Box<Self>, conn: &mut Connection) -> Result<(), ProxyError> {
        if self.request.is_connect() {
            self.tunnel(conn).await
        } else {
            self.forward(conn).await
        }
    }
}

async fn respond(conn: &mut Connection, status: StatusCode, body: &str) -> Result<(), ProxyError> {
    let write_timeout = conn.info().write_timeout;
    let response = plain_text_response(status, body);
    write_takeover_response(conn.writer()?, &response, write_timeout).await
}
