//! Raw response writing and socket takeover.
//!
//! # Responsibilities
//! - Encode small synthesized responses (400, 502, ...) byte for byte
//! - Encode relayed upstream response heads
//! - Model the raw takeover of a connection's write side
//!
//! # Design Decisions
//! - Responses are written straight to the socket, not through a framing layer
//! - Takeover phase is explicit so a framed response cannot follow raw bytes
//!
//! # Takeover Phases
//! ```text
//! Negotiating ──write / send_response──▶ Hijacked ──close──▶ Closed
//! ```

use std::fmt::Write as _;
use std::io;
use std::time::Duration;

use axum::http::{HeaderMap, StatusCode};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufStream};

use crate::error::ProxyError;

/// Body of the response sent when an upstream WebSocket cannot be reached.
pub const WEBSOCKET_FAILED_BODY: &str = "WebSocket connection failed\n";

/// Body of the response sent when a forwarded HTTP request fails.
pub const UPSTREAM_FAILED_BODY: &str = "Upstream request failed\n";

/// Encode a complete `text/plain` response.
///
/// Only `Content-Type` and `Content-Length` are emitted.
pub fn plain_text_response(status: StatusCode, body: &str) -> Vec<u8> {
    let mut head = status_line(status);
    let _ = write!(
        head,
        "Content-Type: text/plain\r\nContent-Length: {}\r\n\r\n",
        body.len()
    );
    let mut bytes = head.into_bytes();
    bytes.extend_from_slice(body.as_bytes());
    bytes
}

/// Encode a response head carrying `headers` and an explicit length.
///
/// `Content-Length` and `Connection` in `headers` are replaced; the response
/// always closes the connection.
pub fn encode_response_head(status: StatusCode, headers: &HeaderMap, content_length: usize) -> Vec<u8> {
    let mut head = status_line(status).into_bytes();
    for (name, value) in headers {
        if name == axum::http::header::CONTENT_LENGTH || name == axum::http::header::CONNECTION {
            continue;
        }
        head.extend_from_slice(name.as_str().as_bytes());
        head.extend_from_slice(b": ");
        head.extend_from_slice(value.as_bytes());
        head.extend_from_slice(b"\r\n");
    }
    head.extend_from_slice(
        format!("Content-Length: {}\r\nConnection: close\r\n\r\n", content_length).as_bytes(),
    );
    head
}

fn status_line(status: StatusCode) -> String {
    format!(
        "HTTP/1.1 {} {}\r\n",
        status.as_u16(),
        status.canonical_reason().unwrap_or("")
    )
}

/// Where a takeover writer is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TakeoverPhase {
    /// Nothing written yet; a framed response may still be sent.
    Negotiating,
    /// Raw bytes went out; the caller owns the byte stream.
    Hijacked,
    Closed,
}

/// Response writer that forwards raw bytes to the underlying stream.
///
/// Header storage exists so callers can treat it like any response writer,
/// but raw writes never emit it.
#[derive(Debug)]
pub struct RawTakeover<W> {
    inner: W,
    headers: HeaderMap,
    phase: TakeoverPhase,
}

impl<W> RawTakeover<W>
where
    W: AsyncWrite + Unpin,
{
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            headers: HeaderMap::new(),
            phase: TakeoverPhase::Negotiating,
        }
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// No-op; the status travels inside the raw bytes.
    pub fn write_header(&mut self, _status: StatusCode) {}

    /// Forward `buf` unchanged, returning its full length.
    pub async fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.phase == TakeoverPhase::Closed {
            return Err(closed());
        }
        self.inner.write_all(buf).await?;
        self.phase = TakeoverPhase::Hijacked;
        Ok(buf.len())
    }

    /// Send a framed `text/plain` response with the stored headers.
    ///
    /// Only possible while negotiating.
    pub async fn send_response(&mut self, status: StatusCode, body: &str) -> io::Result<()> {
        if self.phase != TakeoverPhase::Negotiating {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                "raw bytes already written; cannot send a framed response",
            ));
        }
        let mut headers = self.headers.clone();
        headers.insert(
            axum::http::header::CONTENT_TYPE,
            axum::http::HeaderValue::from_static("text/plain"),
        );
        let mut bytes = encode_response_head(status, &headers, body.len());
        bytes.extend_from_slice(body.as_bytes());
        self.inner.write_all(&bytes).await?;
        self.phase = TakeoverPhase::Hijacked;
        Ok(())
    }

    pub async fn flush(&mut self) -> io::Result<()> {
        self.inner.flush().await
    }

    /// Flush and shut the stream down.
    pub async fn close(&mut self) -> io::Result<()> {
        if self.phase == TakeoverPhase::Closed {
            return Err(closed());
        }
        self.phase = TakeoverPhase::Closed;
        self.inner.flush().await?;
        self.inner.shutdown().await
    }

    pub fn phase(&self) -> TakeoverPhase {
        self.phase
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W> RawTakeover<W>
where
    W: AsyncRead + AsyncWrite + Unpin,
{
    /// Hand the stream back wrapped in fresh buffered read/write views.
    pub fn hijack(self) -> BufStream<W> {
        BufStream::new(self.inner)
    }
}

fn closed() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "takeover writer is closed")
}

/// Write a prebuilt response through a takeover writer and flush it.
pub async fn write_takeover_response<W>(
    writer: W,
    response: &[u8],
    write_timeout: Duration,
) -> Result<(), ProxyError>
where
    W: AsyncWrite + Unpin,
{
    let mut takeover = RawTakeover::new(writer);
    tokio::time::timeout(write_timeout, async {
        takeover.write(response).await?;
        takeover.flush().await
    })
    .await
    .map_err(|_| ProxyError::Timeout("writing response"))??;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt as _};

    #[test]
    fn websocket_failure_response_is_exact() {
        let bytes = plain_text_response(StatusCode::BAD_GATEWAY, WEBSOCKET_FAILED_BODY);
        assert_eq!(
            bytes,
            b"HTTP/1.1 502 Bad Gateway\r\nContent-Type: text/plain\r\nContent-Length: 28\r\n\r\nWebSocket connection failed\n"
        );
    }

    #[test]
    fn response_head_replaces_length_and_connection() {
        let mut headers = HeaderMap::new();
        headers.insert("x-upstream", "yes".parse().unwrap());
        headers.insert("content-length", "999".parse().unwrap());
        headers.insert("connection", "keep-alive".parse().unwrap());

        let head = String::from_utf8(encode_response_head(StatusCode::OK, &headers, 5)).unwrap();
        assert_eq!(
            head,
            "HTTP/1.1 200 OK\r\nx-upstream: yes\r\nContent-Length: 5\r\nConnection: close\r\n\r\n"
        );
    }

    #[tokio::test]
    async fn raw_write_forwards_exact_bytes_without_headers() {
        let mut takeover = RawTakeover::new(Vec::new());
        takeover.headers_mut().insert("x-never", "sent".parse().unwrap());
        takeover.write_header(StatusCode::OK);
        assert_eq!(takeover.phase(), TakeoverPhase::Negotiating);

        let n = takeover.write(b"raw bytes").await.unwrap();
        assert_eq!(n, 9);
        assert_eq!(takeover.phase(), TakeoverPhase::Hijacked);
        assert_eq!(takeover.get_ref(), b"raw bytes");

        assert!(takeover.send_response(StatusCode::OK, "late").await.is_err());
        assert_eq!(takeover.into_inner(), b"raw bytes");
    }

    #[tokio::test]
    async fn framed_response_before_raw_bytes() {
        let mut takeover = RawTakeover::new(Vec::new());
        takeover.headers_mut().insert("x-reason", "test".parse().unwrap());
        takeover.send_response(StatusCode::BAD_REQUEST, "nope").await.unwrap();

        let text = String::from_utf8(takeover.into_inner()).unwrap();
        assert!(text.starts_with("HTTP/1.1 400 Bad Request\r\n"));
        assert!(text.contains("x-reason: test\r\n"));
        assert!(text.ends_with("Content-Length: 4\r\nConnection: close\r\n\r\nnope"));
    }

    #[tokio::test]
    async fn close_twice_errors() {
        let mut takeover = RawTakeover::new(Vec::new());
        takeover.close().await.unwrap();
        assert_eq!(takeover.phase(), TakeoverPhase::Closed);
        assert!(takeover.close().await.is_err());
        assert!(takeover.write(b"x").await.is_err());
    }

    #[tokio::test]
    async fn hijack_keeps_the_same_stream() {
        let (local, mut peer) = tokio::io::duplex(64);
        let mut takeover = RawTakeover::new(local);
        takeover.write(b"hello").await.unwrap();

        let mut stream = takeover.hijack();
        peer.write_all(b"back").await.unwrap();
        let mut buf = [0u8; 4];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"back");

        let mut greeting = [0u8; 5];
        peer.read_exact(&mut greeting).await.unwrap();
        assert_eq!(&greeting, b"hello");
    }

    #[tokio::test]
    async fn takeover_response_times_out_on_stalled_peer() {
        let (local, _peer) = tokio::io::duplex(4);
        let err = write_takeover_response(local, b"more than four bytes", Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::Timeout(_)));
    }
}
