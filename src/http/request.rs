//! Request head reading and parsing.
//!
//! # Responsibilities
//! - Read an HTTP/1.x request head off a buffered connection reader
//! - Enforce head size and header count limits before parsing
//! - Extract routing-relevant information (host, path)
//!
//! # Design Decisions
//! - Only the head is consumed; body bytes stay buffered for the processor
//! - Raw head bytes are preserved for capture logging
//! - Header names are case-insensitive, values are kept as received

use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, Uri};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

use crate::error::ProxyError;

/// Maximum size of a request head, including the blank line.
pub const MAX_HEAD_SIZE: usize = 64 * 1024;

/// Maximum number of request header lines.
pub const MAX_HEADERS: usize = 100;

/// A parsed HTTP/1.x request head.
#[derive(Debug, Clone)]
pub struct RequestHead {
    pub method: Method,
    /// Request target as sent (origin-form, absolute-form or authority-form).
    pub target: String,
    /// Host the request is addressed to.
    pub host: String,
    /// Path and query, empty for CONNECT.
    pub path: String,
    pub headers: HeaderMap,
    /// Head bytes as read from the wire.
    pub raw: Vec<u8>,
}

impl RequestHead {
    /// Parse a complete head terminated by an empty line.
    pub fn parse(raw: &[u8]) -> Result<Self, ProxyError> {
        let mut slots = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut request = httparse::Request::new(&mut slots);

        match request.parse(raw) {
            Ok(httparse::Status::Complete(_)) => {}
            Ok(httparse::Status::Partial) => {
                return Err(ProxyError::MalformedRequest("incomplete request head".into()))
            }
            Err(e) => return Err(ProxyError::MalformedRequest(e.to_string())),
        }

        let method_str = request.method.unwrap_or_default();
        let method = Method::from_bytes(method_str.as_bytes())
            .map_err(|_| ProxyError::MalformedRequest(format!("invalid method {:?}", method_str)))?;
        let target = request.path.unwrap_or_default().to_string();

        let mut headers = HeaderMap::with_capacity(request.headers.len());
        for header in request.headers.iter() {
            let name = HeaderName::from_bytes(header.name.as_bytes())
                .map_err(|_| ProxyError::MalformedRequest(format!("invalid header {:?}", header.name)))?;
            let value = HeaderValue::from_bytes(header.value)
                .map_err(|_| ProxyError::MalformedRequest(format!("invalid value for {}", name)))?;
            headers.append(name, value);
        }

        let (host, path) = resolve_target(&method, &target, &headers)?;

        Ok(Self {
            method,
            target,
            host,
            path,
            headers,
            raw: raw.to_vec(),
        })
    }

    /// First value of a header as text, if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn is_connect(&self) -> bool {
        self.method == Method::CONNECT
    }
}

/// Derive the (host, path) pair the request addresses.
fn resolve_target(
    method: &Method,
    target: &str,
    headers: &HeaderMap,
) -> Result<(String, String), ProxyError> {
    if *method == Method::CONNECT {
        return Ok((target.to_string(), String::new()));
    }

    if !target.starts_with('/') {
        if let Ok(uri) = target.parse::<Uri>() {
            if let Some(authority) = uri.authority() {
                let path = uri
                    .path_and_query()
                    .map(|pq| pq.as_str().to_string())
                    .unwrap_or_default();
                return Ok((authority.as_str().to_string(), path));
            }
        }
    }

    let host = headers
        .get(axum::http::header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .ok_or_else(|| ProxyError::MalformedRequest("missing Host header".into()))?;

    Ok((host, target.to_string()))
}

/// Read one request head from a buffered reader.
///
/// Leading empty lines are skipped. Bytes past the blank line are left in the
/// reader's buffer.
pub async fn read_request_head<R>(reader: &mut R) -> Result<RequestHead, ProxyError>
where
    R: AsyncBufRead + Unpin,
{
    let mut raw = Vec::with_capacity(1024);

    loop {
        let remaining = (MAX_HEAD_SIZE + 1).saturating_sub(raw.len()) as u64;
        let line_start = raw.len();
        let n = (&mut *reader).take(remaining).read_until(b'\n', &mut raw).await?;

        if n == 0 {
            return Err(ProxyError::MalformedRequest(
                "connection closed mid request head".into(),
            ));
        }
        if raw.len() > MAX_HEAD_SIZE {
            return Err(ProxyError::HeadTooLarge(MAX_HEAD_SIZE));
        }

        let line = &raw[line_start..];
        let blank = line == b"\r\n" || line == b"\n";
        if blank && line_start == 0 {
            raw.clear();
            continue;
        }
        if blank {
            break;
        }
        if !line.ends_with(b"\n") {
            // `take` ran dry mid line
            return Err(ProxyError::HeadTooLarge(MAX_HEAD_SIZE));
        }
    }

    RequestHead::parse(&raw)
}
