//! SOCKS5 detection and refusal.
//!
//! Only the greeting is understood: the client is told that none of its
//! authentication methods is acceptable, which ends the negotiation cleanly.

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::timeout;

use crate::error::ProxyError;
use crate::net::connection::Connection;
use crate::protocol::ProtocolProcessor;

/// SOCKS protocol version byte.
pub const SOCKS5_VERSION: u8 = 0x05;

/// "No acceptable methods" in the method-selection reply.
pub const NO_ACCEPTABLE_METHODS: u8 = 0xFF;

#[derive(Debug, Default)]
pub struct Socks5Processor;

impl Socks5Processor {
    pub fn new() -> Self {
        Self
    }

    /// Whether the first byte of a stream announces SOCKS5.
    pub fn is_socks5(first_byte: u8) -> bool {
        first_byte == SOCKS5_VERSION
    }
}

#[async_trait]
impl ProtocolProcessor for Socks5Processor {
    fn protocol_name(&self) -> &'static str {
        "socks5"
    }

    async fn process(self: Box<Self>, conn: &mut Connection) -> Result<(), ProxyError> {
        let read_timeout = conn.info().read_timeout;
        let reader = conn.reader()?;

        let methods = timeout(read_timeout, async {
            let mut header = [0u8; 2];
            reader.read_exact(&mut header).await?;
            let mut methods = vec![0u8; header[1] as usize];
            reader.read_exact(&mut methods).await?;
            Ok::<_, std::io::Error>(methods)
        })
        .await
        .map_err(|_| ProxyError::Timeout("reading SOCKS5 greeting"))??;

        tracing::debug!(
            peer_addr = %conn.info().peer_addr,
            offered_methods = ?methods,
            "Refusing SOCKS5 negotiation"
        );

        let writer = conn.writer()?;
        writer.write_all(&[SOCKS5_VERSION, NO_ACCEPTABLE_METHODS]).await?;
        writer.flush().await?;

        Err(ProxyError::UnsupportedProtocol("socks5"))
    }
}
