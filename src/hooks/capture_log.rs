//! Built-in hook executor that writes capture events to the log.

use std::time::Duration;

use crate::error::ProxyError;
use crate::hooks::{HookError, HookExecutor};
use crate::net::connection::ConnectionInfo;
use crate::net::server::format_data_preview;
use crate::protocol::PacketDirection;

/// Logs connection lifecycle and, optionally, payload previews.
#[derive(Debug, Clone, Default)]
pub struct CaptureLogHooks {
    capture_payloads: bool,
}

impl CaptureLogHooks {
    pub fn new(capture_payloads: bool) -> Self {
        Self { capture_payloads }
    }
}

impl HookExecutor for CaptureLogHooks {
    fn on_connection_start(&self, info: &ConnectionInfo) -> Result<(), HookError> {
        tracing::info!(
            connection_id = %info.id,
            session = %info.session_id,
            peer_addr = %info.peer_addr,
            "Capture started"
        );
        Ok(())
    }

    fn on_connection_end(&self, info: &ConnectionInfo, duration: Duration) {
        tracing::info!(
            connection_id = %info.id,
            session = %info.session_id,
            duration_ms = duration.as_millis() as u64,
            "Capture finished"
        );
    }

    fn handle_error(&self, err: &ProxyError, context: &str) {
        tracing::warn!(error = %err, context, "Capture error");
    }

    fn on_packet(&self, info: &ConnectionInfo, direction: PacketDirection, data: &[u8]) {
        if !self.capture_payloads {
            return;
        }
        tracing::info!(
            connection_id = %info.id,
            direction = %direction,
            len = data.len(),
            preview = %format_data_preview(data),
            "Captured payload"
        );
    }
}
