//! Process-wide server capability surface handed to every processor.

use std::fmt::{self, Write as _};

use crate::config::Config;

/// Maximum number of payload bytes rendered by [`format_data_preview`].
pub const PREVIEW_LIMIT: usize = 256;

/// Read-only configuration plus logging verbs.
///
/// Shared by all connections behind an `Arc`; the log verbs are gated by
/// `Config::logging_enabled` so processors never consult global state.
#[derive(Debug)]
pub struct Server {
    config: Config,
}

impl Server {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn log_info(&self, args: fmt::Arguments<'_>) {
        if self.config.logging_enabled {
            tracing::info!("{}", args);
        }
    }

    pub fn log_error(&self, args: fmt::Arguments<'_>) {
        if self.config.logging_enabled {
            tracing::error!("{}", args);
        }
    }

    pub fn log_debug(&self, args: fmt::Arguments<'_>) {
        if self.config.logging_enabled {
            tracing::debug!("{}", args);
        }
    }

    /// Bounded, printable rendering of a captured payload.
    pub fn format_data_preview(&self, data: &[u8]) -> String {
        format_data_preview(data)
    }
}

/// Render at most [`PREVIEW_LIMIT`] bytes with non-printable bytes escaped.
pub fn format_data_preview(data: &[u8]) -> String {
    let shown = &data[..data.len().min(PREVIEW_LIMIT)];
    let mut preview = shown.escape_ascii().to_string();
    if data.len() > PREVIEW_LIMIT {
        let _ = write!(preview, "... ({} bytes total)", data.len());
    }
    preview
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_shown_verbatim() {
        assert_eq!(format_data_preview(b"GET / HTTP/1.1"), "GET / HTTP/1.1");
        assert_eq!(format_data_preview(b""), "");
    }

    #[test]
    fn control_bytes_are_escaped() {
        assert_eq!(format_data_preview(b"a\r\n\x00\xff"), "a\\r\\n\\x00\\xff");
    }

    #[test]
    fn large_payloads_are_truncated() {
        let data = vec![b'x'; 10 * 1024];
        let preview = format_data_preview(&data);
        assert!(preview.starts_with(&"x".repeat(PREVIEW_LIMIT)));
        assert!(preview.ends_with("... (10240 bytes total)"));
        assert!(preview.len() < PREVIEW_LIMIT + 32);
    }

    #[test]
    fn server_exposes_config() {
        let mut config = Config::default();
        config.logging_enabled = false;
        let server = Server::new(config);
        assert!(!server.config().logging_enabled);
        // Disabled logging is a silent no-op.
        server.log_error(format_args!("dropped {}", 1));
        assert_eq!(server.format_data_preview(b"ok"), "ok");
    }
}
