//! HTTP-family protocol handling.
//!
//! # Data Flow
//! ```text
//! sniffed connection
//!     → request.rs (read + parse the request head)
//!     → websocket.rs (upgrade requests: dial upstream, relay messages)
//!     → passthrough.rs (everything else: CONNECT tunnel or forward proxy)
//!     → response.rs (raw responses written over the taken-over socket)
//! ```

pub mod passthrough;
pub mod request;
pub mod response;
pub mod websocket;

pub use passthrough::HttpProcessor;
pub use request::{read_request_head, RequestHead};
pub use response::{RawTakeover, TakeoverPhase};
pub use websocket::WebSocketProcessor;
