//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML) + CLI overrides
//!     → loader.rs (parse & deserialize into FileConfig)
//!     → validation.rs (range checks, defaults for non-positive values)
//!     → Config (validated, immutable)
//!     → shared via Arc<Server> to every connection
//! ```
//!
//! # Design Decisions
//! - Config is an immutable snapshot for the lifetime of a listener
//! - All file fields have defaults so an empty file is valid
//! - Out-of-range ports and unparsable addresses are fatal; non-positive
//!   sizes and timeouts are corrected instead of rejected

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{parse_file_config, read_file_config, ConfigError};
pub use schema::{FileConfig, ListenerSection, ObservabilitySection, TimeoutSection};
pub use validation::{Config, ValidationError};
