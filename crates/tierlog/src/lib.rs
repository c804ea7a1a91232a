//! # Tierlog
//!
//! Config-driven leveled logging that routes every severity to its own
//! size- and age-rotated file.
//!
//! ## Features
//!
//! - **Per-level files**: one rotating file per severity, exact-match routing
//! - **Rotation & retention**: size cap, backup count, age window, gzip
//! - **Encoding profiles**: JSON or console text, configurable level styles
//! - **Explicit handles**: a cloneable [`Logger`] plus an optional process-wide facade
//! - **Query tracing**: slow-query aware adapter for persistence layers
//! - **tracing bridge**: forward `tracing` events into the same pipeline
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tierlog::{LoggingSettings, Logger};
//!
//! fn main() -> tierlog::Result<()> {
//!     let logger = Logger::build(LoggingSettings::default())?;
//!     logger.info(format_args!("service started on port {}", 8080))?;
//!     Ok(())
//! }
//! ```

pub mod bridge;
pub mod config;
pub mod encoding;
pub mod facade;
pub mod level;
pub mod logger;
mod macros;
pub mod retention;
pub mod rotation;
pub mod router;
pub mod trace;


pub use bridge::TierlogLayer;
pub use config::{LevelEncoding, LogFormat, LoggingSettings, RotationSettings, SettingsSource};
pub use encoding::{Caller, EncodingProfile, Field, FieldValue};
pub use level::Level;
pub use logger::{Escalation, Logger};
pub use retention::{RetentionPolicy, RetentionSweeper};
pub use router::{LevelRouter, LevelSink};
pub use trace::{
    QueryClass, QueryContext, QueryLogLevel, QueryLogger, QueryTraceAdapter, QueryTraceConfig,
    RecordNotFound,
};

/// Result type for logging operations
pub type Result<T> = std::result::Result<T, Error>;

/// Logging subsystem errors
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Configuration decode error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Logger has not been initialized")]
    NotInitialized,
}
