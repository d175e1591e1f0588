//! Diagnostic logging for figma-mcp.
//!
//! The agent protocol owns STDOUT, so everything here defaults to STDERR.
//! Two pieces live in this crate:
//!
//! - [`LogConfig`] installs a `tracing` subscriber (JSON, plain, pretty or
//!   compact) over a non-blocking writer.
//! - [`ErrorLog`] is the `(context, message)` sink the transport calls for
//!   every classified failure before returning it to the caller.
//!
//! # Examples
//!
//! ```no_run
//! use figma_mcp_log::{LogConfig, LogFormat, LogLevel};
//!
//! let _guard = LogConfig::new()
//!     .level(LogLevel::Debug)
//!     .format(LogFormat::Compact)
//!     .init();
//!
//! tracing::info!("transport ready");
//! ```

mod config;
mod sink;

pub use config::{LogConfig, LogError, LogFormat, LogLevel, LogOutput, Rotation};
pub use sink::{ErrorLog, LogEntry, MemoryErrorLog, TracingErrorLog, truncate_for_log};

// Re-export tracing_appender so callers can hold the guard type by name
pub use tracing_appender;
