// Figma MCP - the network core of the Figma MCP server
//
// This library bundles the HTTPS transport every design-API call goes through
// with the diagnostic logging it reports to.

// Re-export the transport
pub use figma_mcp_transport::*;

// Re-export logging
pub use figma_mcp_log::{
    ErrorLog, LogConfig, LogEntry, LogError, LogFormat, LogLevel, LogOutput, MemoryErrorLog, Rotation,
    TracingErrorLog, truncate_for_log,
};

// Re-export the crates themselves for qualified access
pub use figma_mcp_log;
pub use figma_mcp_transport;

// JSON values flow through every public call
pub use serde_json::{self, Value, json};

/// Prelude module for convenient imports
///
/// ```
/// use figma_mcp::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        ApiError,
        ApiResult,
        Client,
        ErrorLog,
        ErrorRecovery,
        HeaderList,
        LogConfig,
        LogLevel,
        Method,
        RetryPolicy,
        Transport,
        TransportConfig,
        TransportError,
        Value,
        json,
        with_retry,
    };
    pub use figma_mcp_transport::testing::FixtureTransport;
}
