//! # Figma MCP Transport
//!
//! The HTTPS transport behind every design-API call made by the Figma MCP
//! server.
//!
//! ## Features
//!
//! - **Dual-path requests**: `reqwest` first, with a hand-framed HTTP/1.1
//!   path over pooled rustls connections as fallback
//! - **Connection Pooling**: one idle connection per host, TTL-bounded
//! - **DNS-over-HTTPS fallback**: keeps working when the system resolver is broken
//! - **Deadlines**: one timeout covers resolution, connect, TLS and body
//! - **Error classification**: every failure maps to [`ApiError`] with retry advice
//! - **Retry**: [`with_retry`] and [`RetryPolicy`] follow the advice
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use figma_mcp_transport::{Client, HeaderList, TransportConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Client::new(TransportConfig::default())?;
//!     let headers = HeaderList::new().with("X-Figma-Token", "secret");
//!
//!     let file = client.get_json(&headers, &client.api_url("/v1/files/ABC")).await?;
//!     println!("{}", file["name"]);
//!     Ok(())
//! }
//! ```
//!
//! ## With Retry
//!
//! ```rust,no_run
//! use figma_mcp_transport::{Client, HeaderList, TransportConfig, with_retry};
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Client::new(TransportConfig::from_env()?)?;
//!
//!     // Rate limits and 5xx are retried after the advised delay.
//!     with_retry(3, || client.download_to_file("https://cdn.example/frame.png", Path::new("out/frame.png")))
//!         .await?;
//!     Ok(())
//! }
//! ```

mod client;
mod config;
mod connector;
mod dns;
mod error;
pub mod framer;
mod orchestrator;
mod pool;
mod primary;
mod raw;
mod recovery;
mod request;
mod response;
mod retry;
pub mod testing;
mod transport;

pub use client::{Client, LOGGED_BODY_CHARS};
pub use config::{
    DEFAULT_API_BASE, DEFAULT_CONNECT_TIMEOUT, DEFAULT_DOH_ADDR, DEFAULT_DOH_HOST, DEFAULT_PLATFORM_RETRIES,
    DEFAULT_PLATFORM_RETRY_DELAY, DEFAULT_TIMEOUT, ENV_PREFIX, MAX_BODY_SIZE, MAX_POOL_SIZE, POOL_TTL,
    TransportConfig, TransportConfigBuilder,
};
pub use connector::{Connector, TlsConnector, client_tls_config};
pub use dns::{DohLookup, Lookup, Resolver, SystemLookup};
pub use error::{ApiError, ApiResult, ConfigError, TransportError, is_transient_os_error};
pub use orchestrator::{HttpPath, Orchestrator, is_misrouted};
pub use pool::{Clock, ConnectionPool, PoolStats, PooledConnection, SystemClock};
pub use primary::{ReqwestPath, map_reqwest_error};
pub use raw::{RawClient, Target};
pub use recovery::{
    DEFAULT_NETWORK_DELAY, DEFAULT_RATE_LIMIT_DELAY, ErrorRecovery, NETWORK_PATTERNS, NetworkPattern,
    SERVER_ERROR_DELAY, classify, classify_http, classify_network,
};
pub use request::OutboundRequest;
pub use response::{HeaderList, RawResponse};
pub use retry::{DEFAULT_MAX_ATTEMPTS, RetryPolicy, with_retry};
pub use transport::Transport;

// Re-export common types
pub use bytes::Bytes;
pub use http::Method;

/// Prelude for common imports.
///
/// ```
/// use figma_mcp_transport::prelude::*;
/// ```
pub mod prelude {
    pub use crate::client::Client;
    pub use crate::config::{TransportConfig, TransportConfigBuilder};
    pub use crate::error::{ApiError, ApiResult, TransportError};
    pub use crate::recovery::ErrorRecovery;
    pub use crate::response::HeaderList;
    pub use crate::retry::{RetryPolicy, with_retry};
    pub use crate::testing::FixtureTransport;
    pub use crate::transport::Transport;
    pub use http::Method;
}
