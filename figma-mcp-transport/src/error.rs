//! Error types.
//!
//! [`TransportError`] covers everything below the orchestration boundary:
//! sockets, TLS, framing, resolution. It is converted exactly once, in
//! `From<TransportError> for ApiError`, into the closed public taxonomy.

use std::io;
use thiserror::Error;

use crate::recovery::{self, ErrorRecovery};

/// Result type for public transport operations.
pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// Failure of a public call. Closed: callers can match exhaustively.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ApiError {
    /// The API answered with a non-success status.
    #[error("HTTP {status}: {body}")]
    Http {
        /// Response status code.
        status: u16,
        /// Response body, decoded lossily.
        body: String,
        /// `Retry-After` header in seconds, when present and numeric.
        retry_after: Option<f64>,
    },

    /// A request body could not be serialized or a response body was not JSON.
    #[error("JSON error: {0}")]
    Json(String),

    /// Resolution, connection, TLS, framing or local I/O failure.
    #[error("Network error: {0}")]
    Network(String),

    /// The request deadline elapsed.
    #[error("Request timed out")]
    Timeout,
}

impl ApiError {
    /// Derive the human-facing recovery advice for this error.
    pub fn recovery(&self) -> ErrorRecovery {
        recovery::classify(self)
    }

    /// Whether the retry advisor would retry this error.
    pub fn is_retryable(&self) -> bool {
        self.recovery().retryable
    }

    /// HTTP status code, for [`ApiError::Http`].
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Short stable name of the variant, for log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Http { .. } => "http",
            Self::Json(_) => "json",
            Self::Network(_) => "network",
            Self::Timeout => "timeout",
        }
    }
}

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A value could not be parsed.
    #[error("invalid value for {key}: {value:?}")]
    Invalid {
        /// Variable or field name.
        key: String,
        /// Offending value.
        value: String,
    },

    /// A value parsed but is out of range.
    #[error("{0}")]
    OutOfRange(String),
}

/// Failure below the orchestration boundary.
///
/// Display strings start with the prefixes matched by
/// [`recovery::NETWORK_PATTERNS`]; keep them in sync.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Hostname could not be resolved by the platform resolver or DoH.
    #[error("DNS resolution failed for {host}: {reason}")]
    Dns {
        /// Hostname being resolved.
        host: String,
        /// What went wrong.
        reason: String,
    },

    /// TCP connect failed or timed out.
    #[error("Connection failed to {target}: {reason}")]
    Connect {
        /// Address or host being dialed.
        target: String,
        /// What went wrong.
        reason: String,
    },

    /// TLS handshake failed.
    #[error("TLS handshake failed with {server_name}: {reason}")]
    Tls {
        /// SNI name presented.
        server_name: String,
        /// What went wrong.
        reason: String,
    },

    /// TLS client configuration could not be built.
    #[error("TLS configuration error: {0}")]
    TlsConfig(String),

    /// Socket-level I/O failure.
    #[error("OS error: {0}")]
    Io(#[from] io::Error),

    /// Response bytes did not follow HTTP/1.1 framing.
    #[error("Malformed HTTP response: {0}")]
    Malformed(String),

    /// Body exceeded the configured limit.
    #[error("Response body exceeds {limit} bytes")]
    BodyTooLarge {
        /// Configured maximum.
        limit: usize,
    },

    /// Peer closed the connection before sending a status line.
    #[error("Connection closed by peer before a response was received")]
    ConnectionClosed,

    /// URL could not be parsed or is unsupported by the raw path.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Other failure reported by the convenience HTTP client.
    #[error("HTTP client error: {0}")]
    Http(String),

    /// Configuration rejected at client construction.
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// Deadline exceeded.
    #[error("Request timed out")]
    Timeout,
}

/// OS error codes known to be transient on the current platform.
///
/// `select(2)` on macOS can fail with `EINVAL` on otherwise healthy sockets;
/// everywhere, `EINTR` means the call was interrupted and can be reissued.
#[cfg(target_os = "macos")]
const TRANSIENT_OS_ERRORS: &[i32] = &[4, 22];
#[cfg(not(target_os = "macos"))]
const TRANSIENT_OS_ERRORS: &[i32] = &[4];

/// True for I/O errors that should be retried in place.
pub fn is_transient_os_error(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::Interrupted
        || err
            .raw_os_error()
            .is_some_and(|code| TRANSIENT_OS_ERRORS.contains(&code))
}

impl TransportError {
    /// Whether this is a resolution failure.
    pub fn is_dns(&self) -> bool {
        matches!(self, Self::Dns { .. })
    }

    /// Whether this is a known transient platform failure worth an in-place retry.
    pub fn is_transient_platform(&self) -> bool {
        matches!(self, Self::Io(e) if is_transient_os_error(e))
    }

    /// Whether a pooled connection died while idle, before any response byte.
    pub(crate) fn is_stale_connection(&self) -> bool {
        matches!(self, Self::ConnectionClosed)
    }

    pub(crate) fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed(message.into())
    }
}

impl From<TransportError> for ApiError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Timeout => ApiError::Timeout,
            other => ApiError::Network(other.to_string()),
        }
    }
}
