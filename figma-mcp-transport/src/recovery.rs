//! Error classification and retry advice.
//!
//! Everything here is a pure function of an [`ApiError`]: the same error
//! always yields the same message, suggestion, retryability and delay.

use serde_json::Value;
use std::fmt;
use std::time::Duration;

use crate::error::ApiError;

/// Delay used for 429 when neither the header nor the body names one.
pub const DEFAULT_RATE_LIMIT_DELAY: f64 = 60.0;
/// Delay for 5xx.
pub const SERVER_ERROR_DELAY: f64 = 2.0;
/// Delay for a timeout and for unrecognized network failures.
pub const DEFAULT_NETWORK_DELAY: f64 = 1.0;

/// What a caller should do about an error.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorRecovery {
    pub message: String,
    pub suggestion: String,
    pub retryable: bool,
    /// Seconds to wait before retrying; `0.0` when not retryable.
    pub retry_after_seconds: f64,
}

impl ErrorRecovery {
    fn retry(message: impl Into<String>, suggestion: impl Into<String>, after: f64) -> Self {
        Self {
            message: message.into(),
            suggestion: suggestion.into(),
            retryable: true,
            retry_after_seconds: after,
        }
    }

    fn fatal(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            suggestion: suggestion.into(),
            retryable: false,
            retry_after_seconds: 0.0,
        }
    }

    /// The advised delay.
    pub fn delay(&self) -> Duration {
        Duration::try_from_secs_f64(self.retry_after_seconds).unwrap_or_default()
    }
}

impl fmt::Display for ErrorRecovery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}. {}", self.message, self.suggestion)
    }
}

/// A family of network failures, recognized by message prefix.
#[derive(Debug, Clone, Copy)]
pub struct NetworkPattern {
    pub prefix: &'static str,
    pub message: &'static str,
    pub suggestion: &'static str,
    pub retryable: bool,
    pub delay: f64,
}

/// Network failure families, matched in order against
/// [`ApiError::Network`] messages. The prefixes are the display prefixes of
/// [`TransportError`](crate::TransportError).
pub const NETWORK_PATTERNS: &[NetworkPattern] = &[
    NetworkPattern {
        prefix: "DNS resolution failed",
        message: "Could not resolve the API host",
        suggestion: "Check network connectivity and DNS settings",
        retryable: true,
        delay: 2.0,
    },
    NetworkPattern {
        prefix: "Connection failed",
        message: "Could not connect to the API",
        suggestion: "Check network connectivity and any proxy or firewall settings",
        retryable: true,
        delay: 1.0,
    },
    NetworkPattern {
        prefix: "Connection closed",
        message: "The connection was closed unexpectedly",
        suggestion: "Retry the request",
        retryable: true,
        delay: 0.5,
    },
    NetworkPattern {
        prefix: "TLS handshake failed",
        message: "Secure connection to the API failed",
        suggestion: "Check the system clock and any TLS-intercepting proxy",
        retryable: true,
        delay: 2.0,
    },
    NetworkPattern {
        prefix: "OS error",
        message: "A socket operation failed",
        suggestion: "Retry the request",
        retryable: true,
        delay: 0.5,
    },
    NetworkPattern {
        prefix: "Malformed HTTP response",
        message: "The API returned an unreadable response",
        suggestion: "Retry the request; if it persists, an intermediary may be rewriting traffic",
        retryable: true,
        delay: 1.0,
    },
    NetworkPattern {
        prefix: "Response body exceeds",
        message: "The response was too large",
        suggestion: "Request a smaller resource, for example with a lower depth or fewer node ids",
        retryable: false,
        delay: 0.0,
    },
    NetworkPattern {
        prefix: "Invalid URL",
        message: "The request URL is invalid",
        suggestion: "Check the API base URL and the identifiers in the request",
        retryable: false,
        delay: 0.0,
    },
    NetworkPattern {
        prefix: "File write failed",
        message: "The downloaded file could not be saved",
        suggestion: "Check that the destination directory is writable and has free space",
        retryable: false,
        delay: 0.0,
    },
    NetworkPattern {
        prefix: "TLS configuration error",
        message: "The TLS client could not be configured",
        suggestion: "Check the build's TLS support",
        retryable: false,
        delay: 0.0,
    },
    NetworkPattern {
        prefix: "Invalid configuration",
        message: "The transport configuration is invalid",
        suggestion: "Fix the FIGMA_* environment variables",
        retryable: false,
        delay: 0.0,
    },
];

/// Classify any public error.
pub fn classify(error: &ApiError) -> ErrorRecovery {
    match error {
        ApiError::Http {
            status,
            body,
            retry_after,
        } => classify_http(*status, body, *retry_after),
        ApiError::Json(message) => ErrorRecovery::fatal(
            format!("Invalid JSON: {message}"),
            "The API returned data that could not be parsed; check the request parameters",
        ),
        ApiError::Network(message) => classify_network(message),
        ApiError::Timeout => ErrorRecovery::retry(
            "The request timed out",
            "Retry the request, or request less data at once",
            DEFAULT_NETWORK_DELAY,
        ),
    }
}

/// Classify a non-success HTTP status.
pub fn classify_http(status: u16, body: &str, retry_after: Option<f64>) -> ErrorRecovery {
    match status {
        400 => {
            let lower = body.to_ascii_lowercase();
            let suggestion = if lower.contains("invalid") && lower.contains("id") {
                "Check the file key and node ids; node ids look like \"1:2\""
            } else if lower.contains("missing") {
                "A required parameter is missing from the request"
            } else if lower.contains("node") {
                "One or more node ids do not exist in this file"
            } else {
                "Check the request parameters"
            };
            ErrorRecovery::fatal("Bad request", suggestion)
        }
        401 => ErrorRecovery::fatal(
            "Authentication failed",
            "Check that the access token is set and has not expired",
        ),
        403 => ErrorRecovery::fatal(
            "Access denied",
            "The token lacks the required scope or access to this file",
        ),
        404 => ErrorRecovery::fatal(
            "Not found",
            "Check the file key or node id; the file may have been deleted or moved",
        ),
        429 => {
            let delay = retry_after
                .filter(|secs| *secs > 0.0)
                .or_else(|| body_retry_after(body))
                .unwrap_or(DEFAULT_RATE_LIMIT_DELAY);
            ErrorRecovery::retry(
                "Rate limit exceeded",
                format!("Wait {delay} seconds before retrying"),
                delay,
            )
        }
        500..=599 => ErrorRecovery::retry(
            format!("Server error (HTTP {status})"),
            "The API is having trouble; retry shortly",
            SERVER_ERROR_DELAY,
        ),
        _ => ErrorRecovery::fatal(format!("Unexpected HTTP status {status}"), "Check the request"),
    }
}

/// Classify a network failure message.
pub fn classify_network(message: &str) -> ErrorRecovery {
    match NETWORK_PATTERNS.iter().find(|p| message.starts_with(p.prefix)) {
        Some(p) if p.retryable => ErrorRecovery::retry(p.message, p.suggestion, p.delay),
        Some(p) => ErrorRecovery::fatal(p.message, p.suggestion),
        None => ErrorRecovery::retry(
            format!("Network error: {message}"),
            "Check network connectivity",
            DEFAULT_NETWORK_DELAY,
        ),
    }
}

/// `retry_after` from a JSON error body, in seconds.
fn body_retry_after(body: &str) -> Option<f64> {
    let value: Value = serde_json::from_str(body).ok()?;
    let field = value.get("retry_after")?;
    let secs = match field {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }?;
    (secs.is_finite() && secs > 0.0).then_some(secs)
}
