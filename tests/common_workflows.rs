//! Integration tests for common Figma MCP workflows.
//!
//! These tests exercise the public surface the way tool handlers use it:
//! through `&dyn Transport`, wrapped in `with_retry`.

use async_trait::async_trait;
use figma_mcp::prelude::*;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

const FILE_URL: &str = "https://api.figma.com/v1/files/ABC";

/// A tool handler written against the capability, not the client.
async fn file_name(transport: &dyn Transport, token: &str) -> ApiResult<String> {
    let headers = HeaderList::new().with("X-Figma-Token", token);
    let file = with_retry(3, || transport.get_json(&headers, FILE_URL)).await?;
    Ok(file["name"].as_str().unwrap_or_default().to_string())
}

// =============================================================================
// Fixture transport workflows
// =============================================================================

#[tokio::test]
async fn test_handler_reads_fixture() {
    let fixtures = FixtureTransport::new().with_get(FILE_URL, json!({"name": "Landing page"}));

    assert_eq!(file_name(&fixtures, "secret").await.unwrap(), "Landing page");
    assert_eq!(fixtures.call_count(&Method::GET, FILE_URL), 1);
}

#[tokio::test(start_paused = true)]
async fn test_handler_retries_rate_limit() {
    let fixtures = FixtureTransport::new();
    fixtures.push_get(
        FILE_URL,
        Err(ApiError::Http {
            status: 429,
            body: "{\"status\":429}".into(),
            retry_after: Some(3.0),
        }),
    );
    fixtures.push_get(FILE_URL, Ok(json!({"name": "Landing page"})));

    let started = tokio::time::Instant::now();
    assert_eq!(file_name(&fixtures, "secret").await.unwrap(), "Landing page");
    assert_eq!(started.elapsed(), Duration::from_secs(3));
    assert_eq!(fixtures.call_count(&Method::GET, FILE_URL), 2);
}

#[tokio::test]
async fn test_handler_surfaces_final_error() {
    let fixtures = FixtureTransport::new();
    fixtures.push_get(
        FILE_URL,
        Err(ApiError::Http {
            status: 403,
            body: "Invalid token".into(),
            retry_after: None,
        }),
    );

    let err = file_name(&fixtures, "bad").await.unwrap_err();
    let recovery = err.recovery();
    assert!(!recovery.retryable);
    assert!(recovery.to_string().starts_with("Access denied. "));
    assert_eq!(fixtures.call_count(&Method::GET, FILE_URL), 1);
}

#[tokio::test]
async fn test_download_through_transport() {
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("frame.png");
    let fixtures = FixtureTransport::new().with_download("https://cdn.example/frame.png", &b"PNG"[..]);
    let transport: &dyn Transport = &fixtures;

    transport
        .download_to_file("https://cdn.example/frame.png", &dest)
        .await
        .unwrap();
    assert_eq!(std::fs::read(&dest).unwrap(), b"PNG");
}

// =============================================================================
// Custom transports
// =============================================================================

/// Fails with a timeout a fixed number of times, then answers.
struct Flaky {
    failures: AtomicU32,
}

#[async_trait]
impl Transport for Flaky {
    async fn get_json(&self, _headers: &HeaderList, _url: &str) -> ApiResult<Value> {
        if self.failures.fetch_sub(1, Ordering::SeqCst) > 0 {
            Err(ApiError::Timeout)
        } else {
            Ok(json!({"name": "Recovered"}))
        }
    }

    async fn post_json(&self, _headers: &HeaderList, _url: &str, body: &Value) -> ApiResult<Value> {
        Ok(body.clone())
    }

    async fn download_to_file(&self, _url: &str, _path: &Path) -> ApiResult<()> {
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn test_custom_transport_with_retry_policy() {
    let flaky = Flaky {
        failures: AtomicU32::new(2),
    };
    let headers = HeaderList::new();

    let value = RetryPolicy::new(3)
        .with_max_delay(Duration::from_millis(100))
        .run(|| flaky.get_json(&headers, FILE_URL))
        .await
        .unwrap();
    assert_eq!(value["name"], "Recovered");
}

// =============================================================================
// Construction
// =============================================================================

#[test]
fn test_client_from_config() {
    let config = TransportConfig::builder()
        .api_base("https://api.figma.com/")
        .timeout(Duration::from_secs(5))
        .build();
    let client = Client::new(config).unwrap();

    assert_eq!(client.api_url("/v1/me"), "https://api.figma.com/v1/me");
    assert_eq!(client.config().timeout, Duration::from_secs(5));
    assert_eq!(client.pool_stats().unwrap().opened, 0);
}

#[test]
fn test_invalid_config_is_rejected() {
    let config = TransportConfig::builder().pool_max_size(0).build();
    assert!(matches!(Client::new(config), Err(TransportError::Config(_))));
}

#[test]
fn test_log_config_builder() {
    let config = LogConfig::new().level(LogLevel::Debug);
    assert_eq!(config.level, LogLevel::Debug);
}
