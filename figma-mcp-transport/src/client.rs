//! The public client.

use figma_mcp_log::{ErrorLog, TracingErrorLog, truncate_for_log};
use http::Method;
use serde_json::Value;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use crate::config::TransportConfig;
use crate::connector::{TlsConnector, client_tls_config};
use crate::dns::{DohLookup, Resolver, SystemLookup};
use crate::error::{ApiError, ApiResult, TransportError};
use crate::orchestrator::{HttpPath, Orchestrator};
use crate::pool::{ConnectionPool, PoolStats};
use crate::primary::ReqwestPath;
use crate::raw::RawClient;
use crate::request::OutboundRequest;
use crate::response::{HeaderList, RawResponse};

/// Longest slice of a response body copied into an error log line.
pub const LOGGED_BODY_CHARS: usize = 500;

/// HTTPS client for the design API.
///
/// Cheap to clone; clones share the connection pools.
#[derive(Clone)]
pub struct Client {
    config: Arc<TransportConfig>,
    orchestrator: Arc<Orchestrator>,
    error_log: Arc<dyn ErrorLog>,
}

impl Client {
    /// Build the production client: reqwest first, raw pooled TLS as fallback.
    pub fn new(config: TransportConfig) -> Result<Self, TransportError> {
        config.validate()?;

        let connector = Arc::new(TlsConnector::new(client_tls_config()?, config.connect_timeout));
        let doh = DohLookup::new(connector.clone(), config.doh_addr, config.doh_host.clone());
        let resolver = Arc::new(Resolver::new(Arc::new(SystemLookup), Some(Arc::new(doh))));
        let pool = ConnectionPool::new(config.pool_max_size, config.pool_idle_ttl);
        let raw: Arc<dyn HttpPath> = Arc::new(RawClient::new(connector, resolver, pool, config.max_body_size));

        let primary: Option<Arc<dyn HttpPath>> = if config.use_convenience_path {
            Some(Arc::new(ReqwestPath::new(&config)?))
        } else {
            None
        };

        Ok(Self::from_paths(config, primary, raw))
    }

    /// Build from the environment (`FIGMA_*`).
    pub fn from_env() -> Result<Self, TransportError> {
        Self::new(TransportConfig::from_env()?)
    }

    /// Assemble a client from explicit code paths.
    pub fn from_paths(
        config: TransportConfig,
        primary: Option<Arc<dyn HttpPath>>,
        raw: Arc<dyn HttpPath>,
    ) -> Self {
        let orchestrator = Orchestrator::from_config(&config, primary, raw);
        Self {
            config: Arc::new(config),
            orchestrator: Arc::new(orchestrator),
            error_log: Arc::new(TracingErrorLog),
        }
    }

    /// Replace the sink that receives every classified error.
    pub fn with_error_log(mut self, log: Arc<dyn ErrorLog>) -> Self {
        self.error_log = log;
        self
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Join `path` onto the configured API base.
    pub fn api_url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.config.api_base.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    /// Raw-path pool counters.
    pub fn pool_stats(&self) -> Option<PoolStats> {
        self.orchestrator.raw().pool_stats()
    }

    /// Send a request through the orchestrator without any status handling.
    pub async fn request(&self, request: &OutboundRequest) -> Result<RawResponse, TransportError> {
        self.orchestrator.request(request).await
    }

    /// GET `url` and parse the body as JSON.
    pub async fn get_json(&self, headers: &HeaderList, url: &str) -> ApiResult<Value> {
        let request = OutboundRequest::get(url).headers(&self.api_headers(headers));
        let result = match self.fetch(&request).await {
            Ok(response) => parse_json(&response),
            Err(e) => Err(e),
        };
        self.report("get_json", url, result)
    }

    /// POST `body` as JSON to `url` and parse the response as JSON.
    pub async fn post_json(&self, headers: &HeaderList, url: &str, body: &Value) -> ApiResult<Value> {
        let result = match serde_json::to_vec(body) {
            Ok(bytes) => {
                let mut headers = self.api_headers(headers);
                if !headers.contains("content-type") {
                    headers.push("Content-Type", "application/json");
                }
                let request = OutboundRequest::post(url, bytes).headers(&headers);
                match self.fetch(&request).await {
                    Ok(response) => parse_json(&response),
                    Err(e) => Err(e),
                }
            }
            Err(e) => Err(ApiError::Json(e.to_string())),
        };
        self.report("post_json", url, result)
    }

    /// GET `url` and save the body at `path`.
    ///
    /// The body is written to `<path>.part` and renamed into place, so a
    /// failure never leaves a truncated file at `path`. No API headers are
    /// sent: download URLs are pre-signed.
    pub async fn download_to_file(&self, url: &str, path: &Path) -> ApiResult<()> {
        let result = match self.fetch(&OutboundRequest::get(url)).await {
            Ok(response) => write_atomically(path, response.body())
                .await
                .map_err(|e| ApiError::Network(format!("File write failed for {}: {e}", path.display()))),
            Err(e) => Err(e),
        };
        if result.is_ok() {
            debug!(url, path = %path.display(), "download complete");
        }
        self.report("download_to_file", url, result)
    }

    /// Default headers, then the caller's, then `Accept: application/json`
    /// unless the caller chose otherwise.
    fn api_headers(&self, caller: &HeaderList) -> HeaderList {
        let mut headers: HeaderList = self
            .config
            .default_headers
            .iter()
            .filter(|(name, _)| !caller.contains(name))
            .map(|(name, value)| (name.as_str(), value.as_str()))
            .collect();
        headers.extend(caller);
        if !headers.contains("accept") {
            headers.push("Accept", "application/json");
        }
        headers
    }

    async fn fetch(&self, request: &OutboundRequest) -> ApiResult<RawResponse> {
        let response = self.orchestrator.request(request).await?;
        if response.is_success() {
            Ok(response)
        } else {
            Err(ApiError::Http {
                status: response.status(),
                body: response.text_lossy(),
                retry_after: response.retry_after(),
            })
        }
    }

    fn report<T>(&self, operation: &str, url: &str, result: ApiResult<T>) -> ApiResult<T> {
        if let Err(error) = &result {
            let detail = match error {
                ApiError::Http { status, body, .. } => {
                    format!("HTTP {status}: {}", truncate_for_log(body, LOGGED_BODY_CHARS))
                }
                other => other.to_string(),
            };
            let message = format!("{detail} [{}]", error.recovery());
            self.error_log.log(&format!("{operation} {url}"), &message);
        }
        result
    }
}

/// An empty 2xx body is `null`.
fn parse_json(response: &RawResponse) -> ApiResult<Value> {
    let body = response.body();
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }
    serde_json::from_slice(body).map_err(|e| ApiError::Json(e.to_string()))
}

fn part_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".part");
    PathBuf::from(name)
}

async fn write_atomically(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent).await?;
    }
    let part = part_path(path);
    let written = async {
        tokio::fs::write(&part, bytes).await?;
        tokio::fs::rename(&part, path).await
    }
    .await;
    if written.is_err() {
        let _ = tokio::fs::remove_file(&part).await;
    }
    written
}
