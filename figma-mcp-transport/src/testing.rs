//! In-memory [`Transport`] for tests.

use async_trait::async_trait;
use bytes::Bytes;
use http::Method;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::path::Path;

use crate::error::{ApiError, ApiResult};
use crate::response::HeaderList;
use crate::transport::Transport;

/// One call seen by a [`FixtureTransport`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub method: Method,
    pub url: String,
    /// JSON body for `post_json`.
    pub body: Option<Value>,
}

type Key = (Method, String);

/// Canned responses keyed by method and URL.
///
/// Outcomes queued for a key are returned in order; the last one repeats.
/// An unknown key answers HTTP 404.
#[derive(Debug, Default)]
pub struct FixtureTransport {
    json: Mutex<HashMap<Key, VecDeque<ApiResult<Value>>>>,
    downloads: Mutex<HashMap<String, VecDeque<ApiResult<Bytes>>>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl FixtureTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a `get_json` outcome.
    pub fn push_get(&self, url: impl Into<String>, outcome: ApiResult<Value>) {
        self.push(Method::GET, url.into(), outcome);
    }

    /// Queue a `post_json` outcome.
    pub fn push_post(&self, url: impl Into<String>, outcome: ApiResult<Value>) {
        self.push(Method::POST, url.into(), outcome);
    }

    /// Queue a `download_to_file` outcome; the bytes are written to the path.
    pub fn push_download(&self, url: impl Into<String>, outcome: ApiResult<Bytes>) {
        self.downloads.lock().entry(url.into()).or_default().push_back(outcome);
    }

    pub fn with_get(self, url: impl Into<String>, value: Value) -> Self {
        self.push_get(url, Ok(value));
        self
    }

    pub fn with_post(self, url: impl Into<String>, value: Value) -> Self {
        self.push_post(url, Ok(value));
        self
    }

    pub fn with_download(self, url: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        self.push_download(url, Ok(bytes.into()));
        self
    }

    /// Every call so far, in order.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    /// Calls to `url` with `method`.
    pub fn call_count(&self, method: &Method, url: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.method == *method && c.url == url)
            .count()
    }

    fn push(&self, method: Method, url: String, outcome: ApiResult<Value>) {
        self.json.lock().entry((method, url)).or_default().push_back(outcome);
    }

    fn record(&self, method: Method, url: &str, body: Option<Value>) {
        self.calls.lock().push(RecordedCall {
            method,
            url: url.to_string(),
            body,
        });
    }

    fn next_json(&self, method: Method, url: &str) -> ApiResult<Value> {
        let mut json = self.json.lock();
        next(json.get_mut(&(method, url.to_string())), url)
    }
}

fn next<T: Clone>(queue: Option<&mut VecDeque<ApiResult<T>>>, url: &str) -> ApiResult<T> {
    let Some(queue) = queue else {
        return Err(not_found(url));
    };
    if queue.len() > 1 {
        queue.pop_front().unwrap_or_else(|| Err(not_found(url)))
    } else {
        queue.front().cloned().unwrap_or_else(|| Err(not_found(url)))
    }
}

fn not_found(url: &str) -> ApiError {
    ApiError::Http {
        status: 404,
        body: format!("no fixture for {url}"),
        retry_after: None,
    }
}

#[async_trait]
impl Transport for FixtureTransport {
    async fn get_json(&self, _headers: &HeaderList, url: &str) -> ApiResult<Value> {
        self.record(Method::GET, url, None);
        self.next_json(Method::GET, url)
    }

    async fn post_json(&self, _headers: &HeaderList, url: &str, body: &Value) -> ApiResult<Value> {
        self.record(Method::POST, url, Some(body.clone()));
        self.next_json(Method::POST, url)
    }

    async fn download_to_file(&self, url: &str, path: &Path) -> ApiResult<()> {
        self.record(Method::GET, url, None);
        let outcome = {
            let mut downloads = self.downloads.lock();
            next(downloads.get_mut(url), url)
        };
        let bytes = outcome?;
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ApiError::Network(format!("File write failed for {}: {e}", path.display())))?;
        }
        tokio::fs::write(path, &bytes)
            .await
            .map_err(|e| ApiError::Network(format!("File write failed for {}: {e}", path.display())))
    }
}
