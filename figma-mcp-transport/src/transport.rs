//! The capability callers depend on.

use async_trait::async_trait;
use serde_json::Value;
use std::path::Path;

use crate::client::Client;
use crate::error::ApiResult;
use crate::response::HeaderList;

/// Fetching JSON and files from the design API.
///
/// Tool handlers and the cache layer take `&dyn Transport` so tests can swap
/// in [`FixtureTransport`](crate::testing::FixtureTransport).
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get_json(&self, headers: &HeaderList, url: &str) -> ApiResult<Value>;

    async fn post_json(&self, headers: &HeaderList, url: &str, body: &Value) -> ApiResult<Value>;

    async fn download_to_file(&self, url: &str, path: &Path) -> ApiResult<()>;
}

#[async_trait]
impl Transport for Client {
    async fn get_json(&self, headers: &HeaderList, url: &str) -> ApiResult<Value> {
        Client::get_json(self, headers, url).await
    }

    async fn post_json(&self, headers: &HeaderList, url: &str, body: &Value) -> ApiResult<Value> {
        Client::post_json(self, headers, url, body).await
    }

    async fn download_to_file(&self, url: &str, path: &Path) -> ApiResult<()> {
        Client::download_to_file(self, url, path).await
    }
}
