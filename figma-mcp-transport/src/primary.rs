//! The convenience path, built on `reqwest`.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use std::error::Error as StdError;
use std::io;
use tracing::trace;

use crate::config::TransportConfig;
use crate::error::{TransportError, is_transient_os_error};
use crate::orchestrator::HttpPath;
use crate::request::OutboundRequest;
use crate::response::{HeaderList, RawResponse};

/// Phrases resolver failures show up as in `reqwest`/`hyper` error chains.
const DNS_PHRASES: &[&str] = &[
    "dns error",
    "failed to lookup address",
    "name or service not known",
    "nodename nor servname",
    "no such host",
    "temporary failure in name resolution",
];

/// `reqwest` with its own connection pool.
///
/// No request timeout is configured here; the orchestrator owns the deadline.
#[derive(Clone)]
pub struct ReqwestPath {
    client: reqwest::Client,
    max_body_size: usize,
}

impl ReqwestPath {
    pub fn new(config: &TransportConfig) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .use_rustls_tls()
            .connect_timeout(config.connect_timeout)
            .pool_idle_timeout(config.pool_idle_ttl)
            .pool_max_idle_per_host(config.pool_max_size)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| TransportError::Http(error_chain(&e)))?;

        Ok(Self::from_client(client, config.max_body_size))
    }

    /// Wrap an existing client.
    pub fn from_client(client: reqwest::Client, max_body_size: usize) -> Self {
        Self { client, max_body_size }
    }
}

#[async_trait]
impl HttpPath for ReqwestPath {
    fn name(&self) -> &'static str {
        "reqwest"
    }

    async fn execute(&self, request: &OutboundRequest) -> Result<RawResponse, TransportError> {
        let mut builder = self.client.request(request.method.clone(), &request.url);
        for (name, value) in request.headers.iter() {
            builder = builder.header(name, value);
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let mut response = builder.send().await.map_err(map_reqwest_error)?;
        let status = response.status().as_u16();
        let headers: HeaderList = response
            .headers()
            .iter()
            .map(|(name, value)| (name.as_str(), String::from_utf8_lossy(value.as_bytes()).into_owned()))
            .collect();

        let limit = self.max_body_size;
        if response.content_length().is_some_and(|len| len > limit as u64) {
            return Err(TransportError::BodyTooLarge { limit });
        }

        let mut body = BytesMut::new();
        while let Some(chunk) = response.chunk().await.map_err(map_reqwest_error)? {
            if body.len() + chunk.len() > limit {
                return Err(TransportError::BodyTooLarge { limit });
            }
            body.extend_from_slice(&chunk);
        }
        trace!(status, bytes = body.len(), url = %request.url, "reqwest response");

        // reqwest manages its own connections.
        Ok(RawResponse::new(status, headers, Bytes::from(body), false))
    }
}

/// Translate a `reqwest` error into the transport taxonomy.
pub fn map_reqwest_error(err: reqwest::Error) -> TransportError {
    let chain = error_chain(&err);
    let host = err
        .url()
        .and_then(|u| u.host_str())
        .unwrap_or_default()
        .to_string();

    if let Some(io_err) = find_io_error(&err)
        && is_transient_os_error(io_err)
    {
        return TransportError::Io(match io_err.raw_os_error() {
            Some(code) => io::Error::from_raw_os_error(code),
            None => io::Error::new(io_err.kind(), io_err.to_string()),
        });
    }

    if looks_like_dns(&chain) {
        return TransportError::Dns { host, reason: chain };
    }
    if err.is_connect() {
        return TransportError::Connect { target: host, reason: chain };
    }
    if err.is_timeout() {
        return TransportError::Timeout;
    }
    TransportError::Http(chain)
}

fn looks_like_dns(chain: &str) -> bool {
    let lower = chain.to_ascii_lowercase();
    DNS_PHRASES.iter().any(|p| lower.contains(p))
}

fn find_io_error<'a>(err: &'a (dyn StdError + 'static)) -> Option<&'a io::Error> {
    let mut source = err.source();
    while let Some(e) = source {
        if let Some(io_err) = e.downcast_ref::<io::Error>() {
            return Some(io_err);
        }
        source = e.source();
    }
    None
}

/// `outer: inner: innermost`.
fn error_chain(err: &(dyn StdError + 'static)) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(e) = source {
        let text = e.to_string();
        if !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = e.source();
    }
    message
}
