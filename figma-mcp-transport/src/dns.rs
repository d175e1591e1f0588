//! Hostname resolution with a DNS-over-HTTPS fallback.
//!
//! The platform resolver is always tried first. Only when it errors or
//! returns nothing does [`Resolver`] ask a public DoH server, reached by IP
//! address so the fallback does not itself depend on DNS. This keeps the
//! transport working in sandboxes with a broken `/etc/resolv.conf`.

use async_trait::async_trait;
use http::Method;
use serde::Deserialize;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tracing::{debug, warn};

use crate::connector::Connector;
use crate::error::TransportError;
use crate::framer;
use crate::response::{HeaderList, RawResponse};

/// Upper bound on a DoH answer.
const MAX_DOH_RESPONSE: usize = 64 * 1024;

/// A source of addresses for a hostname.
#[async_trait]
pub trait Lookup: Send + Sync {
    async fn lookup(&self, host: &str, port: u16) -> Result<Vec<SocketAddr>, TransportError>;
}

/// The platform resolver, via tokio's blocking-pool `getaddrinfo`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemLookup;

#[async_trait]
impl Lookup for SystemLookup {
    async fn lookup(&self, host: &str, port: u16) -> Result<Vec<SocketAddr>, TransportError> {
        tokio::net::lookup_host((host, port))
            .await
            .map(|addrs| addrs.collect())
            .map_err(|e| TransportError::Dns {
                host: host.to_string(),
                reason: e.to_string(),
            })
    }
}

#[derive(Debug, Deserialize)]
struct DohResponse {
    #[serde(rename = "Answer", default)]
    answer: Vec<DohAnswer>,
}

#[derive(Debug, Deserialize)]
struct DohAnswer {
    data: String,
}

/// JSON DNS-over-HTTPS lookup of `A` records.
pub struct DohLookup<C> {
    connector: Arc<C>,
    server: SocketAddr,
    server_name: String,
}

impl<C: Connector> DohLookup<C> {
    pub fn new(connector: Arc<C>, server: SocketAddr, server_name: impl Into<String>) -> Self {
        Self {
            connector,
            server,
            server_name: server_name.into(),
        }
    }

    /// The one-shot query sent for `host`.
    pub fn query(&self, host: &str) -> Vec<u8> {
        let name: String = url::form_urlencoded::byte_serialize(host.as_bytes()).collect();
        let target = format!("/dns-query?name={name}&type=A");
        let headers = HeaderList::new()
            .with("Accept", "application/dns-json")
            .with("Connection", "close");
        framer::encode_request(&Method::GET, &self.server_name, &target, &headers, None)
    }
}

#[async_trait]
impl<C: Connector> Lookup for DohLookup<C> {
    async fn lookup(&self, host: &str, port: u16) -> Result<Vec<SocketAddr>, TransportError> {
        let mut stream = self.connector.connect(self.server, &self.server_name).await?;
        stream.write_all(&self.query(host)).await?;
        stream.flush().await?;

        let response = read_reply(&mut stream).await?;
        if !response.is_success() {
            return Err(TransportError::Dns {
                host: host.to_string(),
                reason: format!("DNS-over-HTTPS server answered HTTP {}", response.status()),
            });
        }

        let parsed: DohResponse = serde_json::from_slice(response.body()).map_err(|e| TransportError::Dns {
            host: host.to_string(),
            reason: format!("unreadable DNS-over-HTTPS answer: {e}"),
        })?;

        // CNAME records carry names, not addresses; skip them.
        Ok(parsed
            .answer
            .iter()
            .filter_map(|a| a.data.trim().parse::<IpAddr>().ok())
            .map(|ip| SocketAddr::new(ip, port))
            .collect())
    }
}

/// Buffer the DoH reply until its own framing says it is complete or the
/// server hangs up, whichever comes first.
async fn read_reply<S>(stream: &mut S) -> Result<RawResponse, TransportError>
where
    S: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = match stream.read(&mut chunk).await {
            Ok(n) => n,
            // TLS peers may close without close_notify.
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => 0,
            Err(e) => return Err(e.into()),
        };
        if n == 0 {
            return framer::parse_complete_response(&buf, MAX_DOH_RESPONSE);
        }
        buf.extend_from_slice(&chunk[..n]);
        if buf.len() > MAX_DOH_RESPONSE {
            return Err(TransportError::BodyTooLarge {
                limit: MAX_DOH_RESPONSE,
            });
        }
        if let Some(response) = framer::parse_if_complete(&buf, MAX_DOH_RESPONSE)? {
            return Ok(response);
        }
    }
}

/// Platform resolver with an optional fallback.
pub struct Resolver {
    system: Arc<dyn Lookup>,
    fallback: Option<Arc<dyn Lookup>>,
}

impl Resolver {
    pub fn new(system: Arc<dyn Lookup>, fallback: Option<Arc<dyn Lookup>>) -> Self {
        Self { system, fallback }
    }

    /// Resolve `host` to one address. IP literals are returned as-is.
    pub async fn resolve(&self, host: &str, port: u16) -> Result<SocketAddr, TransportError> {
        let bare = host.trim_start_matches('[').trim_end_matches(']');
        if let Ok(ip) = bare.parse::<IpAddr>() {
            return Ok(SocketAddr::new(ip, port));
        }

        match self.system.lookup(host, port).await {
            Ok(addrs) if !addrs.is_empty() => return Ok(addrs[0]),
            Ok(_) => warn!(host, "system resolver returned no addresses; trying DNS-over-HTTPS"),
            Err(e) => warn!(host, error = %e, "system resolver failed; trying DNS-over-HTTPS"),
        }

        let Some(fallback) = &self.fallback else {
            return Err(TransportError::Dns {
                host: host.to_string(),
                reason: "system resolver returned no usable address".to_string(),
            });
        };

        let addrs = fallback.lookup(host, port).await.map_err(|e| match e {
            TransportError::Dns { .. } => e,
            other => TransportError::Dns {
                host: host.to_string(),
                reason: format!("DNS-over-HTTPS lookup failed: {other}"),
            },
        })?;

        let addr = addrs.first().copied().ok_or_else(|| TransportError::Dns {
            host: host.to_string(),
            reason: "DNS-over-HTTPS returned no A records".to_string(),
        })?;
        debug!(host, %addr, "resolved via DNS-over-HTTPS");
        Ok(addr)
    }
}
