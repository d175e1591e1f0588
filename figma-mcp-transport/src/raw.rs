//! The raw path: pooled TLS connections speaking hand-framed HTTP/1.1.

use async_trait::async_trait;
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace};
use url::Url;

use crate::connector::Connector;
use crate::dns::Resolver;
use crate::error::TransportError;
use crate::framer;
use crate::orchestrator::HttpPath;
use crate::pool::{ConnectionPool, PoolStats, PooledConnection};
use crate::request::OutboundRequest;
use crate::response::RawResponse;

/// Where a request goes, derived from its URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    /// Hostname, bracketed if IPv6.
    pub host: String,
    pub port: u16,
    /// `Host` header value; the port is omitted when it is 443.
    pub authority: String,
    /// Request target: path plus query.
    pub path: String,
}

impl Target {
    /// Parse an `https` URL.
    pub fn parse(url: &str) -> Result<Self, TransportError> {
        let parsed = Url::parse(url).map_err(|e| TransportError::InvalidUrl(format!("{url}: {e}")))?;
        if parsed.scheme() != "https" {
            return Err(TransportError::InvalidUrl(format!(
                "{url}: only https is supported, got {}",
                parsed.scheme()
            )));
        }
        let host = parsed
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| TransportError::InvalidUrl(format!("{url}: missing host")))?
            .to_string();
        let port = parsed.port_or_known_default().unwrap_or(443);
        let authority = if port == 443 {
            host.clone()
        } else {
            format!("{host}:{port}")
        };
        let path = match parsed.query() {
            Some(query) => format!("{}?{query}", parsed.path()),
            None => parsed.path().to_string(),
        };

        Ok(Self {
            host,
            port,
            authority,
            path,
        })
    }

    /// Pool key.
    pub fn key(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Name presented for SNI and certificate checks.
    pub fn server_name(&self) -> &str {
        self.host.trim_start_matches('[').trim_end_matches(']')
    }
}

/// HTTP/1.1 over connections from a [`ConnectionPool`].
pub struct RawClient<C: Connector> {
    connector: Arc<C>,
    resolver: Arc<Resolver>,
    pool: ConnectionPool<C::Stream>,
    max_body_size: usize,
}

impl<C: Connector> RawClient<C> {
    pub fn new(
        connector: Arc<C>,
        resolver: Arc<Resolver>,
        pool: ConnectionPool<C::Stream>,
        max_body_size: usize,
    ) -> Self {
        Self {
            connector,
            resolver,
            pool,
            max_body_size,
        }
    }

    pub fn pool(&self) -> &ConnectionPool<C::Stream> {
        &self.pool
    }

    /// Send one request.
    ///
    /// A pooled connection that turns out to have been closed by the server
    /// while idle is replaced once by a fresh connection.
    pub async fn send(&self, request: &OutboundRequest) -> Result<RawResponse, TransportError> {
        let target = Target::parse(&request.url)?;
        let wire = framer::encode_request(
            &request.method,
            &target.authority,
            &target.path,
            &request.headers,
            request.body.as_deref(),
        );
        let key = target.key();

        if let Some(conn) = self.pool.take(&key) {
            match self.exchange(&key, conn, &wire).await {
                Err(e) if e.is_stale_connection() => {
                    debug!(key, "pooled connection was closed while idle; reconnecting");
                }
                other => return other,
            }
        }

        let conn = self.open(&target).await?;
        self.exchange(&key, conn, &wire).await
    }

    async fn open(&self, target: &Target) -> Result<PooledConnection<C::Stream>, TransportError> {
        let addr = self.resolver.resolve(&target.host, target.port).await?;
        let stream = self.connector.connect(addr, target.server_name()).await?;
        self.pool.record_opened();
        debug!(key = %target.key(), %addr, "opened connection");
        Ok(PooledConnection::new(stream, self.pool.now()))
    }

    /// Run one exchange, then check the connection back in or close it.
    ///
    /// If the future is dropped mid-exchange the connection is closed and
    /// counted in [`PoolStats::closed`].
    async fn exchange(
        &self,
        key: &str,
        conn: PooledConnection<C::Stream>,
        wire: &[u8],
    ) -> Result<RawResponse, TransportError> {
        let mut checked_out = CheckedOut {
            pool: &self.pool,
            conn: Some(conn),
        };
        let result = match checked_out.conn.as_mut() {
            Some(conn) => round_trip(conn, wire, self.max_body_size).await,
            None => Err(TransportError::ConnectionClosed),
        };
        match (&result, checked_out.release()) {
            (Ok(response), Some(conn)) if !response.should_close() && !conn.has_unread_data() => {
                trace!(key, status = response.status(), "returning connection to pool");
                self.pool.put(key, conn);
            }
            (_, Some(conn)) => self.pool.discard(conn),
            (_, None) => {}
        }
        result
    }
}

/// A connection taken out of the pool for one exchange. Discarded on drop
/// unless released first.
struct CheckedOut<'a, S: AsyncRead + AsyncWrite + Unpin> {
    pool: &'a ConnectionPool<S>,
    conn: Option<PooledConnection<S>>,
}

impl<S: AsyncRead + AsyncWrite + Unpin> CheckedOut<'_, S> {
    fn release(mut self) -> Option<PooledConnection<S>> {
        self.conn.take()
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> Drop for CheckedOut<'_, S> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            debug!("closing connection abandoned mid-exchange");
            self.pool.discard(conn);
        }
    }
}

async fn round_trip<S>(
    conn: &mut PooledConnection<S>,
    wire: &[u8],
    max_body: usize,
) -> Result<RawResponse, TransportError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let stream = conn.stream_mut();
    stream.write_all(wire).await.map_err(write_error)?;
    stream.flush().await.map_err(write_error)?;
    framer::read_response(stream, max_body).await
}

/// Writes into a socket the server already closed surface as a stale connection.
fn write_error(err: io::Error) -> TransportError {
    match err.kind() {
        io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted => {
            TransportError::ConnectionClosed
        }
        _ => TransportError::Io(err),
    }
}

#[async_trait]
impl<C: Connector> HttpPath for RawClient<C> {
    fn name(&self) -> &'static str {
        "raw"
    }

    async fn execute(&self, request: &OutboundRequest) -> Result<RawResponse, TransportError> {
        self.send(request).await
    }

    fn pool_stats(&self) -> Option<PoolStats> {
        Some(self.pool.stats())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::Lookup;
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, DuplexStream, duplex};

    struct StaticLookup;

    #[async_trait]
    impl Lookup for StaticLookup {
        async fn lookup(&self, _host: &str, port: u16) -> Result<Vec<SocketAddr>, TransportError> {
            Ok(vec![SocketAddr::from(([10, 0, 0, 1], port))])
        }
    }

    /// Each connection serves the given replies in order, one per request, then closes.
    struct ReplyConnector {
        replies: Vec<&'static str>,
        opened: AtomicUsize,
    }

    async fn read_request(server: &mut DuplexStream) -> Option<String> {
        let mut request = Vec::new();
        let mut buf = [0u8; 512];
        while !request.ends_with(b"\r\n\r\n") {
            let n = server.read(&mut buf).await.ok()?;
            if n == 0 {
                return None;
            }
            request.extend_from_slice(&buf[..n]);
        }
        String::from_utf8(request).ok()
    }

    #[async_trait]
    impl Connector for ReplyConnector {
        type Stream = DuplexStream;

        async fn connect(&self, _addr: SocketAddr, server_name: &str) -> Result<DuplexStream, TransportError> {
            assert_eq!(server_name, "api.figma.com");
            self.opened.fetch_add(1, Ordering::SeqCst);
            let (client, mut server) = duplex(8192);
            let replies = self.replies.clone();
            tokio::spawn(async move {
                for reply in replies {
                    if read_request(&mut server).await.is_none() {
                        return;
                    }
                    if server.write_all(reply.as_bytes()).await.is_err() {
                        return;
                    }
                }
            });
            Ok(client)
        }
    }

    /// Reads requests and never answers.
    struct SilentConnector;

    #[async_trait]
    impl Connector for SilentConnector {
        type Stream = DuplexStream;

        async fn connect(&self, _addr: SocketAddr, _server_name: &str) -> Result<DuplexStream, TransportError> {
            let (client, mut server) = duplex(8192);
            tokio::spawn(async move {
                let mut buf = [0u8; 512];
                while let Ok(n) = server.read(&mut buf).await {
                    if n == 0 {
                        return;
                    }
                }
            });
            Ok(client)
        }
    }

    fn client(replies: Vec<&'static str>) -> RawClient<ReplyConnector> {
        RawClient::new(
            Arc::new(ReplyConnector {
                replies,
                opened: AtomicUsize::new(0),
            }),
            Arc::new(Resolver::new(Arc::new(StaticLookup), None)),
            ConnectionPool::new(4, Duration::from_secs(30)),
            1024 * 1024,
        )
    }

    const OK: &str = "HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\n{}";

    #[test]
    fn test_target_parse() {
        let t = Target::parse("https://api.figma.com/v1/files/ABC?depth=2").unwrap();
        assert_eq!(t.authority, "api.figma.com");
        assert_eq!(t.path, "/v1/files/ABC?depth=2");
        assert_eq!(t.key(), "api.figma.com:443");

        let t = Target::parse("https://localhost:8443").unwrap();
        assert_eq!(t.authority, "localhost:8443");
        assert_eq!(t.path, "/");

        let t = Target::parse("https://[::1]:8443/x").unwrap();
        assert_eq!(t.server_name(), "::1");
        assert_eq!(t.key(), "[::1]:8443");
    }

    #[test]
    fn test_target_rejects_plain_http() {
        let err = Target::parse("http://api.figma.com/v1/me").unwrap_err();
        assert!(matches!(err, TransportError::InvalidUrl(_)));
        assert!(Target::parse("not a url").is_err());
    }

    #[tokio::test]
    async fn test_keep_alive_connection_is_reused() {
        let raw = client(vec![OK, OK, OK]);
        for _ in 0..3 {
            let response = raw.send(&OutboundRequest::get("https://api.figma.com/v1/me")).await.unwrap();
            assert_eq!(response.body().as_ref(), b"{}");
        }
        let stats = raw.pool_stats().unwrap();
        assert_eq!(stats.opened, 1);
        assert_eq!(stats.reused, 2);
        assert_eq!(stats.idle, 1);
    }

    #[tokio::test]
    async fn test_connection_close_is_not_pooled() {
        let close = "HTTP/1.1 200 OK\r\nConnection: close\r\nContent-Length: 2\r\n\r\n{}";
        let raw = client(vec![close]);
        raw.send(&OutboundRequest::get("https://api.figma.com/v1/me")).await.unwrap();
        assert!(raw.pool().is_empty());
        assert_eq!(raw.pool_stats().unwrap().closed, 1);
    }

    #[tokio::test]
    async fn test_stale_pooled_connection_is_replaced_once() {
        // The server side answers once and then hangs up.
        let raw = client(vec![OK]);
        raw.send(&OutboundRequest::get("https://api.figma.com/v1/me")).await.unwrap();
        assert_eq!(raw.pool().len(), 1);
        tokio::task::yield_now().await;

        let response = raw.send(&OutboundRequest::get("https://api.figma.com/v1/me")).await.unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(raw.pool_stats().unwrap().opened, 2);
    }

    #[tokio::test]
    async fn test_fresh_connection_closed_is_an_error() {
        let raw = client(vec![]);
        let err = raw.send(&OutboundRequest::get("https://api.figma.com/v1/me")).await.unwrap_err();
        assert!(matches!(err, TransportError::ConnectionClosed));
        assert!(raw.pool().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_exchange_counts_closed_connection() {
        let raw = RawClient::new(
            Arc::new(SilentConnector),
            Arc::new(Resolver::new(Arc::new(StaticLookup), None)),
            ConnectionPool::new(4, Duration::from_secs(30)),
            1024 * 1024,
        );

        let request = OutboundRequest::get("https://api.figma.com/v1/me");
        let result = tokio::time::timeout(Duration::from_secs(1), raw.send(&request)).await;
        assert!(result.is_err());

        let stats = raw.pool_stats().unwrap();
        assert_eq!(stats.opened, 1);
        assert_eq!(stats.closed, 1);
        assert_eq!(stats.idle, 0);
    }

    #[tokio::test]
    async fn test_malformed_response_discards_connection() {
        let raw = client(vec!["SMTP ready\r\n\r\n"]);
        let err = raw.send(&OutboundRequest::get("https://api.figma.com/v1/me")).await.unwrap_err();
        assert!(matches!(err, TransportError::Malformed(_)));
        assert!(raw.pool().is_empty());
        assert_eq!(raw.pool_stats().unwrap().closed, 1);
    }
}
