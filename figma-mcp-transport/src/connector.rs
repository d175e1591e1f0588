//! Opening TLS connections.

use async_trait::async_trait;
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, RootCertStore};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use crate::error::TransportError;

/// Opens byte streams to an address, presenting `server_name` for TLS.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    async fn connect(&self, addr: SocketAddr, server_name: &str) -> Result<Self::Stream, TransportError>;
}

/// Client TLS settings trusting the Mozilla root set.
///
/// The ring provider is selected explicitly so the process-wide default
/// provider never has to be guessed.
pub fn client_tls_config() -> Result<Arc<ClientConfig>, TransportError> {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let config = ClientConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
        .with_safe_default_protocol_versions()
        .map_err(|e| TransportError::TlsConfig(e.to_string()))?
        .with_root_certificates(roots)
        .with_no_client_auth();

    Ok(Arc::new(config))
}

/// TCP + rustls connector.
#[derive(Clone)]
pub struct TlsConnector {
    tls: tokio_rustls::TlsConnector,
    connect_timeout: Duration,
}

impl TlsConnector {
    pub fn new(config: Arc<ClientConfig>, connect_timeout: Duration) -> Self {
        Self {
            tls: tokio_rustls::TlsConnector::from(config),
            connect_timeout,
        }
    }
}

#[async_trait]
impl Connector for TlsConnector {
    type Stream = tokio_rustls::client::TlsStream<TcpStream>;

    async fn connect(&self, addr: SocketAddr, server_name: &str) -> Result<Self::Stream, TransportError> {
        let tcp = tokio::time::timeout(self.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| TransportError::Connect {
                target: addr.to_string(),
                reason: format!("timed out after {:?}", self.connect_timeout),
            })?
            .map_err(|e| TransportError::Connect {
                target: addr.to_string(),
                reason: e.to_string(),
            })?;
        tcp.set_nodelay(true)?;

        let name = ServerName::try_from(server_name.to_string())
            .map_err(|e| TransportError::InvalidUrl(format!("invalid server name {server_name:?}: {e}")))?;

        self.tls
            .connect(name, tcp)
            .await
            .map_err(|e| TransportError::Tls {
                server_name: server_name.to_string(),
                reason: e.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tls_config_builds() {
        let config = client_tls_config().unwrap();
        assert!(config.alpn_protocols.is_empty());
    }

    #[tokio::test]
    async fn test_connect_refused_is_connect_error() {
        // Bind then drop to find a port nothing listens on.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let connector = TlsConnector::new(client_tls_config().unwrap(), Duration::from_secs(2));
        let err = connector.connect(addr, "localhost").await.unwrap_err();
        assert!(err.to_string().starts_with("Connection failed"), "{err}");
    }
}
