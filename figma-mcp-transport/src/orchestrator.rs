//! Deadline, in-place platform retry, and dual-path fallback.
//!
//! Each call first goes through the convenience path (reqwest). Two kinds of
//! failure are routed to the raw path instead of being surfaced:
//!
//! - a DNS failure, since the raw path resolves through DNS-over-HTTPS when
//!   the platform resolver is broken;
//! - an HTTP 400 carrying an HTML page, which means an intermediary answered
//!   and the request never reached the API.
//!
//! Known transient OS errors are retried on the same path after a short
//! sleep. The whole sequence runs under one deadline.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::{DEFAULT_PLATFORM_RETRIES, DEFAULT_PLATFORM_RETRY_DELAY, DEFAULT_TIMEOUT, TransportConfig};
use crate::error::TransportError;
use crate::pool::PoolStats;
use crate::request::OutboundRequest;
use crate::response::RawResponse;

/// One way of getting a request onto the wire.
#[async_trait]
pub trait HttpPath: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Perform one exchange.
    async fn execute(&self, request: &OutboundRequest) -> Result<RawResponse, TransportError>;

    /// Pool counters, if this path pools connections itself.
    fn pool_stats(&self) -> Option<PoolStats> {
        None
    }
}

/// Composes the code paths into a single call.
pub struct Orchestrator {
    primary: Option<Arc<dyn HttpPath>>,
    raw: Arc<dyn HttpPath>,
    timeout: Duration,
    platform_retries: u32,
    platform_retry_delay: Duration,
}

impl Orchestrator {
    /// Build with default deadline and retry settings.
    pub fn new(primary: Option<Arc<dyn HttpPath>>, raw: Arc<dyn HttpPath>) -> Self {
        Self {
            primary,
            raw,
            timeout: DEFAULT_TIMEOUT,
            platform_retries: DEFAULT_PLATFORM_RETRIES,
            platform_retry_delay: DEFAULT_PLATFORM_RETRY_DELAY,
        }
    }

    /// Build with deadline and retry settings taken from `config`.
    pub fn from_config(
        config: &TransportConfig,
        primary: Option<Arc<dyn HttpPath>>,
        raw: Arc<dyn HttpPath>,
    ) -> Self {
        Self::new(primary, raw)
            .with_timeout(config.timeout)
            .with_platform_retries(config.platform_retries, config.platform_retry_delay)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_platform_retries(mut self, retries: u32, delay: Duration) -> Self {
        self.platform_retries = retries;
        self.platform_retry_delay = delay;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// The raw path.
    pub fn raw(&self) -> &Arc<dyn HttpPath> {
        &self.raw
    }

    /// Send under the default deadline.
    pub async fn request(&self, request: &OutboundRequest) -> Result<RawResponse, TransportError> {
        self.request_with_timeout(request, self.timeout).await
    }

    /// Send under an explicit deadline.
    ///
    /// When the deadline fires, the in-flight exchange is dropped along with
    /// its connection, so a half-read socket never returns to the pool.
    pub async fn request_with_timeout(
        &self,
        request: &OutboundRequest,
        timeout: Duration,
    ) -> Result<RawResponse, TransportError> {
        match tokio::time::timeout(timeout, self.dispatch(request)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(method = %request.method, url = %request.url, ?timeout, "request deadline exceeded");
                Err(TransportError::Timeout)
            }
        }
    }

    async fn dispatch(&self, request: &OutboundRequest) -> Result<RawResponse, TransportError> {
        let Some(primary) = &self.primary else {
            return self.execute_with_platform_retry(self.raw.as_ref(), request).await;
        };

        match self.execute_with_platform_retry(primary.as_ref(), request).await {
            Err(e) if e.is_dns() => {
                warn!(path = primary.name(), url = %request.url, error = %e, "DNS failure; falling back to raw path");
                self.execute_with_platform_retry(self.raw.as_ref(), request).await
            }
            Ok(response) if is_misrouted(&response) => {
                warn!(path = primary.name(), url = %request.url, "HTML error page on 400; falling back to raw path");
                self.execute_with_platform_retry(self.raw.as_ref(), request).await
            }
            other => other,
        }
    }

    async fn execute_with_platform_retry(
        &self,
        path: &dyn HttpPath,
        request: &OutboundRequest,
    ) -> Result<RawResponse, TransportError> {
        let mut retries = 0;
        loop {
            match path.execute(request).await {
                Err(e) if e.is_transient_platform() && retries < self.platform_retries => {
                    retries += 1;
                    debug!(
                        path = path.name(),
                        retry = retries,
                        error = %e,
                        "transient platform error; retrying"
                    );
                    tokio::time::sleep(self.platform_retry_delay).await;
                }
                other => return other,
            }
        }
    }
}

/// A 400 whose body is an HTML page did not come from the JSON API.
pub fn is_misrouted(response: &RawResponse) -> bool {
    response.status() == 400 && response.looks_like_html()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::response::HeaderList;
    use bytes::Bytes;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::io;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Path double replaying scripted outcomes; the last one repeats.
    pub(crate) struct ScriptedPath {
        name: &'static str,
        script: Mutex<VecDeque<Result<RawResponse, TransportError>>>,
        delay: Option<Duration>,
        calls: AtomicUsize,
    }

    impl ScriptedPath {
        pub(crate) fn new(name: &'static str) -> Self {
            Self {
                name,
                script: Mutex::new(VecDeque::new()),
                delay: None,
                calls: AtomicUsize::new(0),
            }
        }

        pub(crate) fn then(self, outcome: Result<RawResponse, TransportError>) -> Self {
            self.script.lock().push_back(outcome);
            self
        }

        pub(crate) fn delayed(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }

        pub(crate) fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    fn replay(outcome: &Result<RawResponse, TransportError>) -> Result<RawResponse, TransportError> {
        match outcome {
            Ok(response) => Ok(response.clone()),
            Err(TransportError::Io(e)) => Err(TransportError::Io(match e.raw_os_error() {
                Some(code) => io::Error::from_raw_os_error(code),
                None => io::Error::new(e.kind(), e.to_string()),
            })),
            Err(TransportError::Dns { host, reason }) => Err(TransportError::Dns {
                host: host.clone(),
                reason: reason.clone(),
            }),
            Err(TransportError::Timeout) => Err(TransportError::Timeout),
            Err(other) => Err(TransportError::Http(other.to_string())),
        }
    }

    #[async_trait]
    impl HttpPath for ScriptedPath {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn execute(&self, _request: &OutboundRequest) -> Result<RawResponse, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let mut script = self.script.lock();
            let outcome = if script.len() > 1 {
                script.pop_front()
            } else {
                script.front().map(replay)
            };
            outcome.unwrap_or_else(|| Err(TransportError::Http("script exhausted".into())))
        }
    }

    pub(crate) fn ok(body: &'static str) -> Result<RawResponse, TransportError> {
        Ok(RawResponse::new(200, HeaderList::new(), Bytes::from_static(body.as_bytes()), false))
    }

    fn html_400() -> Result<RawResponse, TransportError> {
        Ok(RawResponse::new(
            400,
            HeaderList::new().with("Content-Type", "text/html; charset=utf-8"),
            Bytes::from_static(b"<html><body>Bad Request</body></html>"),
            true,
        ))
    }

    fn eintr() -> Result<RawResponse, TransportError> {
        Err(TransportError::Io(io::Error::from_raw_os_error(4)))
    }

    fn dns() -> Result<RawResponse, TransportError> {
        Err(TransportError::Dns {
            host: "api.figma.com".into(),
            reason: "failed to lookup address information".into(),
        })
    }

    fn request() -> OutboundRequest {
        OutboundRequest::get("https://api.figma.com/v1/files/ABC")
    }

    fn orchestrator(primary: &Arc<ScriptedPath>, raw: &Arc<ScriptedPath>) -> Orchestrator {
        Orchestrator::new(Some(primary.clone() as Arc<dyn HttpPath>), raw.clone() as Arc<dyn HttpPath>)
    }

    #[tokio::test]
    async fn test_primary_success_skips_raw() {
        let primary = Arc::new(ScriptedPath::new("primary").then(ok("{}")));
        let raw = Arc::new(ScriptedPath::new("raw").then(ok("raw")));

        let response = orchestrator(&primary, &raw).request(&request()).await.unwrap();
        assert_eq!(response.body().as_ref(), b"{}");
        assert_eq!(raw.calls(), 0);
    }

    #[tokio::test]
    async fn test_dns_failure_falls_back_to_raw() {
        let primary = Arc::new(ScriptedPath::new("primary").then(dns()));
        let raw = Arc::new(ScriptedPath::new("raw").then(ok("raw")));

        let response = orchestrator(&primary, &raw).request(&request()).await.unwrap();
        assert_eq!(response.body().as_ref(), b"raw");
        assert_eq!(primary.calls(), 1);
        assert_eq!(raw.calls(), 1);
    }

    #[tokio::test]
    async fn test_html_400_falls_back_to_raw() {
        let primary = Arc::new(ScriptedPath::new("primary").then(html_400()));
        let raw = Arc::new(ScriptedPath::new("raw").then(ok("raw")));

        let response = orchestrator(&primary, &raw).request(&request()).await.unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(raw.calls(), 1);
    }

    #[tokio::test]
    async fn test_json_400_is_returned_as_is() {
        let json_400 = Ok(RawResponse::new(
            400,
            HeaderList::new().with("Content-Type", "application/json"),
            Bytes::from_static(b"{\"err\":\"Invalid node id\"}"),
            false,
        ));
        let primary = Arc::new(ScriptedPath::new("primary").then(json_400));
        let raw = Arc::new(ScriptedPath::new("raw").then(ok("raw")));

        let response = orchestrator(&primary, &raw).request(&request()).await.unwrap();
        assert_eq!(response.status(), 400);
        assert_eq!(raw.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_error_retried_in_place() {
        let primary = Arc::new(ScriptedPath::new("primary").then(eintr()).then(eintr()).then(ok("{}")));
        let raw = Arc::new(ScriptedPath::new("raw").then(ok("raw")));

        let started = tokio::time::Instant::now();
        let response = orchestrator(&primary, &raw).request(&request()).await.unwrap();
        assert_eq!(response.body().as_ref(), b"{}");
        assert_eq!(primary.calls(), 3);
        assert_eq!(raw.calls(), 0);
        assert_eq!(started.elapsed(), Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_retries_are_bounded() {
        let primary = Arc::new(ScriptedPath::new("primary").then(eintr()));
        let raw = Arc::new(ScriptedPath::new("raw").then(ok("raw")));

        let err = orchestrator(&primary, &raw).request(&request()).await.unwrap_err();
        assert!(err.is_transient_platform());
        // One call plus three retries.
        assert_eq!(primary.calls(), 4);
        assert_eq!(raw.calls(), 0);
    }

    #[tokio::test]
    async fn test_other_errors_are_not_retried() {
        let refused = Err(TransportError::Io(io::Error::from(io::ErrorKind::ConnectionRefused)));
        let primary = Arc::new(ScriptedPath::new("primary").then(refused));
        let raw = Arc::new(ScriptedPath::new("raw").then(ok("raw")));

        assert!(orchestrator(&primary, &raw).request(&request()).await.is_err());
        assert_eq!(primary.calls(), 1);
        assert_eq!(raw.calls(), 0);
    }

    #[tokio::test]
    async fn test_raw_only_when_no_primary() {
        let raw = Arc::new(ScriptedPath::new("raw").then(ok("raw")));
        let orchestrator = Orchestrator::new(None, raw.clone());

        orchestrator.request(&request()).await.unwrap();
        assert_eq!(raw.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_covers_fallback() {
        let primary = Arc::new(ScriptedPath::new("primary").then(dns()));
        let raw = Arc::new(ScriptedPath::new("raw").then(ok("raw")).delayed(Duration::from_secs(5)));

        let err = orchestrator(&primary, &raw)
            .with_timeout(Duration::from_secs(1))
            .request(&request())
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Timeout));
    }

    #[test]
    fn test_is_misrouted() {
        assert!(is_misrouted(html_400().as_ref().unwrap()));
        assert!(!is_misrouted(ok("<html></html>").as_ref().unwrap()));
    }
}
