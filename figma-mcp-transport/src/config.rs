//! Transport configuration.
//!
//! Read once at client construction and shared as `Arc<TransportConfig>`.

use std::net::SocketAddr;
use std::time::Duration;

use crate::error::ConfigError;

/// Default API origin.
pub const DEFAULT_API_BASE: &str = "https://api.figma.com";
/// Default request deadline.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
/// Default TCP connect timeout for the raw path.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Largest body the client will buffer.
pub const MAX_BODY_SIZE: usize = 100 * 1024 * 1024;
/// Pool capacity across all hosts.
pub const MAX_POOL_SIZE: usize = 4;
/// Idle lifetime of a pooled connection.
pub const POOL_TTL: Duration = Duration::from_secs(30);
/// In-place retries for transient platform errors.
pub const DEFAULT_PLATFORM_RETRIES: u32 = 3;
/// Pause between transient-error retries.
pub const DEFAULT_PLATFORM_RETRY_DELAY: Duration = Duration::from_millis(100);
/// Public DNS-over-HTTPS resolver, addressed by IP so it needs no resolution itself.
pub const DEFAULT_DOH_ADDR: SocketAddr =
    SocketAddr::new(std::net::IpAddr::V4(std::net::Ipv4Addr::new(1, 1, 1, 1)), 443);
/// TLS name and `Host` header for the DoH resolver.
pub const DEFAULT_DOH_HOST: &str = "cloudflare-dns.com";

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "FIGMA_";

/// Transport configuration.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Origin joined by [`crate::Client::api_url`].
    pub api_base: String,
    /// Deadline around each request, covering every attempt and fallback.
    pub timeout: Duration,
    /// TCP connect timeout on the raw path.
    pub connect_timeout: Duration,
    /// Maximum response body size in bytes.
    pub max_body_size: usize,
    /// Maximum idle pooled connections.
    pub pool_max_size: usize,
    /// Idle time after which a pooled connection is closed.
    pub pool_idle_ttl: Duration,
    /// Retries of the convenience path on transient platform errors.
    pub platform_retries: u32,
    /// Pause before each of those retries.
    pub platform_retry_delay: Duration,
    /// DNS-over-HTTPS resolver address.
    pub doh_addr: SocketAddr,
    /// DNS-over-HTTPS resolver TLS name.
    pub doh_host: String,
    /// User agent string.
    pub user_agent: String,
    /// Try the convenience HTTP client before the raw pooled path.
    pub use_convenience_path: bool,
    /// Headers added to every request.
    pub default_headers: Vec<(String, String)>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            timeout: DEFAULT_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            max_body_size: MAX_BODY_SIZE,
            pool_max_size: MAX_POOL_SIZE,
            pool_idle_ttl: POOL_TTL,
            platform_retries: DEFAULT_PLATFORM_RETRIES,
            platform_retry_delay: DEFAULT_PLATFORM_RETRY_DELAY,
            doh_addr: DEFAULT_DOH_ADDR,
            doh_host: DEFAULT_DOH_HOST.to_string(),
            user_agent: format!("figma-mcp/{}", env!("CARGO_PKG_VERSION")),
            use_convenience_path: true,
            default_headers: Vec::new(),
        }
    }
}

impl TransportConfig {
    /// Create a new configuration builder.
    pub fn builder() -> TransportConfigBuilder {
        TransportConfigBuilder::default()
    }

    /// Defaults overlaid with `FIGMA_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(std::env::vars())
    }

    /// Defaults overlaid with `FIGMA_*` pairs from `vars`.
    ///
    /// Unknown keys are ignored; known keys with unparsable values are errors.
    pub fn from_vars<I, K, V>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut config = Self::default();

        for (key, value) in vars {
            let Some(name) = key.as_ref().strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let value = value.as_ref().trim();
            let full_key = key.as_ref();

            match name {
                "API_BASE" => config.api_base = value.trim_end_matches('/').to_string(),
                "TIMEOUT_SECS" => config.timeout = parse_secs(full_key, value)?,
                "CONNECT_TIMEOUT_SECS" => config.connect_timeout = parse_secs(full_key, value)?,
                "MAX_BODY_BYTES" => config.max_body_size = parse_num(full_key, value)?,
                "POOL_SIZE" => config.pool_max_size = parse_num(full_key, value)?,
                "POOL_TTL_SECS" => config.pool_idle_ttl = parse_secs(full_key, value)?,
                "DOH_ADDR" => config.doh_addr = parse_num(full_key, value)?,
                "DOH_HOST" => config.doh_host = value.to_string(),
                "RAW_ONLY" => config.use_convenience_path = !parse_bool(full_key, value)?,
                _ => {}
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject values the transport cannot operate with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout.is_zero() {
            return Err(ConfigError::OutOfRange("timeout must be positive".into()));
        }
        if self.max_body_size == 0 {
            return Err(ConfigError::OutOfRange("max_body_size must be positive".into()));
        }
        if self.pool_max_size == 0 {
            return Err(ConfigError::OutOfRange("pool_max_size must be positive".into()));
        }
        if self.doh_host.is_empty() {
            return Err(ConfigError::OutOfRange("doh_host must not be empty".into()));
        }
        Ok(())
    }
}

fn invalid(key: &str, value: &str) -> ConfigError {
    ConfigError::Invalid {
        key: key.to_string(),
        value: value.to_string(),
    }
}

fn parse_num<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| invalid(key, value))
}

fn parse_secs(key: &str, value: &str) -> Result<Duration, ConfigError> {
    let secs: f64 = parse_num(key, value)?;
    Duration::try_from_secs_f64(secs).map_err(|_| invalid(key, value))
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(invalid(key, value)),
    }
}

/// Builder for transport configuration.
#[derive(Debug, Default)]
pub struct TransportConfigBuilder {
    config: TransportConfig,
}

impl TransportConfigBuilder {
    /// Set the API origin.
    pub fn api_base(mut self, url: impl Into<String>) -> Self {
        self.config.api_base = url.into();
        self
    }

    /// Set the request deadline.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Set the TCP connect timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Set the maximum body size.
    pub fn max_body_size(mut self, bytes: usize) -> Self {
        self.config.max_body_size = bytes;
        self
    }

    /// Set the pool capacity.
    pub fn pool_max_size(mut self, max: usize) -> Self {
        self.config.pool_max_size = max;
        self
    }

    /// Set the pooled connection idle TTL.
    pub fn pool_idle_ttl(mut self, ttl: Duration) -> Self {
        self.config.pool_idle_ttl = ttl;
        self
    }

    /// Set the transient-error retry count and pause.
    pub fn platform_retries(mut self, retries: u32, delay: Duration) -> Self {
        self.config.platform_retries = retries;
        self.config.platform_retry_delay = delay;
        self
    }

    /// Set the DNS-over-HTTPS resolver.
    pub fn doh(mut self, addr: SocketAddr, host: impl Into<String>) -> Self {
        self.config.doh_addr = addr;
        self.config.doh_host = host.into();
        self
    }

    /// Set the user agent string.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    /// Enable or disable the convenience HTTP path.
    pub fn use_convenience_path(mut self, enable: bool) -> Self {
        self.config.use_convenience_path = enable;
        self
    }

    /// Add a header sent with every request.
    pub fn default_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.default_headers.push((name.into(), value.into()));
        self
    }

    /// Build the configuration.
    pub fn build(self) -> TransportConfig {
        self.config
    }
}
