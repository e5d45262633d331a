use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;

/// Default User-Agent sent by [`HyperTransport`](crate::HyperTransport)
pub const DEFAULT_USER_AGENT: &str = concat!("modkit-dispatch/", env!("CARGO_PKG_VERSION"));

/// Default maximum number of retries after the initial attempt (3 attempts total)
pub const DEFAULT_MAX_RETRIES: u32 = 2;

/// Statuses that never trigger the default retry heuristic
pub const DEFAULT_NO_RETRY_STATUSES: [u16; 3] = [400, 401, 500];

/// Key under which default headers are persisted in the header store
pub const DEFAULT_HEADERS_KEY: &str = "default-headers";

/// Phrases that identify an expired session in an error message
pub const DEFAULT_SESSION_EXPIRED_MESSAGES: [&str; 5] = [
    "Session expired",
    "Invalid token",
    "Token expired",
    "Invalid session",
    "Unauthenticated",
];

/// Default retry heuristic.
///
/// A failed attempt is retried immediately (no backoff) when the server
/// answered, its status is not in `no_retry_statuses`, and fewer than
/// `max_retries` retries have been made. A controller can still force a retry
/// for any failure through
/// [`RequestController::should_retry_request`](crate::RequestController::should_retry_request).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Maximum number of retries after the initial attempt (default: 2)
    pub max_retries: u32,

    /// Statuses never retried by default (default: 400, 401, 500)
    pub no_retry_statuses: BTreeSet<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            no_retry_statuses: BTreeSet::from(DEFAULT_NO_RETRY_STATUSES),
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries by default
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Whether a response with `status` is eligible for the default retry
    #[must_use]
    pub fn allows_status(&self, status: http::StatusCode) -> bool {
        !self.no_retry_statuses.contains(&status.as_u16())
    }
}

/// Dispatcher configuration
///
/// Deserializable so a host can embed it in its own configuration file;
/// every field falls back to its default when omitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Base URL that request paths are resolved against.
    ///
    /// May be empty, in which case every request path must be an absolute URL.
    pub base_url: String,

    /// Retry policy
    pub retry: RetryPolicy,

    /// Phrases that mark an error as a session expiry (exact line match)
    pub session_expired_messages: Vec<String>,

    /// Header store key for the persisted default headers
    pub default_headers_key: String,

    /// Ask the transport to include credentials (default: true)
    pub with_credentials: bool,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            retry: RetryPolicy::default(),
            session_expired_messages: DEFAULT_SESSION_EXPIRED_MESSAGES
                .iter()
                .map(|s| (*s).to_owned())
                .collect(),
            default_headers_key: DEFAULT_HEADERS_KEY.to_owned(),
            with_credentials: true,
        }
    }
}

impl DispatcherConfig {
    /// Default configuration with the given base URL
    #[must_use]
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }
}

/// TLS root certificate strategy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[non_exhaustive]
pub enum TlsRootConfig {
    /// Use Mozilla's root certificates (webpki-roots, no OS dependency)
    #[default]
    WebPki,
    /// Use OS native root certificate store
    Native,
}

/// Transport security configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[non_exhaustive]
pub enum TransportSecurity {
    /// Require TLS for all connections (HTTPS only)
    #[default]
    TlsOnly,
    /// Allow plain HTTP connections (mock servers in tests only)
    AllowInsecureHttp,
}

/// Configuration of the default hyper-based transport
#[derive(Debug, Clone)]
pub struct HyperTransportConfig {
    /// Timeout of a single attempt (default: 30 seconds)
    pub request_timeout: Duration,

    /// Maximum decompressed response body size (default: 10 MiB)
    pub max_body_size: usize,

    /// User-Agent added when the request carries none
    pub user_agent: String,

    /// TLS root certificate strategy (default: `WebPki`)
    pub tls_roots: TlsRootConfig,

    /// Transport security mode (default: `TlsOnly`)
    pub transport: TransportSecurity,

    /// Requests queued for the shared service before callers wait (default: 1024)
    pub buffer_capacity: usize,

    /// Idle pooled connections are closed after this long (default: 90 seconds)
    pub pool_idle_timeout: Option<Duration>,

    /// Idle connections kept per host (default: 32)
    pub pool_max_idle_per_host: usize,
}

impl Default for HyperTransportConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            max_body_size: 10 * 1024 * 1024,
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            tls_roots: TlsRootConfig::default(),
            transport: TransportSecurity::TlsOnly,
            buffer_capacity: 1024,
            pool_idle_timeout: Some(Duration::from_secs(90)),
            pool_max_idle_per_host: 32,
        }
    }
}

impl HyperTransportConfig {
    /// Small footprint: short timeout, small pool
    #[must_use]
    pub fn minimal() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            max_body_size: 1024 * 1024,
            buffer_capacity: 256,
            pool_idle_timeout: Some(Duration::from_secs(30)),
            pool_max_idle_per_host: 8,
            ..Default::default()
        }
    }
}
