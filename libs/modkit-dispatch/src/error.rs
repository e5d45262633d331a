use crate::response::ApiResponse;
use std::time::Duration;
use thiserror::Error;

/// Boxed error used by pluggable collaborators (cache, transport internals).
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Failure of a single transport attempt.
///
/// A failure either carries the server's response (non-2xx status) or is a
/// pure transport-level failure with no response at all. Use
/// [`TransportError::response`] to tell them apart.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum TransportError {
    /// Server answered with a non-2xx status
    #[error("request failed with status code {}", .0.status.as_u16())]
    Response(Box<ApiResponse>),

    /// Network or connection failure (no response received)
    #[error("network error: {0}")]
    Network(#[source] BoxError),

    /// Single attempt timed out
    #[error("request attempt timed out after {0:?}")]
    Timeout(Duration),

    /// Response body exceeded the configured size limit
    #[error("response body too large: limit {limit} bytes")]
    BodyTooLarge { limit: usize },

    /// Request could not be turned into a wire request (bad URL, bad header)
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Attempt was cancelled through its cancellation token
    #[error("request cancelled")]
    Cancelled,
}

impl TransportError {
    /// Response attached to the failure, if the server answered at all.
    #[must_use]
    pub fn response(&self) -> Option<&ApiResponse> {
        match self {
            TransportError::Response(response) => Some(response),
            _ => None,
        }
    }

    /// HTTP status of the attached response.
    #[must_use]
    pub fn status(&self) -> Option<http::StatusCode> {
        self.response().map(|r| r.status)
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, TransportError::Cancelled)
    }
}

/// Error surfaced to callers of the dispatcher.
///
/// Every waiter of a deduplicated request observes the same value, so this
/// type is `Clone` and carries only owned, displayable data.
///
/// `SessionExpired` displays the raw session-expiry phrase, unformatted; all
/// other variants are formatted with the request label.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum DispatchError {
    /// Server answered with an error; `message` is extracted from the body
    #[error("'{label}' failed with message \"{message}\"")]
    Failed {
        label: String,
        status: http::StatusCode,
        message: String,
    },

    /// No response was received
    #[error("'{label}' failed: {message}")]
    Network { label: String, message: String },

    /// The attempt was cancelled (explicitly or by a session-expiry cascade)
    #[error("'{label}' was cancelled: request cancelled")]
    Cancelled { label: String },

    /// Session expired; carries the matched phrase verbatim
    #[error("{0}")]
    SessionExpired(String),

    /// Request could not be dispatched (unresolvable URL, unencodable body)
    #[error("'{label}' could not be dispatched: {message}")]
    InvalidRequest { label: String, message: String },

    /// The task running the request terminated without settling it
    #[error("'{label}' terminated unexpectedly")]
    Internal { label: String },
}

impl DispatchError {
    #[must_use]
    pub fn is_session_expired(&self) -> bool {
        matches!(self, DispatchError::SessionExpired(_))
    }

    /// HTTP status of the failed response, when the server answered.
    #[must_use]
    pub fn status(&self) -> Option<http::StatusCode> {
        match self {
            DispatchError::Failed { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Errors raised while constructing a dispatcher or a transport.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum BuildError {
    /// No transport was supplied to the dispatcher builder
    #[error("a transport is required to build a dispatcher")]
    MissingTransport,

    /// Configured base URL is not an absolute URL
    #[error("invalid base URL '{url}': {reason}")]
    InvalidBaseUrl { url: String, reason: String },

    /// TLS error
    #[error("TLS error: {0}")]
    Tls(#[source] BoxError),

    /// Invalid header value (e.g. user agent)
    #[error("Invalid header value: {0}")]
    InvalidHeaderValue(#[from] http::header::InvalidHeaderValue),
}

/// Errors raised by a [`HeaderStore`](crate::HeaderStore).
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum HeaderStoreError {
    #[error("header store I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("stored headers are not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}
