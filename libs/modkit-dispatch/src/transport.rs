use crate::error::TransportError;
use crate::headers::HeaderMapping;
use crate::response::ApiResponse;
use async_trait::async_trait;
use bytes::Bytes;
use http::Method;
use tokio_util::sync::CancellationToken;

/// Fully prepared wire request handed to a [`Transport`].
#[derive(Debug, Clone, PartialEq)]
pub struct TransportRequest {
    pub method: Method,
    /// Absolute URL, query string included
    pub url: String,
    /// Default headers merged with per-call headers
    pub headers: HeaderMapping,
    pub body: Bytes,
    /// Whether credentials (cookies, auth) should accompany the request
    pub with_credentials: bool,
}

/// Performs one HTTP exchange.
///
/// Non-2xx responses must be reported as [`TransportError::Response`] so the
/// dispatcher can inspect them for retry and session expiry. Implementations
/// should stop work once `cancel` fires; the dispatcher also stops waiting on
/// its own at that point.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one request.
    ///
    /// # Errors
    /// Returns the failure of this attempt; see [`TransportError`].
    async fn send(
        &self,
        request: TransportRequest,
        cancel: CancellationToken,
    ) -> Result<ApiResponse, TransportError>;
}
