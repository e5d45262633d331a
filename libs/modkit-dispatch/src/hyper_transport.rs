//! Default [`Transport`]: hyper over rustls, behind a tower middleware stack.

use crate::config::{HyperTransportConfig, TlsRootConfig, TransportSecurity};
use crate::error::{BoxError, BuildError, TransportError};
use crate::layers::UserAgentLayer;
use crate::response::{ApiResponse, decode_body};
use crate::tls;
use crate::transport::{Transport, TransportRequest};
use async_trait::async_trait;
use bytes::Bytes;
use futures::future::BoxFuture;
use http::{Request, Response};
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper_util::client::legacy::Client;
use hyper_util::rt::{TokioExecutor, TokioTimer};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower::buffer::Buffer;
use tower::timeout::TimeoutLayer;
use tower::{ServiceBuilder, ServiceExt};
use tower_http::decompression::DecompressionLayer;

type ResponseBody = BoxBody<Bytes, BoxError>;

type ServiceFuture = BoxFuture<'static, Result<Response<ResponseBody>, TransportError>>;

/// Shared service; `Buffer` makes it `Clone + Send + Sync` without a mutex
type SharedService = Buffer<Request<Full<Bytes>>, ServiceFuture>;

/// Headers dropped when a request is sent without credentials
const CREDENTIAL_HEADERS: [&str; 3] = ["authorization", "cookie", "proxy-authorization"];

/// Builder for [`HyperTransport`].
pub struct HyperTransportBuilder {
    config: HyperTransportConfig,
}

impl HyperTransportBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: HyperTransportConfig::default(),
        }
    }

    #[must_use]
    pub fn with_config(config: HyperTransportConfig) -> Self {
        Self { config }
    }

    /// Timeout of a single attempt. Each retry made by the dispatcher gets its
    /// own timeout.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    #[must_use]
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    /// Maximum response body size, measured after decompression
    #[must_use]
    pub fn max_body_size(mut self, size: usize) -> Self {
        self.config.max_body_size = size;
        self
    }

    #[must_use]
    pub fn tls_roots(mut self, roots: TlsRootConfig) -> Self {
        self.config.tls_roots = roots;
        self
    }

    #[must_use]
    pub fn transport(mut self, transport: TransportSecurity) -> Self {
        self.config.transport = transport;
        self
    }

    /// Allow plain HTTP (for tests against local mock servers).
    ///
    /// Only available in debug builds or with the `allow-insecure-http`
    /// feature, so release builds cannot enable it by accident.
    #[must_use]
    #[cfg(any(debug_assertions, feature = "allow-insecure-http"))]
    pub fn allow_insecure_http(mut self) -> Self {
        tracing::warn!(
            target: "modkit_dispatch::security",
            "allow_insecure_http() called - HTTP traffic will NOT be encrypted"
        );
        self.config.transport = TransportSecurity::AllowInsecureHttp;
        self
    }

    /// Capacity of the request buffer in front of the service. Clamped to at
    /// least 1.
    #[must_use]
    pub fn buffer_capacity(mut self, capacity: usize) -> Self {
        self.config.buffer_capacity = capacity.max(1);
        self
    }

    /// `None` keeps idle connections indefinitely
    #[must_use]
    pub fn pool_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.pool_idle_timeout = timeout;
        self
    }

    #[must_use]
    pub fn pool_max_idle_per_host(mut self, max: usize) -> Self {
        self.config.pool_max_idle_per_host = max;
        self
    }

    /// Build the transport.
    ///
    /// Must be called within a tokio runtime: the request buffer runs on a
    /// spawned worker task.
    ///
    /// # Errors
    /// Returns an error if TLS initialization fails or the user agent is not a
    /// valid header value.
    pub fn build(self) -> Result<HyperTransport, BuildError> {
        if self.config.transport == TransportSecurity::AllowInsecureHttp {
            tracing::warn!(
                "insecure HTTP enabled (TransportSecurity::AllowInsecureHttp); \
                 use only for testing with mock servers"
            );
        }

        let timeout = self.config.request_timeout;
        let https = tls::build_https_connector(self.config.tls_roots, self.config.transport)?;

        let mut client_builder = Client::builder(TokioExecutor::new());
        // pool_idle_timeout has no effect without a pool timer
        client_builder
            .pool_timer(TokioTimer::new())
            .pool_max_idle_per_host(self.config.pool_max_idle_per_host)
            .http2_only(false);
        if let Some(idle_timeout) = self.config.pool_idle_timeout {
            client_builder.pool_idle_timeout(idle_timeout);
        }
        let client = client_builder.build::<_, Full<Bytes>>(https);

        // Request flow: Timeout -> UserAgent -> Decompression -> hyper client.
        // Status codes pass through untouched; non-2xx is classified by
        // HyperTransport::exchange once the body has been read.
        let service = ServiceBuilder::new()
            .layer(TimeoutLayer::new(timeout))
            .layer(UserAgentLayer::try_new(&self.config.user_agent)?)
            .layer(DecompressionLayer::new())
            .service(client)
            .map_response(box_response_body)
            .map_err(move |e: tower::BoxError| map_tower_error(e, timeout))
            .boxed_clone();

        Ok(HyperTransport {
            service: Buffer::new(service, self.config.buffer_capacity.max(1)),
            max_body_size: self.config.max_body_size,
            transport_security: self.config.transport,
        })
    }
}

impl Default for HyperTransportBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Hyper-based [`Transport`] with TLS, connection pooling, per-attempt
/// timeouts, transparent decompression and response size limits.
///
/// Responses are read in full and decoded the same way for every status; a
/// non-2xx status is reported as [`TransportError::Response`].
#[derive(Clone)]
pub struct HyperTransport {
    service: SharedService,
    max_body_size: usize,
    transport_security: TransportSecurity,
}

impl HyperTransport {
    #[must_use]
    pub fn builder() -> HyperTransportBuilder {
        HyperTransportBuilder::new()
    }

    fn to_http_request(&self, request: TransportRequest) -> Result<Request<Full<Bytes>>, TransportError> {
        let uri = validate_url(&request.url, self.transport_security)?;

        let mut builder = Request::builder().method(request.method).uri(uri);
        for (name, value) in &request.headers {
            let is_credential = CREDENTIAL_HEADERS
                .iter()
                .any(|credential| name.eq_ignore_ascii_case(credential));
            if is_credential && !request.with_credentials {
                continue;
            }
            builder = builder.header(name.as_str(), value.as_str());
        }

        builder
            .body(Full::new(request.body))
            .map_err(|e| TransportError::InvalidRequest(e.to_string()))
    }

    async fn exchange(&self, request: Request<Full<Bytes>>) -> Result<ApiResponse, TransportError> {
        let call: BoxFuture<'static, Result<Response<ResponseBody>, tower::BoxError>> =
            Box::pin(self.service.clone().oneshot(request));
        let response = call.await.map_err(map_buffer_error)?;

        let (parts, body) = response.into_parts();
        let bytes = read_limited(body, self.max_body_size).await?;
        let response = ApiResponse::new(parts.status, parts.headers, decode_body(&bytes));

        if response.is_success() {
            Ok(response)
        } else {
            Err(TransportError::Response(Box::new(response)))
        }
    }
}

#[async_trait]
impl Transport for HyperTransport {
    async fn send(
        &self,
        request: TransportRequest,
        cancel: CancellationToken,
    ) -> Result<ApiResponse, TransportError> {
        let request = self.to_http_request(request)?;
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(TransportError::Cancelled),
            result = self.exchange(request) => result,
        }
    }
}

/// Parse `url` and check its scheme against the transport security mode.
fn validate_url(url: &str, security: TransportSecurity) -> Result<http::Uri, TransportError> {
    let uri: http::Uri = url
        .parse()
        .map_err(|e: http::uri::InvalidUri| TransportError::InvalidRequest(format!("invalid URL '{url}': {e}")))?;

    if uri.authority().is_none() {
        return Err(TransportError::InvalidRequest(format!(
            "URL '{url}' is missing a host"
        )));
    }

    match uri.scheme_str() {
        Some("https") => Ok(uri),
        Some("http") if security == TransportSecurity::AllowInsecureHttp => Ok(uri),
        Some("http") => Err(TransportError::InvalidRequest(
            "HTTPS required (transport security is TlsOnly)".to_owned(),
        )),
        Some(scheme) => Err(TransportError::InvalidRequest(format!(
            "unsupported scheme '{scheme}'; only http and https are supported"
        ))),
        None => Err(TransportError::InvalidRequest(format!(
            "URL '{url}' is missing a scheme"
        ))),
    }
}

/// Collect a body, failing once more than `limit` bytes were read.
async fn read_limited(body: ResponseBody, limit: usize) -> Result<Bytes, TransportError> {
    // Boxed with an explicit `Send` bound: otherwise the compiler cannot prove
    // the `Limited` body's error conversion is `Send` inside `async_trait`.
    let collect: BoxFuture<'static, Result<http_body_util::Collected<Bytes>, BoxError>> =
        Box::pin(Limited::new(body, limit).collect());
    match collect.await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(e) if e.is::<LengthLimitError>() => Err(TransportError::BodyTooLarge { limit }),
        Err(e) => Err(TransportError::Network(e)),
    }
}

fn box_response_body<B>(response: Response<B>) -> Response<ResponseBody>
where
    B: hyper::body::Body<Data = Bytes> + Send + Sync + 'static,
    B::Error: Into<BoxError>,
{
    let (parts, body) = response.into_parts();
    Response::from_parts(parts, body.map_err(Into::into).boxed())
}

fn map_tower_error(err: tower::BoxError, timeout: Duration) -> TransportError {
    if err.is::<tower::timeout::error::Elapsed>() {
        return TransportError::Timeout(timeout);
    }
    match err.downcast::<TransportError>() {
        Ok(transport_err) => *transport_err,
        Err(other) => TransportError::Network(other),
    }
}

/// Inner-service errors come back boxed; anything else means the buffer
/// worker is gone.
fn map_buffer_error(err: tower::BoxError) -> TransportError {
    match err.downcast::<TransportError>() {
        Ok(transport_err) => *transport_err,
        Err(other) => {
            tracing::error!(error = %other, "transport buffer worker closed unexpectedly");
            TransportError::Network(other)
        }
    }
}
