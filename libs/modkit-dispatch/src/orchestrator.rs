//! Request pipeline shared by every clone of a [`Dispatcher`](crate::Dispatcher).
//!
//! A call is resolved to a URL, fingerprinted and enqueued. The group leader
//! runs the pipeline on a spawned task:
//!
//! ```text
//! CHECK_CACHE -> IN_FLIGHT -> (RETRY -> IN_FLIGHT)* -> SETTLED
//! ```
//!
//! and settles the whole group with the outcome. Running it detached from the
//! caller means a leader that stops waiting never strands its followers.

use crate::cache::ResponseCache;
use crate::cancel::{CancelHandle, CancellationRegistry};
use crate::classify;
use crate::config::DispatcherConfig;
use crate::controller::{ErrorEvent, ErrorListeners, RequestController, call_guarded};
use crate::dedup::{DedupQueue, Enqueued, Role};
use crate::descriptor::RequestDescriptor;
use crate::error::{DispatchError, TransportError};
use crate::fingerprint::RequestFingerprint;
use crate::headers::{DefaultHeaders, merge_headers};
use crate::response::ApiResponse;
use crate::transport::{Transport, TransportRequest};
use bytes::Bytes;
use futures::FutureExt;
use http::Method;
use parking_lot::RwLock;
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use url::Url;

/// Result of one transport attempt, after classification.
enum AttemptOutcome {
    Success(ApiResponse),
    Retry,
    Fail(DispatchError),
}

/// Request resolved and encoded once, reused by every attempt.
struct PreparedRequest {
    descriptor: RequestDescriptor,
    url: String,
    fingerprint: RequestFingerprint,
    label: String,
    body: Bytes,
}

impl PreparedRequest {
    fn is_cache_target(&self) -> bool {
        let method = self.descriptor.method();
        self.descriptor.cache_key().is_some() && (*method == Method::GET || *method == Method::HEAD)
    }
}

pub struct Orchestrator {
    pub(crate) config: DispatcherConfig,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) cache: Option<Arc<dyn ResponseCache>>,
    pub(crate) controller: RwLock<Arc<dyn RequestController>>,
    pub(crate) default_headers: DefaultHeaders,
    pub(crate) queue: DedupQueue,
    pub(crate) registry: CancellationRegistry,
    pub(crate) listeners: ErrorListeners,
}

impl Orchestrator {
    pub(crate) async fn dispatch(
        self: &Arc<Self>,
        descriptor: RequestDescriptor,
    ) -> Result<ApiResponse, DispatchError> {
        let label = descriptor.effective_label();
        let invalid = |message: String| DispatchError::InvalidRequest {
            label: label.clone(),
            message,
        };

        let url = self.resolve_url(&descriptor).map_err(invalid)?;
        let body = descriptor
            .body_ref()
            .encode()
            .map_err(|e| invalid(format!("failed to encode body: {e}")))?;
        let fingerprint = RequestFingerprint::compute(&descriptor, &url);

        let Enqueued { role, receiver } = self.queue.enqueue(&fingerprint);
        match role {
            Role::Leader => {
                let request = PreparedRequest {
                    descriptor,
                    url,
                    fingerprint,
                    label: label.clone(),
                    body,
                };
                tokio::spawn(Arc::clone(self).run_group(request));
            }
            Role::Follower => {
                tracing::debug!(fingerprint = %fingerprint, label = %label, "Joining in-flight request");
            }
        }

        receiver
            .await
            .unwrap_or(Err(DispatchError::Internal { label }))
    }

    /// Run the pipeline for a group and settle every waiter with its outcome.
    async fn run_group(self: Arc<Self>, request: PreparedRequest) {
        let fingerprint = request.fingerprint.clone();
        let label = request.label.clone();

        match AssertUnwindSafe(self.execute(request)).catch_unwind().await {
            Ok(Ok(response)) => {
                self.queue.resolve_group(&fingerprint, &response);
            }
            Ok(Err(error)) => {
                self.queue.reject_group(&fingerprint, &error);
            }
            Err(_) => {
                tracing::error!(label = %label, fingerprint = %fingerprint, "Request pipeline panicked");
                self.queue
                    .reject_group(&fingerprint, &DispatchError::Internal { label });
            }
        }
    }

    async fn execute(&self, request: PreparedRequest) -> Result<ApiResponse, DispatchError> {
        if let Some(data) = self.check_cache(&request).await {
            return Ok(ApiResponse::cached(data));
        }

        let mut attempt: u32 = 0;
        loop {
            match self.attempt(&request, attempt).await {
                AttemptOutcome::Success(response) => return Ok(response),
                AttemptOutcome::Fail(error) => return Err(error),
                AttemptOutcome::Retry => {
                    attempt = attempt.saturating_add(1);
                    tracing::debug!(
                        retry = attempt,
                        label = %request.label,
                        url = %request.url,
                        "Retrying request"
                    );
                }
            }
        }
    }

    /// Fresh cached data for the request, if any.
    ///
    /// Stale data is handed to the stale-while-revalidate hook and `None` is
    /// returned so the request still goes to the network.
    async fn check_cache(&self, request: &PreparedRequest) -> Option<Value> {
        if !request.is_cache_target() {
            return None;
        }
        let cache = self.cache.as_ref()?;
        let cache_id = request.descriptor.cache_key()?;

        let entry = match cache
            .get_cached_data(cache_id, request.fingerprint.as_str(), &request.descriptor)
            .await
        {
            Ok(entry) => entry?,
            Err(e) => {
                tracing::warn!(error = %e, cache_id, label = %request.label, "Cache lookup failed; treating as miss");
                return None;
            }
        };

        if !entry.is_stale {
            tracing::debug!(cache_id, label = %request.label, "Serving fresh cached data");
            return Some(entry.data);
        }

        tracing::debug!(cache_id, label = %request.label, "Cached data is stale; revalidating");
        if let Some(hook) = &request.descriptor.stale_while_revalidate {
            call_guarded(&request.label, "stale_while_revalidate", || hook(&entry.data));
        }
        None
    }

    async fn attempt(&self, request: &PreparedRequest, attempt: u32) -> AttemptOutcome {
        let controller = Arc::clone(&*self.controller.read());

        let registered = self.registry.register();
        if let Some(register) = &request.descriptor.request_controller {
            let handle = CancelHandle::new(registered.token.clone());
            call_guarded(&request.label, "request_controller", || register(handle));
        }

        let wire = self.wire_request(request);
        let token = registered.token.clone();
        let result = tokio::select! {
            biased;
            () = token.cancelled() => Err(TransportError::Cancelled),
            result = self.transport.send(wire, registered.token.clone()) => result,
        };

        match result {
            Ok(response) => {
                self.registry.remove(registered.id);
                let response = self.on_success(controller.as_ref(), request, response).await;
                AttemptOutcome::Success(response)
            }
            Err(error) => {
                self.on_failure(controller.as_ref(), request, error, attempt, registered.id)
                    .await
            }
        }
    }

    fn wire_request(&self, request: &PreparedRequest) -> TransportRequest {
        let mut headers = merge_headers(
            &self.default_headers.snapshot(),
            request.descriptor.headers(),
        );
        if let Some(content_type) = request.descriptor.body_ref().default_content_type() {
            let has_content_type = headers
                .keys()
                .any(|name| name.eq_ignore_ascii_case(http::header::CONTENT_TYPE.as_str()));
            if !has_content_type {
                headers.insert(
                    http::header::CONTENT_TYPE.as_str().to_owned(),
                    content_type.to_owned(),
                );
            }
        }

        TransportRequest {
            method: request.descriptor.method().clone(),
            url: request.url.clone(),
            headers,
            body: request.body.clone(),
            with_credentials: self.config.with_credentials,
        }
    }

    async fn on_success(
        &self,
        controller: &dyn RequestController,
        request: &PreparedRequest,
        response: ApiResponse,
    ) -> ApiResponse {
        // Controller transform first, then the call-level one
        let mut response = controller.process_response(response).await;
        if let Some(transform) = &request.descriptor.process_response {
            response = transform(response).await;
        }

        let current = self.default_headers.snapshot();
        if let Some(rotated) = controller.rotate_headers(&response.headers, &current) {
            tracing::debug!(
                rotated = rotated.len(),
                label = %request.label,
                "Merging rotated default headers"
            );
            self.default_headers.merge(rotated);
        }

        self.write_cache(request, &response.data).await;

        if let Some(hook) = &request.descriptor.on_server_success {
            call_guarded(&request.label, "on_server_success", || hook(&response));
        }
        response
    }

    async fn write_cache(&self, request: &PreparedRequest, data: &Value) {
        if !request.is_cache_target() {
            return;
        }
        let (Some(cache), Some(cache_id)) = (&self.cache, request.descriptor.cache_key()) else {
            return;
        };

        match cache
            .cache_data(cache_id, request.fingerprint.as_str(), data, &request.descriptor)
            .await
        {
            Ok(true) => {}
            Ok(false) => tracing::debug!(cache_id, label = %request.label, "Cache declined response"),
            Err(e) => {
                tracing::warn!(error = %e, cache_id, label = %request.label, "Cache write failed");
            }
        }
    }

    async fn on_failure(
        &self,
        controller: &dyn RequestController,
        request: &PreparedRequest,
        error: TransportError,
        attempt: u32,
        attempt_id: u64,
    ) -> AttemptOutcome {
        let forced = controller.should_retry_request(&error, attempt).await;
        // A cancelled attempt stays cancelled, whatever the controller says
        let retry = !error.is_cancelled()
            && (forced || classify::default_should_retry(&error, attempt, &self.config.retry));

        let error = controller.process_response_error(error).await;
        self.listeners
            .emit(&ErrorEvent::new(&request.label, &request.fingerprint, attempt, &error));
        self.registry.remove(attempt_id);

        let (message, failure) = classify::describe_failure(&request.label, &error);
        let expired = message.as_deref().and_then(|message| {
            classify::match_session_expired(message, &self.config.session_expired_messages)
        });
        if let Some(phrase) = expired {
            let cancelled = self.registry.cancel_all();
            tracing::info!(
                label = %request.label,
                phrase,
                cancelled,
                "Session expired; cancelling in-flight requests"
            );
            return AttemptOutcome::Fail(DispatchError::SessionExpired(phrase.to_owned()));
        }

        if retry {
            AttemptOutcome::Retry
        } else {
            tracing::debug!(
                label = %request.label,
                attempt,
                status = ?error.status(),
                "Request failed"
            );
            AttemptOutcome::Fail(failure)
        }
    }

    /// Absolute URL for a descriptor, query parameters appended.
    ///
    /// Paths that already are absolute `http(s)` URLs bypass the base URL.
    fn resolve_url(&self, descriptor: &RequestDescriptor) -> Result<String, String> {
        let path = descriptor.path();
        let joined = if path.starts_with("http://") || path.starts_with("https://") {
            path.to_owned()
        } else if self.config.base_url.is_empty() {
            return Err(format!("relative path '{path}' requires a base URL"));
        } else {
            format!(
                "{}/{}",
                self.config.base_url.trim_end_matches('/'),
                path.trim_start_matches('/')
            )
        };

        let mut url = Url::parse(&joined).map_err(|e| format!("invalid URL '{joined}': {e}"))?;
        if !descriptor.query_params().is_empty() {
            url.query_pairs_mut().extend_pairs(descriptor.query_params());
        }
        Ok(String::from(url))
    }
}
