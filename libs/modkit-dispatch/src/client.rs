use crate::builder::DispatcherBuilder;
use crate::config::DispatcherConfig;
use crate::controller::{ErrorEvent, ListenerId, RequestController};
use crate::descriptor::RequestDescriptor;
use crate::error::{DispatchError, HeaderStoreError};
use crate::headers::HeaderMapping;
use crate::orchestrator::Orchestrator;
use crate::response::ApiResponse;
use http::Method;
use std::sync::Arc;

/// Request dispatcher.
///
/// Collapses concurrent identical calls into one network request, serves and
/// revalidates cached GET/HEAD data, retries failed attempts, rotates the
/// default headers from responses and cancels everything in flight when the
/// session expires.
///
/// Cloning is cheap and every clone shares the same state: pending groups,
/// default headers, in-flight attempts, controller and error listeners.
///
/// # Example
///
/// ```ignore
/// let users = dispatcher
///     .get("/users", RequestDescriptor::new().label("Loading users"))
///     .await?;
///
/// dispatcher
///     .post("/users", RequestDescriptor::new().json(json!({"name": "alice"})))
///     .await?;
/// ```
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Orchestrator>,
}

impl Dispatcher {
    #[must_use]
    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder::new()
    }

    pub(crate) fn from_orchestrator(orchestrator: Orchestrator) -> Self {
        Self {
            inner: Arc::new(orchestrator),
        }
    }

    /// # Errors
    /// See [`Dispatcher::request`].
    pub async fn get(&self, path: &str, descriptor: RequestDescriptor) -> Result<ApiResponse, DispatchError> {
        self.request(Method::GET, path, descriptor).await
    }

    /// # Errors
    /// See [`Dispatcher::request`].
    pub async fn post(&self, path: &str, descriptor: RequestDescriptor) -> Result<ApiResponse, DispatchError> {
        self.request(Method::POST, path, descriptor).await
    }

    /// # Errors
    /// See [`Dispatcher::request`].
    pub async fn put(&self, path: &str, descriptor: RequestDescriptor) -> Result<ApiResponse, DispatchError> {
        self.request(Method::PUT, path, descriptor).await
    }

    /// # Errors
    /// See [`Dispatcher::request`].
    pub async fn patch(&self, path: &str, descriptor: RequestDescriptor) -> Result<ApiResponse, DispatchError> {
        self.request(Method::PATCH, path, descriptor).await
    }

    /// # Errors
    /// See [`Dispatcher::request`].
    pub async fn delete(&self, path: &str, descriptor: RequestDescriptor) -> Result<ApiResponse, DispatchError> {
        self.request(Method::DELETE, path, descriptor).await
    }

    /// Dispatch `descriptor` as a `method` request to `path`.
    ///
    /// `path` is resolved against the base URL unless it is an absolute
    /// `http(s)` URL. Must be called within a tokio runtime.
    ///
    /// # Errors
    /// - `DispatchError::Failed` when the server answered with an error and no
    ///   retry was warranted
    /// - `DispatchError::Network` when no response was received
    /// - `DispatchError::Cancelled` when the attempt was cancelled
    /// - `DispatchError::SessionExpired` when the error message matched a
    ///   session-expiry phrase
    /// - `DispatchError::InvalidRequest` when the URL or body is unusable
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        descriptor: RequestDescriptor,
    ) -> Result<ApiResponse, DispatchError> {
        self.inner.dispatch(descriptor.with_target(method, path)).await
    }

    /// Forget the default headers, in memory and in the header store.
    ///
    /// # Errors
    /// Returns an error if the persisted headers could not be removed; the
    /// in-memory defaults are cleared regardless.
    pub fn logout(&self) -> Result<(), HeaderStoreError> {
        tracing::info!(key = %self.inner.config.default_headers_key, "Clearing default headers");
        self.inner.default_headers.clear()
    }

    /// Reload the default headers from the header store, picking up changes
    /// written by another process or dispatcher.
    pub fn refresh_default_headers(&self) {
        self.inner.default_headers.refresh();
    }

    /// Current default headers
    #[must_use]
    pub fn default_headers(&self) -> HeaderMapping {
        self.inner.default_headers.snapshot()
    }

    /// Merge `headers` into the defaults and persist them; returns the result
    pub fn merge_default_headers(&self, headers: HeaderMapping) -> HeaderMapping {
        self.inner.default_headers.merge(headers)
    }

    /// Replace the controller. Attempts already running keep the old one.
    pub fn set_controller(&self, controller: Arc<dyn RequestController>) {
        *self.inner.controller.write() = controller;
    }

    /// Be notified of every failed attempt, retried or not.
    pub fn subscribe_errors(&self, listener: impl Fn(&ErrorEvent) + Send + Sync + 'static) -> ListenerId {
        self.inner.listeners.subscribe(Arc::new(listener))
    }

    /// Returns `false` if `id` was not subscribed.
    pub fn unsubscribe_errors(&self, id: ListenerId) -> bool {
        self.inner.listeners.unsubscribe(id)
    }

    /// Cancel every attempt currently in flight; returns how many were
    /// cancelled. Their callers receive `DispatchError::Cancelled`.
    pub fn cancel_all(&self) -> usize {
        let cancelled = self.inner.registry.cancel_all();
        tracing::info!(cancelled, "Cancelled in-flight requests");
        cancelled
    }

    /// Attempts currently on the wire
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.inner.registry.len()
    }

    /// Distinct requests currently awaiting settlement
    #[must_use]
    pub fn pending_groups(&self) -> usize {
        self.inner.queue.pending_groups()
    }

    #[must_use]
    pub fn config(&self) -> &DispatcherConfig {
        &self.inner.config
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("base_url", &self.inner.config.base_url)
            .field("pending_groups", &self.pending_groups())
            .field("in_flight", &self.in_flight())
            .finish_non_exhaustive()
    }
}
