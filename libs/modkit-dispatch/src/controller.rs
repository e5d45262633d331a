use crate::error::TransportError;
use crate::fingerprint::RequestFingerprint;
use crate::headers::HeaderMapping;
use crate::response::ApiResponse;
use async_trait::async_trait;
use http::{HeaderMap, StatusCode};
use parking_lot::RwLock;
use serde_json::Value;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Application-level hooks consulted by the dispatcher for every request.
///
/// Every method has a pass-through default, so an implementation overrides
/// only what it needs. The controller's response transform always runs
/// before the call-level one set on the descriptor.
///
/// # Example
///
/// ```ignore
/// struct SessionController;
///
/// #[async_trait]
/// impl RequestController for SessionController {
///     fn rotate_headers(&self, response: &HeaderMap, _current: &HeaderMapping) -> Option<HeaderMapping> {
///         let token = response.get("x-refreshed-token")?.to_str().ok()?;
///         Some(HeaderMapping::from([("authorization".to_owned(), format!("Bearer {token}"))]))
///     }
/// }
/// ```
#[async_trait]
pub trait RequestController: Send + Sync {
    /// Derive header updates from a successful response.
    ///
    /// The returned mapping is merged into the default headers (not replacing
    /// them) and persisted. `None` leaves the defaults untouched.
    fn rotate_headers(
        &self,
        _response_headers: &HeaderMap,
        _current: &HeaderMapping,
    ) -> Option<HeaderMapping> {
        None
    }

    /// Transform every successful response.
    async fn process_response(&self, response: ApiResponse) -> ApiResponse {
        response
    }

    /// Rewrite a failed attempt's error before it is classified.
    async fn process_response_error(&self, error: TransportError) -> TransportError {
        error
    }

    /// Force a retry for a failed attempt. `attempt` is the number of retries
    /// already made for this request (0 on the first failure).
    async fn should_retry_request(&self, _error: &TransportError, _attempt: u32) -> bool {
        false
    }
}

/// Controller with no hooks.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopController;

impl RequestController for NoopController {}

/// Failed attempt, as reported to error listeners.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorEvent {
    pub label: String,
    pub fingerprint: RequestFingerprint,
    /// Retries already made before this attempt
    pub attempt: u32,
    pub status: Option<StatusCode>,
    pub message: String,
    /// Response body, if the server answered
    pub data: Option<Value>,
}

impl ErrorEvent {
    pub(crate) fn new(
        label: &str,
        fingerprint: &RequestFingerprint,
        attempt: u32,
        error: &TransportError,
    ) -> Self {
        Self {
            label: label.to_owned(),
            fingerprint: fingerprint.clone(),
            attempt,
            status: error.status(),
            message: error.to_string(),
            data: error.response().map(|r| r.data.clone()),
        }
    }
}

pub type ErrorListener = Arc<dyn Fn(&ErrorEvent) + Send + Sync>;

/// Identifies a subscription made with
/// [`Dispatcher::subscribe_errors`](crate::Dispatcher::subscribe_errors).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Error-event observers.
///
/// Listeners run synchronously in subscription order. A panicking listener
/// is logged and skipped; it never stops the others or reaches the caller.
#[derive(Default)]
pub struct ErrorListeners {
    next_id: AtomicU64,
    listeners: RwLock<Vec<(ListenerId, ErrorListener)>>,
}

impl ErrorListeners {
    pub(crate) fn subscribe(&self, listener: ErrorListener) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().push((id, listener));
        id
    }

    pub(crate) fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    pub(crate) fn emit(&self, event: &ErrorEvent) {
        // Snapshot so listeners may (un)subscribe while being notified
        let snapshot = self.listeners.read().clone();
        for (id, listener) in snapshot {
            call_guarded(&event.label, "error listener", || listener(event));
            tracing::trace!(listener = id.0, label = %event.label, "error event delivered");
        }
    }
}

impl fmt::Debug for ErrorListeners {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorListeners")
            .field("count", &self.listeners.read().len())
            .finish()
    }
}

/// Run a best-effort application hook, containing any panic it raises.
/// Returns `false` if the hook panicked.
pub fn call_guarded(label: &str, hook: &str, f: impl FnOnce()) -> bool {
    if catch_unwind(AssertUnwindSafe(f)).is_ok() {
        true
    } else {
        tracing::warn!(label, hook, "hook panicked; ignoring");
        false
    }
}
