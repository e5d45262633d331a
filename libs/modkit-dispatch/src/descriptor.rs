use crate::cancel::CancelHandle;
use crate::error::BoxError;
use crate::response::ApiResponse;
use bytes::Bytes;
use futures::FutureExt;
use futures::future::BoxFuture;
use http::Method;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Called with the final response after a successful network call.
pub type ServerSuccessHook = Arc<dyn Fn(&ApiResponse) + Send + Sync>;

/// Called with stale cached data before the network call revalidates it.
pub type StaleDataHook = Arc<dyn Fn(&Value) + Send + Sync>;

/// Call-level response transform, applied after the controller's transform.
pub type ResponseTransform = Arc<dyn Fn(ApiResponse) -> BoxFuture<'static, ApiResponse> + Send + Sync>;

/// Receives a cancel handle for every attempt the request makes.
pub type ControllerRegistration = Arc<dyn Fn(CancelHandle) + Send + Sync>;

/// Request body
#[derive(Debug, Clone, Default, PartialEq)]
pub enum RequestBody {
    #[default]
    Empty,
    /// JSON body; Content-Type defaults to `application/json`
    Json(Value),
    /// Raw text; no default Content-Type
    Text(String),
    /// Form fields; Content-Type defaults to `application/x-www-form-urlencoded`
    Form(Vec<(String, String)>),
    /// Opaque binary or multipart payload.
    ///
    /// Cannot be compared structurally, so requests carrying it are never
    /// deduplicated.
    Binary {
        content_type: Option<String>,
        bytes: Bytes,
    },
}

impl RequestBody {
    #[must_use]
    pub fn is_binary(&self) -> bool {
        matches!(self, RequestBody::Binary { .. })
    }

    pub(crate) fn default_content_type(&self) -> Option<&str> {
        match self {
            RequestBody::Json(_) => Some("application/json"),
            RequestBody::Form(_) => Some("application/x-www-form-urlencoded"),
            RequestBody::Binary { content_type, .. } => content_type.as_deref(),
            RequestBody::Empty | RequestBody::Text(_) => None,
        }
    }

    pub(crate) fn encode(&self) -> Result<Bytes, BoxError> {
        Ok(match self {
            RequestBody::Empty => Bytes::new(),
            RequestBody::Json(value) => Bytes::from(serde_json::to_vec(value)?),
            RequestBody::Text(text) => Bytes::from(text.clone()),
            RequestBody::Form(fields) => Bytes::from(serde_urlencoded::to_string(fields)?),
            RequestBody::Binary { bytes, .. } => bytes.clone(),
        })
    }
}

/// Everything the dispatcher needs to know about one call.
///
/// Method and path are set by the verb used to dispatch it
/// ([`Dispatcher::get`](crate::Dispatcher::get) etc.); everything else is
/// configured fluently:
///
/// ```ignore
/// let users = dispatcher
///     .get("/users", RequestDescriptor::new().label("Loading users").cache_id("users"))
///     .await?;
/// ```
///
/// When several identical calls are collapsed into one network request, the
/// hooks of the first caller (the one that started the request) are the ones
/// that run.
#[derive(Clone, Default)]
#[must_use]
pub struct RequestDescriptor {
    pub(crate) method: Method,
    pub(crate) path: String,
    pub(crate) headers: BTreeMap<String, String>,
    pub(crate) body: RequestBody,
    pub(crate) query: Vec<(String, String)>,
    pub(crate) label: String,
    pub(crate) cache_id: Option<String>,
    pub(crate) on_server_success: Option<ServerSuccessHook>,
    pub(crate) stale_while_revalidate: Option<StaleDataHook>,
    pub(crate) process_response: Option<ResponseTransform>,
    pub(crate) request_controller: Option<ControllerRegistration>,
}

impl RequestDescriptor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Human-readable operation name used in error messages
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    pub fn body(mut self, body: RequestBody) -> Self {
        self.body = body;
        self
    }

    pub fn json(self, value: Value) -> Self {
        self.body(RequestBody::Json(value))
    }

    pub fn form(self, fields: &[(&str, &str)]) -> Self {
        let fields = fields
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        self.body(RequestBody::Form(fields))
    }

    /// Binary (e.g. multipart) body with an explicit content type
    pub fn binary(self, content_type: impl Into<String>, bytes: Bytes) -> Self {
        self.body(RequestBody::Binary {
            content_type: Some(content_type.into()),
            bytes,
        })
    }

    /// Cache namespace; enables cache lookups for GET/HEAD requests
    pub fn cache_id(mut self, cache_id: impl Into<String>) -> Self {
        self.cache_id = Some(cache_id.into());
        self
    }

    pub fn on_server_success(
        mut self,
        hook: impl Fn(&ApiResponse) + Send + Sync + 'static,
    ) -> Self {
        self.on_server_success = Some(Arc::new(hook));
        self
    }

    pub fn stale_while_revalidate(mut self, hook: impl Fn(&Value) + Send + Sync + 'static) -> Self {
        self.stale_while_revalidate = Some(Arc::new(hook));
        self
    }

    pub fn process_response<F, Fut>(mut self, transform: F) -> Self
    where
        F: Fn(ApiResponse) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ApiResponse> + Send + 'static,
    {
        self.process_response = Some(Arc::new(move |response| transform(response).boxed()));
        self
    }

    /// Receive a [`CancelHandle`] for every transport attempt this call makes.
    ///
    /// A call that joins an identical request already in flight makes no
    /// attempt of its own, so its hook is never invoked and it gets no handle.
    pub fn request_controller(mut self, hook: impl Fn(CancelHandle) + Send + Sync + 'static) -> Self {
        self.request_controller = Some(Arc::new(hook));
        self
    }

    pub(crate) fn with_target(mut self, method: Method, path: &str) -> Self {
        self.method = method;
        path.clone_into(&mut self.path);
        self
    }

    #[must_use]
    pub fn method(&self) -> &Method {
        &self.method
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[must_use]
    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    #[must_use]
    pub fn body_ref(&self) -> &RequestBody {
        &self.body
    }

    #[must_use]
    pub fn query_params(&self) -> &[(String, String)] {
        &self.query
    }

    #[must_use]
    pub fn cache_key(&self) -> Option<&str> {
        self.cache_id.as_deref()
    }

    /// Label used in error messages, `"<METHOD> <path>"` when none was set
    #[must_use]
    pub fn effective_label(&self) -> String {
        if self.label.is_empty() {
            format!("{} {}", self.method, self.path)
        } else {
            self.label.clone()
        }
    }
}

impl fmt::Debug for RequestDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestDescriptor")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("headers", &self.headers)
            .field("body", &self.body)
            .field("query", &self.query)
            .field("label", &self.label)
            .field("cache_id", &self.cache_id)
            .finish_non_exhaustive()
    }
}
