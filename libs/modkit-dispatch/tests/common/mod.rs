#![allow(clippy::unwrap_used, clippy::expect_used)]
#![allow(dead_code)]

use async_trait::async_trait;
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use modkit_dispatch::{
    ApiResponse, Dispatcher, DispatcherBuilder, TransportError, Transport, TransportRequest,
};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const BASE_URL: &str = "https://api.test";

/// What the scripted transport answers with.
#[derive(Debug, Clone)]
pub enum Reply {
    /// 200 with a JSON body
    Json(Value),
    /// 200 with a JSON body and response headers
    JsonWithHeaders(Value, Vec<(&'static str, &'static str)>),
    /// Non-2xx with a JSON body
    Status(u16, Value),
    /// No response at all
    NetworkDown,
    /// Never answers; only cancellation ends the attempt
    Hang,
}

/// Transport that answers from per-path scripts and records every call.
///
/// Each path has a queue of replies; the last reply repeats once the queue is
/// down to one entry. Unscripted paths answer `200 null`.
pub struct ScriptedTransport {
    routes: Mutex<HashMap<String, VecDeque<Reply>>>,
    delay: Duration,
    calls: AtomicUsize,
    requests: Mutex<Vec<TransportRequest>>,
    events: Arc<Mutex<Vec<String>>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self {
            routes: Mutex::new(HashMap::new()),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Delay every reply, so concurrent callers overlap
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Share an event log with test hooks; every send appends `"send <path>"`
    pub fn with_events(mut self, events: Arc<Mutex<Vec<String>>>) -> Self {
        self.events = events;
        self
    }

    pub fn route(self, path: &str, replies: impl IntoIterator<Item = Reply>) -> Self {
        self.routes
            .lock()
            .unwrap()
            .insert(path.to_owned(), replies.into_iter().collect());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<TransportRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn next_reply(&self, path: &str) -> Reply {
        let mut routes = self.routes.lock().unwrap();
        match routes.get_mut(path) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
            Some(queue) => queue.front().cloned().unwrap_or(Reply::Json(Value::Null)),
            None => Reply::Json(Value::Null),
        }
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(
        &self,
        request: TransportRequest,
        cancel: CancellationToken,
    ) -> Result<ApiResponse, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let path = url::Url::parse(&request.url).unwrap().path().to_owned();
        self.events.lock().unwrap().push(format!("send {path}"));
        self.requests.lock().unwrap().push(request);

        let reply = self.next_reply(&path);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        match reply {
            Reply::Json(data) => Ok(ApiResponse::new(StatusCode::OK, HeaderMap::new(), data)),
            Reply::JsonWithHeaders(data, headers) => {
                let mut map = HeaderMap::new();
                for (name, value) in headers {
                    map.insert(
                        HeaderName::from_static(name),
                        HeaderValue::from_static(value),
                    );
                }
                Ok(ApiResponse::new(StatusCode::OK, map, data))
            }
            Reply::Status(status, data) => Err(TransportError::Response(Box::new(
                ApiResponse::new(StatusCode::from_u16(status).unwrap(), HeaderMap::new(), data),
            ))),
            Reply::NetworkDown => Err(TransportError::Network(Box::new(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "connection refused",
            )))),
            Reply::Hang => {
                cancel.cancelled().await;
                Err(TransportError::Cancelled)
            }
        }
    }
}

pub fn builder(transport: &Arc<ScriptedTransport>) -> DispatcherBuilder {
    Dispatcher::builder()
        .base_url(BASE_URL)
        .transport(Arc::clone(transport) as Arc<dyn Transport>)
}

pub fn dispatcher(transport: &Arc<ScriptedTransport>) -> Dispatcher {
    builder(transport).build().unwrap()
}

/// Poll `condition` until it holds, failing the test after two seconds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
