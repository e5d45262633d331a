#![allow(clippy::unwrap_used, clippy::expect_used)]

//! Default header handling, controller hooks and per-call hooks.

mod common;

use async_trait::async_trait;
use common::{Reply, ScriptedTransport, builder, dispatcher};
use http::HeaderMap;
use modkit_dispatch::{
    ApiResponse, FileHeaderStore, HeaderMapping, HeaderStore, MemoryHeaderStore,
    RequestController, RequestDescriptor,
};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

fn mapping(pairs: &[(&str, &str)]) -> HeaderMapping {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
        .collect()
}

/// Picks up a refreshed session token from the `x-refreshed-token` header.
struct TokenRotation;

#[async_trait]
impl RequestController for TokenRotation {
    fn rotate_headers(&self, response: &HeaderMap, _current: &HeaderMapping) -> Option<HeaderMapping> {
        let token = response.get("x-refreshed-token")?.to_str().ok()?;
        let bearer = format!("Bearer {token}");
        Some(mapping(&[("authorization", bearer.as_str())]))
    }
}

#[tokio::test]
async fn test_rotated_headers_are_merged_and_persisted() {
    let transport = Arc::new(ScriptedTransport::new().route(
        "/me",
        [Reply::JsonWithHeaders(json!({"id": 1}), vec![("x-refreshed-token", "new")])],
    ));
    let store = Arc::new(MemoryHeaderStore::new());
    store
        .set(
            "default-headers",
            &mapping(&[("authorization", "Bearer old"), ("x-client", "console")]),
        )
        .unwrap();

    let dispatcher = builder(&transport)
        .header_store(Arc::clone(&store) as Arc<dyn HeaderStore>)
        .controller(Arc::new(TokenRotation))
        .build()
        .unwrap();

    dispatcher.get("/me", RequestDescriptor::new()).await.unwrap();

    let expected = mapping(&[("authorization", "Bearer new"), ("x-client", "console")]);
    assert_eq!(dispatcher.default_headers(), expected);
    assert_eq!(store.get("default-headers").unwrap(), Some(expected));

    // The next request carries the rotated token
    dispatcher.get("/other", RequestDescriptor::new()).await.unwrap();
    let sent = transport.requests();
    assert_eq!(sent[0].headers.get("authorization").unwrap(), "Bearer old");
    assert_eq!(sent[1].headers.get("authorization").unwrap(), "Bearer new");
    assert_eq!(sent[1].headers.get("x-client").unwrap(), "console");
}

#[tokio::test]
async fn test_per_call_headers_win_and_content_type_is_defaulted() {
    let transport = Arc::new(ScriptedTransport::new());
    let dispatcher = dispatcher(&transport);
    dispatcher.merge_default_headers(mapping(&[("Authorization", "Bearer default")]));

    dispatcher
        .post(
            "/users",
            RequestDescriptor::new()
                .header("authorization", "Bearer override")
                .json(json!({"name": "alice"})),
        )
        .await
        .unwrap();
    dispatcher
        .post(
            "/raw",
            RequestDescriptor::new()
                .header("Content-Type", "application/vnd.custom+json")
                .json(json!({})),
        )
        .await
        .unwrap();

    let sent = transport.requests();
    assert_eq!(
        sent[0].headers,
        mapping(&[
            ("authorization", "Bearer override"),
            ("content-type", "application/json"),
        ])
    );
    assert_eq!(sent[0].body.as_ref(), br#"{"name":"alice"}"#);
    assert!(sent[0].with_credentials);

    assert_eq!(
        sent[1].headers.get("Content-Type").map(String::as_str),
        Some("application/vnd.custom+json")
    );
    assert!(!sent[1].headers.contains_key("content-type"));
}

#[tokio::test]
async fn test_credentials_flag_is_forwarded() {
    let transport = Arc::new(ScriptedTransport::new());
    let dispatcher = builder(&transport).with_credentials(false).build().unwrap();

    dispatcher.get("/public", RequestDescriptor::new()).await.unwrap();
    assert!(!transport.requests()[0].with_credentials);
}

#[tokio::test]
async fn test_logout_clears_persisted_headers() {
    let dir = tempfile::tempdir().unwrap();
    let transport = Arc::new(ScriptedTransport::new());
    let dispatcher = builder(&transport)
        .header_store(Arc::new(FileHeaderStore::new(dir.path())))
        .build()
        .unwrap();

    dispatcher.merge_default_headers(mapping(&[("authorization", "Bearer t")]));
    let reopened = FileHeaderStore::new(dir.path());
    assert!(reopened.get("default-headers").unwrap().is_some());

    dispatcher.logout().unwrap();

    assert!(dispatcher.default_headers().is_empty());
    assert_eq!(reopened.get("default-headers").unwrap(), None);

    dispatcher.get("/me", RequestDescriptor::new()).await.unwrap();
    assert!(transport.requests()[0].headers.is_empty());
}

#[tokio::test]
async fn test_refresh_picks_up_headers_written_elsewhere() {
    let dir = tempfile::tempdir().unwrap();
    let transport = Arc::new(ScriptedTransport::new());
    let dispatcher = builder(&transport)
        .header_store(Arc::new(FileHeaderStore::new(dir.path())))
        .build()
        .unwrap();

    // Another process logs in and persists its session
    FileHeaderStore::new(dir.path())
        .set("default-headers", &mapping(&[("authorization", "Bearer shared")]))
        .unwrap();
    assert!(dispatcher.default_headers().is_empty());

    dispatcher.refresh_default_headers();
    assert_eq!(
        dispatcher.default_headers(),
        mapping(&[("authorization", "Bearer shared")])
    );
}

/// Wraps every successful body as `{"controller": <data>}`.
struct WrappingController;

#[async_trait]
impl RequestController for WrappingController {
    async fn process_response(&self, mut response: ApiResponse) -> ApiResponse {
        response.data = json!({"controller": response.data});
        response
    }
}

#[tokio::test]
async fn test_controller_transform_runs_before_call_transform() {
    let transport = Arc::new(ScriptedTransport::new().route("/users", [Reply::Json(json!([1]))]));
    let dispatcher = builder(&transport)
        .controller(Arc::new(WrappingController))
        .build()
        .unwrap();

    let response = dispatcher
        .get(
            "/users",
            RequestDescriptor::new().process_response(|mut response| async move {
                response.data = json!({"call": response.data});
                response
            }),
        )
        .await
        .unwrap();

    assert_eq!(response.data, json!({"call": {"controller": [1]}}));
}

#[tokio::test]
async fn test_set_controller_applies_to_later_requests() {
    let transport = Arc::new(ScriptedTransport::new().route("/users", [Reply::Json(json!(1))]));
    let dispatcher = dispatcher(&transport);

    let before = dispatcher.get("/users", RequestDescriptor::new()).await.unwrap();
    dispatcher.set_controller(Arc::new(WrappingController));
    let after = dispatcher.get("/users", RequestDescriptor::new()).await.unwrap();

    assert_eq!(before.data, json!(1));
    assert_eq!(after.data, json!({"controller": 1}));
}

#[tokio::test]
async fn test_server_success_hook_sees_final_response() {
    let transport = Arc::new(ScriptedTransport::new().route("/users", [Reply::Json(json!([1]))]));
    let dispatcher = dispatcher(&transport);

    let seen = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&seen);
    let response = dispatcher
        .get(
            "/users",
            RequestDescriptor::new()
                .process_response(|mut response| async move {
                    response.data = json!({"items": response.data});
                    response
                })
                .on_server_success(move |response| {
                    *sink.lock().unwrap() = Some(response.data.clone());
                }),
        )
        .await
        .unwrap();

    assert_eq!(*seen.lock().unwrap(), Some(response.data));
}

#[tokio::test]
async fn test_panicking_hooks_do_not_fail_the_request() {
    let transport = Arc::new(ScriptedTransport::new().route("/users", [Reply::Json(json!("ok"))]));
    let dispatcher = dispatcher(&transport);

    let response = dispatcher
        .get(
            "/users",
            RequestDescriptor::new().on_server_success(|_| panic!("hook bug")),
        )
        .await
        .unwrap();

    assert_eq!(response.data, json!("ok"));
}

#[tokio::test]
async fn test_success_hook_not_called_for_cache_hits() {
    let transport = Arc::new(ScriptedTransport::new().route("/orders", [Reply::Json(json!([1]))]));
    let dispatcher = builder(&transport)
        .cache(Arc::new(modkit_dispatch::MemoryCache::new(std::time::Duration::from_secs(60))))
        .build()
        .unwrap();

    let hits = Arc::new(AtomicUsize::new(0));
    for _ in 0..2 {
        let counter = Arc::clone(&hits);
        dispatcher
            .get(
                "/orders",
                RequestDescriptor::new()
                    .cache_id("orders")
                    .on_server_success(move |_| {
                        counter.fetch_add(1, Ordering::SeqCst);
                    }),
            )
            .await
            .unwrap();
    }

    assert_eq!(transport.calls(), 1);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}
