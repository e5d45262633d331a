#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![warn(warnings)]

//! Request dispatch for `ModKit` services.
//!
//! A [`Dispatcher`] sits between application code and an HTTP [`Transport`]
//! and adds:
//! - **Deduplication**: concurrent calls with the same method, URL, per-call
//!   headers and body share one network request and one outcome
//! - **Caching**: GET/HEAD calls with a cache id are served from a
//!   [`ResponseCache`]; stale entries are handed to a stale-while-revalidate
//!   hook while fresh data is fetched
//! - **Retries**: immediate retries for failed attempts, capped and
//!   status-filtered by a [`RetryPolicy`], with controller overrides
//! - **Default headers**: persisted through a [`HeaderStore`] and rotated from
//!   responses by a [`RequestController`]
//! - **Session expiry**: an error message matching a configured phrase cancels
//!   every other request in flight
//!
//! The default transport, [`HyperTransport`], is a hyper client over rustls
//! with per-attempt timeouts, transparent decompression and body size limits.
//!
//! # Example
//!
//! ```ignore
//! use modkit_dispatch::{Dispatcher, HyperTransport, RequestDescriptor};
//! use std::sync::Arc;
//!
//! let dispatcher = Dispatcher::builder()
//!     .base_url("https://api.example.com")
//!     .transport(Arc::new(HyperTransport::builder().build()?))
//!     .build()?;
//!
//! let users = dispatcher
//!     .get("/users", RequestDescriptor::new().label("Loading users"))
//!     .await?;
//! ```
//!
//! Errors are reported as [`DispatchError`]. A failed call displays as
//! `'<label>' failed with message "<message>"`, where the message comes from
//! the response body; a session expiry displays the matched phrase as-is.

mod builder;
mod cache;
mod cancel;
mod classify;
mod client;
mod config;
mod controller;
mod dedup;
mod descriptor;
mod error;
mod fingerprint;
mod headers;
mod hyper_transport;
pub mod layers;
mod orchestrator;
mod response;
mod tls;
mod transport;

pub use builder::DispatcherBuilder;
pub use cache::{CacheEntry, MemoryCache, ResponseCache};
pub use cancel::CancelHandle;
pub use classify::DEFAULT_ERROR_MESSAGE;
pub use client::Dispatcher;
pub use config::{
    DEFAULT_HEADERS_KEY, DEFAULT_MAX_RETRIES, DEFAULT_NO_RETRY_STATUSES,
    DEFAULT_SESSION_EXPIRED_MESSAGES, DEFAULT_USER_AGENT, DispatcherConfig, HyperTransportConfig,
    RetryPolicy, TlsRootConfig, TransportSecurity,
};
pub use controller::{ErrorEvent, ErrorListener, ListenerId, NoopController, RequestController};
pub use descriptor::{
    ControllerRegistration, RequestBody, RequestDescriptor, ResponseTransform, ServerSuccessHook,
    StaleDataHook,
};
pub use error::{BoxError, BuildError, DispatchError, HeaderStoreError, TransportError};
pub use fingerprint::RequestFingerprint;
pub use headers::{FileHeaderStore, HeaderMapping, HeaderStore, MemoryHeaderStore};
pub use hyper_transport::{HyperTransport, HyperTransportBuilder};
pub use response::ApiResponse;
pub use transport::{Transport, TransportRequest};
