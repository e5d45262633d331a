//! Request identity.
//!
//! Two calls that would put the same request on the wire share a fingerprint:
//! same method, same resolved URL, same per-call headers, same body. Hooks and
//! labels are not part of the identity.
//!
//! Binary and multipart bodies cannot be compared structurally; they are
//! replaced by a unique upload token, so such requests never share a
//! fingerprint and are always dispatched separately.

use crate::descriptor::{RequestBody, RequestDescriptor};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use xxhash_rust::xxh3::xxh3_64;

static UPLOAD_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Stable identity of a dispatched request (16 hex digits).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestFingerprint(String);

/// Canonical shape that gets hashed. `serde_json` maps are ordered, so the
/// serialized form is independent of insertion order.
#[derive(Serialize)]
struct RequestShape<'a> {
    method: &'a str,
    url: &'a str,
    headers: &'a BTreeMap<String, String>,
    body: Value,
}

impl RequestFingerprint {
    /// Fingerprint a descriptor dispatched to `url` (the fully resolved URL,
    /// query string included).
    #[must_use]
    pub fn compute(descriptor: &RequestDescriptor, url: &str) -> Self {
        let shape = RequestShape {
            method: descriptor.method().as_str(),
            url,
            headers: descriptor.headers(),
            body: normalized_body(descriptor.body_ref()),
        };

        let canonical = serde_json::to_vec(&shape)
            .unwrap_or_else(|_| format!("{} {url}", shape.method).into_bytes());
        Self(format!("{:016x}", xxh3_64(&canonical)))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn normalized_body(body: &RequestBody) -> Value {
    match body {
        RequestBody::Empty => Value::Null,
        RequestBody::Json(value) => value.clone(),
        RequestBody::Text(text) => Value::String(text.clone()),
        RequestBody::Form(fields) => Value::Array(
            fields
                .iter()
                .map(|(k, v)| Value::Array(vec![Value::from(k.as_str()), Value::from(v.as_str())]))
                .collect(),
        ),
        RequestBody::Binary { .. } => Value::String(upload_token()),
    }
}

/// Timestamp plus a process-wide sequence number; unique even when two
/// uploads start within the same clock tick.
fn upload_token() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    let seq = UPLOAD_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    format!("upload:{nanos}:{seq}")
}
