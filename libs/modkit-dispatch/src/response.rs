use http::{HeaderMap, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Response delivered to every caller sharing a request.
///
/// The body is decoded once into a JSON [`Value`] so one response can be
/// cloned to many waiters, handed to transforms and written to a cache:
/// - an empty body becomes `Value::Null`
/// - a JSON body is parsed as-is
/// - anything else is kept as a `Value::String` (lossy UTF-8)
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub data: Value,
}

impl ApiResponse {
    #[must_use]
    pub fn new(status: StatusCode, headers: HeaderMap, data: Value) -> Self {
        Self {
            status,
            headers,
            data,
        }
    }

    /// Response synthesized from a cache entry (200, no headers)
    #[must_use]
    pub fn cached(data: Value) -> Self {
        Self::new(StatusCode::OK, HeaderMap::new(), data)
    }

    /// Deserialize the body into a typed value
    ///
    /// # Errors
    /// Returns an error if the body does not match `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.data)
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

/// Decode a raw response body into a JSON value (see [`ApiResponse`]).
pub fn decode_body(bytes: &[u8]) -> Value {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Value::Null;
    }
    serde_json::from_slice(bytes)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(bytes).into_owned()))
}
