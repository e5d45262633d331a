//! Turning a failed attempt into a retry decision and a caller-facing error.

use crate::config::RetryPolicy;
use crate::error::{DispatchError, TransportError};
use serde_json::Value;

/// Message used when the error body carries nothing readable
pub const DEFAULT_ERROR_MESSAGE: &str = "An unexpected error occurred";

/// Default retry heuristic: the server answered, its status is retryable
/// under `policy`, and fewer than `policy.max_retries` retries were made.
pub fn default_should_retry(error: &TransportError, attempt: u32, policy: &RetryPolicy) -> bool {
    error
        .status()
        .is_some_and(|status| policy.allows_status(status) && attempt < policy.max_retries)
}

/// Extract a human-readable message from an error response body.
///
/// Looks at `message` (a string, or an array of strings joined by newlines),
/// then at `errors[].message` (joined by newlines).
pub fn extract_message(data: &Value) -> String {
    if let Some(message) = data.get("message") {
        match message {
            Value::String(s) if !s.is_empty() => return s.clone(),
            Value::Array(items) => {
                let lines: Vec<&str> = items.iter().filter_map(Value::as_str).collect();
                if !lines.is_empty() {
                    return lines.join("\n");
                }
            }
            _ => {}
        }
    }

    if let Some(Value::Array(errors)) = data.get("errors") {
        let lines: Vec<&str> = errors
            .iter()
            .filter_map(|e| e.get("message").and_then(Value::as_str))
            .collect();
        if !lines.is_empty() {
            return lines.join("\n");
        }
    }

    DEFAULT_ERROR_MESSAGE.to_owned()
}

/// Find the configured session-expiry phrase matching one line of `message`.
pub fn match_session_expired<'a>(message: &str, phrases: &'a [String]) -> Option<&'a str> {
    message.lines().map(str::trim).find_map(|line| {
        phrases
            .iter()
            .find(|phrase| phrase.as_str() == line)
            .map(String::as_str)
    })
}

/// Caller-facing error for a failure that will not be retried.
///
/// Also returns the message extracted from the response body, when there
/// was a response, for the session-expiry check.
pub fn describe_failure(label: &str, error: &TransportError) -> (Option<String>, DispatchError) {
    match error {
        TransportError::Response(response) => {
            let message = extract_message(&response.data);
            let failure = DispatchError::Failed {
                label: label.to_owned(),
                status: response.status,
                message: message.clone(),
            };
            (Some(message), failure)
        }
        TransportError::Cancelled => (
            None,
            DispatchError::Cancelled {
                label: label.to_owned(),
            },
        ),
        other => (
            None,
            DispatchError::Network {
                label: label.to_owned(),
                message: other.to_string(),
            },
        ),
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::response::ApiResponse;
    use http::{HeaderMap, StatusCode};
    use serde_json::json;
    use std::time::Duration;

    fn failed(status: StatusCode, data: Value) -> TransportError {
        TransportError::Response(Box::new(ApiResponse::new(status, HeaderMap::new(), data)))
    }

    #[test]
    fn test_extract_message_shapes() {
        assert_eq!(extract_message(&json!({"message": "Not found"})), "Not found");
        assert_eq!(
            extract_message(&json!({"message": ["a is required", "b is required"]})),
            "a is required\nb is required"
        );
        assert_eq!(
            extract_message(&json!({"errors": [{"message": "first"}, {"message": "second"}]})),
            "first\nsecond"
        );
        assert_eq!(extract_message(&json!({"message": ""})), DEFAULT_ERROR_MESSAGE);
        assert_eq!(extract_message(&json!("<html>oops</html>")), DEFAULT_ERROR_MESSAGE);
        assert_eq!(extract_message(&Value::Null), DEFAULT_ERROR_MESSAGE);
    }

    #[test]
    fn test_default_retry_respects_blacklist_and_cap() {
        let policy = RetryPolicy::default();
        let unavailable = failed(StatusCode::SERVICE_UNAVAILABLE, Value::Null);

        assert!(default_should_retry(&unavailable, 0, &policy));
        assert!(default_should_retry(&unavailable, 1, &policy));
        assert!(!default_should_retry(&unavailable, 2, &policy));

        for status in [StatusCode::BAD_REQUEST, StatusCode::UNAUTHORIZED, StatusCode::INTERNAL_SERVER_ERROR] {
            assert!(!default_should_retry(&failed(status, Value::Null), 0, &policy));
        }
    }

    #[test]
    fn test_no_response_is_never_retried_by_default() {
        let policy = RetryPolicy::default();
        assert!(!default_should_retry(&TransportError::Timeout(Duration::from_secs(1)), 0, &policy));
        assert!(!default_should_retry(&TransportError::Cancelled, 0, &policy));
    }

    #[test]
    fn test_session_expired_matches_whole_line() {
        let phrases = vec!["Session expired".to_owned()];

        assert_eq!(match_session_expired("Session expired", &phrases), Some("Session expired"));
        assert_eq!(
            match_session_expired("Something else\nSession expired", &phrases),
            Some("Session expired")
        );
        assert_eq!(match_session_expired("Session expired soon", &phrases), None);
        assert_eq!(match_session_expired("", &phrases), None);
    }

    #[test]
    fn test_describe_failure() {
        let (message, error) = describe_failure(
            "Loading users",
            &failed(StatusCode::NOT_FOUND, json!({"message": "No such user"})),
        );
        assert_eq!(message.as_deref(), Some("No such user"));
        assert_eq!(
            error.to_string(),
            "'Loading users' failed with message \"No such user\""
        );

        let (message, error) = describe_failure("Loading users", &TransportError::Cancelled);
        assert!(message.is_none());
        assert_eq!(error.to_string(), "'Loading users' was cancelled: request cancelled");

        let (_, error) = describe_failure(
            "Loading users",
            &TransportError::Timeout(Duration::from_secs(5)),
        );
        assert!(matches!(error, DispatchError::Network { .. }));
        assert!(!error.to_string().contains("status code"));
    }
}
