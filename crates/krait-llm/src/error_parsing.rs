//! Backend API error-body parsing and retryability classification.
//!
//! Taxonomy: rate-limit/overload conditions are recoverable; everything
//! else a backend rejects (bad request, auth) is permanent. Transport
//! failures are classified recoverable at the pipeline layer, not here.

use serde::Deserialize;

/// Parsed API error info.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApiErrorInfo {
    /// Human-readable message.
    pub message: String,
    /// Backend error code/type, if present.
    pub code: Option<String>,
    /// Whether a retry without operator intervention is safe.
    pub retryable: bool,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: Option<ErrorBody>,
    message: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ErrorBody {
    Structured {
        message: Option<String>,
        #[serde(rename = "type")]
        error_type: Option<String>,
        code: Option<String>,
    },
    Plain(String),
}

/// HTTP statuses safe to retry.
fn retryable_status(status: u16) -> bool {
    matches!(status, 408 | 429 | 500 | 502 | 503 | 529)
}

/// Error codes that indicate transient overload.
pub(crate) fn retryable_code(code: &str) -> bool {
    code.contains("rate_limit") || code.contains("overloaded") || code.contains("server_error")
}

/// Parse a `retry-after` header value (whole seconds) into milliseconds.
pub(crate) fn parse_retry_after(value: &str) -> Option<u64> {
    value.trim().parse::<u64>().ok().map(|secs| secs * 1000)
}

/// Parse an error response body.
///
/// Tolerates any body shape: a structured `{"error": {...}}` envelope, a
/// plain `{"error": "..."}` string, a bare `{"message": "..."}`, or
/// unparseable text (used verbatim as the message).
#[must_use]
pub fn parse_api_error(body: &str, status: u16) -> ApiErrorInfo {
    let fallback_message = if body.trim().is_empty() {
        format!("HTTP {status}")
    } else {
        body.trim().to_owned()
    };

    let Ok(envelope) = serde_json::from_str::<ErrorEnvelope>(body) else {
        return ApiErrorInfo {
            message: fallback_message,
            code: None,
            retryable: retryable_status(status),
        };
    };

    let (message, code) = match envelope.error {
        Some(ErrorBody::Structured {
            message,
            error_type,
            code,
        }) => (message, code.or(error_type)),
        Some(ErrorBody::Plain(message)) => (Some(message), None),
        None => (envelope.message, None),
    };

    let retryable =
        retryable_status(status) || code.as_deref().is_some_and(retryable_code);

    ApiErrorInfo {
        message: message.unwrap_or(fallback_message),
        code,
        retryable,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anthropic_overloaded_is_retryable() {
        let info = parse_api_error(
            r#"{"error": {"type": "overloaded_error", "message": "Overloaded"}}"#,
            529,
        );
        assert_eq!(info.message, "Overloaded");
        assert_eq!(info.code.as_deref(), Some("overloaded_error"));
        assert!(info.retryable);
    }

    #[test]
    fn rate_limit_code_retryable_even_on_odd_status() {
        let info = parse_api_error(
            r#"{"error": {"type": "rate_limit_error", "message": "slow down"}}"#,
            400,
        );
        assert!(info.retryable);
    }

    #[test]
    fn auth_error_is_permanent() {
        let info = parse_api_error(
            r#"{"error": {"type": "authentication_error", "message": "bad key"}}"#,
            401,
        );
        assert_eq!(info.message, "bad key");
        assert!(!info.retryable);
    }

    #[test]
    fn plain_string_error() {
        let info = parse_api_error(r#"{"error": "model not found"}"#, 404);
        assert_eq!(info.message, "model not found");
        assert!(info.code.is_none());
        assert!(!info.retryable);
    }

    #[test]
    fn bare_message_field() {
        let info = parse_api_error(r#"{"message": "loading model"}"#, 503);
        assert_eq!(info.message, "loading model");
        assert!(info.retryable);
    }

    #[test]
    fn unparseable_body_used_verbatim() {
        let info = parse_api_error("<html>bad gateway</html>", 502);
        assert_eq!(info.message, "<html>bad gateway</html>");
        assert!(info.retryable);
    }

    #[test]
    fn empty_body_falls_back_to_status() {
        let info = parse_api_error("", 500);
        assert_eq!(info.message, "HTTP 500");
        assert!(info.retryable);
    }

    #[test]
    fn bad_request_not_retryable() {
        let info = parse_api_error(
            r#"{"error": {"type": "invalid_request_error", "message": "bad schema"}}"#,
            400,
        );
        assert!(!info.retryable);
    }

    #[test]
    fn retry_after_seconds_become_milliseconds() {
        assert_eq!(parse_retry_after("2"), Some(2000));
        assert_eq!(parse_retry_after(" 30 "), Some(30_000));
        // HTTP-date form is not supported; treat as absent.
        assert_eq!(parse_retry_after("Wed, 21 Oct 2026 07:28:00 GMT"), None);
        assert_eq!(parse_retry_after(""), None);
    }
}
