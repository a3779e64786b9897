//! Turning raw transport outcomes into typed classifications.

use http::{HeaderMap, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::BTreeSet;

use crate::policy::default_retryable_statuses;
use crate::rate_limit::RateLimitInfo;
use crate::transport::{RawResponse, TransportError};

/// What the pipeline should do with the outcome of one attempt.
#[derive(Debug, Clone)]
pub enum ClassifiedOutcome {
    /// `2xx`. The body has not been decoded yet.
    Success(RawResponse),

    /// A transient failure: a retryable status, or a timeout-class transport error.
    Retryable {
        status: Option<StatusCode>,
        message: String,
    },

    /// `401`. The credential needs refreshing.
    AuthExpired { message: String },

    /// `429`.
    RateLimited { info: RateLimitInfo, message: String },

    /// A status that will not improve with retrying.
    Permanent {
        status: StatusCode,
        message: String,
        raw_body: String,
    },

    /// A transport failure that cannot be recovered from by retrying.
    TransportError(TransportError),
}

impl ClassifiedOutcome {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ClassifiedOutcome::Success(raw) => Some(raw.status),
            ClassifiedOutcome::Retryable { status, .. } => *status,
            ClassifiedOutcome::AuthExpired { .. } => Some(StatusCode::UNAUTHORIZED),
            ClassifiedOutcome::RateLimited { .. } => Some(StatusCode::TOO_MANY_REQUESTS),
            ClassifiedOutcome::Permanent { status, .. } => Some(*status),
            ClassifiedOutcome::TransportError(_) => None,
        }
    }
}

/// Classifies responses against a set of retryable statuses.
#[derive(Debug, Clone)]
pub struct ResponseValidator {
    retryable_statuses: BTreeSet<u16>,
}

impl Default for ResponseValidator {
    fn default() -> Self {
        Self::new(default_retryable_statuses())
    }
}

impl ResponseValidator {
    pub fn new(retryable_statuses: BTreeSet<u16>) -> Self {
        Self { retryable_statuses }
    }

    /// Classifies a response that reached the server.
    ///
    /// ```
    /// use steadfast::validator::{ClassifiedOutcome, ResponseValidator};
    /// use http::{HeaderMap, StatusCode};
    ///
    /// let validator = ResponseValidator::default();
    /// let body = r#"{"message":"no such user"}"#.to_string();
    /// let outcome = validator.classify(StatusCode::NOT_FOUND, HeaderMap::new(), body);
    ///
    /// match outcome {
    ///     ClassifiedOutcome::Permanent { message, .. } => assert_eq!(message, "no such user"),
    ///     other => panic!("unexpected {:?}", other),
    /// }
    /// ```
    pub fn classify(
        &self,
        status: StatusCode,
        headers: HeaderMap,
        body: String,
    ) -> ClassifiedOutcome {
        if status.is_success() {
            return ClassifiedOutcome::Success(RawResponse {
                status,
                headers,
                body,
            });
        }

        let message = error_message(status, &body);
        let code = status.as_u16();

        if status == StatusCode::UNAUTHORIZED {
            ClassifiedOutcome::AuthExpired { message }
        } else if status == StatusCode::TOO_MANY_REQUESTS
            && self.retryable_statuses.contains(&code)
        {
            ClassifiedOutcome::RateLimited {
                info: RateLimitInfo::from_headers(&headers),
                message,
            }
        } else if self.retryable_statuses.contains(&code) {
            ClassifiedOutcome::Retryable {
                status: Some(status),
                message,
            }
        } else {
            ClassifiedOutcome::Permanent {
                status,
                message,
                raw_body: body,
            }
        }
    }

    /// Classifies the result of one transport attempt.
    pub fn classify_result(
        &self,
        result: Result<RawResponse, TransportError>,
    ) -> ClassifiedOutcome {
        match result {
            Ok(raw) => self.classify(raw.status, raw.headers, raw.body),
            Err(err) if err.kind.is_recoverable() => ClassifiedOutcome::Retryable {
                status: None,
                message: err.to_string(),
            },
            Err(err) => ClassifiedOutcome::TransportError(err),
        }
    }
}

/// Decodes a successful body into the caller's expected shape.
///
/// An empty body decodes as JSON `null`, so `()` and `Option<T>` accept `204`
/// responses.
pub fn decode<T: DeserializeOwned>(raw: &RawResponse) -> Result<T, serde_json::Error> {
    let body = raw.body.trim();
    if body.is_empty() {
        serde_json::from_str("null")
    } else {
        serde_json::from_str(body)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ErrorDetail {
    Text(String),
    Nested { message: String },
}

#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
    error_description: Option<String>,
    detail: Option<String>,
    error: Option<ErrorDetail>,
}

/// Best-effort human-readable message for an error response.
///
/// Known structured shapes win; otherwise the raw text, otherwise the status reason.
pub fn error_message(status: StatusCode, body: &str) -> String {
    if let Ok(parsed) = serde_json::from_str::<ErrorBody>(body) {
        let structured = parsed
            .message
            .or(parsed.error_description)
            .or(parsed.detail)
            .or(parsed.error.map(|e| match e {
                ErrorDetail::Text(text) => text,
                ErrorDetail::Nested { message } => message,
            }));
        if let Some(message) = structured {
            return message;
        }
    }

    let trimmed = body.trim();
    if !trimmed.is_empty() {
        return trimmed.to_string();
    }

    status
        .canonical_reason()
        .map(str::to_string)
        .unwrap_or_else(|| status.as_str().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportErrorKind;
    use http::HeaderValue;

    fn classify(status: u16, body: &str) -> ClassifiedOutcome {
        ResponseValidator::default().classify(
            StatusCode::from_u16(status).unwrap(),
            HeaderMap::new(),
            body.to_string(),
        )
    }

    #[test]
    fn test_status_mapping() {
        assert!(matches!(classify(200, "{}"), ClassifiedOutcome::Success(_)));
        assert!(matches!(classify(204, ""), ClassifiedOutcome::Success(_)));
        assert!(matches!(classify(401, ""), ClassifiedOutcome::AuthExpired { .. }));
        assert!(matches!(classify(429, ""), ClassifiedOutcome::RateLimited { .. }));
        assert!(matches!(classify(408, ""), ClassifiedOutcome::Retryable { .. }));
        assert!(matches!(classify(500, ""), ClassifiedOutcome::Retryable { .. }));
        assert!(matches!(classify(503, ""), ClassifiedOutcome::Retryable { .. }));
        assert!(matches!(classify(501, ""), ClassifiedOutcome::Permanent { .. }));
        assert!(matches!(classify(400, ""), ClassifiedOutcome::Permanent { .. }));
        assert!(matches!(classify(404, ""), ClassifiedOutcome::Permanent { .. }));
    }

    #[test]
    fn test_rate_limited_carries_retry_after() {
        let mut headers = HeaderMap::new();
        headers.insert("retry-after", HeaderValue::from_static("10"));
        let outcome = ResponseValidator::default().classify(
            StatusCode::TOO_MANY_REQUESTS,
            headers,
            "slow down".to_string(),
        );

        match outcome {
            ClassifiedOutcome::RateLimited { info, message } => {
                assert_eq!(info.retry_after, Some(std::time::Duration::from_secs(10)));
                assert_eq!(message, "slow down");
            }
            other => panic!("expected RateLimited, got {:?}", other),
        }
    }

    #[test]
    fn test_429_outside_retryable_set_is_permanent() {
        let validator = ResponseValidator::new([503].into_iter().collect());
        let outcome =
            validator.classify(StatusCode::TOO_MANY_REQUESTS, HeaderMap::new(), String::new());
        assert!(matches!(outcome, ClassifiedOutcome::Permanent { .. }));
    }

    #[test]
    fn test_transport_errors() {
        let validator = ResponseValidator::default();

        let timeout = validator.classify_result(Err(TransportError::new(
            TransportErrorKind::Timeout,
            "slow",
        )));
        assert!(matches!(timeout, ClassifiedOutcome::Retryable { status: None, .. }));

        let malformed = validator.classify_result(Err(TransportError::new(
            TransportErrorKind::InvalidRequest,
            "relative URL without a base",
        )));
        assert!(matches!(malformed, ClassifiedOutcome::TransportError(_)));

        let dns = validator.classify_result(Err(TransportError::new(
            TransportErrorKind::Dns,
            "no such host",
        )));
        assert!(matches!(dns, ClassifiedOutcome::TransportError(_)));
    }

    #[test]
    fn test_error_message_shapes() {
        let status = StatusCode::BAD_REQUEST;
        assert_eq!(error_message(status, r#"{"message":"bad field"}"#), "bad field");
        assert_eq!(
            error_message(status, r#"{"error":"invalid_grant","error_description":"expired"}"#),
            "expired"
        );
        assert_eq!(error_message(status, r#"{"error":{"message":"nested"}}"#), "nested");
        assert_eq!(error_message(status, r#"{"error":"plain"}"#), "plain");
        assert_eq!(error_message(status, r#"{"unrelated":1}"#), r#"{"unrelated":1}"#);
        assert_eq!(error_message(status, "  not json \n"), "not json");
        assert_eq!(error_message(status, ""), "Bad Request");
    }

    #[test]
    fn test_decode_empty_body_as_null() {
        let raw = RawResponse::new(StatusCode::NO_CONTENT, "");
        decode::<()>(&raw).unwrap();
        let missing: Option<u32> = decode(&raw).unwrap();
        assert_eq!(missing, None);
    }

    #[test]
    fn test_decode_preserves_fields() {
        let body = r#"{"id":7,"tags":["a","b"],"nested":{"flag":true,"ratio":0.5},"none":null}"#;
        let raw = RawResponse::new(StatusCode::OK, body);
        let value: serde_json::Value = decode(&raw).unwrap();
        let original: serde_json::Value = serde_json::from_str(body).unwrap();
        assert_eq!(value, original);
    }

    #[test]
    fn test_decode_failure() {
        let raw = RawResponse::new(StatusCode::OK, "<html>");
        assert!(decode::<serde_json::Value>(&raw).is_err());
    }
}
