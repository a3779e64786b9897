//! The logical request handed to the pipeline by a call site.

use http::{header, HeaderMap, HeaderName, HeaderValue, Method};
use serde::Serialize;

use crate::{Error, Result};

/// One caller-initiated operation.
///
/// A `Request` may be sent several times while the pipeline retries it. The
/// only field that changes between sends is the attempt counter, and only the
/// retry coordinator advances it.
#[derive(Debug, Clone)]
pub struct Request {
    /// The HTTP method.
    pub method: Method,

    /// Absolute URL, or a path resolved against the client's base URL.
    pub target: String,

    /// Request-specific headers. Keys are unique; later inserts replace earlier ones.
    pub headers: HeaderMap,

    /// Query parameters appended to the resolved URL.
    pub query_params: Vec<(String, String)>,

    body: Option<Vec<u8>>,
    attempt: u32,
}

impl Request {
    /// Creates a new request with the given method and target.
    pub fn new(method: Method, target: impl Into<String>) -> Self {
        Self {
            method,
            target: target.into(),
            headers: HeaderMap::new(),
            query_params: Vec::new(),
            body: None,
            attempt: 1,
        }
    }

    /// Shorthand for a `GET` request.
    pub fn get(target: impl Into<String>) -> Self {
        Self::new(Method::GET, target)
    }

    /// Adds a header to the request.
    ///
    /// # Errors
    ///
    /// Returns an error if the header name or value is invalid.
    pub fn with_header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Result<Self> {
        let name = HeaderName::try_from(name.as_ref())
            .map_err(|e| Error::Configuration(format!("Invalid header name: {}", e)))?;
        let value = HeaderValue::try_from(value.as_ref())
            .map_err(|e| Error::Configuration(format!("Invalid header value: {}", e)))?;
        self.headers.insert(name, value);
        Ok(self)
    }

    /// Appends a query parameter.
    pub fn with_query_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query_params.push((key.into(), value.into()));
        self
    }

    /// Serializes `body` as the JSON payload of the request.
    ///
    /// The body is encoded once here and replayed unchanged on every attempt.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Serialization`] if the value cannot be encoded as JSON.
    pub fn with_json<B: Serialize + ?Sized>(mut self, body: &B) -> Result<Self> {
        let bytes = serde_json::to_vec(body).map_err(|e| Error::Serialization(e.to_string()))?;
        self.headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        self.body = Some(bytes);
        Ok(self)
    }

    /// The encoded body, if any.
    pub fn body(&self) -> Option<&[u8]> {
        self.body.as_deref()
    }

    /// The current attempt number, starting at 1.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub(crate) fn advance_attempt(&mut self) {
        self.attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_request_starts_at_first_attempt() {
        let mut request = Request::get("/items");
        assert_eq!(request.attempt(), 1);
        request.advance_attempt();
        request.advance_attempt();
        assert_eq!(request.attempt(), 3);
    }

    #[test]
    fn json_body_sets_content_type() {
        let request = Request::new(Method::POST, "/items")
            .with_json(&serde_json::json!({ "name": "widget" }))
            .unwrap();

        assert_eq!(request.body(), Some(&br#"{"name":"widget"}"#[..]));
        assert_eq!(
            request.headers.get(header::CONTENT_TYPE).unwrap(),
            "application/json"
        );
    }

    #[test]
    fn header_keys_stay_unique() {
        let request = Request::get("/")
            .with_header("x-trace", "a")
            .unwrap()
            .with_header("X-Trace", "b")
            .unwrap();

        assert_eq!(request.headers.get_all("x-trace").iter().count(), 1);
        assert_eq!(request.headers.get("x-trace").unwrap(), "b");
    }

    #[test]
    fn invalid_header_is_a_configuration_error() {
        let result = Request::get("/").with_header("bad header", "v");
        assert!(matches!(result, Err(Error::Configuration(_))));
    }
}
