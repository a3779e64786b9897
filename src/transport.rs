//! The network seam.
//!
//! [`Transport`] is the only thing in the crate that performs I/O. The default
//! implementation, [`HttpTransport`], is backed by `reqwest`; tests substitute
//! an in-memory double to script failures deterministically.

use http::{HeaderMap, Method, StatusCode};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use url::Url;

/// A boxed, sendable future.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A fully resolved request ready to be put on the wire.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<Vec<u8>>,
    /// Upper bound for this single attempt.
    pub timeout: Duration,
}

/// The raw outcome of one attempt that reached the server.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: String,
}

impl RawResponse {
    pub fn new(status: StatusCode, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }
}

/// Network-level failure categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// The attempt did not complete within its timeout.
    Timeout,
    /// The connection could not be established, was reset, or dropped before
    /// the response body was fully read.
    Connect,
    /// The host name could not be resolved.
    Dns,
    /// The request could not be built (malformed URL, bad header, ...).
    InvalidRequest,
    /// Anything else the transport reports.
    Other,
}

impl TransportErrorKind {
    /// Timeout-class failures are worth another attempt, the rest are not.
    pub fn is_recoverable(self) -> bool {
        matches!(self, TransportErrorKind::Timeout | TransportErrorKind::Connect)
    }
}

impl std::fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TransportErrorKind::Timeout => "timeout",
            TransportErrorKind::Connect => "connection failed",
            TransportErrorKind::Dns => "dns resolution failed",
            TransportErrorKind::InvalidRequest => "invalid request",
            TransportErrorKind::Other => "transport failure",
        };
        f.write_str(name)
    }
}

/// A failure below the HTTP layer.
#[derive(thiserror::Error, Debug, Clone)]
#[error("{kind}: {message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn timeout(after: Duration) -> Self {
        Self::new(
            TransportErrorKind::Timeout,
            format!("attempt exceeded {}ms", after.as_millis()),
        )
    }

    // Body and decode errors surface when the stream breaks mid-body.
    fn from_reqwest(err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            TransportErrorKind::Timeout
        } else if err.is_builder() {
            TransportErrorKind::InvalidRequest
        } else if mentions_dns(&err) {
            TransportErrorKind::Dns
        } else if err.is_connect() || err.is_request() || err.is_body() || err.is_decode() {
            TransportErrorKind::Connect
        } else {
            TransportErrorKind::Other
        };
        Self::new(kind, err.to_string())
    }
}

// hyper-util surfaces resolver failures only through the error chain text.
fn mentions_dns(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        if e.to_string().contains("dns error") {
            return true;
        }
        current = e.source();
    }
    false
}

/// Sends one HTTP request and returns whatever the server answered.
///
/// Implementations must not retry, classify statuses or decode bodies; that is
/// the pipeline's job.
pub trait Transport: Send + Sync + 'static {
    fn send(&self, request: HttpRequest) -> BoxFuture<'_, Result<RawResponse, TransportError>>;
}

/// [`Transport`] backed by a pooled `reqwest::Client`.
#[derive(Debug, Clone, Default)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Transport for HttpTransport {
    fn send(&self, request: HttpRequest) -> BoxFuture<'_, Result<RawResponse, TransportError>> {
        Box::pin(async move {
            let mut builder = self
                .client
                .request(request.method, request.url)
                .headers(request.headers)
                .timeout(request.timeout);

            if let Some(body) = request.body {
                builder = builder.body(body);
            }

            let response = builder.send().await.map_err(TransportError::from_reqwest)?;
            let status = response.status();
            let headers = response.headers().clone();
            let body = response.text().await.map_err(TransportError::from_reqwest)?;

            Ok(RawResponse {
                status,
                headers,
                body,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Wrapped(Box<dyn std::error::Error + 'static>);

    impl std::fmt::Display for Wrapped {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str("client error (Connect)")
        }
    }

    impl std::error::Error for Wrapped {
        fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
            Some(self.0.as_ref())
        }
    }

    #[test]
    fn dns_failures_are_found_in_the_source_chain() {
        let inner: Box<dyn std::error::Error> =
            "dns error: failed to lookup address information".into();
        assert!(mentions_dns(&Wrapped(inner)));

        let inner: Box<dyn std::error::Error> = "Connection refused (os error 111)".into();
        assert!(!mentions_dns(&Wrapped(inner)));
    }

    #[test]
    fn only_timeout_class_errors_are_recoverable() {
        assert!(TransportErrorKind::Timeout.is_recoverable());
        assert!(TransportErrorKind::Connect.is_recoverable());
        assert!(!TransportErrorKind::Dns.is_recoverable());
        assert!(!TransportErrorKind::InvalidRequest.is_recoverable());
        assert!(!TransportErrorKind::Other.is_recoverable());
    }

    fn get(addr: std::net::SocketAddr) -> HttpRequest {
        HttpRequest {
            method: Method::GET,
            url: Url::parse(&format!("http://{}/", addr)).unwrap(),
            headers: HeaderMap::new(),
            body: None,
            timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn truncated_body_is_a_connect_error() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            socket
                .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 100\r\n\r\n{\"id\"")
                .await
                .unwrap();
        });

        let err = HttpTransport::default().send(get(addr)).await.unwrap_err();
        assert_eq!(err.kind, TransportErrorKind::Connect);
        assert!(err.kind.is_recoverable());
    }

    #[tokio::test]
    async fn unreachable_host_is_a_connect_error() {
        let addr = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap()
        };
        let err = HttpTransport::default().send(get(addr)).await.unwrap_err();
        assert!(
            matches!(
                err.kind,
                TransportErrorKind::Connect | TransportErrorKind::Timeout
            ),
            "unexpected kind {:?}",
            err.kind
        );
    }
}
