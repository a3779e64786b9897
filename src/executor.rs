//! Issues single transport attempts.

use http::{header::AUTHORIZATION, HeaderMap};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use crate::refresh::Credential;
use crate::request::Request;
use crate::transport::{HttpRequest, RawResponse, Transport, TransportError, TransportErrorKind};

/// Resolves a [`Request`] against the client configuration and sends it once.
///
/// The executor enforces the per-attempt timeout. The cumulative budget across
/// attempts belongs to the retry coordinator.
#[derive(Clone)]
pub struct RequestExecutor {
    transport: Arc<dyn Transport>,
    base_url: Option<Url>,
    default_headers: HeaderMap,
}

impl std::fmt::Debug for RequestExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestExecutor")
            .field("base_url", &self.base_url)
            .field("default_headers", &self.default_headers)
            .finish_non_exhaustive()
    }
}

impl RequestExecutor {
    pub fn new(
        transport: Arc<dyn Transport>,
        base_url: Option<Url>,
        default_headers: HeaderMap,
    ) -> Self {
        Self {
            transport,
            base_url,
            default_headers,
        }
    }

    /// Sends one attempt of `request`, bounded by `timeout`.
    pub async fn send(
        &self,
        request: &Request,
        credential: Option<&Credential>,
        timeout: Duration,
    ) -> Result<RawResponse, TransportError> {
        let http_request = self.build(request, credential, timeout)?;

        tracing::debug!(
            method = %http_request.method,
            url = %http_request.url,
            attempt = request.attempt(),
            "Executing HTTP request"
        );

        match tokio::time::timeout(timeout, self.transport.send(http_request)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::timeout(timeout)),
        }
    }

    fn build(
        &self,
        request: &Request,
        credential: Option<&Credential>,
        timeout: Duration,
    ) -> Result<HttpRequest, TransportError> {
        let mut url = self.resolve(&request.target)?;
        if !request.query_params.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in &request.query_params {
                pairs.append_pair(key, value);
            }
        }

        let mut headers = self.default_headers.clone();
        for (name, value) in &request.headers {
            headers.insert(name, value.clone());
        }
        if let Some(credential) = credential {
            let value = credential.header_value().map_err(|e| {
                TransportError::new(
                    TransportErrorKind::InvalidRequest,
                    format!("credential is not a valid header value: {}", e),
                )
            })?;
            headers.insert(AUTHORIZATION, value);
        }

        Ok(HttpRequest {
            method: request.method.clone(),
            url,
            headers,
            body: request.body().map(<[u8]>::to_vec),
            timeout,
        })
    }

    fn resolve(&self, target: &str) -> Result<Url, TransportError> {
        let invalid =
            |message: String| TransportError::new(TransportErrorKind::InvalidRequest, message);

        match Url::parse(target) {
            Ok(url) => Ok(url),
            Err(url::ParseError::RelativeUrlWithoutBase) => match &self.base_url {
                Some(base) => base
                    .join(target)
                    .map_err(|e| invalid(format!("cannot join {:?} to {}: {}", target, base, e))),
                None => Err(invalid(format!(
                    "relative target {:?} and no base URL configured",
                    target
                ))),
            },
            Err(e) => Err(invalid(format!("malformed URL {:?}: {}", target, e))),
        }
    }
}
