//! The client handle application call sites hold.
//!
//! A [`Client`] is cheap to clone and is meant to be shared: every clone uses
//! the same transport, configuration and credential state, so a refresh
//! triggered by one request benefits all of them.

use crate::{
    executor::RequestExecutor,
    policy::RetryPolicy,
    refresh::{Credential, CredentialRefresher, RefreshError, TokenRefreshCoordinator},
    request::Request,
    retry::RetryCoordinator,
    transport::{HttpTransport, Transport},
    validator, Error, Response, Result,
};
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// A resilient HTTP API client.
///
/// # Examples
///
/// ```no_run
/// use steadfast::{Client, Credential, RetryPolicy};
/// use steadfast::refresh::BoxError;
/// use serde::Deserialize;
/// use std::time::Duration;
///
/// #[derive(Deserialize)]
/// struct Inbox {
///     unread: u32,
/// }
///
/// # async fn fetch_new_token() -> Result<Credential, BoxError> { unimplemented!() }
/// # async fn example() -> Result<(), steadfast::Error> {
/// let client = Client::builder()
///     .base_url("https://api.example.com/v1/")?
///     .credential(Credential::bearer("initial-token"))
///     .credential_refresher(|| fetch_new_token())
///     .retry_policy(RetryPolicy::default().with_max_retries(5))
///     .timeout(Duration::from_secs(10))
///     .build()?;
///
/// let inbox = client.get::<Inbox>("inbox").await?;
/// println!("{} unread", inbox.unread);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct Client {
    inner: Arc<ClientInner>,
}

#[derive(Debug)]
struct ClientInner {
    executor: RequestExecutor,
    refresh: TokenRefreshCoordinator,
    policy: RetryPolicy,
}

impl Client {
    /// Creates a new `ClientBuilder` for configuring a client.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use steadfast::Client;
    ///
    /// # fn example() -> Result<(), steadfast::Error> {
    /// let client = Client::builder()
    ///     .base_url("https://api.example.com")?
    ///     .build()?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// The policy used when none is given per call.
    pub fn policy(&self) -> &RetryPolicy {
        &self.inner.policy
    }

    /// Executes a logical request with the client's default policy and decodes
    /// the body of the successful response into `T`.
    pub async fn execute<T>(&self, request: Request) -> Result<Response<T>>
    where
        T: DeserializeOwned,
    {
        self.execute_with_policy(request, &self.inner.policy).await
    }

    /// Executes a logical request with an explicit policy.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] without sending anything if the
    /// policy has a zero timeout. Otherwise fails with the terminal error of
    /// the retry loop, or [`Error::DecodeFailure`] if the body does not
    /// decode into `T`.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use steadfast::{Client, Request, RetryPolicy};
    /// use http::Method;
    ///
    /// # async fn example(client: Client) -> Result<(), steadfast::Error> {
    /// let request = Request::new(Method::POST, "/messages/send")
    ///     .with_json(&serde_json::json!({ "to": "a@example.com", "body": "hi" }))?;
    ///
    /// // Sending twice would duplicate the message, so do not retry.
    /// let sent = client
    ///     .execute_with_policy::<serde_json::Value>(request, &RetryPolicy::no_retries())
    ///     .await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn execute_with_policy<T>(
        &self,
        mut request: Request,
        policy: &RetryPolicy,
    ) -> Result<Response<T>>
    where
        T: DeserializeOwned,
    {
        policy.validate()?;
        let coordinator = RetryCoordinator::new(&self.inner.executor, &self.inner.refresh, policy);
        let completed = match coordinator.execute(&mut request).await {
            Ok(completed) => completed,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    method = %request.method,
                    target = %request.target,
                    attempts = e.attempts(),
                    "Request failed"
                );
                return Err(e);
            }
        };

        match validator::decode::<T>(&completed.raw) {
            Ok(data) => Ok(Response {
                data,
                raw_body: completed.raw.body,
                status: completed.raw.status,
                headers: completed.raw.headers,
                elapsed: completed.elapsed,
                attempts: completed.attempts,
                refreshed: completed.refreshed,
            }),
            Err(e) => {
                tracing::error!(
                    error = %e,
                    raw_response = %completed.raw.body,
                    "Failed to decode response"
                );
                Err(Error::DecodeFailure {
                    status: completed.raw.status,
                    serde_error: e.to_string(),
                    context: crate::error::FailureContext {
                        attempts: completed.attempts,
                        last_status: Some(completed.raw.status),
                        elapsed: completed.elapsed,
                    },
                    raw_body: completed.raw.body,
                })
            }
        }
    }

    /// Refreshes the credential now, joining a refresh already in flight.
    pub async fn refresh_credentials(&self) -> std::result::Result<(), RefreshError> {
        self.inner.refresh.refresh().await
    }

    /// The credential currently attached to requests.
    pub async fn credential(&self) -> Option<Credential> {
        self.inner.refresh.current().await.0
    }

    /// Makes a GET request and decodes the body into `T`.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use steadfast::{Client, Response};
    /// use serde::Deserialize;
    ///
    /// #[derive(Deserialize)]
    /// struct User {
    ///     id: u64,
    ///     name: String,
    /// }
    ///
    /// # async fn example(client: Client) -> Result<(), steadfast::Error> {
    /// let user: Response<User> = client.get("/users/123").await?;
    /// println!("{} after {} attempts", user.data.name, user.attempts);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn get<T>(&self, target: impl Into<String>) -> Result<Response<T>>
    where
        T: DeserializeOwned,
    {
        self.execute(Request::new(Method::GET, target)).await
    }

    /// Makes a POST request with a JSON body and decodes the response into `T`.
    ///
    /// The default policy retries a POST like any other request. Pass
    /// [`RetryPolicy::no_retries`] to [`execute_with_policy`](Self::execute_with_policy)
    /// when a repeated send would have side effects.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use steadfast::{Client, Response};
    /// use serde::{Deserialize, Serialize};
    ///
    /// #[derive(Serialize)]
    /// struct NewDraft<'a> {
    ///     subject: &'a str,
    /// }
    ///
    /// #[derive(Deserialize)]
    /// struct Draft {
    ///     id: String,
    /// }
    ///
    /// # async fn example(client: Client) -> Result<(), steadfast::Error> {
    /// let draft: Response<Draft> = client.post("/drafts", &NewDraft { subject: "Hi" }).await?;
    /// println!("created {}", draft.data.id);
    /// # Ok(())
    /// # }
    /// ```
    ///
    /// # Errors
    ///
    /// Returns [`Error::Serialization`] if `body` cannot be encoded.
    pub async fn post<B, T>(&self, target: impl Into<String>, body: &B) -> Result<Response<T>>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.execute(Request::new(Method::POST, target).with_json(body)?).await
    }

    /// Makes a PUT request with a JSON body and decodes the response into `T`.
    pub async fn put<B, T>(&self, target: impl Into<String>, body: &B) -> Result<Response<T>>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.execute(Request::new(Method::PUT, target).with_json(body)?).await
    }

    /// Makes a PATCH request with a JSON body and decodes the response into `T`.
    pub async fn patch<B, T>(&self, target: impl Into<String>, body: &B) -> Result<Response<T>>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.execute(Request::new(Method::PATCH, target).with_json(body)?).await
    }

    /// Makes a DELETE request. An empty body decodes as `()`.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # async fn example(client: steadfast::Client) -> Result<(), steadfast::Error> {
    /// client.delete::<()>("/drafts/42").await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn delete<T>(&self, target: impl Into<String>) -> Result<Response<T>>
    where
        T: DeserializeOwned,
    {
        self.execute(Request::new(Method::DELETE, target)).await
    }
}

/// Builder for configuring and creating a [`Client`].
pub struct ClientBuilder {
    base_url: Option<Url>,
    default_headers: HeaderMap,
    policy: RetryPolicy,
    credential: Option<Credential>,
    refresher: Option<Arc<dyn CredentialRefresher>>,
    transport: Option<Arc<dyn Transport>>,
}

impl ClientBuilder {
    /// Creates a builder with the default [`RetryPolicy`], no base URL and no
    /// credential.
    pub fn new() -> Self {
        Self {
            base_url: None,
            default_headers: HeaderMap::new(),
            policy: RetryPolicy::default(),
            credential: None,
            refresher: None,
            transport: None,
        }
    }

    /// Sets the base URL relative request targets are resolved against.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid.
    pub fn base_url(mut self, url: impl AsRef<str>) -> Result<Self> {
        self.base_url = Some(Url::parse(url.as_ref())?);
        Ok(self)
    }

    /// Adds a header sent with every request.
    ///
    /// # Errors
    ///
    /// Returns an error if the header name or value is invalid.
    pub fn default_header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Result<Self> {
        let name = HeaderName::try_from(name.as_ref())
            .map_err(|e| Error::Configuration(format!("Invalid header name: {}", e)))?;
        let value = HeaderValue::try_from(value.as_ref())
            .map_err(|e| Error::Configuration(format!("Invalid header value: {}", e)))?;
        self.default_headers.insert(name, value);
        Ok(self)
    }

    /// Replaces the whole retry policy, timeouts included.
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Sets the per-attempt timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.policy.request_timeout = timeout;
        self
    }

    /// Sets the cumulative timeout across all attempts of one logical request.
    pub fn resource_timeout(mut self, timeout: Duration) -> Self {
        self.policy.resource_timeout = timeout;
        self
    }

    /// Sets the credential attached to requests until the first refresh.
    pub fn credential(mut self, credential: Credential) -> Self {
        self.credential = Some(credential);
        self
    }

    /// Sets the collaborator called when the server answers `401`.
    pub fn credential_refresher<R: CredentialRefresher>(mut self, refresher: R) -> Self {
        self.refresher = Some(Arc::new(refresher));
        self
    }

    /// Replaces the `reqwest`-backed transport.
    pub fn transport<T: Transport>(mut self, transport: T) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    /// Builds the configured `Client`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured timeouts are zero or the HTTP client
    /// cannot be created.
    pub fn build(self) -> Result<Client> {
        self.policy.validate()?;

        let transport = match self.transport {
            Some(transport) => transport,
            None => {
                let http_client = reqwest::Client::builder().build().map_err(|e| {
                    Error::Configuration(format!("Failed to build HTTP client: {}", e))
                })?;
                Arc::new(HttpTransport::new(http_client))
            }
        };

        Ok(Client {
            inner: Arc::new(ClientInner {
                executor: RequestExecutor::new(transport, self.base_url, self.default_headers),
                refresh: TokenRefreshCoordinator::new(self.credential, self.refresher),
                policy: self.policy,
            }),
        })
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}
