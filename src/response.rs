//! Successful responses together with pipeline metadata.

use http::{HeaderMap, StatusCode};
use std::time::Duration;

/// A decoded successful response.
///
/// Besides the decoded `data`, it keeps the raw body and headers of the final
/// attempt and a summary of what the pipeline did to get there.
///
/// # Examples
///
/// ```no_run
/// use serde::Deserialize;
///
/// #[derive(Deserialize)]
/// struct Thread {
///     id: String,
///     subject: String,
/// }
///
/// # async fn example(client: steadfast::Client) -> Result<(), steadfast::Error> {
/// let response = client.get::<Thread>("/threads/42").await?;
///
/// println!("{}: {}", response.id, response.subject);
/// if response.was_retried() {
///     println!("took {} attempts over {:?}", response.attempts, response.elapsed);
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Response<T> {
    pub data: T,

    /// The body exactly as received.
    pub raw_body: String,

    pub status: StatusCode,

    pub headers: HeaderMap,

    /// Wall-clock time across all attempts, backoff sleeps and refreshes.
    pub elapsed: Duration,

    /// Transport attempts made, `1` when the first attempt succeeded.
    pub attempts: u32,

    /// Whether this request started or joined a credential refresh.
    pub refreshed: bool,
}

impl<T> Response<T> {
    /// Maps the response data, keeping the metadata.
    pub fn map<U, F>(self, f: F) -> Response<U>
    where
        F: FnOnce(T) -> U,
    {
        Response {
            data: f(self.data),
            raw_body: self.raw_body,
            status: self.status,
            headers: self.headers,
            elapsed: self.elapsed,
            attempts: self.attempts,
            refreshed: self.refreshed,
        }
    }

    pub fn into_data(self) -> T {
        self.data
    }

    /// Returns `true` if more than one transport attempt was needed.
    pub fn was_retried(&self) -> bool {
        self.attempts > 1
    }

    /// Returns a header of the final response as a string, if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)?.to_str().ok()
    }
}

impl<T> AsRef<T> for Response<T> {
    fn as_ref(&self) -> &T {
        &self.data
    }
}

impl<T> std::ops::Deref for Response<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.data
    }
}
