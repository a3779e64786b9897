//! Error types surfaced by the pipeline.
//!
//! Retries, backoff and credential refresh are invisible to the caller while
//! they are in progress. Only a terminal outcome is returned, and every
//! terminal pipeline error carries a [`FailureContext`] describing how far the
//! pipeline got. [`Error::recovery`] tells the caller what to do next.

use http::StatusCode;
use std::time::Duration;

use crate::refresh::RefreshError;
use crate::transport::TransportErrorKind;

/// How far a logical request got before it failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureContext {
    /// Transport attempts made, including a refresh-triggered retry.
    pub attempts: u32,
    /// The last HTTP status observed, if any attempt reached the server.
    pub last_status: Option<StatusCode>,
    /// Wall-clock time from the first attempt to the terminal outcome.
    pub elapsed: Duration,
}

/// The action a caller should take after a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// The failure was transient; try again later.
    RetryLater,
    /// Credentials are no longer valid; run the full authentication flow.
    Reauthenticate,
    /// Retrying will not help.
    Fail,
}

/// The main error type.
///
/// # Examples
///
/// ```no_run
/// use steadfast::{Client, Error, Recovery};
///
/// # async fn example() -> Result<(), Error> {
/// let client = Client::builder().base_url("https://api.example.com")?.build()?;
///
/// match client.get::<serde_json::Value>("/inbox").await {
///     Ok(response) => println!("{:?}", response.data),
///     Err(e) if e.recovery() == Recovery::Reauthenticate => {
///         eprintln!("session expired, signing in again");
///     }
///     Err(Error::PermanentFailure { status, message, .. }) => {
///         eprintln!("request rejected ({status}): {message}");
///     }
///     Err(e) => eprintln!("failed after {:?} attempts: {e}", e.attempts()),
/// }
/// # Ok(())
/// # }
/// ```
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Retries were exhausted (or the resource timeout elapsed) on retryable
    /// statuses or timeout-class transport failures.
    #[error("Transient failure after {} attempt(s): {message}", .context.attempts)]
    TransientFailure {
        message: String,
        context: FailureContext,
    },

    /// Retries were exhausted while the server kept rate limiting.
    #[error("Rate limited after {} attempt(s): {message}", .context.attempts)]
    RateLimited {
        /// The last wait the server asked for, if it gave one.
        retry_after: Option<Duration>,
        message: String,
        context: FailureContext,
    },

    /// The credential was rejected and could not be refreshed.
    #[error("Authentication required: {reason}")]
    AuthenticationRequired {
        reason: String,
        /// Set when the refresh itself failed.
        #[source]
        source: Option<RefreshError>,
        context: FailureContext,
    },

    /// The server returned a status that will not improve with retrying.
    #[error("HTTP error {status}: {message}")]
    PermanentFailure {
        status: StatusCode,
        /// Structured error message when the body had one, otherwise the raw text.
        message: String,
        raw_body: String,
        context: FailureContext,
    },

    /// The request succeeded but the body did not match the expected shape.
    #[error("Failed to decode response (status {status}): {serde_error}")]
    DecodeFailure {
        status: StatusCode,
        raw_body: String,
        serde_error: String,
        context: FailureContext,
    },

    /// A transport failure retrying cannot fix (malformed URL, DNS failure, ...).
    #[error("Transport error ({kind}): {message}")]
    TransportUnrecoverable {
        kind: TransportErrorKind,
        message: String,
        context: FailureContext,
    },

    /// Invalid client or request configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// An invalid URL was provided at construction time.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// The request body could not be encoded.
    #[error("Failed to serialize request: {0}")]
    Serialization(String),
}

impl Error {
    /// Pipeline metadata for errors produced by a logical request.
    pub fn context(&self) -> Option<&FailureContext> {
        match self {
            Error::TransientFailure { context, .. }
            | Error::RateLimited { context, .. }
            | Error::AuthenticationRequired { context, .. }
            | Error::PermanentFailure { context, .. }
            | Error::DecodeFailure { context, .. }
            | Error::TransportUnrecoverable { context, .. } => Some(context),
            Error::Configuration(_) | Error::InvalidUrl(_) | Error::Serialization(_) => None,
        }
    }

    pub fn attempts(&self) -> Option<u32> {
        self.context().map(|c| c.attempts)
    }

    pub fn last_status(&self) -> Option<StatusCode> {
        self.context().and_then(|c| c.last_status)
    }

    pub fn elapsed(&self) -> Option<Duration> {
        self.context().map(|c| c.elapsed)
    }

    /// The raw response body, for errors that have one.
    pub fn raw_response(&self) -> Option<&str> {
        match self {
            Error::PermanentFailure { raw_body, .. } | Error::DecodeFailure { raw_body, .. } => {
                Some(raw_body)
            }
            _ => None,
        }
    }

    /// The server-requested wait of the last rate-limited attempt.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Error::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    pub fn recovery(&self) -> Recovery {
        match self {
            Error::TransientFailure { .. } | Error::RateLimited { .. } => Recovery::RetryLater,
            Error::AuthenticationRequired { .. } => Recovery::Reauthenticate,
            _ => Recovery::Fail,
        }
    }

    /// Returns `true` if trying the whole logical request again later may succeed.
    pub fn is_retryable(&self) -> bool {
        self.recovery() == Recovery::RetryLater
    }
}

/// A specialized `Result` type for pipeline calls.
pub type Result<T> = std::result::Result<T, Error>;
