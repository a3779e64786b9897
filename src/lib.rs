//! # Steadfast - a resilient HTTP request pipeline
//!
//! Steadfast sits between application call sites and a remote HTTP API. One
//! call to [`Client::execute`] is one *logical request*; behind it the
//! pipeline may make several transport attempts:
//!
//! - transient failures (`408`, `5xx` except `501`, timeouts, refused
//!   connections) are retried with exponential backoff and jitter;
//! - `429 Too Many Requests` waits as long as the server's `Retry-After` asks;
//! - `401 Unauthorized` refreshes the credential exactly once, no matter how
//!   many requests hit it concurrently, and retries with the new credential;
//! - everything else fails immediately with an error that says what to do next.
//!
//! ## Quick Start
//!
//! ```no_run
//! use steadfast::{Client, Credential, RetryPolicy};
//! use steadfast::refresh::BoxError;
//! use serde::Deserialize;
//! use std::time::Duration;
//!
//! #[derive(Deserialize)]
//! struct Message {
//!     id: String,
//!     subject: String,
//! }
//!
//! async fn sign_in_again() -> Result<Credential, BoxError> {
//!     Ok(Credential::bearer("new-token"))
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), steadfast::Error> {
//!     let client = Client::builder()
//!         .base_url("https://api.example.com/v1/")?
//!         .credential(Credential::bearer("old-token"))
//!         .credential_refresher(sign_in_again)
//!         .retry_policy(
//!             RetryPolicy::default()
//!                 .with_max_retries(3)
//!                 .with_base_delay(Duration::from_secs(1))
//!                 .with_max_jitter(Duration::from_millis(500)),
//!         )
//!         .timeout(Duration::from_secs(30))
//!         .resource_timeout(Duration::from_secs(300))
//!         .build()?;
//!
//!     let message = client.get::<Message>("messages/latest").await?;
//!     println!("{} ({} attempts)", message.subject, message.attempts);
//!     Ok(())
//! }
//! ```
//!
//! ## Error Handling
//!
//! Only terminal outcomes reach the caller. Each error carries the number of
//! attempts, the last status seen and the elapsed time, and
//! [`Error::recovery`] maps it to one of three actions:
//!
//! | Error                                   | [`Recovery`]      |
//! |-----------------------------------------|-------------------|
//! | `TransientFailure`, `RateLimited`       | `RetryLater`      |
//! | `AuthenticationRequired`                | `Reauthenticate`  |
//! | `PermanentFailure`, `DecodeFailure`, `TransportUnrecoverable`, ... | `Fail` |
//!
//! ## Testing
//!
//! The network is behind the [`Transport`](transport::Transport) trait; pass a
//! double to [`ClientBuilder::transport`] to script failures deterministically.

mod client;
mod error;
pub mod executor;
pub mod policy;
pub mod rate_limit;
pub mod refresh;
mod request;
mod response;
pub mod retry;
pub mod transport;
pub mod validator;

pub use client::{Client, ClientBuilder};
pub use error::{Error, FailureContext, Recovery, Result};
pub use policy::RetryPolicy;
pub use refresh::{Credential, CredentialRefresher};
pub use request::Request;
pub use response::Response;
