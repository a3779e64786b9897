//! The retry loop for one logical request.
//!
//! [`RetryCoordinator::execute`] sends attempts strictly one after another
//! until it reaches a terminal outcome:
//!
//! - success and permanent failures return immediately;
//! - retryable failures back off exponentially with jitter, up to
//!   `max_retries` retries;
//! - rate-limited responses wait for the server's `Retry-After` when given,
//!   otherwise the same backoff, within the same retry budget;
//! - `401` triggers one shared credential refresh and exactly one extra
//!   attempt that does not count against the budget.
//!
//! All waiting happens within the policy's resource timeout. Dropping the
//! returned future cancels the request at whatever suspension point it is in.

use http::StatusCode;
use std::time::Duration;
use tokio::time::Instant;

use crate::error::{Error, FailureContext};
use crate::executor::RequestExecutor;
use crate::policy::RetryPolicy;
use crate::refresh::TokenRefreshCoordinator;
use crate::request::Request;
use crate::transport::RawResponse;
use crate::validator::{ClassifiedOutcome, ResponseValidator};

// Keeps deadline arithmetic clear of `Instant` overflow.
const MAX_RESOURCE_TIMEOUT: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// A successful terminal outcome, not yet decoded.
#[derive(Debug)]
pub struct Completed {
    pub raw: RawResponse,
    /// Transport attempts made, including a refresh-triggered retry.
    pub attempts: u32,
    pub elapsed: Duration,
    /// Whether this request started or joined a credential refresh. A request
    /// that merely picked up a credential refreshed by another one reports
    /// `false`.
    pub refreshed: bool,
}

/// The last failure seen, reported if the budget runs out.
enum LastFailure {
    Transient { message: String },
    RateLimited { retry_after: Option<Duration>, message: String },
}

/// Drives one logical request to a terminal outcome.
pub struct RetryCoordinator<'a> {
    executor: &'a RequestExecutor,
    refresh: &'a TokenRefreshCoordinator,
    policy: &'a RetryPolicy,
    validator: ResponseValidator,
}

impl<'a> RetryCoordinator<'a> {
    /// Creates a coordinator for one logical request.
    ///
    /// The classifier is built from `policy.retryable_statuses`, so a status
    /// removed from that set is treated as a permanent failure.
    pub fn new(
        executor: &'a RequestExecutor,
        refresh: &'a TokenRefreshCoordinator,
        policy: &'a RetryPolicy,
    ) -> Self {
        Self {
            executor,
            refresh,
            policy,
            validator: ResponseValidator::new(policy.retryable_statuses.clone()),
        }
    }

    /// Sends `request` until it succeeds, fails permanently, or runs out of
    /// retries or time.
    ///
    /// `request.attempt()` is advanced before every budgeted retry and is left
    /// at the last attempt made. The refresh-triggered retry after a `401`
    /// does not advance it.
    ///
    /// # Errors
    ///
    /// Returns the terminal error with a [`FailureContext`] describing the
    /// attempts made. Decoding the body is left to the caller.
    pub async fn execute(&self, request: &mut Request) -> Result<Completed, Error> {
        let started = Instant::now();
        let deadline = started + self.policy.resource_timeout.min(MAX_RESOURCE_TIMEOUT);
        let mut sends: u32 = 0;
        let mut last_status: Option<StatusCode> = None;
        let mut auth_retried = false;
        let mut refreshed = false;

        let context = |sends: u32, last_status: Option<StatusCode>| FailureContext {
            attempts: sends,
            last_status,
            elapsed: started.elapsed(),
        };

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(Error::TransientFailure {
                    message: "resource timeout elapsed".to_string(),
                    context: context(sends, last_status),
                });
            }

            let (credential, generation) = self.refresh.current().await;
            let attempt_timeout = self.policy.request_timeout.min(remaining);
            let result = self
                .executor
                .send(request, credential.as_ref(), attempt_timeout)
                .await;
            sends += 1;

            let outcome = self.validator.classify_result(result);
            if let Some(status) = outcome.status() {
                last_status = Some(status);
            }

            let (failure, server_wait) = match outcome {
                ClassifiedOutcome::Success(raw) => {
                    tracing::info!(
                        status = raw.status.as_u16(),
                        attempts = sends,
                        elapsed_ms = started.elapsed().as_millis(),
                        "Received HTTP response"
                    );
                    return Ok(Completed {
                        raw,
                        attempts: sends,
                        elapsed: started.elapsed(),
                        refreshed,
                    });
                }
                ClassifiedOutcome::Permanent {
                    status,
                    message,
                    raw_body,
                } => {
                    tracing::error!(
                        status = status.as_u16(),
                        response = %raw_body,
                        "Request failed permanently"
                    );
                    return Err(Error::PermanentFailure {
                        status,
                        message,
                        raw_body,
                        context: context(sends, last_status),
                    });
                }
                ClassifiedOutcome::TransportError(err) => {
                    tracing::error!(error = %err, "Unrecoverable transport error");
                    return Err(Error::TransportUnrecoverable {
                        kind: err.kind,
                        message: err.message,
                        context: context(sends, last_status),
                    });
                }
                ClassifiedOutcome::AuthExpired { message } => {
                    if auth_retried {
                        tracing::warn!("Credential rejected again after refresh");
                        return Err(Error::AuthenticationRequired {
                            reason: format!("credential rejected after refresh: {}", message),
                            source: None,
                            context: context(sends, last_status),
                        });
                    }
                    if !self.refresh.can_refresh() {
                        return Err(Error::AuthenticationRequired {
                            reason: message,
                            source: None,
                            context: context(sends, last_status),
                        });
                    }

                    tracing::info!(attempt = request.attempt(), "Credential expired, refreshing");
                    let refresh = self.refresh.refresh_after(generation);
                    match tokio::time::timeout_at(deadline, refresh).await {
                        Ok(Ok(ran)) => {
                            // One extra attempt, outside the retry budget.
                            auth_retried = true;
                            refreshed = ran;
                            continue;
                        }
                        Ok(Err(err)) => {
                            return Err(Error::AuthenticationRequired {
                                reason: err.to_string(),
                                source: Some(err),
                                context: context(sends, last_status),
                            });
                        }
                        Err(_) => {
                            return Err(Error::TransientFailure {
                                message: "resource timeout elapsed awaiting credential refresh"
                                    .to_string(),
                                context: context(sends, last_status),
                            });
                        }
                    }
                }
                ClassifiedOutcome::Retryable { status, message } => {
                    tracing::warn!(
                        status = status.map(|s| s.as_u16()),
                        attempt = request.attempt(),
                        error = %message,
                        "Request failed"
                    );
                    (LastFailure::Transient { message }, None)
                }
                ClassifiedOutcome::RateLimited { info, message } => {
                    tracing::warn!(
                        attempt = request.attempt(),
                        retry_after_ms = info.retry_after.map(|d| d.as_millis() as u64),
                        "Rate limited"
                    );
                    let wait = info.retry_after;
                    (
                        LastFailure::RateLimited {
                            retry_after: wait,
                            message,
                        },
                        wait,
                    )
                }
            };

            if !self.policy.allows_retry_after(request.attempt()) {
                return Err(failure.into_error(context(sends, last_status), None));
            }

            let delay = server_wait.unwrap_or_else(|| self.policy.backoff(request.attempt()));
            let fits = Instant::now()
                .checked_add(delay)
                .is_some_and(|next| next < deadline);
            if !fits {
                tracing::warn!(
                    delay_ms = delay.as_millis() as u64,
                    "Next attempt would exceed the resource timeout"
                );
                return Err(failure.into_error(
                    context(sends, last_status),
                    Some("resource timeout would elapse before next attempt"),
                ));
            }

            tracing::info!(
                delay_ms = delay.as_millis() as u64,
                attempt = request.attempt(),
                "Retrying request after delay"
            );
            tokio::time::sleep(delay).await;
            request.advance_attempt();
        }
    }
}

impl LastFailure {
    fn into_error(self, context: FailureContext, reason: Option<&str>) -> Error {
        let with_reason = |message: String| match reason {
            Some(reason) => format!("{} ({})", message, reason),
            None => message,
        };
        match self {
            LastFailure::Transient { message } => Error::TransientFailure {
                message: with_reason(message),
                context,
            },
            LastFailure::RateLimited {
                retry_after,
                message,
            } => Error::RateLimited {
                retry_after,
                message: with_reason(message),
                context,
            },
        }
    }
}
