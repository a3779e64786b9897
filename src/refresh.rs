//! Single-flight credential refresh.
//!
//! When several logical requests see `401 Unauthorized` at the same time, only
//! one of them may call the application's [`CredentialRefresher`]. The others
//! join the refresh already in flight and observe the same outcome.
//!
//! The refresh runs on its own task. A caller that is cancelled while waiting
//! only stops waiting; the refresh keeps going for everyone else.

use http::HeaderValue;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};

use crate::transport::BoxFuture;

/// Error type produced by a [`CredentialRefresher`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A bearer credential.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    token: String,
}

impl Credential {
    pub fn bearer(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// The `Authorization` header value for this credential.
    pub fn header_value(&self) -> Result<HeaderValue, http::header::InvalidHeaderValue> {
        let mut value = HeaderValue::try_from(format!("Bearer {}", self.token))?;
        value.set_sensitive(true);
        Ok(value)
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential").field("token", &"<redacted>").finish()
    }
}

/// Obtains a fresh credential. Supplied by the application.
///
/// Any `Fn() -> impl Future<Output = Result<Credential, BoxError>>` closure
/// implements this trait.
///
/// ```
/// use steadfast::refresh::{BoxError, Credential, TokenRefreshCoordinator};
///
/// let coordinator = TokenRefreshCoordinator::new(None, Some(std::sync::Arc::new(|| async {
///     Ok::<_, BoxError>(Credential::bearer("fresh-token"))
/// })));
/// ```
pub trait CredentialRefresher: Send + Sync + 'static {
    fn refresh_credentials(&self) -> BoxFuture<'_, Result<Credential, BoxError>>;
}

impl<F, Fut> CredentialRefresher for F
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Credential, BoxError>> + Send + 'static,
{
    fn refresh_credentials(&self) -> BoxFuture<'_, Result<Credential, BoxError>> {
        Box::pin(self())
    }
}

/// A failed refresh, shared by every caller that joined it.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("credential refresh failed: {message}")]
pub struct RefreshError {
    message: String,
}

impl RefreshError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Completed refreshes resolve to the new credential generation.
type RefreshOutcome = Result<u64, RefreshError>;

enum RefreshState {
    Idle,
    InFlight(watch::Receiver<Option<RefreshOutcome>>),
}

struct Shared {
    state: RefreshState,
    credential: Option<Credential>,
    /// Bumped on every successful refresh.
    generation: u64,
}

/// Coordinates credential refresh across all requests of one client.
#[derive(Clone)]
pub struct TokenRefreshCoordinator {
    refresher: Option<Arc<dyn CredentialRefresher>>,
    shared: Arc<Mutex<Shared>>,
}

impl std::fmt::Debug for TokenRefreshCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenRefreshCoordinator")
            .field("has_refresher", &self.refresher.is_some())
            .finish_non_exhaustive()
    }
}

impl TokenRefreshCoordinator {
    /// Creates a coordinator holding `credential` until the first refresh.
    ///
    /// Without a `refresher`, every refresh fails and `401` responses are
    /// reported to the caller as-is.
    pub fn new(
        credential: Option<Credential>,
        refresher: Option<Arc<dyn CredentialRefresher>>,
    ) -> Self {
        Self {
            refresher,
            shared: Arc::new(Mutex::new(Shared {
                state: RefreshState::Idle,
                credential,
                generation: 0,
            })),
        }
    }

    /// Whether a [`CredentialRefresher`] is configured.
    pub fn can_refresh(&self) -> bool {
        self.refresher.is_some()
    }

    /// The current credential and its generation.
    pub async fn current(&self) -> (Option<Credential>, u64) {
        let shared = self.shared.lock().await;
        (shared.credential.clone(), shared.generation)
    }

    /// Whether a refresh is currently running.
    pub async fn is_refreshing(&self) -> bool {
        matches!(self.shared.lock().await.state, RefreshState::InFlight(_))
    }

    /// Joins the refresh in flight, or starts one if none is.
    pub async fn refresh(&self) -> Result<(), RefreshError> {
        self.join_or_start(None).await.map(|_| ())
    }

    /// Like [`refresh`](Self::refresh), but returns immediately if a refresh
    /// already completed after the credential of generation `observed` was
    /// handed out.
    ///
    /// Resolves to `true` if this call started or joined a refresh, and to
    /// `false` if a newer credential was already available.
    pub async fn refresh_after(&self, observed: u64) -> Result<bool, RefreshError> {
        self.join_or_start(Some(observed)).await
    }

    async fn join_or_start(&self, observed: Option<u64>) -> Result<bool, RefreshError> {
        let Some(refresher) = self.refresher.clone() else {
            return Err(RefreshError::new("no credential refresher configured"));
        };

        let mut receiver = {
            let mut shared = self.shared.lock().await;
            match &shared.state {
                RefreshState::InFlight(receiver) => {
                    tracing::debug!("Joining in-flight credential refresh");
                    receiver.clone()
                }
                RefreshState::Idle => {
                    if observed.is_some_and(|generation| shared.generation > generation) {
                        tracing::debug!(
                            generation = shared.generation,
                            "Credential already refreshed"
                        );
                        return Ok(false);
                    }
                    let (sender, receiver) = watch::channel(None);
                    shared.state = RefreshState::InFlight(receiver.clone());
                    tracing::info!("Starting credential refresh");
                    self.spawn_refresh(refresher, sender);
                    receiver
                }
            }
        };

        let outcome = match receiver.wait_for(Option::is_some).await {
            Ok(value) => value.clone(),
            Err(_) => None,
        };

        match outcome {
            Some(Ok(_)) => Ok(true),
            Some(Err(err)) => Err(err),
            None => {
                // The refresh task went away without reporting.
                let mut shared = self.shared.lock().await;
                if let RefreshState::InFlight(current) = &shared.state {
                    if current.same_channel(&receiver) {
                        shared.state = RefreshState::Idle;
                    }
                }
                Err(RefreshError::new("credential refresh was abandoned"))
            }
        }
    }

    fn spawn_refresh(
        &self,
        refresher: Arc<dyn CredentialRefresher>,
        sender: watch::Sender<Option<RefreshOutcome>>,
    ) {
        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            let result = refresher.refresh_credentials().await;

            let outcome = {
                let mut shared = shared.lock().await;
                shared.state = RefreshState::Idle;
                match result {
                    Ok(credential) => {
                        shared.credential = Some(credential);
                        shared.generation += 1;
                        tracing::info!(generation = shared.generation, "Credential refreshed");
                        Ok(shared.generation)
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "Credential refresh failed");
                        Err(RefreshError::new(err.to_string()))
                    }
                }
            };

            // Every waiter may have been cancelled.
            let _ = sender.send(Some(outcome));
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn counting_refresher(
        calls: Arc<AtomicUsize>,
        delay: Duration,
        succeed: bool,
    ) -> Arc<dyn CredentialRefresher> {
        Arc::new(move || {
            let calls = Arc::clone(&calls);
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                tokio::time::sleep(delay).await;
                if succeed {
                    Ok(Credential::bearer(format!("token-{n}")))
                } else {
                    Err::<Credential, BoxError>("identity provider unavailable".into())
                }
            }
        })
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_callers_share_one_refresh() {
        let calls = Arc::new(AtomicUsize::new(0));
        let coordinator = TokenRefreshCoordinator::new(
            Some(Credential::bearer("stale")),
            Some(counting_refresher(calls.clone(), Duration::from_millis(100), true)),
        );

        let handles: Vec<_> = (0..5)
            .map(|_| {
                let coordinator = coordinator.clone();
                tokio::spawn(async move { coordinator.refresh().await })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.await.unwrap(), Ok(()));
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let (credential, generation) = coordinator.current().await;
        assert_eq!(credential.unwrap().token(), "token-1");
        assert_eq!(generation, 1);
        assert!(!coordinator.is_refreshing().await);
    }

    #[tokio::test(start_paused = true)]
    async fn failure_is_shared_and_state_resets() {
        let calls = Arc::new(AtomicUsize::new(0));
        let coordinator = TokenRefreshCoordinator::new(
            None,
            Some(counting_refresher(calls.clone(), Duration::from_millis(50), false)),
        );

        let (a, b) = tokio::join!(coordinator.refresh(), coordinator.refresh());
        let a = a.unwrap_err();
        assert_eq!(a, b.unwrap_err());
        assert!(a.message().contains("identity provider unavailable"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // Idle again, so the next refresh starts a new operation.
        assert!(coordinator.refresh().await.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_caller_does_not_cancel_refresh() {
        let calls = Arc::new(AtomicUsize::new(0));
        let coordinator = TokenRefreshCoordinator::new(
            None,
            Some(counting_refresher(calls.clone(), Duration::from_secs(1), true)),
        );

        let starter = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.refresh().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(coordinator.is_refreshing().await);
        starter.abort();
        assert!(starter.await.unwrap_err().is_cancelled());

        assert_eq!(coordinator.refresh().await, Ok(()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(coordinator.current().await.1, 1);
    }

    #[tokio::test]
    async fn stale_generation_skips_refresh() {
        let calls = Arc::new(AtomicUsize::new(0));
        let coordinator = TokenRefreshCoordinator::new(
            None,
            Some(counting_refresher(calls.clone(), Duration::ZERO, true)),
        );

        assert_eq!(coordinator.refresh_after(0).await, Ok(true));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // A request that used generation 0 after generation 1 exists.
        assert_eq!(coordinator.refresh_after(0).await, Ok(false));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        assert_eq!(coordinator.refresh_after(1).await, Ok(true));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn without_refresher_refresh_fails() {
        let coordinator = TokenRefreshCoordinator::new(Some(Credential::bearer("t")), None);
        assert!(!coordinator.can_refresh());
        assert!(coordinator.refresh().await.is_err());
    }

    #[test]
    fn credential_is_redacted() {
        let credential = Credential::bearer("super-secret");
        assert!(!format!("{:?}", credential).contains("super-secret"));
        let header = credential.header_value().unwrap();
        assert!(header.is_sensitive());
        assert_eq!(header, "Bearer super-secret");
    }
}
