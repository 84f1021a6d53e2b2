//! Token lifecycle management.
//!
//! The manager owns the issued credential, serializes all exchanges with
//! the identity provider, runs the background refresh task, and fans
//! renewed bearer tokens out to registered subscribers.

use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::error::Result;

use super::credential::Credential;
use super::identity::IdentityProvider;

/// How far before expiry the background task renews.
const REFRESH_LEAD_SECS: u64 = 30;
/// Floor for the refresh task's sleep between cycles.
const MIN_REFRESH_SLEEP: Duration = Duration::from_secs(1);
/// Pause after a failed renewal while the credential is still valid.
const REFRESH_RETRY_DELAY: Duration = Duration::from_secs(15);

/// Callback invoked with the new bearer token after every successful
/// renewal.
pub type RenewalCallback = Box<dyn Fn(&str) -> Result<()> + Send + Sync>;

/// Credential store for OIDC bearer tokens.
///
/// All identity-provider exchanges happen behind an async mutex, so
/// concurrent callers that find an expired token share a single
/// re-authentication instead of racing the endpoint.
pub struct OidcTokenManager {
    provider: Arc<dyn IdentityProvider>,
    username: String,
    password: String,
    credential: Mutex<Option<Credential>>,
    callbacks: StdMutex<Vec<RenewalCallback>>,
    refresh_task: StdMutex<Option<JoinHandle<()>>>,
}

impl OidcTokenManager {
    pub fn new(
        provider: Arc<dyn IdentityProvider>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            username: username.into(),
            password: password.into(),
            credential: Mutex::new(None),
            callbacks: StdMutex::new(Vec::new()),
            refresh_task: StdMutex::new(None),
        }
    }

    /// Current bearer token, authenticating first when no valid
    /// credential is held.
    pub async fn access_token(&self) -> Result<String> {
        let mut credential = self.credential.lock().await;
        match credential.as_ref() {
            Some(cred) if !cred.is_expired() => Ok(cred.bearer().to_string()),
            _ => {
                tracing::info!("No valid credential held, authenticating");
                let grant = self
                    .provider
                    .authenticate(&self.username, &self.password)
                    .await?;
                let fresh = Credential::from_grant(grant);
                let bearer = fresh.bearer().to_string();
                tracing::info!(expires_at = %fresh.expires_at(), "Authentication succeeded");
                *credential = Some(fresh);
                Ok(bearer)
            }
        }
    }

    /// Renew the credential and notify subscribers.
    ///
    /// Prefers the refresh-token grant and falls back to a full
    /// authentication when no refresh token is held or the provider
    /// rejects it. Subscribers run after the credential swap, so a
    /// callback that reads the store observes the new token.
    pub async fn refresh(&self) -> Result<()> {
        let bearer = {
            let mut credential = self.credential.lock().await;
            let refresh_token = credential
                .as_ref()
                .and_then(|c| c.refresh_token().map(str::to_string));

            let grant = match refresh_token {
                Some(token) => match self.provider.refresh(&token).await {
                    Ok(grant) => grant,
                    Err(e) => {
                        tracing::warn!(
                            error = %e,
                            "Refresh grant rejected, falling back to full authentication"
                        );
                        self.provider
                            .authenticate(&self.username, &self.password)
                            .await?
                    }
                },
                None => {
                    tracing::debug!("No refresh token held, performing full authentication");
                    self.provider
                        .authenticate(&self.username, &self.password)
                        .await?
                }
            };

            let fresh = Credential::from_grant(grant);
            let bearer = fresh.bearer().to_string();
            tracing::info!(expires_at = %fresh.expires_at(), "Credential renewed");
            *credential = Some(fresh);
            bearer
        };

        self.notify_renewal(&bearer);
        Ok(())
    }

    /// Subscribe to renewals. Callbacks run in registration order; one
    /// failing is logged and does not affect the others.
    pub fn register_renewal_callback(&self, callback: RenewalCallback) {
        self.lock_callbacks().push(callback);
    }

    fn notify_renewal(&self, bearer: &str) {
        let callbacks = self.lock_callbacks();
        for (index, callback) in callbacks.iter().enumerate() {
            if let Err(e) = callback(bearer) {
                tracing::error!(subscriber = index, error = %e, "Renewal callback failed");
            }
        }
    }

    /// Spawn the background refresh task. Idempotent while running.
    pub fn start_refresh_task(self: Arc<Self>) {
        let mut slot = self
            .refresh_task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if slot.as_ref().map(|t| !t.is_finished()).unwrap_or(false) {
            return;
        }

        let manager = Arc::clone(&self);
        *slot = Some(tokio::spawn(async move {
            manager.refresh_loop().await;
        }));
        tracing::debug!("Credential refresh task started");
    }

    /// Stop the refresh task. Safe to call repeatedly.
    pub fn shutdown(&self) {
        let handle = self
            .refresh_task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(task) = handle {
            task.abort();
            tracing::debug!("Credential refresh task stopped");
        }
    }

    async fn refresh_loop(&self) {
        loop {
            let sleep_for = {
                let credential = self.credential.lock().await;
                Self::next_refresh_in(credential.as_ref())
            };
            tokio::time::sleep(sleep_for).await;

            if let Err(e) = self.refresh().await {
                let expired = {
                    let credential = self.credential.lock().await;
                    credential.as_ref().map(|c| c.is_expired()).unwrap_or(true)
                };
                if expired {
                    tracing::error!(error = %e, "Credential renewal failed with no valid token");
                } else {
                    tracing::warn!(error = %e, "Credential renewal failed, retrying shortly");
                    tokio::time::sleep(REFRESH_RETRY_DELAY).await;
                }
            }
        }
    }

    /// Sleep until the renewal lead window, floored so the loop never
    /// spins. With no credential held yet the floor applies directly.
    fn next_refresh_in(credential: Option<&Credential>) -> Duration {
        match credential {
            Some(cred) => cred
                .remaining()
                .saturating_sub(Duration::from_secs(REFRESH_LEAD_SECS))
                .max(MIN_REFRESH_SLEEP),
            None => MIN_REFRESH_SLEEP,
        }
    }

    fn lock_callbacks(&self) -> std::sync::MutexGuard<'_, Vec<RenewalCallback>> {
        self.callbacks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for OidcTokenManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}
