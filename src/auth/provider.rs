//! Broker credential sources.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;

use super::manager::{OidcTokenManager, RenewalCallback};

/// Username and password pair presented in the MQTT CONNECT packet.
#[derive(Debug, Clone)]
pub struct BrokerCredentials {
    pub username: String,
    pub password: String,
}

/// Source of broker credentials for the transport sink.
///
/// `broker_credentials` is called on every connection attempt, so
/// implementations backed by expiring tokens hand out a fresh value each
/// time instead of whatever was current at construction.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Credentials for the next CONNECT, or `None` for anonymous access.
    async fn broker_credentials(&self) -> Result<Option<BrokerCredentials>>;

    /// Subscribe to credential renewals. Default: renewals never happen.
    fn register_renewal_callback(&self, _callback: RenewalCallback) {}

    /// Start background maintenance such as token refresh. Default: none.
    fn start(&self) {}

    /// Stop background maintenance. Default: none.
    fn shutdown(&self) {}
}

/// OIDC-backed credentials: the bearer token rides as the MQTT username
/// with an empty password, the shape ingestion brokers validate tokens
/// in.
pub struct OidcCredentials {
    manager: Arc<OidcTokenManager>,
}

impl OidcCredentials {
    pub fn new(manager: Arc<OidcTokenManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl CredentialProvider for OidcCredentials {
    async fn broker_credentials(&self) -> Result<Option<BrokerCredentials>> {
        let bearer = self.manager.access_token().await?;
        Ok(Some(BrokerCredentials {
            username: bearer,
            password: String::new(),
        }))
    }

    fn register_renewal_callback(&self, callback: RenewalCallback) {
        self.manager.register_renewal_callback(callback);
    }

    fn start(&self) {
        Arc::clone(&self.manager).start_refresh_task();
    }

    fn shutdown(&self) {
        self.manager.shutdown();
    }
}

/// Static username/password credentials.
pub struct BasicCredentials {
    username: String,
    password: String,
}

impl BasicCredentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

#[async_trait]
impl CredentialProvider for BasicCredentials {
    async fn broker_credentials(&self) -> Result<Option<BrokerCredentials>> {
        Ok(Some(BrokerCredentials {
            username: self.username.clone(),
            password: self.password.clone(),
        }))
    }
}

/// No credentials at all, for brokers with anonymous access enabled.
pub struct AnonymousCredentials;

#[async_trait]
impl CredentialProvider for AnonymousCredentials {
    async fn broker_credentials(&self) -> Result<Option<BrokerCredentials>> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_basic_credentials_are_static() {
        let provider = BasicCredentials::new("svc-user", "svc-pass");
        let creds = provider.broker_credentials().await.unwrap().unwrap();
        assert_eq!(creds.username, "svc-user");
        assert_eq!(creds.password, "svc-pass");
    }

    #[tokio::test]
    async fn test_anonymous_credentials_are_none() {
        let provider = AnonymousCredentials;
        assert!(provider.broker_credentials().await.unwrap().is_none());
    }
}
