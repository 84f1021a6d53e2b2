//! Identity provider client for OIDC token grants.

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::{RelayError, Result};

use super::credential::TokenGrant;

/// Performs token exchanges with an identity provider.
///
/// Implementations do the network exchange only; expiry bookkeeping and
/// caching happen in the token manager.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Exchange username and password for a token grant.
    async fn authenticate(&self, username: &str, password: &str) -> Result<TokenGrant>;

    /// Exchange a refresh token for a new grant.
    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant>;
}

/// Keycloak OpenID Connect client.
///
/// Tokens are obtained with the resource-owner password grant against the
/// realm's token endpoint; renewals use the refresh-token grant.
pub struct KeycloakClient {
    http: reqwest::Client,
    token_url: String,
    client_id: String,
}

/// Error body shape returned by Keycloak on a rejected grant.
#[derive(Debug, Deserialize)]
struct ProviderErrorBody {
    #[serde(default)]
    error: String,
    #[serde(default)]
    error_description: String,
}

impl KeycloakClient {
    /// Build a client for one realm.
    ///
    /// `authority` is the provider base URL up to but not including
    /// `/realms`; the realm is the tenant's organization id.
    pub fn new(authority: &str, realm: &str, client_id: &str) -> Self {
        let token_url = format!(
            "{}/realms/{}/protocol/openid-connect/token",
            authority.trim_end_matches('/'),
            realm
        );
        Self {
            http: reqwest::Client::new(),
            token_url,
            client_id: client_id.to_string(),
        }
    }

    async fn token_request(&self, form: &[(&str, &str)]) -> Result<TokenGrant> {
        let response = self.http.post(&self.token_url).form(form).send().await?;

        let status = response.status();
        if status.is_success() {
            Ok(response.json::<TokenGrant>().await?)
        } else {
            let body = response.text().await.unwrap_or_default();
            let detail = serde_json::from_str::<ProviderErrorBody>(&body)
                .ok()
                .map(|e| {
                    if e.error_description.is_empty() {
                        e.error
                    } else {
                        e.error_description
                    }
                })
                .filter(|d| !d.is_empty())
                .unwrap_or(body);
            Err(RelayError::Auth(format!(
                "token endpoint returned {status}: {detail}"
            )))
        }
    }
}

#[async_trait]
impl IdentityProvider for KeycloakClient {
    async fn authenticate(&self, username: &str, password: &str) -> Result<TokenGrant> {
        tracing::debug!(url = %self.token_url, "Requesting token with password grant");
        self.token_request(&[
            ("grant_type", "password"),
            ("client_id", &self.client_id),
            ("username", username),
            ("password", password),
        ])
        .await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant> {
        tracing::debug!(url = %self.token_url, "Requesting token with refresh grant");
        self.token_request(&[
            ("grant_type", "refresh_token"),
            ("client_id", &self.client_id),
            ("refresh_token", refresh_token),
        ])
        .await
    }
}
