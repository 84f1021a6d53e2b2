//! Credential provider factory

use std::sync::Arc;

use crate::config::Settings;
use crate::error::{RelayError, Result};

use super::identity::KeycloakClient;
use super::manager::OidcTokenManager;
use super::provider::{AnonymousCredentials, BasicCredentials, CredentialProvider, OidcCredentials};

/// Build the credential provider selected by `auth.method`.
///
/// Validates the settings each method needs and fails fast on gaps, so a
/// misconfigured client never reaches the broker:
/// - `"oidc"`: username, password, and authority are required; the realm
///   is the tenant's organization id
/// - `"basic"`: username and password are required
/// - `"none"`: anonymous access
pub fn create_credential_provider(settings: &Settings) -> Result<Arc<dyn CredentialProvider>> {
    match settings.auth.method.as_str() {
        "oidc" => {
            let username = require(&settings.auth.username, "auth.username")?;
            let password = require(&settings.auth.password, "auth.password")?;
            let authority = require(&settings.auth.authority, "auth.authority")?;
            tracing::info!(
                method = "oidc",
                authority = %authority,
                realm = %settings.tenant.organization_id,
                "Creating credential provider"
            );
            let identity = KeycloakClient::new(
                &authority,
                &settings.tenant.organization_id,
                &settings.auth.client_id,
            );
            let manager = Arc::new(OidcTokenManager::new(
                Arc::new(identity),
                username,
                password,
            ));
            Ok(Arc::new(OidcCredentials::new(manager)))
        }
        "basic" => {
            let username = require(&settings.auth.username, "auth.username")?;
            let password = require(&settings.auth.password, "auth.password")?;
            tracing::info!(method = "basic", "Creating credential provider");
            Ok(Arc::new(BasicCredentials::new(username, password)))
        }
        "none" => {
            tracing::info!(method = "none", "Creating credential provider");
            Ok(Arc::new(AnonymousCredentials))
        }
        other => Err(RelayError::InvalidConfig(format!(
            "unsupported auth method: {other}"
        ))),
    }
}

fn require(value: &Option<String>, key: &str) -> Result<String> {
    value
        .as_ref()
        .filter(|v| !v.is_empty())
        .cloned()
        .ok_or_else(|| {
            RelayError::InvalidConfig(format!(
                "{key} is required for the configured auth method"
            ))
        })
}
