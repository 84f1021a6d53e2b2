//! Credential state and expiry bookkeeping.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Deserialize;

/// Safety margin subtracted from the provider-reported lifetime, so a
/// token is treated as expired slightly before the provider would start
/// rejecting it.
pub(crate) const EXPIRY_MARGIN_SECS: i64 = 10;

/// Cap on provider-reported lifetimes. Anything longer is treated as one
/// year so the expiry arithmetic cannot overflow on a bogus grant.
const MAX_LIFETIME_SECS: u64 = 365 * 24 * 60 * 60;

/// A token grant as returned by the identity provider's token endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenGrant {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Token lifetime in seconds, relative to issue time
    pub expires_in: u64,
}

/// An issued credential with a locally computed expiry instant.
///
/// Only the bearer token ever leaves this type; the refresh token stays
/// inside the auth module.
#[derive(Debug, Clone)]
pub struct Credential {
    access_token: String,
    refresh_token: Option<String>,
    expires_at: DateTime<Utc>,
}

impl Credential {
    /// Build a credential from a grant, stamping the expiry from the
    /// local clock minus the safety margin.
    pub fn from_grant(grant: TokenGrant) -> Self {
        let capped = grant.expires_in.min(MAX_LIFETIME_SECS) as i64;
        let lifetime = ChronoDuration::seconds(capped - EXPIRY_MARGIN_SECS);
        Self {
            access_token: grant.access_token,
            refresh_token: grant.refresh_token,
            expires_at: Utc::now() + lifetime,
        }
    }

    /// The bearer token presented to the broker.
    pub fn bearer(&self) -> &str {
        &self.access_token
    }

    pub(crate) fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_deref()
    }

    /// Whether the safety-adjusted expiry has passed.
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }

    /// Time remaining until expiry; zero when already expired.
    pub fn remaining(&self) -> std::time::Duration {
        (self.expires_at - Utc::now()).to_std().unwrap_or_default()
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grant(expires_in: u64) -> TokenGrant {
        TokenGrant {
            access_token: "token-a".to_string(),
            refresh_token: Some("refresh-a".to_string()),
            expires_in,
        }
    }

    #[test]
    fn test_expiry_includes_safety_margin() {
        let before = Utc::now();
        let credential = Credential::from_grant(grant(300));
        let after = Utc::now();

        // expires_at should be issue time + 300s - 10s margin
        let min_expected = before + ChronoDuration::seconds(300 - EXPIRY_MARGIN_SECS);
        let max_expected = after + ChronoDuration::seconds(300 - EXPIRY_MARGIN_SECS);
        assert!(credential.expires_at() >= min_expected);
        assert!(credential.expires_at() <= max_expected);
        assert!(!credential.is_expired());
    }

    #[test]
    fn test_short_lifetime_is_expired_immediately() {
        // Lifetime shorter than the margin puts expiry in the past.
        let credential = Credential::from_grant(grant(5));
        assert!(credential.is_expired());
        assert_eq!(credential.remaining(), std::time::Duration::ZERO);
    }

    #[test]
    fn test_pathological_lifetime_is_clamped() {
        // Values that would wrap the cast or overflow chrono's seconds
        // representation are capped instead of panicking.
        for lifetime in [i64::MAX as u64, u64::MAX] {
            let credential = Credential::from_grant(grant(lifetime));
            assert!(!credential.is_expired());
            assert!(credential.expires_at() <= Utc::now() + ChronoDuration::days(366));
        }
    }

    #[test]
    fn test_remaining_is_positive_for_live_token() {
        let credential = Credential::from_grant(grant(120));
        let remaining = credential.remaining();
        assert!(remaining > std::time::Duration::from_secs(100));
        assert!(remaining <= std::time::Duration::from_secs(110));
    }

    #[test]
    fn test_bearer_and_refresh_accessors() {
        let credential = Credential::from_grant(grant(60));
        assert_eq!(credential.bearer(), "token-a");
        assert_eq!(credential.refresh_token(), Some("refresh-a"));
    }
}
