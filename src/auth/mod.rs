//! Broker authentication.
//!
//! Three layers, from the wire up:
//! - `IdentityProvider` performs raw token exchanges (Keycloak today)
//! - `OidcTokenManager` owns the issued credential, refreshes it before
//!   expiry, and notifies renewal subscribers
//! - `CredentialProvider` is what the transport sink consumes: a source
//!   of CONNECT credentials plus renewal signals
//!
//! The sink never sees refresh tokens or expiry times; it asks for fresh
//! credentials on every connection attempt and reconnects when told to.

mod credential;
mod factory;
mod identity;
mod manager;
mod provider;

pub use credential::{Credential, TokenGrant};
pub use factory::create_credential_provider;
pub use identity::{IdentityProvider, KeycloakClient};
pub use manager::{OidcTokenManager, RenewalCallback};
pub use provider::{
    AnonymousCredentials, BasicCredentials, BrokerCredentials, CredentialProvider,
    OidcCredentials,
};
