//! OpenID Connect relying party for the login gateway.
//!
//! Covers the authorization code flow with PKCE:
//! - `/login` side: [`OidcClient::begin_login`] creates single-use state
//!   and the provider redirect URL
//! - `/auth` side: [`OidcClient::authenticate`] consumes the state, exchanges
//!   the code and validates the ID token against the provider's JWKS

pub mod client;
pub mod config;
pub mod discovery;
pub mod error;
pub mod http;
pub mod jwks;
pub mod registry;
pub mod state;
pub mod types;
pub mod validator;

#[cfg(test)]
mod test_support;

pub use client::{AuthenticatedLogin, CompletedLogin, OidcClient, PkceChallenge};
pub use config::{OidcConfig, ProviderConfig};
pub use error::{OidcError, OidcResult};
pub use http::UpstreamHttp;
pub use jwks::JwksCache;
pub use registry::ProviderRegistry;
pub use state::{AuthRequestState, AuthStateStore, InMemoryStateStore};
pub use types::{AuthorizationRedirect, CallbackParams, TokenResponse};
pub use validator::{TokenExpectations, TokenValidator};
