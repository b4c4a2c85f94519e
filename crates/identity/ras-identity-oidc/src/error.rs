//! OIDC error types.

use thiserror::Error;

pub type OidcResult<T> = Result<T, OidcError>;

#[derive(Debug, Error)]
pub enum OidcError {
    #[error("Provider not found: {0}")]
    ProviderNotFound(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Missing, expired, replayed or foreign state parameter
    #[error("Invalid state parameter")]
    InvalidState,

    #[error("Missing authorization code")]
    MissingAuthorizationCode,

    /// The provider redirected back with `error=...`
    #[error("Callback error: {0}")]
    CallbackError(String),

    /// Provider unreachable, timed out, non-2xx or malformed response
    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Signature invalid: {0}")]
    SignatureInvalid(String),

    #[error("Claim invalid: {0}")]
    ClaimInvalid(String),

    #[error("URL parsing error: {0}")]
    Url(#[from] url::ParseError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl OidcError {
    /// Errors that mean the provider or the network misbehaved rather than
    /// the request being rejected.
    pub fn is_upstream(&self) -> bool {
        matches!(self, OidcError::Upstream(_))
    }

    /// Token validation failures. These are never retried.
    pub fn is_validation_failure(&self) -> bool {
        matches!(
            self,
            OidcError::SignatureInvalid(_) | OidcError::ClaimInvalid(_)
        )
    }
}

impl From<reqwest::Error> for OidcError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            OidcError::Upstream("request timed out".to_string())
        } else if err.is_connect() {
            OidcError::Upstream("connection failed".to_string())
        } else if let Some(status) = err.status() {
            OidcError::Upstream(format!("unexpected status {}", status))
        } else {
            OidcError::Upstream(err.to_string())
        }
    }
}
