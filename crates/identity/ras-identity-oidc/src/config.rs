//! OIDC configuration types.

use crate::error::{OidcError, OidcResult};
use crate::types::DiscoveryDocument;
use jsonwebtoken::Algorithm;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use url::Url;

pub const GOOGLE_ISSUER: &str = "https://accounts.google.com";
pub const GOOGLE_AUTHORIZATION_ENDPOINT: &str = "https://accounts.google.com/o/oauth2/v2/auth";
pub const GOOGLE_TOKEN_ENDPOINT: &str = "https://oauth2.googleapis.com/token";
pub const GOOGLE_JWKS_URI: &str = "https://www.googleapis.com/oauth2/v3/certs";

/// Identity provider configuration.
///
/// Empty endpoint strings are filled in from the built-in preset (for
/// `google`) or from the discovery document when `discovery_url` is set.
/// An empty `redirect_uri` is derived from the callback base URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default)]
    pub name: String,
    pub client_id: String,
    pub client_secret: String,
    #[serde(default)]
    pub issuer: String,
    #[serde(default)]
    pub authorization_endpoint: String,
    #[serde(default)]
    pub token_endpoint: String,
    #[serde(default)]
    pub jwks_uri: String,
    #[serde(default)]
    pub discovery_url: Option<String>,
    #[serde(default)]
    pub redirect_uri: String,
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,
    /// Additional parameters to include in the authorization request
    #[serde(default)]
    pub auth_params: HashMap<String, String>,
    #[serde(default = "default_true")]
    pub use_pkce: bool,
    /// Accepted ID token signing algorithms. Symmetric algorithms are
    /// rejected by the validator regardless of this list.
    #[serde(default = "default_signing_algs")]
    pub id_token_signing_algs: Vec<Algorithm>,
}

fn default_scopes() -> Vec<String> {
    vec![
        "openid".to_string(),
        "email".to_string(),
        "profile".to_string(),
    ]
}

fn default_true() -> bool {
    true
}

fn default_signing_algs() -> Vec<Algorithm> {
    vec![Algorithm::RS256]
}

impl ProviderConfig {
    pub fn new(
        name: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            issuer: String::new(),
            authorization_endpoint: String::new(),
            token_endpoint: String::new(),
            jwks_uri: String::new(),
            discovery_url: None,
            redirect_uri: String::new(),
            scopes: default_scopes(),
            auth_params: HashMap::new(),
            use_pkce: true,
            id_token_signing_algs: default_signing_algs(),
        }
    }

    /// Google with its published endpoints.
    pub fn google(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        let mut config = Self::new("google", client_id, client_secret);
        config.apply_preset();
        config
    }

    pub fn with_endpoints(
        mut self,
        issuer: impl Into<String>,
        authorization_endpoint: impl Into<String>,
        token_endpoint: impl Into<String>,
        jwks_uri: impl Into<String>,
    ) -> Self {
        self.issuer = issuer.into();
        self.authorization_endpoint = authorization_endpoint.into();
        self.token_endpoint = token_endpoint.into();
        self.jwks_uri = jwks_uri.into();
        self
    }

    pub fn with_redirect_uri(mut self, redirect_uri: impl Into<String>) -> Self {
        self.redirect_uri = redirect_uri.into();
        self
    }

    pub fn with_discovery_url(mut self, discovery_url: impl Into<String>) -> Self {
        self.discovery_url = Some(discovery_url.into());
        self
    }

    /// Fill empty endpoints for providers with a built-in preset.
    pub fn apply_preset(&mut self) {
        if self.name != "google" {
            return;
        }
        fill(&mut self.issuer, GOOGLE_ISSUER);
        fill(&mut self.authorization_endpoint, GOOGLE_AUTHORIZATION_ENDPOINT);
        fill(&mut self.token_endpoint, GOOGLE_TOKEN_ENDPOINT);
        fill(&mut self.jwks_uri, GOOGLE_JWKS_URI);
    }

    /// Fill empty endpoints from a discovery document. Explicit
    /// configuration always wins.
    pub fn merge_discovery(&mut self, discovery: &DiscoveryDocument) {
        fill(&mut self.issuer, &discovery.issuer);
        fill(
            &mut self.authorization_endpoint,
            &discovery.authorization_endpoint,
        );
        fill(&mut self.token_endpoint, &discovery.token_endpoint);
        fill(&mut self.jwks_uri, &discovery.jwks_uri);
    }

    /// Validate the config and derive the redirect URI from the callback
    /// base URL when none is configured.
    pub fn normalize(mut self, callback_base_url: &str) -> OidcResult<Self> {
        self.apply_preset();

        if self.name.trim().is_empty() {
            return Err(OidcError::Config("provider name is required".to_string()));
        }
        if self.client_id.trim().is_empty() {
            return Err(OidcError::Config(format!(
                "client_id is required for provider '{}'",
                self.name
            )));
        }
        if self.issuer.trim().is_empty() {
            return Err(OidcError::Config(format!(
                "issuer is required for provider '{}'",
                self.name
            )));
        }

        for (field, value) in [
            ("authorization_endpoint", &self.authorization_endpoint),
            ("token_endpoint", &self.token_endpoint),
            ("jwks_uri", &self.jwks_uri),
        ] {
            Url::parse(value).map_err(|e| {
                OidcError::Config(format!(
                    "{} for provider '{}' is not a valid URL: {}",
                    field, self.name, e
                ))
            })?;
        }

        if self.redirect_uri.trim().is_empty() {
            if callback_base_url.trim().is_empty() {
                return Err(OidcError::Config(format!(
                    "provider '{}' has no redirect_uri and no callback base URL is set",
                    self.name
                )));
            }
            self.redirect_uri = format!(
                "{}/auth/{}",
                callback_base_url.trim_end_matches('/'),
                self.name
            );
        }
        Url::parse(&self.redirect_uri)?;

        if self.id_token_signing_algs.is_empty() {
            self.id_token_signing_algs = default_signing_algs();
        }

        Ok(self)
    }
}

fn fill(target: &mut String, value: &str) {
    if target.trim().is_empty() {
        *target = value.to_string();
    }
}

/// Settings shared by every provider.
#[derive(Debug, Clone)]
pub struct OidcConfig {
    pub providers: HashMap<String, ProviderConfig>,
    /// Base URL the provider redirects back to; `/auth/{provider}` is appended
    pub callback_base_url: String,
    pub state_ttl_seconds: u64,
    pub http_timeout_seconds: u64,
    pub retry_backoff_ms: u64,
    pub clock_leeway_seconds: u64,
    pub jwks_default_max_age_seconds: u64,
    /// Minimum spacing between forced JWKS refreshes for unknown key ids
    pub jwks_forced_refresh_seconds: u64,
}

impl Default for OidcConfig {
    fn default() -> Self {
        Self {
            providers: HashMap::new(),
            callback_base_url: String::new(),
            state_ttl_seconds: 600, // 10 minutes
            http_timeout_seconds: 5,
            retry_backoff_ms: 250,
            clock_leeway_seconds: 60,
            jwks_default_max_age_seconds: 300,
            jwks_forced_refresh_seconds: 30,
        }
    }
}

impl OidcConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_provider(mut self, config: ProviderConfig) -> Self {
        self.providers.insert(config.name.clone(), config);
        self
    }

    pub fn with_callback_base_url(mut self, url: impl Into<String>) -> Self {
        self.callback_base_url = url.into();
        self
    }

    pub fn with_state_ttl(mut self, seconds: u64) -> Self {
        self.state_ttl_seconds = seconds;
        self
    }

    pub fn with_http_timeout(mut self, seconds: u64) -> Self {
        self.http_timeout_seconds = seconds;
        self
    }

    pub fn with_retry_backoff(mut self, millis: u64) -> Self {
        self.retry_backoff_ms = millis;
        self
    }

    pub fn with_clock_leeway(mut self, seconds: u64) -> Self {
        self.clock_leeway_seconds = seconds;
        self
    }
}
