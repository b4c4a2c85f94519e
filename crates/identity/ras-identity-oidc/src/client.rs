//! OIDC authorization code flow with PKCE.

use crate::config::{OidcConfig, ProviderConfig};
use crate::error::{OidcError, OidcResult};
use crate::http::UpstreamHttp;
use crate::jwks::JwksCache;
use crate::registry::ProviderRegistry;
use crate::state::{AuthRequestState, AuthStateStore, InMemoryStateStore};
use crate::types::{AuthorizationRedirect, CallbackParams, TokenResponse};
use crate::validator::{TokenExpectations, TokenValidator};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::{Rng, thread_rng};
use ras_identity_core::IdentityClaims;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// PKCE code challenge and verifier
#[derive(Debug, Clone)]
pub struct PkceChallenge {
    pub code_verifier: String,
    pub code_challenge: String,
    pub code_challenge_method: String,
}

impl Default for PkceChallenge {
    fn default() -> Self {
        Self::new()
    }
}

impl PkceChallenge {
    pub fn new() -> Self {
        let code_verifier = Self::generate_code_verifier();
        let code_challenge = Self::challenge_for(&code_verifier);

        Self {
            code_verifier,
            code_challenge,
            code_challenge_method: "S256".to_string(),
        }
    }

    fn generate_code_verifier() -> String {
        let mut rng = thread_rng();
        let bytes: Vec<u8> = (0..64).map(|_| rng.r#gen::<u8>()).collect();
        URL_SAFE_NO_PAD.encode(bytes)
    }

    /// S256 transform of a verifier
    pub fn challenge_for(verifier: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(verifier.as_bytes());
        URL_SAFE_NO_PAD.encode(hasher.finalize())
    }
}

/// Result of a successful callback: the tokens plus the request record
/// they were obtained for.
#[derive(Debug, Clone)]
pub struct CompletedLogin {
    pub tokens: TokenResponse,
    pub request: AuthRequestState,
}

/// A validated login
#[derive(Debug, Clone)]
pub struct AuthenticatedLogin {
    pub claims: IdentityClaims,
    pub id_token: String,
}

/// Drives login for every configured provider
#[derive(Clone)]
pub struct OidcClient {
    registry: Arc<ProviderRegistry>,
    http: UpstreamHttp,
    state_store: Arc<dyn AuthStateStore>,
    validator: Arc<TokenValidator>,
    state_ttl_seconds: u64,
}

impl OidcClient {
    pub fn new(
        registry: ProviderRegistry,
        http: UpstreamHttp,
        state_store: Arc<dyn AuthStateStore>,
        validator: TokenValidator,
        state_ttl_seconds: u64,
    ) -> Self {
        Self {
            registry: Arc::new(registry),
            http,
            state_store,
            validator: Arc::new(validator),
            state_ttl_seconds,
        }
    }

    /// Build a client from configuration, running discovery where
    /// configured. Uses the in-memory state store.
    pub async fn from_config(config: &OidcConfig) -> OidcResult<Self> {
        let http = UpstreamHttp::new(
            Duration::from_secs(config.http_timeout_seconds),
            Duration::from_millis(config.retry_backoff_ms),
        )?;
        let registry = ProviderRegistry::resolve(config, &http).await?;
        let jwks = JwksCache::new(
            http.clone(),
            Duration::from_secs(config.jwks_default_max_age_seconds),
            Duration::from_secs(config.jwks_forced_refresh_seconds),
        );
        let validator = TokenValidator::new(jwks, config.clock_leeway_seconds);

        info!(providers = registry.len(), "OIDC client ready");

        Ok(Self::new(
            registry,
            http,
            Arc::new(InMemoryStateStore::new()),
            validator,
            config.state_ttl_seconds,
        ))
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn state_store(&self) -> &Arc<dyn AuthStateStore> {
        &self.state_store
    }

    /// Create a pending request and the provider URL to redirect to.
    pub async fn begin_login(&self, provider_name: &str) -> OidcResult<AuthorizationRedirect> {
        let provider = self.registry.lookup(provider_name)?;
        let mut url = Url::parse(&provider.authorization_endpoint)?;

        let pkce = provider.use_pkce.then(PkceChallenge::new);

        let request = AuthRequestState::new(
            provider.name.clone(),
            provider.redirect_uri.clone(),
            pkce.as_ref().map(|p| p.code_verifier.clone()),
            self.state_ttl_seconds,
        );
        let state_param = request.state.clone();
        let nonce = request.nonce.clone();

        {
            let mut params = url.query_pairs_mut();
            params.append_pair("response_type", "code");
            params.append_pair("client_id", &provider.client_id);
            params.append_pair("redirect_uri", &provider.redirect_uri);
            params.append_pair("state", &state_param);

            if !provider.scopes.is_empty() {
                params.append_pair("scope", &provider.scopes.join(" "));
            }

            if let Some(nonce) = &nonce {
                params.append_pair("nonce", nonce);
            }

            if let Some(pkce) = &pkce {
                params.append_pair("code_challenge", &pkce.code_challenge);
                params.append_pair("code_challenge_method", &pkce.code_challenge_method);
            }

            for (key, value) in &provider.auth_params {
                params.append_pair(key, value);
            }
        }

        self.state_store.store(request).await?;

        debug!(provider = %provider.name, "Generated authorization URL");

        Ok(AuthorizationRedirect {
            url: url.to_string(),
            state: state_param,
        })
    }

    /// Consume the state and exchange the code. The state is spent before
    /// anything else, so a failed callback cannot be retried with it.
    pub async fn complete_login(
        &self,
        provider_name: &str,
        params: CallbackParams,
    ) -> OidcResult<CompletedLogin> {
        let provider = self.registry.lookup(provider_name)?;

        let state_param = params
            .state
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or(OidcError::InvalidState)?;
        let request = self.state_store.consume(state_param).await?;

        if request.provider_id != provider.name {
            warn!(
                provider = %provider.name,
                issued_for = %request.provider_id,
                "State presented to the wrong provider"
            );
            return Err(OidcError::InvalidState);
        }

        if let Some(error) = &params.error {
            let description = params
                .error_description
                .as_deref()
                .unwrap_or("No description");
            return Err(OidcError::CallbackError(format!(
                "{}: {}",
                error, description
            )));
        }

        let code = params
            .code
            .as_deref()
            .filter(|c| !c.is_empty())
            .ok_or(OidcError::MissingAuthorizationCode)?;

        let tokens = self.exchange_code(provider, code, &request).await?;

        Ok(CompletedLogin { tokens, request })
    }

    async fn exchange_code(
        &self,
        provider: &ProviderConfig,
        code: &str,
        request: &AuthRequestState,
    ) -> OidcResult<TokenResponse> {
        let mut form = vec![
            ("grant_type", "authorization_code"),
            ("code", code),
            ("client_id", provider.client_id.as_str()),
            ("client_secret", provider.client_secret.as_str()),
            ("redirect_uri", request.redirect_uri.as_str()),
        ];

        if let Some(verifier) = request.pkce_verifier.as_deref() {
            form.push(("code_verifier", verifier));
        }

        let response = self.http.post_form(&provider.token_endpoint, &form).await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(
                provider = %provider.name,
                %status,
                error = oauth_error_code(&body).as_deref().unwrap_or("unknown"),
                "Token exchange failed"
            );
            return Err(OidcError::Upstream(format!(
                "token endpoint returned status {}",
                status
            )));
        }

        let tokens: TokenResponse = response
            .json()
            .await
            .map_err(|e| OidcError::Upstream(format!("malformed token response: {}", e)))?;

        if tokens.id_token.as_deref().is_none_or(str::is_empty) {
            return Err(OidcError::Upstream(
                "token response has no id_token".to_string(),
            ));
        }

        info!(provider = %provider.name, "Exchanged authorization code for tokens");
        Ok(tokens)
    }

    /// Full callback handling: state, code exchange, then ID token
    /// validation bound to the request's nonce.
    pub async fn authenticate(
        &self,
        provider_name: &str,
        params: CallbackParams,
    ) -> OidcResult<AuthenticatedLogin> {
        let provider = self.registry.lookup(provider_name)?;
        let completed = self.complete_login(provider_name, params).await?;

        let id_token = completed
            .tokens
            .id_token
            .ok_or_else(|| OidcError::Upstream("token response has no id_token".to_string()))?;

        let expectations = TokenExpectations::for_provider(provider)
            .with_nonce(completed.request.nonce.as_deref());
        let claims = self.validator.validate(&id_token, &expectations).await?;

        Ok(AuthenticatedLogin { claims, id_token })
    }
}

/// The OAuth `error` code of a failed token response. The rest of the body
/// stays out of the logs.
fn oauth_error_code(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    let code = value.get("error")?.as_str()?;
    let well_formed = !code.is_empty()
        && code.len() <= 64
        && code.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    well_formed.then(|| code.to_string())
}
