//! Session cookies for validated identities.
//!
//! By default the cookie carries a short HS256 token that only references a
//! server-side session; the identity claims never leave the process. The
//! legacy mode puts the raw provider ID token in the cookie instead.

use axum_extra::extract::cookie::{Cookie, SameSite};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use ras_identity_core::IdentityClaims;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

pub const DEFAULT_COOKIE_NAME: &str = "auth_token";
pub const DEFAULT_SECRET: &str = "change-me-in-production";

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("JWT error: {0}")]
    JwtError(#[from] jsonwebtoken::errors::Error),

    #[error("Session not found")]
    SessionNotFound,

    #[error("Session expired")]
    Expired,

    #[error("Invalid session")]
    InvalidSession,
}

/// What the session cookie carries
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CookieMode {
    /// Signed reference to a server-side session
    #[default]
    SessionReference,
    /// The provider's raw ID token
    IdToken,
}

/// Claims of the session reference token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionToken {
    pub sid: String,
    pub provider: String,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub secret: String,
    pub cookie_name: String,
    pub cookie_mode: CookieMode,
    pub http_only: bool,
    pub secure: bool,
    pub domain: Option<String>,
    pub algorithm: Algorithm,
    /// Shortest session handed out. Matches the validator's clock leeway so
    /// a token accepted just after its `exp` still yields a usable session.
    pub min_lifetime_seconds: i64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            secret: DEFAULT_SECRET.to_string(),
            cookie_name: DEFAULT_COOKIE_NAME.to_string(),
            cookie_mode: CookieMode::SessionReference,
            http_only: true,
            secure: true,
            domain: None,
            algorithm: Algorithm::HS256,
            min_lifetime_seconds: 60,
        }
    }
}

#[derive(Debug, Clone)]
struct SessionEntry {
    claims: IdentityClaims,
    expires_at: DateTime<Utc>,
}

pub struct SessionService {
    config: SessionConfig,
    active_sessions: Arc<RwLock<HashMap<String, SessionEntry>>>,
}

impl SessionService {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            active_sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn cookie_name(&self) -> &str {
        &self.config.cookie_name
    }

    pub fn cookie_mode(&self) -> CookieMode {
        self.config.cookie_mode
    }

    /// Record a session for validated claims and build the cookie for it.
    ///
    /// The cookie expires together with the identity token, but never sooner
    /// than `min_lifetime_seconds` from now. Claims that expired longer ago
    /// than that are refused.
    pub async fn issue(
        &self,
        claims: &IdentityClaims,
        id_token: &str,
    ) -> Result<Cookie<'static>, SessionError> {
        let now = Utc::now();
        let min_lifetime = Duration::seconds(self.config.min_lifetime_seconds.max(0));
        if claims.expiry + min_lifetime <= now {
            return Err(SessionError::Expired);
        }
        let expires_at = claims.expiry.max(now + min_lifetime);

        let (key, value) = match self.config.cookie_mode {
            CookieMode::SessionReference => {
                let sid = Uuid::new_v4().to_string();
                let token = SessionToken {
                    sid: sid.clone(),
                    provider: claims.provider.clone(),
                    iat: now.timestamp(),
                    exp: expires_at.timestamp(),
                };
                let value = encode(
                    &Header::new(self.config.algorithm),
                    &token,
                    &EncodingKey::from_secret(self.config.secret.as_bytes()),
                )?;
                (sid, value)
            }
            CookieMode::IdToken => (token_digest(id_token), id_token.to_string()),
        };

        let expires = OffsetDateTime::from_unix_timestamp(expires_at.timestamp())
            .map_err(|_| SessionError::InvalidSession)?;

        self.active_sessions.write().await.insert(
            key,
            SessionEntry {
                claims: claims.clone(),
                expires_at,
            },
        );

        debug!(provider = %claims.provider, mode = ?self.config.cookie_mode, "Issued session");

        let mut cookie = Cookie::build((self.config.cookie_name.clone(), value))
            .path("/")
            .secure(self.config.secure)
            .http_only(self.config.http_only)
            .same_site(SameSite::Lax)
            .expires(expires)
            .build();

        if let Some(domain) = &self.config.domain {
            cookie.set_domain(domain.clone());
        }

        Ok(cookie)
    }

    /// Claims behind a cookie value, if the session is still live.
    pub async fn resolve(&self, cookie_value: &str) -> Result<IdentityClaims, SessionError> {
        let key = self.session_key(cookie_value)?;

        let entry = self
            .active_sessions
            .read()
            .await
            .get(&key)
            .cloned()
            .ok_or(SessionError::SessionNotFound)?;

        if entry.expires_at <= Utc::now() {
            self.active_sessions.write().await.remove(&key);
            return Err(SessionError::Expired);
        }

        Ok(entry.claims)
    }

    pub async fn end_session(&self, cookie_value: &str) -> Option<IdentityClaims> {
        let key = self.session_key(cookie_value).ok()?;
        self.active_sessions
            .write()
            .await
            .remove(&key)
            .map(|entry| entry.claims)
    }

    pub async fn cleanup_expired(&self) -> usize {
        let now = Utc::now();
        let mut sessions = self.active_sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, entry| entry.expires_at > now);
        before - sessions.len()
    }

    pub async fn len(&self) -> usize {
        self.active_sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.active_sessions.read().await.is_empty()
    }

    fn session_key(&self, cookie_value: &str) -> Result<String, SessionError> {
        if cookie_value.is_empty() {
            return Err(SessionError::InvalidSession);
        }

        match self.config.cookie_mode {
            CookieMode::SessionReference => {
                let mut validation = Validation::new(self.config.algorithm);
                validation.set_required_spec_claims(&["exp"]);
                validation.leeway = 0;

                let data = decode::<SessionToken>(
                    cookie_value,
                    &DecodingKey::from_secret(self.config.secret.as_bytes()),
                    &validation,
                )?;
                Ok(data.claims.sid)
            }
            CookieMode::IdToken => Ok(token_digest(cookie_value)),
        }
    }
}

// Raw ID tokens are not kept as map keys.
fn token_digest(token: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(token.as_bytes()))
}
