//! Single-use authorization request state.

use crate::error::{OidcError, OidcResult};
use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use rand::{RngCore, thread_rng};
use serde::{Deserialize, Serialize};

/// Number of random bytes behind every state and nonce value
const RANDOM_VALUE_BYTES: usize = 32;

/// Random URL-safe token with 256 bits of entropy.
pub fn random_token() -> String {
    let mut bytes = [0u8; RANDOM_VALUE_BYTES];
    thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Server-side record of one login attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthRequestState {
    pub state: String,
    pub provider_id: String,
    pub redirect_uri: String,
    pub pkce_verifier: Option<String>,
    /// OIDC nonce expected back in the ID token
    pub nonce: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl AuthRequestState {
    pub fn new(
        provider_id: String,
        redirect_uri: String,
        pkce_verifier: Option<String>,
        ttl_seconds: u64,
    ) -> Self {
        Self::with_state(
            random_token(),
            provider_id,
            redirect_uri,
            pkce_verifier,
            ttl_seconds,
        )
    }

    /// Build a record for a known state value.
    pub fn with_state(
        state: String,
        provider_id: String,
        redirect_uri: String,
        pkce_verifier: Option<String>,
        ttl_seconds: u64,
    ) -> Self {
        let created_at = Utc::now();
        let expires_at = created_at + Duration::seconds(ttl_seconds as i64);

        Self {
            state,
            provider_id,
            redirect_uri,
            pkce_verifier,
            nonce: Some(random_token()),
            created_at,
            expires_at,
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

/// Storage for pending authorization requests
#[async_trait]
pub trait AuthStateStore: Send + Sync {
    /// Store a new state
    async fn store(&self, state: AuthRequestState) -> OidcResult<()>;

    /// Remove and return the state. Succeeds for at most one caller per
    /// state value; expired records are removed and rejected.
    async fn consume(&self, state: &str) -> OidcResult<AuthRequestState>;

    /// Clean up expired states
    async fn cleanup_expired(&self) -> OidcResult<usize>;

    async fn len(&self) -> usize;
}

/// In-memory implementation of AuthStateStore
#[derive(Default)]
pub struct InMemoryStateStore {
    states: DashMap<String, AuthRequestState>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AuthStateStore for InMemoryStateStore {
    async fn store(&self, state: AuthRequestState) -> OidcResult<()> {
        self.states.insert(state.state.clone(), state);
        Ok(())
    }

    async fn consume(&self, state: &str) -> OidcResult<AuthRequestState> {
        let (_, record) = self.states.remove(state).ok_or(OidcError::InvalidState)?;

        if record.is_expired() {
            return Err(OidcError::InvalidState);
        }

        Ok(record)
    }

    async fn cleanup_expired(&self) -> OidcResult<usize> {
        let now = Utc::now();
        let before = self.states.len();
        self.states.retain(|_, record| now < record.expires_at);
        Ok(before.saturating_sub(self.states.len()))
    }

    async fn len(&self) -> usize {
        self.states.len()
    }
}
