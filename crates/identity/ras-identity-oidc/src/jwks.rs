//! JWKS fetching and caching.
//!
//! Key sets are cached per `jwks_uri` for the lifetime announced in the
//! response's `Cache-Control: max-age`. An expired set keeps serving readers
//! while a single task refreshes it, and a failed refresh falls back to the
//! stale set. An unknown `kid` forces a refresh, at most once per
//! `forced_refresh_interval`, to pick up rotated keys.

use crate::error::{OidcError, OidcResult};
use crate::http::UpstreamHttp;
use dashmap::DashMap;
use jsonwebtoken::jwk::{Jwk, JwkSet};
use reqwest::header::CACHE_CONTROL;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

const MIN_MAX_AGE_SECS: u64 = 60;
const MAX_MAX_AGE_SECS: u64 = 24 * 60 * 60;

#[derive(Debug, Clone)]
struct CachedKeySet {
    keys: Arc<JwkSet>,
    fetched_at: Instant,
    expires_at: Instant,
}

impl CachedKeySet {
    fn is_fresh(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

pub struct JwksCache {
    http: UpstreamHttp,
    entries: RwLock<HashMap<String, CachedKeySet>>,
    refresh_locks: DashMap<String, Arc<Mutex<()>>>,
    default_max_age: Duration,
    forced_refresh_interval: Duration,
}

impl JwksCache {
    pub fn new(
        http: UpstreamHttp,
        default_max_age: Duration,
        forced_refresh_interval: Duration,
    ) -> Self {
        Self {
            http,
            entries: RwLock::new(HashMap::new()),
            refresh_locks: DashMap::new(),
            default_max_age,
            forced_refresh_interval,
        }
    }

    /// Find the signing key with the given key id.
    pub async fn find_key(&self, jwks_uri: &str, kid: &str) -> OidcResult<Jwk> {
        let keys = self.key_set(jwks_uri).await?;
        if let Some(jwk) = keys.find(kid) {
            return Ok(jwk.clone());
        }

        debug!(kid = %kid, "Key id not in cached JWKS, forcing refresh");
        let keys = self.forced_refresh(jwks_uri).await?;
        keys.find(kid).cloned().ok_or_else(|| {
            OidcError::SignatureInvalid(format!("no signing key matches kid '{}'", kid))
        })
    }

    async fn key_set(&self, jwks_uri: &str) -> OidcResult<Arc<JwkSet>> {
        let cached = {
            let entries = self.entries.read().await;
            entries
                .get(jwks_uri)
                .map(|entry| (entry.keys.clone(), entry.is_fresh(Instant::now())))
        };

        match cached {
            Some((keys, true)) => Ok(keys),
            Some((stale, false)) => {
                let lock = self.refresh_lock(jwks_uri);
                // Another task is already refreshing; keep serving the stale set.
                let Ok(_guard) = lock.try_lock() else {
                    return Ok(stale);
                };
                match self.refresh(jwks_uri).await {
                    Ok(keys) => Ok(keys),
                    Err(e) => {
                        warn!("JWKS refresh failed, serving stale keys: {}", e);
                        Ok(stale)
                    }
                }
            }
            None => {
                let lock = self.refresh_lock(jwks_uri);
                let _guard = lock.lock().await;
                if let Some(keys) = self.fresh_entry(jwks_uri).await {
                    return Ok(keys);
                }
                self.refresh(jwks_uri).await
            }
        }
    }

    async fn forced_refresh(&self, jwks_uri: &str) -> OidcResult<Arc<JwkSet>> {
        let lock = self.refresh_lock(jwks_uri);
        let _guard = lock.lock().await;

        let recent = {
            let entries = self.entries.read().await;
            entries
                .get(jwks_uri)
                .filter(|entry| entry.fetched_at.elapsed() < self.forced_refresh_interval)
                .map(|entry| entry.keys.clone())
        };

        match recent {
            Some(keys) => Ok(keys),
            None => self.refresh(jwks_uri).await,
        }
    }

    async fn fresh_entry(&self, jwks_uri: &str) -> Option<Arc<JwkSet>> {
        let entries = self.entries.read().await;
        entries
            .get(jwks_uri)
            .filter(|entry| entry.is_fresh(Instant::now()))
            .map(|entry| entry.keys.clone())
    }

    fn refresh_lock(&self, jwks_uri: &str) -> Arc<Mutex<()>> {
        self.refresh_locks
            .entry(jwks_uri.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn refresh(&self, jwks_uri: &str) -> OidcResult<Arc<JwkSet>> {
        let response = self.http.get(jwks_uri).await?;

        if !response.status().is_success() {
            return Err(OidcError::Upstream(format!(
                "JWKS endpoint returned status {}",
                response.status()
            )));
        }

        let lifetime = cache_lifetime(
            response
                .headers()
                .get(CACHE_CONTROL)
                .and_then(|h| h.to_str().ok()),
            self.default_max_age,
        );

        let keys: JwkSet = response
            .json()
            .await
            .map_err(|e| OidcError::Upstream(format!("malformed JWKS: {}", e)))?;
        let keys = Arc::new(keys);

        let now = Instant::now();
        {
            let mut entries = self.entries.write().await;
            entries.insert(
                jwks_uri.to_string(),
                CachedKeySet {
                    keys: keys.clone(),
                    fetched_at: now,
                    expires_at: now + lifetime,
                },
            );
        }

        info!(
            keys = keys.keys.len(),
            max_age_secs = lifetime.as_secs(),
            "Refreshed JWKS"
        );
        Ok(keys)
    }

    #[cfg(test)]
    async fn expire_all(&self) {
        let mut entries = self.entries.write().await;
        let now = Instant::now();
        for entry in entries.values_mut() {
            entry.expires_at = now;
        }
    }
}

/// Cache lifetime from a `Cache-Control` header, clamped to sane bounds.
fn cache_lifetime(cache_control: Option<&str>, default: Duration) -> Duration {
    let secs = cache_control
        .and_then(parse_max_age)
        .unwrap_or(default.as_secs());
    Duration::from_secs(secs.clamp(MIN_MAX_AGE_SECS, MAX_MAX_AGE_SECS))
}

fn parse_max_age(cache_control: &str) -> Option<u64> {
    cache_control
        .split(',')
        .map(str::trim)
        .find_map(|directive| {
            directive
                .strip_prefix("max-age=")
                .and_then(|val| val.parse::<u64>().ok())
        })
}
