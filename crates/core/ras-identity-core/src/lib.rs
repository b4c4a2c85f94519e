//! Core identity types.
//!
//! `IdentityClaims` is the only shape an authenticated user takes once it
//! leaves the OIDC layer. It is produced by the token validator and consumed
//! by the session issuer; nothing else is allowed to construct one from an
//! unvalidated token.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Claims extracted from a validated identity token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityClaims {
    /// Registry name of the provider that issued the token
    pub provider: String,
    pub issuer: String,
    pub subject: String,
    /// The client id the token was issued to
    pub audience: String,
    pub email: Option<String>,
    pub email_verified: Option<bool>,
    pub name: Option<String>,
    pub expiry: DateTime<Utc>,
}

impl IdentityClaims {
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expiry
    }

    /// Seconds until expiry, zero once expired.
    pub fn remaining_seconds(&self) -> i64 {
        (self.expiry - Utc::now()).num_seconds().max(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn claims(expiry: DateTime<Utc>) -> IdentityClaims {
        IdentityClaims {
            provider: "google".to_string(),
            issuer: "https://accounts.google.com".to_string(),
            subject: "1234567890".to_string(),
            audience: "client-id".to_string(),
            email: Some("user@example.com".to_string()),
            email_verified: Some(true),
            name: None,
            expiry,
        }
    }

    #[test]
    fn test_expiry_boundary() {
        let now = Utc::now();
        let c = claims(now + Duration::seconds(30));

        assert!(!c.is_expired_at(now));
        assert!(c.is_expired_at(now + Duration::seconds(30)));
        assert!(c.remaining_seconds() <= 30);
    }

    #[test]
    fn test_expired_claims_report_zero_remaining() {
        let c = claims(Utc::now() - Duration::minutes(5));
        assert!(c.is_expired());
        assert_eq!(c.remaining_seconds(), 0);
    }

    #[test]
    fn test_claims_serde_roundtrip_keeps_expiry() {
        let c = claims(Utc::now() + Duration::hours(1));
        let json = serde_json::to_string(&c).unwrap();
        let back: IdentityClaims = serde_json::from_str(&json).unwrap();
        assert_eq!(back, c);
    }
}
