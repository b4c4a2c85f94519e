//! ID token validation against the provider's published signing keys.

use crate::config::ProviderConfig;
use crate::error::{OidcError, OidcResult};
use crate::jwks::JwksCache;
use crate::types::{Audience, IdTokenClaims};
use chrono::{DateTime, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, decode_header};
use ras_identity_core::IdentityClaims;
use serde_json::Value;
use std::str::FromStr;
use tracing::debug;

/// What a token must look like to be accepted
#[derive(Debug, Clone, Copy)]
pub struct TokenExpectations<'a> {
    pub provider: &'a str,
    pub issuer: &'a str,
    /// Our client id
    pub audience: &'a str,
    pub jwks_uri: &'a str,
    pub nonce: Option<&'a str>,
    pub algorithms: &'a [Algorithm],
}

impl<'a> TokenExpectations<'a> {
    pub fn for_provider(provider: &'a ProviderConfig) -> Self {
        Self {
            provider: &provider.name,
            issuer: &provider.issuer,
            audience: &provider.client_id,
            jwks_uri: &provider.jwks_uri,
            nonce: None,
            algorithms: &provider.id_token_signing_algs,
        }
    }

    pub fn with_nonce(mut self, nonce: Option<&'a str>) -> Self {
        self.nonce = nonce;
        self
    }
}

pub struct TokenValidator {
    jwks: JwksCache,
    leeway_seconds: u64,
}

impl TokenValidator {
    pub fn new(jwks: JwksCache, leeway_seconds: u64) -> Self {
        Self {
            jwks,
            leeway_seconds,
        }
    }

    /// Verify signature and claims. Returns claims only on full success.
    pub async fn validate(
        &self,
        id_token: &str,
        expected: &TokenExpectations<'_>,
    ) -> OidcResult<IdentityClaims> {
        let header = decode_header(id_token)
            .map_err(|e| OidcError::SignatureInvalid(format!("malformed token header: {}", e)))?;

        if !is_asymmetric(header.alg) || !expected.algorithms.contains(&header.alg) {
            return Err(OidcError::SignatureInvalid(format!(
                "algorithm {:?} is not accepted",
                header.alg
            )));
        }

        let kid = header
            .kid
            .ok_or_else(|| OidcError::SignatureInvalid("token header has no kid".to_string()))?;

        let jwk = self.jwks.find_key(expected.jwks_uri, &kid).await?;

        if let Some(key_alg) = jwk.common.key_algorithm {
            if Algorithm::from_str(&key_alg.to_string()).ok() != Some(header.alg) {
                return Err(OidcError::SignatureInvalid(format!(
                    "key '{}' is not usable with {:?}",
                    kid, header.alg
                )));
            }
        }

        let key = DecodingKey::from_jwk(&jwk)
            .map_err(|e| OidcError::SignatureInvalid(format!("unusable signing key: {}", e)))?;

        let mut validation = Validation::new(header.alg);
        validation.set_issuer(&[expected.issuer]);
        validation.set_audience(&[expected.audience]);
        validation.set_required_spec_claims(&["exp", "iss", "aud", "sub"]);
        validation.validate_exp = true;
        validation.leeway = self.leeway_seconds;

        // Decoded untyped first so absent claims surface as MissingRequiredClaim
        let raw = decode::<Value>(id_token, &key, &validation)
            .map_err(classify)?
            .claims;
        let claims: IdTokenClaims = serde_json::from_value(raw)
            .map_err(|e| OidcError::ClaimInvalid(format!("malformed claims: {}", e)))?;

        self.check_claims(&claims, expected)?;

        let expiry = DateTime::<Utc>::from_timestamp(claims.exp, 0)
            .ok_or_else(|| OidcError::ClaimInvalid("exp is out of range".to_string()))?;

        debug!(provider = %expected.provider, "Validated ID token");

        Ok(IdentityClaims {
            provider: expected.provider.to_string(),
            issuer: claims.iss,
            subject: claims.sub,
            audience: expected.audience.to_string(),
            email: claims.email,
            email_verified: claims.email_verified,
            name: claims.name,
            expiry,
        })
    }

    /// Checks jsonwebtoken does not cover.
    fn check_claims(
        &self,
        claims: &IdTokenClaims,
        expected: &TokenExpectations<'_>,
    ) -> OidcResult<()> {
        if let Some(nonce) = expected.nonce {
            if claims.nonce.as_deref() != Some(nonce) {
                return Err(OidcError::ClaimInvalid("nonce mismatch".to_string()));
            }
        }

        if let Audience::Multiple(auds) = &claims.aud {
            if auds.len() > 1 && claims.azp.as_deref() != Some(expected.audience) {
                return Err(OidcError::ClaimInvalid(
                    "azp does not match client id".to_string(),
                ));
            }
        }

        if claims.sub.trim().is_empty() {
            return Err(OidcError::ClaimInvalid("empty subject".to_string()));
        }

        if let Some(iat) = claims.iat {
            let now = Utc::now().timestamp();
            if iat > now + self.leeway_seconds as i64 {
                return Err(OidcError::ClaimInvalid(
                    "token issued in the future".to_string(),
                ));
            }
        }

        Ok(())
    }
}

fn is_asymmetric(alg: Algorithm) -> bool {
    !matches!(alg, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512)
}

fn classify(err: jsonwebtoken::errors::Error) -> OidcError {
    match err.kind() {
        ErrorKind::ExpiredSignature => OidcError::ClaimInvalid("token expired".to_string()),
        ErrorKind::InvalidIssuer => OidcError::ClaimInvalid("issuer mismatch".to_string()),
        ErrorKind::InvalidAudience => OidcError::ClaimInvalid("audience mismatch".to_string()),
        ErrorKind::ImmatureSignature => OidcError::ClaimInvalid("token not yet valid".to_string()),
        ErrorKind::MissingRequiredClaim(claim) => {
            OidcError::ClaimInvalid(format!("missing claim '{}'", claim))
        }
        _ => OidcError::SignatureInvalid(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::UpstreamHttp;
    use crate::test_support::{TestSigner, primary_signer, secondary_signer};
    use jsonwebtoken::{EncodingKey, Header, encode};
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const ISSUER: &str = "https://accounts.google.com";
    const CLIENT_ID: &str = "client-123";

    async fn jwks_server(signers: &[&TestSigner]) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/jwks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(TestSigner::jwks(signers)))
            .mount(&server)
            .await;
        server
    }

    fn validator() -> TokenValidator {
        let http = UpstreamHttp::new(Duration::from_secs(2), Duration::from_millis(10)).unwrap();
        TokenValidator::new(
            JwksCache::new(http, Duration::from_secs(300), Duration::from_secs(30)),
            60,
        )
    }

    fn claims(overrides: serde_json::Value) -> serde_json::Value {
        let now = Utc::now().timestamp();
        let mut base = json!({
            "iss": ISSUER,
            "sub": "110169484474386276334",
            "aud": CLIENT_ID,
            "iat": now,
            "exp": now + 3600,
            "email": "user@example.com",
            "email_verified": true,
            "nonce": "n-0S6_WzA2Mj"
        });
        if let (Some(base), Some(overrides)) = (base.as_object_mut(), overrides.as_object()) {
            for (k, v) in overrides {
                base.insert(k.clone(), v.clone());
            }
        }
        base
    }

    fn expectations<'a>(jwks_uri: &'a str, algs: &'a [Algorithm]) -> TokenExpectations<'a> {
        TokenExpectations {
            provider: "google",
            issuer: ISSUER,
            audience: CLIENT_ID,
            jwks_uri,
            nonce: Some("n-0S6_WzA2Mj"),
            algorithms: algs,
        }
    }

    #[tokio::test]
    async fn test_valid_token_yields_claims() {
        let signer = primary_signer();
        let server = jwks_server(&[signer]).await;
        let uri = format!("{}/jwks", server.uri());
        let algs = [Algorithm::RS256];

        let token = signer.sign(&claims(json!({})));
        let identity = validator()
            .validate(&token, &expectations(&uri, &algs))
            .await
            .unwrap();

        assert_eq!(identity.provider, "google");
        assert_eq!(identity.subject, "110169484474386276334");
        assert_eq!(identity.audience, CLIENT_ID);
        assert_eq!(identity.email.as_deref(), Some("user@example.com"));
        assert!(!identity.is_expired());
    }

    #[tokio::test]
    async fn test_token_signed_with_unpublished_key_is_rejected() {
        let published = primary_signer();
        let foreign = secondary_signer();
        let server = jwks_server(&[published]).await;
        let uri = format!("{}/jwks", server.uri());
        let algs = [Algorithm::RS256];

        // Foreign key under an unknown kid
        let token = foreign.sign(&claims(json!({})));
        let result = validator().validate(&token, &expectations(&uri, &algs)).await;
        assert!(matches!(result, Err(OidcError::SignatureInvalid(_))));

        // Foreign key claiming the published kid
        let token = foreign.sign_with_kid(&claims(json!({})), published.kid());
        let result = validator().validate(&token, &expectations(&uri, &algs)).await;
        assert!(matches!(result, Err(OidcError::SignatureInvalid(_))));
    }

    #[tokio::test]
    async fn test_audience_mismatch_is_rejected() {
        let signer = primary_signer();
        let server = jwks_server(&[signer]).await;
        let uri = format!("{}/jwks", server.uri());
        let algs = [Algorithm::RS256];

        for aud in [json!("someone-else"), json!(["someone-else", "another"])] {
            let token = signer.sign(&claims(json!({ "aud": aud })));
            let result = validator().validate(&token, &expectations(&uri, &algs)).await;
            assert!(matches!(result, Err(OidcError::ClaimInvalid(_))));
        }
    }

    #[tokio::test]
    async fn test_issuer_and_nonce_are_checked() {
        let signer = primary_signer();
        let server = jwks_server(&[signer]).await;
        let uri = format!("{}/jwks", server.uri());
        let algs = [Algorithm::RS256];
        let validator = validator();

        let token = signer.sign(&claims(json!({ "iss": "https://evil.example" })));
        let result = validator.validate(&token, &expectations(&uri, &algs)).await;
        assert!(matches!(result, Err(OidcError::ClaimInvalid(_))));

        let token = signer.sign(&claims(json!({ "nonce": "replayed" })));
        let result = validator.validate(&token, &expectations(&uri, &algs)).await;
        assert!(matches!(result, Err(OidcError::ClaimInvalid(_))));
    }

    #[tokio::test]
    async fn test_expiry_respects_fixed_leeway() {
        let signer = primary_signer();
        let server = jwks_server(&[signer]).await;
        let uri = format!("{}/jwks", server.uri());
        let algs = [Algorithm::RS256];
        let validator = validator();
        let now = Utc::now().timestamp();

        let within_leeway = signer.sign(&claims(json!({ "exp": now - 10 })));
        assert!(
            validator
                .validate(&within_leeway, &expectations(&uri, &algs))
                .await
                .is_ok()
        );

        let expired = signer.sign(&claims(json!({ "exp": now - 600 })));
        let result = validator.validate(&expired, &expectations(&uri, &algs)).await;
        assert!(matches!(result, Err(OidcError::ClaimInvalid(_))));
    }

    #[tokio::test]
    async fn test_missing_required_claim_is_claim_invalid() {
        let signer = primary_signer();
        let server = jwks_server(&[signer]).await;
        let uri = format!("{}/jwks", server.uri());
        let algs = [Algorithm::RS256];
        let validator = validator();

        for claim in ["sub", "exp", "iss", "aud"] {
            let mut body = claims(json!({}));
            body.as_object_mut().unwrap().remove(claim);
            let token = signer.sign(&body);

            let result = validator.validate(&token, &expectations(&uri, &algs)).await;
            assert!(
                matches!(result, Err(OidcError::ClaimInvalid(_))),
                "without {}: {:?}",
                claim,
                result
            );
        }
    }

    #[tokio::test]
    async fn test_mistyped_claim_is_claim_invalid() {
        let signer = primary_signer();
        let server = jwks_server(&[signer]).await;
        let uri = format!("{}/jwks", server.uri());
        let algs = [Algorithm::RS256];

        let token = signer.sign(&claims(json!({ "sub": 42 })));
        let result = validator().validate(&token, &expectations(&uri, &algs)).await;
        assert!(matches!(result, Err(OidcError::ClaimInvalid(_))));
    }

    #[tokio::test]
    async fn test_key_published_for_other_algorithm_is_refused() {
        let signer = primary_signer();
        let server = MockServer::start().await;
        let mut jwks = TestSigner::jwks(&[signer]);
        jwks["keys"][0]["alg"] = json!("RS512");
        Mock::given(method("GET"))
            .and(path("/jwks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(jwks))
            .mount(&server)
            .await;
        let uri = format!("{}/jwks", server.uri());
        let algs = [Algorithm::RS256, Algorithm::RS512];

        let token = signer.sign(&claims(json!({})));
        let result = validator().validate(&token, &expectations(&uri, &algs)).await;
        assert!(matches!(result, Err(OidcError::SignatureInvalid(_))));
    }

    #[tokio::test]
    async fn test_symmetric_algorithm_is_refused() {
        let server = jwks_server(&[primary_signer()]).await;
        let uri = format!("{}/jwks", server.uri());
        let algs = [Algorithm::RS256, Algorithm::HS256];

        let mut header = Header::new(Algorithm::HS256);
        header.kid = Some(primary_signer().kid().to_string());
        let token = encode(
            &header,
            &claims(json!({})),
            &EncodingKey::from_secret(b"guessable"),
        )
        .unwrap();

        let result = validator().validate(&token, &expectations(&uri, &algs)).await;
        assert!(matches!(result, Err(OidcError::SignatureInvalid(_))));
    }

    #[tokio::test]
    async fn test_garbage_token_is_signature_invalid() {
        let server = jwks_server(&[primary_signer()]).await;
        let uri = format!("{}/jwks", server.uri());
        let algs = [Algorithm::RS256];

        let result = validator()
            .validate("not.a.jwt", &expectations(&uri, &algs))
            .await;
        assert!(matches!(result, Err(OidcError::SignatureInvalid(_))));
    }
}
