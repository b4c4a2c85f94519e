//! Shared fixtures: a mock identity provider and a gateway wired to it.

#![allow(dead_code)]

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::Utc;
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use ras_identity_oidc::{
    InMemoryStateStore, JwksCache, OidcClient, ProviderConfig, ProviderRegistry, TokenValidator,
    UpstreamHttp,
};
use ras_identity_session::{SessionConfig, SessionService};
use ras_oidc_gateway::AppState;
use rsa::RsaPrivateKey;
use rsa::pkcs1::{EncodeRsaPrivateKey, LineEnding};
use rsa::traits::PublicKeyParts;
use serde_json::{Value, json};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const CLIENT_ID: &str = "gateway-client";
pub const POST_LOGIN_URL: &str = "https://app.example.com/";
pub const CALLBACK_BASE: &str = "https://login.example.com";

pub struct TestSigner {
    pub kid: String,
    encoding_key: EncodingKey,
    n: String,
    e: String,
}

impl TestSigner {
    fn generate(kid: &str) -> Self {
        let mut rng = rand::thread_rng();
        let private_key = RsaPrivateKey::new(&mut rng, 2048).expect("generate RSA key");
        let pem = private_key
            .to_pkcs1_pem(LineEnding::LF)
            .expect("encode RSA key");

        Self {
            kid: kid.to_string(),
            encoding_key: EncodingKey::from_rsa_pem(pem.as_bytes()).expect("load RSA key"),
            n: URL_SAFE_NO_PAD.encode(private_key.n().to_bytes_be()),
            e: URL_SAFE_NO_PAD.encode(private_key.e().to_bytes_be()),
        }
    }

    pub fn jwks(&self) -> Value {
        json!({
            "keys": [{
                "kty": "RSA",
                "use": "sig",
                "alg": "RS256",
                "kid": self.kid,
                "n": self.n,
                "e": self.e
            }]
        })
    }

    pub fn sign(&self, claims: &Value) -> String {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(self.kid.clone());
        encode(&header, claims, &self.encoding_key).expect("sign token")
    }
}

pub fn provider_signer() -> &'static TestSigner {
    static SIGNER: OnceLock<TestSigner> = OnceLock::new();
    SIGNER.get_or_init(|| TestSigner::generate("provider-key"))
}

pub fn attacker_signer() -> &'static TestSigner {
    static SIGNER: OnceLock<TestSigner> = OnceLock::new();
    SIGNER.get_or_init(|| TestSigner::generate("attacker-key"))
}

/// ID token as the mock provider would issue it
pub fn id_token(signer: &TestSigner, issuer: &str, nonce: &str) -> String {
    id_token_expiring_at(signer, issuer, nonce, Utc::now().timestamp() + 3600)
}

pub fn id_token_expiring_at(signer: &TestSigner, issuer: &str, nonce: &str, exp: i64) -> String {
    let now = Utc::now().timestamp();
    signer.sign(&json!({
        "iss": issuer,
        "sub": "110169484474386276334",
        "aud": CLIENT_ID,
        "iat": now - 3600,
        "exp": exp,
        "email": "user@example.com",
        "email_verified": true,
        "name": "Test User",
        "nonce": nonce
    }))
}

/// Mock provider serving a JWKS, and a gateway whose `google` provider
/// points at it.
pub async fn gateway() -> (MockServer, AppState) {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/jwks"))
        .respond_with(ResponseTemplate::new(200).set_body_json(provider_signer().jwks()))
        .mount(&server)
        .await;

    let google = ProviderConfig::new("google", CLIENT_ID, "gateway-secret").with_endpoints(
        server.uri(),
        format!("{}/authorize", server.uri()),
        format!("{}/token", server.uri()),
        format!("{}/jwks", server.uri()),
    );

    let registry = ProviderRegistry::new(vec![google], CALLBACK_BASE).expect("registry");
    let http = UpstreamHttp::new(Duration::from_secs(2), Duration::from_millis(10)).expect("http");
    let jwks = JwksCache::new(http.clone(), Duration::from_secs(300), Duration::from_secs(30));
    let oidc = OidcClient::new(
        registry,
        http,
        Arc::new(InMemoryStateStore::new()),
        TokenValidator::new(jwks, 60),
        600,
    );

    let sessions = Arc::new(SessionService::new(SessionConfig {
        secret: "integration-test-session-secret".to_string(),
        ..Default::default()
    }));

    (server, AppState::new(oidc, sessions, POST_LOGIN_URL))
}
