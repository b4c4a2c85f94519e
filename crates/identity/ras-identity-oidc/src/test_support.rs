//! RSA signing keys for tests.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use rsa::RsaPrivateKey;
use rsa::pkcs1::{EncodeRsaPrivateKey, LineEnding};
use rsa::traits::PublicKeyParts;
use serde_json::{Value, json};
use std::sync::OnceLock;

pub struct TestSigner {
    kid: String,
    encoding_key: EncodingKey,
    n: String,
    e: String,
}

impl TestSigner {
    pub fn generate(kid: &str) -> Self {
        let mut rng = rand::thread_rng();
        let private_key = RsaPrivateKey::new(&mut rng, 2048).expect("generate RSA key");
        let pem = private_key
            .to_pkcs1_pem(LineEnding::LF)
            .expect("encode RSA key");
        let encoding_key = EncodingKey::from_rsa_pem(pem.as_bytes()).expect("load RSA key");

        Self {
            kid: kid.to_string(),
            encoding_key,
            n: URL_SAFE_NO_PAD.encode(private_key.n().to_bytes_be()),
            e: URL_SAFE_NO_PAD.encode(private_key.e().to_bytes_be()),
        }
    }

    pub fn kid(&self) -> &str {
        &self.kid
    }

    pub fn jwk(&self) -> Value {
        json!({
            "kty": "RSA",
            "use": "sig",
            "alg": "RS256",
            "kid": self.kid,
            "n": self.n,
            "e": self.e
        })
    }

    pub fn jwks(signers: &[&TestSigner]) -> Value {
        json!({ "keys": signers.iter().map(|s| s.jwk()).collect::<Vec<_>>() })
    }

    pub fn sign(&self, claims: &Value) -> String {
        self.sign_with_kid(claims, &self.kid)
    }

    pub fn sign_with_kid(&self, claims: &Value, kid: &str) -> String {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(kid.to_string());
        encode(&header, claims, &self.encoding_key).expect("sign token")
    }
}

// Key generation is slow; share two keys across all tests in the binary.
pub fn primary_signer() -> &'static TestSigner {
    static SIGNER: OnceLock<TestSigner> = OnceLock::new();
    SIGNER.get_or_init(|| TestSigner::generate("primary-key"))
}

pub fn secondary_signer() -> &'static TestSigner {
    static SIGNER: OnceLock<TestSigner> = OnceLock::new();
    SIGNER.get_or_init(|| TestSigner::generate("secondary-key"))
}
