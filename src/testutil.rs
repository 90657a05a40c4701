//! Test-only key pairs, token builders and scripted key sources.
//! Used by: tests in keys, token, gate, session, handlers, server.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use ed25519_dalek::SigningKey;
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use parking_lot::Mutex;
use rand::rngs::OsRng;
use serde_json::{json, Value};

use crate::config::GateConfig;
use crate::error::{Error, Result};
use crate::keys::KeySource;

pub const ISSUER: &str = "https://id.example.com/realms/salon";
pub const AUDIENCE: &str = "account";
pub const CLIENT_ID: &str = "booking-api";

pub struct TestKey {
    kid: String,
    signing: SigningKey,
}

impl TestKey {
    pub fn generate(kid: &str) -> Self {
        Self {
            kid: kid.to_owned(),
            signing: SigningKey::generate(&mut OsRng),
        }
    }

    pub fn jwk_json(&self) -> Value {
        json!({
            "kty": "OKP",
            "crv": "Ed25519",
            "x": URL_SAFE_NO_PAD.encode(self.signing.verifying_key().to_bytes()),
            "kid": self.kid,
            "use": "sig",
        })
    }

    pub fn jwks_json(&self) -> Value {
        json!({ "keys": [self.jwk_json()] })
    }

    pub fn jwk_set(&self) -> JwkSet {
        serde_json::from_value(self.jwks_json()).expect("test jwk set")
    }

    pub fn sign(&self, claims: &Value) -> String {
        self.sign_with_kid(claims, Some(&self.kid))
    }

    pub fn sign_with_kid(&self, claims: &Value, kid: Option<&str>) -> String {
        let mut header = Header::new(Algorithm::EdDSA);
        header.kid = kid.map(str::to_owned);
        encode(&header, claims, &self.encoding_key()).expect("sign test token")
    }

    fn encoding_key(&self) -> EncodingKey {
        let mut pkcs8_der = vec![
            0x30, 0x2e, // SEQUENCE, 46 bytes
            0x02, 0x01, 0x00, // INTEGER version 0
            0x30, 0x05, // SEQUENCE, algorithm identifier
            0x06, 0x03, 0x2b, 0x65, 0x70, // OID 1.3.101.112 (Ed25519)
            0x04, 0x22, // OCTET STRING, 34 bytes
            0x04, 0x20, // OCTET STRING, 32 bytes
        ];
        pkcs8_der.extend_from_slice(&self.signing.to_bytes());
        EncodingKey::from_ed_der(&pkcs8_der)
    }
}

/// Keycloak-shaped access-token payload for `sub`, expiring
/// `expires_in_secs` from now (negative for already expired).
pub fn standard_claims(sub: &str, expires_in_secs: i64) -> Value {
    let now = Utc::now().timestamp();
    json!({
        "sub": sub,
        "iss": ISSUER,
        "aud": AUDIENCE,
        "exp": now + expires_in_secs,
        "iat": now,
        "preferred_username": sub,
        "email": format!("{sub}@example.com"),
        "name": "Test User",
    })
}

pub fn claims_with_roles(sub: &str, roles: &[&str], expires_in_secs: i64) -> Value {
    let mut claims = standard_claims(sub, expires_in_secs);
    claims["realm_access"] = json!({ "roles": roles });
    claims
}

/// `{header}.{payload}.` with an empty signature.
pub fn craft_raw_jwt(header: &Value, payload: &Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(header.to_string());
    let payload = URL_SAFE_NO_PAD.encode(payload.to_string());
    format!("{header}.{payload}.")
}

/// In-memory key source whose content, latency and availability tests can
/// change between calls.
pub struct ScriptedKeySource {
    jwks: Mutex<JwkSet>,
    delay: Mutex<Duration>,
    failing: AtomicBool,
    fetches: AtomicUsize,
}

impl ScriptedKeySource {
    pub fn new(jwks: JwkSet) -> Self {
        Self {
            jwks: Mutex::new(jwks),
            delay: Mutex::new(Duration::ZERO),
            failing: AtomicBool::new(false),
            fetches: AtomicUsize::new(0),
        }
    }

    pub fn set_jwks(&self, jwks: JwkSet) {
        *self.jwks.lock() = jwks;
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KeySource for ScriptedKeySource {
    async fn fetch(&self, _issuer: &str) -> Result<JwkSet> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::KeyFetch("scripted outage".into()));
        }
        Ok(self.jwks.lock().clone())
    }
}

/// Gate configuration for tests: Ed25519 tokens from [`ISSUER`], plain
/// cookies, and any `overrides` applied on top.
pub fn test_config(overrides: &[(&str, &str)]) -> GateConfig {
    let mut vars: HashMap<String, String> = [
        ("AUTH_ISSUER", ISSUER),
        ("AUTH_AUDIENCE", AUDIENCE),
        ("AUTH_ALGORITHM", "EdDSA"),
        ("CLIENT_ID", CLIENT_ID),
        ("CLIENT_SECRET", "test-secret"),
        ("COOKIE_SECURE", "false"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_owned(), v.to_owned()))
    .collect();
    for (k, v) in overrides {
        vars.insert((*k).to_owned(), (*v).to_owned());
    }
    GateConfig::from_lookup(|key| vars.get(key).cloned()).expect("test config")
}
