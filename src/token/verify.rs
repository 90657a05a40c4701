//! Provider access-token verification against the cached key sets.
//! Used by: token::cache, state.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use jsonwebtoken::{decode, decode_header, Algorithm, Validation};

use crate::error::{Error, Result};
use crate::keys::KeyMaterialCache;
use crate::telemetry::Metrics;
use crate::token::claims::{RawClaims, VerifiedClaims};

pub struct TokenVerifier {
    keys: Arc<KeyMaterialCache>,
    algorithm: Algorithm,
    leeway: Duration,
    role_client: Option<String>,
    metrics: Arc<Metrics>,
}

impl TokenVerifier {
    pub fn new(
        keys: Arc<KeyMaterialCache>,
        algorithm: Algorithm,
        leeway: Duration,
        role_client: Option<String>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            keys,
            algorithm,
            leeway,
            role_client,
            metrics,
        }
    }

    /// Header first (algorithm and key id only), then the signature with
    /// the key fetched for `expected_issuer`, then the claims. No payload
    /// field is read before the signature checks out.
    pub async fn verify(
        &self,
        raw: &str,
        expected_issuer: &str,
        expected_audience: &str,
    ) -> Result<VerifiedClaims> {
        let header = decode_header(raw)
            .map_err(|e| Error::TokenInvalid(format!("malformed token: {e}")))?;
        if header.alg != self.algorithm {
            return Err(Error::TokenInvalid(format!(
                "algorithm {:?} not accepted",
                header.alg
            )));
        }
        let kid = header
            .kid
            .ok_or_else(|| Error::TokenInvalid("missing key id".into()))?;

        let key = self.keys.key_for(expected_issuer, &kid).await?;

        self.metrics.record_verification();
        let data = decode::<RawClaims>(raw, &key, &self.signature_only())
            .map_err(|e| Error::TokenInvalid(format!("signature check failed: {e}")))?;

        data.claims.into_verified(
            expected_issuer,
            expected_audience,
            self.role_client.as_deref(),
            self.leeway,
            Utc::now(),
        )
    }

    pub fn verification_count(&self) -> u64 {
        self.metrics.verifications.load(Ordering::Relaxed)
    }

    // Claim checks run in `RawClaims::into_verified` so each failure maps to
    // its own error kind.
    fn signature_only(&self) -> Validation {
        let mut validation = Validation::new(self.algorithm);
        validation.leeway = 0;
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();
        validation
    }
}
