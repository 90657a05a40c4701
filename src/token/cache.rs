//! Short-lived cache of verified claims keyed by token fingerprint.
//! Used by: gate, state.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use moka::sync::Cache;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::telemetry::Metrics;
use crate::token::claims::VerifiedClaims;
use crate::token::verify::TokenVerifier;

type Fingerprint = [u8; 32];

#[derive(Clone)]
struct CachedClaims {
    claims: Arc<VerifiedClaims>,
    ttl: Duration,
}

struct ClaimsExpiry;

impl moka::Expiry<Fingerprint, CachedClaims> for ClaimsExpiry {
    fn expire_after_create(
        &self,
        _key: &Fingerprint,
        value: &CachedClaims,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// Front of the verifier. Stores only a SHA-256 of each token, never the
/// token itself, and never caches a failure.
pub struct ClaimsCache {
    verifier: Arc<TokenVerifier>,
    entries: Cache<Fingerprint, CachedClaims>,
    ceiling: Duration,
    issuer: Arc<str>,
    audience: Arc<str>,
    metrics: Arc<Metrics>,
}

impl ClaimsCache {
    pub fn new(
        verifier: Arc<TokenVerifier>,
        issuer: &str,
        audience: &str,
        ceiling: Duration,
        capacity: u64,
        metrics: Arc<Metrics>,
    ) -> Self {
        let entries = Cache::builder()
            .max_capacity(capacity)
            .expire_after(ClaimsExpiry)
            .build();
        Self {
            verifier,
            entries,
            ceiling,
            issuer: Arc::from(issuer),
            audience: Arc::from(audience),
            metrics,
        }
    }

    /// Cached claims if present and the token has not expired since;
    /// otherwise a full verification. The verification runs as its own task
    /// so a dropped request still leaves its cache entry behind.
    pub async fn get_or_verify(&self, raw: &str) -> Result<Arc<VerifiedClaims>> {
        let key = fingerprint(raw);
        if let Some(hit) = self.entries.get(&key) {
            if hit.claims.remaining(Utc::now()).is_some() {
                self.metrics.record_cache_hit();
                return Ok(hit.claims);
            }
            self.entries.invalidate(&key);
        }
        self.metrics.record_cache_miss();

        let verifier = Arc::clone(&self.verifier);
        let entries = self.entries.clone();
        let (issuer, audience) = (Arc::clone(&self.issuer), Arc::clone(&self.audience));
        let ceiling = self.ceiling;
        let raw = raw.to_owned();

        tokio::spawn(async move {
            let claims = Arc::new(verifier.verify(&raw, &issuer, &audience).await?);
            if let Some(ttl) = entry_ttl(ceiling, claims.expires_at, Utc::now()) {
                entries.insert(
                    key,
                    CachedClaims {
                        claims: Arc::clone(&claims),
                        ttl,
                    },
                );
            }
            Ok::<_, Error>(claims)
        })
        .await
        .map_err(|e| Error::TokenInvalid(format!("verification task failed: {e}")))?
    }

    pub fn entry_count(&self) -> u64 {
        self.entries.run_pending_tasks();
        self.entries.entry_count()
    }
}

/// `min(ceiling, exp - now)`; `None` when the token has no lifetime left
/// worth caching.
pub fn entry_ttl(ceiling: Duration, expires_at: DateTime<Utc>, now: DateTime<Utc>) -> Option<Duration> {
    let remaining = (expires_at - now).to_std().ok()?;
    let ttl = remaining.min(ceiling);
    (!ttl.is_zero()).then_some(ttl)
}

fn fingerprint(raw: &str) -> Fingerprint {
    Sha256::digest(raw.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::KeyMaterialCache;
    use crate::testutil::{standard_claims, ScriptedKeySource, TestKey, AUDIENCE, ISSUER};
    use jsonwebtoken::Algorithm;

    fn claims_cache(key: &TestKey, ceiling: Duration) -> (ClaimsCache, Arc<TokenVerifier>, Arc<Metrics>) {
        let metrics = Arc::new(Metrics::new());
        let keys = Arc::new(KeyMaterialCache::new(
            Arc::new(ScriptedKeySource::new(key.jwk_set())),
            Duration::from_secs(3600),
            Duration::from_secs(1),
            Duration::from_secs(30),
            Arc::clone(&metrics),
        ));
        let verifier = Arc::new(TokenVerifier::new(
            keys,
            Algorithm::EdDSA,
            Duration::from_secs(30),
            None,
            Arc::clone(&metrics),
        ));
        let cache = ClaimsCache::new(
            Arc::clone(&verifier),
            ISSUER,
            AUDIENCE,
            ceiling,
            1_000,
            Arc::clone(&metrics),
        );
        (cache, verifier, metrics)
    }

    mod ttl {
        use super::*;

        #[test]
        fn bounded_by_token_lifetime() {
            let now = Utc::now();
            let ttl = entry_ttl(Duration::from_secs(300), now + chrono::Duration::seconds(10), now);
            assert!(ttl.is_some_and(|t| t <= Duration::from_secs(10)));
        }

        #[test]
        fn bounded_by_ceiling() {
            let now = Utc::now();
            let ttl = entry_ttl(Duration::from_secs(300), now + chrono::Duration::hours(1), now);
            assert_eq!(ttl, Some(Duration::from_secs(300)));
        }

        #[test]
        fn none_for_expired_token() {
            let now = Utc::now();
            assert_eq!(entry_ttl(Duration::from_secs(300), now, now), None);
            assert_eq!(
                entry_ttl(Duration::from_secs(300), now - chrono::Duration::seconds(5), now),
                None
            );
        }
    }

    #[tokio::test]
    async fn second_lookup_reuses_verified_claims() -> Result<()> {
        let key = TestKey::generate("kid-1");
        let (cache, verifier, metrics) = claims_cache(&key, Duration::from_secs(300));
        let token = key.sign(&standard_claims("user-1", 600));

        let first = cache.get_or_verify(&token).await?;
        let second = cache.get_or_verify(&token).await?;

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(verifier.verification_count(), 1);
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.claims_cache_hits, 1);
        assert_eq!(snapshot.claims_cache_misses, 1);
        Ok(())
    }

    #[tokio::test]
    async fn failures_are_not_cached() {
        let key = TestKey::generate("kid-1");
        let (cache, verifier, _) = claims_cache(&key, Duration::from_secs(300));
        let mut claims = standard_claims("user-1", 600);
        claims["aud"] = "someone-else".into();
        let token = key.sign(&claims);

        for _ in 0..3 {
            assert!(matches!(
                cache.get_or_verify(&token).await,
                Err(Error::TokenUntrusted(_))
            ));
        }
        assert_eq!(verifier.verification_count(), 3);
        assert_eq!(cache.entry_count(), 0);
    }

    #[tokio::test]
    async fn token_in_leeway_verifies_but_is_not_cached() -> Result<()> {
        let key = TestKey::generate("kid-1");
        let (cache, verifier, _) = claims_cache(&key, Duration::from_secs(300));
        let token = key.sign(&standard_claims("user-1", -5));

        cache.get_or_verify(&token).await?;
        cache.get_or_verify(&token).await?;
        assert_eq!(verifier.verification_count(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn distinct_tokens_cached_separately() -> Result<()> {
        let key = TestKey::generate("kid-1");
        let (cache, _, _) = claims_cache(&key, Duration::from_secs(300));

        let a = cache.get_or_verify(&key.sign(&standard_claims("user-a", 600))).await?;
        let b = cache.get_or_verify(&key.sign(&standard_claims("user-b", 600))).await?;
        assert_eq!(a.subject, "user-a");
        assert_eq!(b.subject, "user-b");
        assert_eq!(cache.entry_count(), 2);
        Ok(())
    }

    #[test]
    fn fingerprint_is_fixed_length_and_stable() {
        assert_eq!(fingerprint("abc"), fingerprint("abc"));
        assert_ne!(fingerprint("abc"), fingerprint("abd"));
    }

    #[tokio::test]
    async fn verification_survives_key_outage_after_ttl_lapse() -> Result<()> {
        let key = TestKey::generate("kid-1");
        let metrics = Arc::new(Metrics::new());
        let source = Arc::new(ScriptedKeySource::new(key.jwk_set()));
        // Zero TTL: the cached set is stale as soon as it is fetched.
        let keys = Arc::new(KeyMaterialCache::new(
            source.clone(),
            Duration::ZERO,
            Duration::from_secs(1),
            Duration::from_secs(30),
            Arc::clone(&metrics),
        ));
        let verifier = Arc::new(TokenVerifier::new(
            keys,
            Algorithm::EdDSA,
            Duration::from_secs(30),
            None,
            Arc::clone(&metrics),
        ));
        let cache = ClaimsCache::new(
            Arc::clone(&verifier),
            ISSUER,
            AUDIENCE,
            Duration::from_secs(300),
            1_000,
            Arc::clone(&metrics),
        );

        cache
            .get_or_verify(&key.sign(&standard_claims("user-1", 600)))
            .await?;
        source.set_failing(true);

        for sub in ["user-2", "user-3"] {
            let claims = cache
                .get_or_verify(&key.sign(&standard_claims(sub, 600)))
                .await?;
            assert_eq!(claims.subject, sub);
        }
        assert_eq!(verifier.verification_count(), 3);
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.key_fetch_failures, 1);
        assert!(snapshot.stale_key_fallbacks >= 2);
        Ok(())
    }
}
