//! Signing-key sets per issuer, with single-flight refresh and stale fallback.
//! Used by: token::verify, state.

pub mod source;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwapOption;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use jsonwebtoken::jwk::{AlgorithmParameters, JwkSet, PublicKeyUse};
use jsonwebtoken::DecodingKey;
use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::telemetry::Metrics;

pub use source::{HttpKeySource, KeySource};

/// Immutable snapshot of one issuer's verification keys. Replaced wholesale
/// on refresh.
pub struct SigningKeySet {
    keys: BTreeMap<String, Arc<DecodingKey>>,
    fetched_at: Instant,
    ttl: Duration,
}

impl SigningKeySet {
    /// Keeps signature keys that carry a key id. Encryption keys and
    /// symmetric (`oct`) entries are skipped. A set with no usable key is an
    /// error, not an empty set.
    pub fn from_jwks(jwks: &JwkSet, ttl: Duration) -> Result<Self> {
        let mut keys = BTreeMap::new();
        for jwk in &jwks.keys {
            let Some(kid) = jwk.common.key_id.as_deref() else {
                continue;
            };
            if matches!(jwk.common.public_key_use, Some(PublicKeyUse::Encryption)) {
                continue;
            }
            if matches!(jwk.algorithm, AlgorithmParameters::OctetKey(_)) {
                continue;
            }
            match DecodingKey::from_jwk(jwk) {
                Ok(key) => {
                    keys.insert(kid.to_owned(), Arc::new(key));
                }
                Err(e) => tracing::debug!(kid, error = %e, "skipping unusable jwk"),
            }
        }

        if keys.is_empty() {
            return Err(Error::KeyFetch("key set has no usable signing keys".into()));
        }
        Ok(Self {
            keys,
            fetched_at: Instant::now(),
            ttl,
        })
    }

    pub fn get(&self, kid: &str) -> Option<Arc<DecodingKey>> {
        self.keys.get(kid).cloned()
    }

    pub fn is_fresh(&self) -> bool {
        self.age() < self.ttl
    }

    pub fn age(&self) -> Duration {
        self.fetched_at.elapsed()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn key_ids(&self) -> impl Iterator<Item = &str> {
        self.keys.keys().map(String::as_str)
    }
}

type SharedFetch = Shared<BoxFuture<'static, std::result::Result<Arc<SigningKeySet>, String>>>;

#[derive(Default)]
struct IssuerSlot {
    current: ArcSwapOption<SigningKeySet>,
    inflight: Mutex<Option<SharedFetch>>,
    failed_at: Mutex<Option<Instant>>,
}

impl IssuerSlot {
    fn failed_within(&self, window: Duration) -> bool {
        matches!(*self.failed_at.lock(), Some(at) if at.elapsed() < window)
    }
}

/// One cache for every issuer the gate trusts. Readers load the current set
/// lock-free; a refresh is a spawned task shared by every waiting caller, so
/// it completes even if the request that started it is dropped.
pub struct KeyMaterialCache {
    source: Arc<dyn KeySource>,
    ttl: Duration,
    fetch_timeout: Duration,
    min_refresh: Duration,
    slots: DashMap<String, Arc<IssuerSlot>>,
    metrics: Arc<Metrics>,
}

impl KeyMaterialCache {
    pub fn new(
        source: Arc<dyn KeySource>,
        ttl: Duration,
        fetch_timeout: Duration,
        min_refresh: Duration,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            source,
            ttl,
            fetch_timeout,
            min_refresh,
            slots: DashMap::new(),
            metrics,
        }
    }

    /// Fresh set if cached, otherwise the result of a (shared) refresh.
    /// Fails only when neither a fetched nor a stale set exists.
    pub async fn get_keys(&self, issuer: &str) -> Result<Arc<SigningKeySet>> {
        let slot = self.slot(issuer);
        if let Some(set) = slot.current.load_full() {
            if set.is_fresh() {
                return Ok(set);
            }
        }
        self.refresh_slot(issuer, &slot).await
    }

    /// Forces a refresh regardless of age, still single-flight.
    pub async fn refresh(&self, issuer: &str) -> Result<Arc<SigningKeySet>> {
        let slot = self.slot(issuer);
        self.refresh_slot(issuer, &slot).await
    }

    /// Key lookup by id. An unknown id triggers at most one forced refresh,
    /// and only once the cached set is older than the minimum refresh
    /// interval; it never falls back to another key.
    pub async fn key_for(&self, issuer: &str, kid: &str) -> Result<Arc<DecodingKey>> {
        let set = self.get_keys(issuer).await?;
        if let Some(key) = set.get(kid) {
            return Ok(key);
        }
        if set.age() < self.min_refresh {
            return Err(Error::TokenInvalid("unknown key id".into()));
        }

        tracing::info!(issuer, "unknown key id, refreshing signing keys");
        let set = self.refresh(issuer).await?;
        set.get(kid)
            .ok_or_else(|| Error::TokenInvalid("unknown key id".into()))
    }

    /// Current set without triggering a fetch, fresh or stale.
    pub fn cached(&self, issuer: &str) -> Option<Arc<SigningKeySet>> {
        self.slots.get(issuer).and_then(|slot| slot.current.load_full())
    }

    fn slot(&self, issuer: &str) -> Arc<IssuerSlot> {
        if let Some(slot) = self.slots.get(issuer) {
            return Arc::clone(slot.value());
        }
        Arc::clone(self.slots.entry(issuer.to_owned()).or_default().value())
    }

    async fn refresh_slot(&self, issuer: &str, slot: &Arc<IssuerSlot>) -> Result<Arc<SigningKeySet>> {
        let stale = slot.current.load_full();
        if let Some(stale) = &stale {
            if slot.failed_within(self.min_refresh) {
                self.metrics.record_stale_fallback();
                return Ok(Arc::clone(stale));
            }
        }

        match self.join_or_start(issuer, slot).await {
            Ok(set) => Ok(set),
            Err(reason) => match slot.current.load_full() {
                Some(stale) => {
                    self.metrics.record_stale_fallback();
                    tracing::warn!(
                        issuer,
                        age_secs = stale.age().as_secs(),
                        error = %reason,
                        "key refresh failed, serving stale signing keys"
                    );
                    Ok(stale)
                }
                None => {
                    tracing::error!(issuer, error = %reason, "no signing keys available");
                    Err(Error::KeyFetch(reason))
                }
            },
        }
    }

    fn join_or_start(&self, issuer: &str, slot: &Arc<IssuerSlot>) -> SharedFetch {
        let mut inflight = slot.inflight.lock();
        if let Some(fetch) = inflight.as_ref() {
            return fetch.clone();
        }

        let source = Arc::clone(&self.source);
        let metrics = Arc::clone(&self.metrics);
        let target = Arc::clone(slot);
        let issuer = issuer.to_owned();
        let (ttl, timeout) = (self.ttl, self.fetch_timeout);

        let task = tokio::spawn(async move {
            metrics.record_key_fetch();
            let outcome = match tokio::time::timeout(timeout, source.fetch(&issuer)).await {
                Ok(Ok(jwks)) => SigningKeySet::from_jwks(&jwks, ttl)
                    .map(Arc::new)
                    .map_err(|e| e.to_string()),
                Ok(Err(e)) => Err(e.to_string()),
                Err(_) => Err(format!("key fetch timed out after {}ms", timeout.as_millis())),
            };

            match &outcome {
                Ok(set) => {
                    target.current.store(Some(Arc::clone(set)));
                    *target.failed_at.lock() = None;
                    tracing::info!(issuer = %issuer, keys = set.len(), "signing keys refreshed");
                }
                Err(_) => {
                    metrics.record_key_fetch_failure();
                    *target.failed_at.lock() = Some(Instant::now());
                }
            }
            *target.inflight.lock() = None;
            outcome
        });

        let fetch = async move {
            task.await
                .unwrap_or_else(|e| Err(format!("key fetch task failed: {e}")))
        }
        .boxed()
        .shared();
        *inflight = Some(fetch.clone());
        fetch
    }
}
