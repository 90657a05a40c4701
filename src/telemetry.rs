//! Tracing setup and gate counters.
//! Used by: main, state, keys, token, gate, ratelimit, handlers::metrics.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing_subscriber::EnvFilter;

pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[derive(Default)]
pub struct Metrics {
    pub verifications: AtomicU64,
    pub claims_cache_hits: AtomicU64,
    pub claims_cache_misses: AtomicU64,
    pub key_fetches: AtomicU64,
    pub key_fetch_failures: AtomicU64,
    pub stale_key_fallbacks: AtomicU64,
    pub unauthenticated: AtomicU64,
    pub forbidden: AtomicU64,
    pub csrf_failures: AtomicU64,
    pub invalid_requests: AtomicU64,
    pub rate_limited: AtomicU64,
    pub sessions_issued: AtomicU64,
    pub sessions_revoked: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_verification(&self) {
        self.verifications.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_hit(&self) {
        self.claims_cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.claims_cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_key_fetch(&self) {
        self.key_fetches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_key_fetch_failure(&self) {
        self.key_fetch_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stale_fallback(&self) {
        self.stale_key_fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unauthenticated(&self) {
        self.unauthenticated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_forbidden(&self) {
        self.forbidden.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_csrf_failure(&self) {
        self.csrf_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_invalid_request(&self) {
        self.invalid_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rate_limited(&self) {
        self.rate_limited.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_session_issued(&self) {
        self.sessions_issued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_session_revoked(&self) {
        self.sessions_revoked.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            verifications: self.verifications.load(Ordering::Relaxed),
            claims_cache_hits: self.claims_cache_hits.load(Ordering::Relaxed),
            claims_cache_misses: self.claims_cache_misses.load(Ordering::Relaxed),
            key_fetches: self.key_fetches.load(Ordering::Relaxed),
            key_fetch_failures: self.key_fetch_failures.load(Ordering::Relaxed),
            stale_key_fallbacks: self.stale_key_fallbacks.load(Ordering::Relaxed),
            unauthenticated: self.unauthenticated.load(Ordering::Relaxed),
            forbidden: self.forbidden.load(Ordering::Relaxed),
            csrf_failures: self.csrf_failures.load(Ordering::Relaxed),
            invalid_requests: self.invalid_requests.load(Ordering::Relaxed),
            rate_limited: self.rate_limited.load(Ordering::Relaxed),
            sessions_issued: self.sessions_issued.load(Ordering::Relaxed),
            sessions_revoked: self.sessions_revoked.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub verifications: u64,
    pub claims_cache_hits: u64,
    pub claims_cache_misses: u64,
    pub key_fetches: u64,
    pub key_fetch_failures: u64,
    pub stale_key_fallbacks: u64,
    pub unauthenticated: u64,
    pub forbidden: u64,
    pub csrf_failures: u64,
    pub invalid_requests: u64,
    pub rate_limited: u64,
    pub sessions_issued: u64,
    pub sessions_revoked: u64,
}
