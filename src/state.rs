//! Shared application state.
//! Used by: main, server, gate, ratelimit, handlers.

use std::sync::Arc;

use crate::config::GateConfig;
use crate::error::Result;
use crate::gate::AuthorizationGate;
use crate::keys::{HttpKeySource, KeyMaterialCache, KeySource};
use crate::provider::IdentityProviderClient;
use crate::ratelimit::RateLimiter;
use crate::session::SessionIssuer;
use crate::telemetry::Metrics;
use crate::token::{ClaimsCache, TokenVerifier};

pub struct AppStateInner {
    pub config: GateConfig,
    pub metrics: Arc<Metrics>,
    pub keys: Arc<KeyMaterialCache>,
    pub gate: AuthorizationGate,
    pub sessions: SessionIssuer,
    pub provider: IdentityProviderClient,
    pub rate_limiter: RateLimiter,
}

pub type AppState = Arc<AppStateInner>;

struct StateBuilder {
    config: GateConfig,
    key_source: Arc<dyn KeySource>,
}

impl StateBuilder {
    fn build(self) -> Result<AppState> {
        let config = self.config;
        let metrics = Arc::new(Metrics::new());

        let keys = Arc::new(KeyMaterialCache::new(
            self.key_source,
            config.jwks_ttl,
            config.jwks_fetch_timeout,
            config.jwks_min_refresh,
            Arc::clone(&metrics),
        ));
        let verifier = Arc::new(TokenVerifier::new(
            Arc::clone(&keys),
            config.algorithm,
            config.leeway,
            config.role_client().map(str::to_owned),
            Arc::clone(&metrics),
        ));
        let claims = Arc::new(ClaimsCache::new(
            verifier,
            &config.issuer,
            &config.audience,
            config.claims_ttl_ceiling,
            config.claims_capacity,
            Arc::clone(&metrics),
        ));

        let gate = AuthorizationGate::new(claims, config.credential_source, Arc::clone(&metrics));
        let sessions = SessionIssuer::new(config.cookie_secure, Arc::clone(&metrics));
        let provider = IdentityProviderClient::new(&config)?;
        let rate_limiter = RateLimiter::new(config.rate_limit);

        if !config.cookie_secure {
            tracing::warn!("COOKIE_SECURE=false, session cookies will be sent over plain http");
        }

        Ok(Arc::new(AppStateInner {
            config,
            metrics,
            keys,
            gate,
            sessions,
            provider,
            rate_limiter,
        }))
    }
}

/// Production wiring: keys fetched over HTTPS from the configured URI.
pub fn build_state(config: GateConfig) -> Result<AppState> {
    let source = HttpKeySource::new(config.jwks_fetch_timeout)?
        .with_jwks_uri(config.issuer.clone(), config.jwks_uri.clone());
    StateBuilder {
        config,
        key_source: Arc::new(source),
    }
    .build()
}

pub fn build_with_key_source(config: GateConfig, key_source: Arc<dyn KeySource>) -> Result<AppState> {
    StateBuilder { config, key_source }.build()
}
