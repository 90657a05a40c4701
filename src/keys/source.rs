//! Where signing-key sets come from.
//! Used by: keys, state.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use jsonwebtoken::jwk::JwkSet;

use crate::error::{Error, Result};

/// Outbound fetch of an issuer's published key set. Implementations do one
/// network round trip per call; caching and fallback live in
/// [`KeyMaterialCache`](super::KeyMaterialCache).
#[async_trait]
pub trait KeySource: Send + Sync {
    async fn fetch(&self, issuer: &str) -> Result<JwkSet>;
}

pub struct HttpKeySource {
    client: reqwest::Client,
    jwks_uris: HashMap<String, String>,
}

impl HttpKeySource {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("http client: {e}")))?;
        Ok(Self {
            client,
            jwks_uris: HashMap::new(),
        })
    }

    /// Pins the key-set URI for an issuer instead of the Keycloak
    /// `{issuer}/protocol/openid-connect/certs` convention.
    pub fn with_jwks_uri(mut self, issuer: impl Into<String>, uri: impl Into<String>) -> Self {
        self.jwks_uris.insert(issuer.into(), uri.into());
        self
    }

    fn uri_for(&self, issuer: &str) -> String {
        self.jwks_uris
            .get(issuer)
            .cloned()
            .unwrap_or_else(|| format!("{}/protocol/openid-connect/certs", issuer.trim_end_matches('/')))
    }
}

#[async_trait]
impl KeySource for HttpKeySource {
    async fn fetch(&self, issuer: &str) -> Result<JwkSet> {
        let uri = self.uri_for(issuer);
        tracing::debug!(jwks_uri = %uri, "fetching signing keys");

        let response = self
            .client
            .get(&uri)
            .send()
            .await
            .map_err(|e| Error::KeyFetch(format!("{uri}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::KeyFetch(format!("{uri}: status {status}")));
        }

        response
            .json::<JwkSet>()
            .await
            .map_err(|e| Error::KeyFetch(format!("{uri}: malformed key set: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::TestKey;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn fetches_key_set_from_pinned_uri() -> Result<()> {
        let server = MockServer::start().await;
        let key = TestKey::generate("kid-1");
        Mock::given(method("GET"))
            .and(path("/keys"))
            .respond_with(ResponseTemplate::new(200).set_body_json(key.jwks_json()))
            .expect(1)
            .mount(&server)
            .await;

        let source = HttpKeySource::new(Duration::from_secs(2))?
            .with_jwks_uri("https://id.example.com", format!("{}/keys", server.uri()));
        let jwks = source.fetch("https://id.example.com").await?;
        assert_eq!(jwks.keys.len(), 1);
        assert_eq!(jwks.keys[0].common.key_id.as_deref(), Some("kid-1"));
        Ok(())
    }

    #[tokio::test]
    async fn keycloak_convention_used_by_default() -> Result<()> {
        let server = MockServer::start().await;
        let key = TestKey::generate("kid-1");
        Mock::given(method("GET"))
            .and(path("/realms/salon/protocol/openid-connect/certs"))
            .respond_with(ResponseTemplate::new(200).set_body_json(key.jwks_json()))
            .expect(1)
            .mount(&server)
            .await;

        let source = HttpKeySource::new(Duration::from_secs(2))?;
        let jwks = source.fetch(&format!("{}/realms/salon", server.uri())).await?;
        assert_eq!(jwks.keys.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn error_status_is_key_fetch_error() -> Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let source = HttpKeySource::new(Duration::from_secs(2))?;
        let result = source.fetch(&server.uri()).await;
        assert!(matches!(result, Err(Error::KeyFetch(_))));
        Ok(())
    }

    #[tokio::test]
    async fn slow_provider_times_out() -> Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
            .mount(&server)
            .await;

        let source = HttpKeySource::new(Duration::from_millis(200))?;
        let result = source.fetch(&server.uri()).await;
        assert!(matches!(result, Err(Error::KeyFetch(_))));
        Ok(())
    }
}
