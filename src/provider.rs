//! Token-endpoint client for the external identity provider.
//! Used by: handlers::auth, session, state.

use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::config::GateConfig;
use crate::error::{Error, Result};

/// Token-endpoint response. Token values stay wrapped so `Debug` output and
/// logs never carry them.
#[derive(Debug, Deserialize)]
pub struct ProviderTokens {
    pub access_token: SecretString,
    #[serde(default)]
    pub refresh_token: Option<SecretString>,
    #[serde(default)]
    pub id_token: Option<SecretString>,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default = "default_expires_in")]
    pub expires_in: u64,
    #[serde(default = "default_refresh_expires_in")]
    pub refresh_expires_in: u64,
}

fn default_token_type() -> String {
    "Bearer".into()
}

fn default_expires_in() -> u64 {
    300
}

fn default_refresh_expires_in() -> u64 {
    1800
}

pub struct IdentityProviderClient {
    http: reqwest::Client,
    token_uri: String,
    logout_uri: String,
    client_id: String,
    client_secret: SecretString,
}

impl IdentityProviderClient {
    pub fn new(config: &GateConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.idp_timeout)
            .build()
            .map_err(|e| Error::Config(format!("http client: {e}")))?;
        Ok(Self {
            http,
            token_uri: config.token_uri.clone(),
            logout_uri: config.logout_uri.clone(),
            client_id: config.client_id.clone(),
            client_secret: SecretString::new(config.client_secret.expose_secret().clone()),
        })
    }

    /// Resource-owner password grant. A 400/401 from the provider means the
    /// credentials were wrong; anything else is an upstream failure.
    pub async fn password_grant(&self, username: &str, password: &SecretString) -> Result<ProviderTokens> {
        let form = [
            ("grant_type", "password"),
            ("username", username),
            ("password", password.expose_secret().as_str()),
            ("scope", "openid"),
        ];
        let response = self.post(&self.token_uri, &form).await?;
        match response.status() {
            s if s.is_success() => parse_tokens(response).await,
            StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED => {
                tracing::info!(username, "identity provider rejected login");
                Err(Error::InvalidCredentials)
            }
            s => Err(Error::Upstream(format!("token endpoint returned {s}"))),
        }
    }

    /// Refresh grant. A rejected refresh token is an invalid credential, not
    /// an outage.
    pub async fn refresh(&self, refresh_token: &str) -> Result<ProviderTokens> {
        let form = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ];
        let response = self.post(&self.token_uri, &form).await?;
        match response.status() {
            s if s.is_success() => parse_tokens(response).await,
            StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED => {
                Err(Error::TokenInvalid("refresh token rejected".into()))
            }
            s => Err(Error::Upstream(format!("token endpoint returned {s}"))),
        }
    }

    /// Invalidates the refresh token (and its session) at the provider.
    pub async fn logout(&self, refresh_token: &str) -> Result<()> {
        let form = [("refresh_token", refresh_token)];
        let response = self.post(&self.logout_uri, &form).await?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(Error::Upstream(format!("logout endpoint returned {status}")))
        }
    }

    async fn post(&self, uri: &str, form: &[(&str, &str)]) -> Result<reqwest::Response> {
        let mut body: Vec<(&str, &str)> = vec![("client_id", self.client_id.as_str())];
        let secret = self.client_secret.expose_secret();
        if !secret.is_empty() {
            body.push(("client_secret", secret.as_str()));
        }
        body.extend_from_slice(form);

        self.http
            .post(uri)
            .form(&body)
            .send()
            .await
            .map_err(|e| Error::Upstream(format!("{uri}: {e}")))
    }
}

async fn parse_tokens(response: reqwest::Response) -> Result<ProviderTokens> {
    response
        .json::<ProviderTokens>()
        .await
        .map_err(|e| Error::Upstream(format!("malformed token response: {e}")))
}
