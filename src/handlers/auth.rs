//! Login, refresh, logout and identity probes.
//! Used by: server.

use std::net::SocketAddr;

use axum::extract::rejection::JsonRejection;
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, Method};
use axum::Json;
use axum_extra::extract::cookie::CookieJar;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::csrf::CsrfPair;
use crate::error::{Error, Result};
use crate::gate::{Identity, IdentityView};
use crate::provider::ProviderTokens;
use crate::session::REFRESH_COOKIE;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: SecretString,
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub csrf_token: String,
    pub token_type: String,
    pub expires_in: u64,
    pub refresh_expires_in: u64,
    pub user: IdentityView,
}

#[derive(Debug, Serialize)]
pub struct CheckResponse {
    pub authenticated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<IdentityView>,
}

#[derive(Debug, Serialize)]
pub struct LogoutResponse {
    pub message: &'static str,
}

const MAX_FIELD_CHARS: usize = 256;

fn validate_login(req: &LoginRequest) -> Result<()> {
    let username_chars = req.username.chars().count();
    if username_chars == 0 || username_chars > MAX_FIELD_CHARS {
        return Err(Error::Validation("username must be 1-256 characters".into()));
    }
    if req.username.chars().any(|c| c.is_control()) {
        return Err(Error::Validation("username contains control characters".into()));
    }
    let password = req.password.expose_secret();
    let password_chars = password.chars().count();
    if password_chars == 0 || password_chars > MAX_FIELD_CHARS {
        return Err(Error::Validation("password must be 1-256 characters".into()));
    }
    if password.chars().any(|c| c.is_control()) {
        return Err(Error::Validation("password contains control characters".into()));
    }
    Ok(())
}

/// Runs the provider's fresh access token through the gate so the session
/// reflects verified claims, then issues cookies.
async fn open_session(
    state: &AppState,
    jar: CookieJar,
    tokens: ProviderTokens,
) -> Result<(CookieJar, Json<SessionResponse>)> {
    let identity = state
        .gate
        .authenticate_token(tokens.access_token.expose_secret())
        .await?;
    let artifacts = state.sessions.issue(&identity, &tokens);
    let body = SessionResponse {
        csrf_token: artifacts.csrf_token().to_owned(),
        token_type: tokens.token_type.clone(),
        expires_in: tokens.expires_in,
        refresh_expires_in: tokens.refresh_expires_in,
        user: identity.view(),
    };
    Ok((artifacts.apply(jar), Json(body)))
}

pub async fn login(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    jar: CookieJar,
    payload: std::result::Result<Json<LoginRequest>, JsonRejection>,
) -> Result<(CookieJar, Json<SessionResponse>)> {
    let outcome = async {
        let Json(req) = payload?;
        validate_login(&req)?;
        let tokens = state
            .provider
            .password_grant(&req.username, &req.password)
            .await?;
        open_session(&state, jar, tokens).await
    }
    .await;

    if let Err(err) = &outcome {
        state
            .gate
            .record_rejection(err, peer, &Method::POST, "/auth/login");
    }
    outcome
}

/// Needs the refresh cookie and a matching CSRF pair; the access cookie may
/// already have expired.
pub async fn refresh(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    jar: CookieJar,
) -> Result<(CookieJar, Json<SessionResponse>)> {
    let outcome = async {
        let refresh_token = jar
            .get(REFRESH_COOKIE)
            .map(|c| c.value().to_owned())
            .filter(|v| !v.is_empty())
            .ok_or(Error::CredentialMissing)?;
        CsrfPair::from_request(&headers, &jar).verify()?;
        let tokens = state.provider.refresh(&refresh_token).await?;
        open_session(&state, jar, tokens).await
    }
    .await;

    if let Err(err) = &outcome {
        state
            .gate
            .record_rejection(err, peer, &Method::POST, "/auth/refresh");
    }
    outcome
}

/// Always succeeds. Provider-side logout is attempted when a refresh cookie
/// is present; its failure is logged only.
pub async fn logout(State(state): State<AppState>, jar: CookieJar) -> (CookieJar, Json<LogoutResponse>) {
    let refresh_token = jar.get(REFRESH_COOKIE).map(|c| c.value().to_owned());
    if let Some(token) = refresh_token.filter(|t| !t.is_empty()) {
        if let Err(e) = state.provider.logout(&token).await {
            tracing::warn!(reason = e.reason(), error = %e, "identity provider logout failed");
        }
    }
    let jar = state.sessions.revoke().apply(jar);
    (jar, Json(LogoutResponse { message: "logged out" }))
}

pub async fn check(State(state): State<AppState>, headers: HeaderMap, jar: CookieJar) -> Json<CheckResponse> {
    match state.gate.authenticate(&headers, &jar).await {
        Ok(identity) => Json(CheckResponse {
            authenticated: true,
            reason: None,
            user: Some(identity.view()),
        }),
        Err(err) => {
            tracing::debug!(reason = err.reason(), "auth check negative");
            Json(CheckResponse {
                authenticated: false,
                reason: Some(err.reason()),
                user: None,
            })
        }
    }
}

pub async fn me(identity: Identity) -> Json<IdentityView> {
    Json(identity.view())
}
