//! Per-request authentication, role enforcement and CSRF checks.
//! Used by: server (middleware), handlers, state.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, FromRequestParts, Request, State};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::http::{HeaderMap, Method};
use axum::middleware::Next;
use axum::response::Response;
use axum_extra::extract::cookie::CookieJar;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::CredentialSource;
use crate::csrf::{self, CsrfPair};
use crate::error::{Error, Rejection, Result};
use crate::roles::{Role, RoleSet};
use crate::state::AppState;
use crate::telemetry::Metrics;
use crate::token::{ClaimsCache, VerifiedClaims};

pub const ACCESS_COOKIE: &str = "access_token";

/// Request-scoped view of a verified token. Only the gate builds one;
/// handlers receive it through the [`FromRequestParts`] impl below.
#[derive(Debug, Clone)]
pub struct Identity {
    claims: Arc<VerifiedClaims>,
    roles: RoleSet,
}

impl Identity {
    pub(crate) fn from_claims(claims: Arc<VerifiedClaims>) -> Self {
        let roles = claims.role_set();
        Self { claims, roles }
    }

    pub fn subject(&self) -> &str {
        &self.claims.subject
    }

    /// Preferred username, falling back to the subject id.
    pub fn username(&self) -> &str {
        self.claims.username.as_deref().unwrap_or(&self.claims.subject)
    }

    pub fn email(&self) -> Option<&str> {
        self.claims.email.as_deref()
    }

    pub fn roles(&self) -> &RoleSet {
        &self.roles
    }

    pub fn primary_role(&self) -> Option<Role> {
        self.roles.primary()
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.claims.expires_at
    }

    pub fn view(&self) -> IdentityView {
        IdentityView {
            id: self.subject().to_owned(),
            username: self.username().to_owned(),
            email: self.email().map(str::to_owned),
            name: self.claims.display_name.clone(),
            role: self.primary_role(),
            roles: self.roles.clone(),
            expires_at: self.expires_at(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IdentityView {
    pub id: String,
    pub username: String,
    pub email: Option<String>,
    pub name: Option<String>,
    pub role: Option<Role>,
    pub roles: RoleSet,
    pub expires_at: DateTime<Utc>,
}

#[axum::async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Identity {
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self> {
        parts
            .extensions
            .get::<Identity>()
            .cloned()
            .ok_or(Error::CredentialMissing)
    }
}

pub struct AuthorizationGate {
    claims: Arc<ClaimsCache>,
    source: CredentialSource,
    metrics: Arc<Metrics>,
}

impl AuthorizationGate {
    pub fn new(claims: Arc<ClaimsCache>, source: CredentialSource, metrics: Arc<Metrics>) -> Self {
        Self {
            claims,
            source,
            metrics,
        }
    }

    /// Reads the credential from the one configured transport only.
    pub fn credential<'a>(&self, headers: &'a HeaderMap, jar: &'a CookieJar) -> Option<&'a str> {
        let raw = match self.source {
            CredentialSource::Cookie => jar.get(ACCESS_COOKIE).map(|c| c.value()),
            CredentialSource::Header => headers
                .get(AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .and_then(bearer_token),
        };
        raw.map(str::trim).filter(|t| !t.is_empty())
    }

    pub async fn authenticate(&self, headers: &HeaderMap, jar: &CookieJar) -> Result<Identity> {
        let raw = self
            .credential(headers, jar)
            .ok_or(Error::CredentialMissing)?;
        self.authenticate_token(raw).await
    }

    pub async fn authenticate_token(&self, raw: &str) -> Result<Identity> {
        let claims = self.claims.get_or_verify(raw).await?;
        Ok(Identity::from_claims(claims))
    }

    pub fn authorize(&self, identity: &Identity, required: &[Role]) -> Result<()> {
        if identity.roles().permits(required) {
            Ok(())
        } else {
            Err(Error::InsufficientRole)
        }
    }

    pub fn check_csrf(&self, method: &Method, headers: &HeaderMap, jar: &CookieJar) -> Result<()> {
        if !csrf::is_state_changing(method) {
            return Ok(());
        }
        CsrfPair::from_request(headers, jar).verify()
    }

    /// Authenticate, then role check, then CSRF. A valid credential never
    /// excuses a failed CSRF check.
    pub async fn resolve(
        &self,
        method: &Method,
        headers: &HeaderMap,
        jar: &CookieJar,
        required: &[Role],
    ) -> Result<Identity> {
        let identity = self.authenticate(headers, jar).await?;
        self.authorize(&identity, required)?;
        self.check_csrf(method, headers, jar)?;
        Ok(identity)
    }

    /// One log line and one counter per rejected request. Never logs the
    /// credential.
    pub fn record_rejection(&self, err: &Error, client: SocketAddr, method: &Method, endpoint: &str) {
        match err {
            Error::CsrfMismatch => self.metrics.record_csrf_failure(),
            _ => match err.rejection() {
                Rejection::Unauthenticated => self.metrics.record_unauthenticated(),
                Rejection::Forbidden => self.metrics.record_forbidden(),
                Rejection::BadRequest => self.metrics.record_invalid_request(),
                _ => {}
            },
        }
        tracing::warn!(
            client = %client.ip(),
            endpoint,
            method = %method,
            reason = err.reason(),
            "request rejected"
        );
    }
}

fn bearer_token(value: &str) -> Option<&str> {
    let (scheme, token) = value.split_once(' ')?;
    scheme.eq_ignore_ascii_case("bearer").then_some(token)
}

/// Route-level requirement: the state plus the roles an endpoint accepts.
#[derive(Clone)]
pub struct Guard {
    state: AppState,
    required: &'static [Role],
}

impl Guard {
    pub fn new(state: AppState, required: &'static [Role]) -> Self {
        Self { state, required }
    }
}

pub async fn guard(
    State(guard): State<Guard>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    jar: CookieJar,
    req: Request,
    next: Next,
) -> Result<Response> {
    let gate = &guard.state.gate;
    let (mut parts, body) = req.into_parts();
    let outcome = gate
        .resolve(&parts.method, &parts.headers, &jar, guard.required)
        .await;
    match outcome {
        Ok(identity) => {
            tracing::debug!(subject = identity.subject(), endpoint = %parts.uri.path(), "authorized");
            parts.extensions.insert(identity);
            Ok(next.run(Request::from_parts(parts, body)).await)
        }
        Err(err) => {
            gate.record_rejection(&err, peer, &parts.method, parts.uri.path());
            Err(err)
        }
    }
}
