//! Unified error types for the gate.
//! Used by: keys, token, gate, session, provider, ratelimit, handlers.

use axum::extract::rejection::JsonRejection;
use axum::http::header::{RETRY_AFTER, WWW_AUTHENTICATE};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("no credential presented")]
    CredentialMissing,

    #[error("invalid token: {0}")]
    TokenInvalid(String),

    #[error("token expired")]
    TokenExpired,

    #[error("untrusted token: {0}")]
    TokenUntrusted(String),

    #[error("insufficient role")]
    InsufficientRole,

    #[error("csrf token missing or mismatched")]
    CsrfMismatch,

    #[error("no usable signing keys: {0}")]
    KeyFetch(String),

    #[error("rate limit: {limit} requests per {window_secs}s")]
    RateLimited { limit: u32, window_secs: u64 },

    #[error("identity provider rejected the credentials")]
    InvalidCredentials,

    #[error("identity provider error: {0}")]
    Upstream(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("configuration error: {0}")]
    Config(String),
}

/// Coarse class of a failure, as seen by callers deciding between
/// "log in again" and "you may not do this".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    Unauthenticated,
    Forbidden,
    Unavailable,
    Throttled,
    BadRequest,
    Internal,
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: &'static str,
}

impl Error {
    /// Stable machine-readable code.
    pub fn reason(&self) -> &'static str {
        match self {
            Error::CredentialMissing => "credential_missing",
            Error::TokenInvalid(_) => "token_invalid",
            Error::TokenExpired => "token_expired",
            Error::TokenUntrusted(_) => "token_untrusted",
            Error::InsufficientRole => "insufficient_role",
            Error::CsrfMismatch => "csrf_mismatch",
            Error::KeyFetch(_) => "key_fetch_failed",
            Error::RateLimited { .. } => "rate_limited",
            Error::InvalidCredentials => "invalid_credentials",
            Error::Upstream(_) => "upstream_unavailable",
            Error::Validation(_) => "invalid_request",
            Error::Config(_) => "misconfigured",
        }
    }

    pub fn rejection(&self) -> Rejection {
        match self {
            Error::CredentialMissing
            | Error::TokenInvalid(_)
            | Error::TokenExpired
            | Error::TokenUntrusted(_)
            | Error::InvalidCredentials => Rejection::Unauthenticated,
            Error::InsufficientRole | Error::CsrfMismatch => Rejection::Forbidden,
            Error::KeyFetch(_) | Error::Upstream(_) => Rejection::Unavailable,
            Error::RateLimited { .. } => Rejection::Throttled,
            Error::Validation(_) => Rejection::BadRequest,
            Error::Config(_) => Rejection::Internal,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Error::KeyFetch(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::Upstream(_) => StatusCode::BAD_GATEWAY,
            _ => match self.rejection() {
                Rejection::Unauthenticated => StatusCode::UNAUTHORIZED,
                Rejection::Forbidden => StatusCode::FORBIDDEN,
                Rejection::Throttled => StatusCode::TOO_MANY_REQUESTS,
                Rejection::BadRequest => StatusCode::BAD_REQUEST,
                Rejection::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
                Rejection::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    // Detail strings can carry decoder output; callers only get a fixed message.
    fn public_message(&self) -> &'static str {
        match self {
            Error::CredentialMissing => "authentication required",
            Error::TokenInvalid(_) => "invalid credential",
            Error::TokenExpired => "credential expired",
            Error::TokenUntrusted(_) => "credential not issued for this service",
            Error::InsufficientRole => "insufficient permissions",
            Error::CsrfMismatch => "invalid csrf token",
            Error::KeyFetch(_) => "authentication service unavailable",
            Error::RateLimited { .. } => "too many requests, try again later",
            Error::InvalidCredentials => "invalid username or password",
            Error::Upstream(_) => "identity provider unavailable",
            Error::Validation(_) => "invalid request",
            Error::Config(_) => "internal server error",
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = ErrorBody {
            error: self.reason(),
            message: self.public_message(),
        };
        let mut response = (status, Json(body)).into_response();
        match &self {
            Error::RateLimited { window_secs, .. } => {
                if let Ok(value) = HeaderValue::from_str(&window_secs.to_string()) {
                    response.headers_mut().insert(RETRY_AFTER, value);
                }
            }
            _ if status == StatusCode::UNAUTHORIZED => {
                response
                    .headers_mut()
                    .insert(WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
            }
            _ => {}
        }
        response
    }
}

/// Malformed or incomplete request bodies answer with the same JSON error
/// shape as every other rejection.
impl From<JsonRejection> for Error {
    fn from(rejection: JsonRejection) -> Self {
        Error::Validation(rejection.body_text())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
