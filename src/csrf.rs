//! Double-submit CSRF tokens.
//! Used by: gate, session, handlers::auth.

use axum::http::{HeaderMap, Method};
use axum_extra::extract::cookie::CookieJar;
use rand::rngs::OsRng;
use rand::RngCore;
use subtle::ConstantTimeEq;

use crate::error::{Error, Result};

pub const CSRF_COOKIE: &str = "csrf_token";
pub const CSRF_HEADER: &str = "x-csrf-token";
/// Header name older clients send. Read only when `CSRF_HEADER` is absent.
pub const LEGACY_CSRF_HEADER: &str = "csrf-token";

const TOKEN_BYTES: usize = 16;

/// 16 random bytes, hex-encoded.
pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

pub fn is_state_changing(method: &Method) -> bool {
    matches!(
        *method,
        Method::POST | Method::PUT | Method::PATCH | Method::DELETE
    )
}

/// The header copy and the cookie copy of one request's CSRF token.
#[derive(Debug, Clone, Copy)]
pub struct CsrfPair<'a> {
    pub header: Option<&'a str>,
    pub cookie: Option<&'a str>,
}

impl<'a> CsrfPair<'a> {
    pub fn from_request(headers: &'a HeaderMap, jar: &'a CookieJar) -> Self {
        Self {
            header: headers
                .get(CSRF_HEADER)
                .or_else(|| headers.get(LEGACY_CSRF_HEADER))
                .and_then(|v| v.to_str().ok()),
            cookie: jar.get(CSRF_COOKIE).map(|c| c.value()),
        }
    }

    /// Both present, non-empty and byte-equal. Compared in constant time.
    pub fn verify(&self) -> Result<()> {
        match (self.header, self.cookie) {
            (Some(header), Some(cookie))
                if !header.is_empty()
                    && !cookie.is_empty()
                    && bool::from(header.as_bytes().ct_eq(cookie.as_bytes())) =>
            {
                Ok(())
            }
            _ => Err(Error::CsrfMismatch),
        }
    }
}
