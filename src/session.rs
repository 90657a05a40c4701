//! Session cookies: issued at login and refresh, cleared at logout.
//! Used by: handlers::auth, state.

use std::sync::Arc;

use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use secrecy::ExposeSecret;

use crate::csrf::{self, CSRF_COOKIE};
use crate::gate::{Identity, ACCESS_COOKIE};
use crate::provider::ProviderTokens;
use crate::telemetry::Metrics;

pub const REFRESH_COOKIE: &str = "refresh_token";
pub const ID_COOKIE: &str = "id_token";

/// Every cookie name a session may have set, cleared together on logout.
pub const SESSION_COOKIES: [&str; 4] = [ACCESS_COOKIE, REFRESH_COOKIE, ID_COOKIE, CSRF_COOKIE];

/// Cookies for one session plus the CSRF value the client must echo back.
#[derive(Debug)]
pub struct SessionArtifacts {
    cookies: Vec<Cookie<'static>>,
    csrf_token: String,
}

impl SessionArtifacts {
    pub fn csrf_token(&self) -> &str {
        &self.csrf_token
    }

    pub fn cookies(&self) -> &[Cookie<'static>] {
        &self.cookies
    }

    pub fn apply(self, jar: CookieJar) -> CookieJar {
        self.cookies.into_iter().fold(jar, CookieJar::add)
    }
}

#[derive(Debug)]
pub struct SessionRevocation {
    cookies: Vec<Cookie<'static>>,
}

impl SessionRevocation {
    pub fn cookies(&self) -> &[Cookie<'static>] {
        &self.cookies
    }

    pub fn apply(self, jar: CookieJar) -> CookieJar {
        self.cookies.into_iter().fold(jar, CookieJar::add)
    }
}

pub struct SessionIssuer {
    secure: bool,
    metrics: Arc<Metrics>,
}

impl SessionIssuer {
    pub fn new(secure: bool, metrics: Arc<Metrics>) -> Self {
        Self { secure, metrics }
    }

    /// Access and refresh tokens go into HttpOnly cookies that expire with
    /// the tokens. The CSRF cookie is script-readable and lives as long as
    /// the refresh token, so a refresh after access expiry can still present
    /// the pair.
    pub fn issue(&self, identity: &Identity, tokens: &ProviderTokens) -> SessionArtifacts {
        let csrf_token = csrf::generate_token();
        let access_ttl = max_age_secs(tokens.expires_in);
        let refresh_ttl = max_age_secs(tokens.refresh_expires_in);

        let mut cookies = vec![self.cookie(
            ACCESS_COOKIE,
            tokens.access_token.expose_secret().clone(),
            access_ttl,
            true,
        )];
        if let Some(refresh) = &tokens.refresh_token {
            cookies.push(self.cookie(
                REFRESH_COOKIE,
                refresh.expose_secret().clone(),
                refresh_ttl,
                true,
            ));
        }
        cookies.push(self.cookie(
            CSRF_COOKIE,
            csrf_token.clone(),
            refresh_ttl.max(access_ttl),
            false,
        ));

        self.metrics.record_session_issued();
        tracing::info!(
            subject = identity.subject(),
            role = ?identity.primary_role(),
            expires_in = tokens.expires_in,
            "session issued"
        );
        SessionArtifacts { cookies, csrf_token }
    }

    /// Removal cookies for every session cookie name, whether or not the
    /// client currently holds it.
    pub fn revoke(&self) -> SessionRevocation {
        let cookies = SESSION_COOKIES
            .into_iter()
            .map(|name| self.cookie(name, String::new(), 0, name != CSRF_COOKIE))
            .collect();
        self.metrics.record_session_revoked();
        SessionRevocation { cookies }
    }

    fn cookie(&self, name: &'static str, value: String, max_age_secs: i64, http_only: bool) -> Cookie<'static> {
        Cookie::build((name, value))
            .path("/")
            .http_only(http_only)
            .secure(self.secure)
            .same_site(SameSite::Lax)
            .max_age(time::Duration::seconds(max_age_secs))
            .build()
    }
}

/// Provider lifetimes past `i64::MAX` seconds saturate instead of wrapping
/// into a negative max-age.
fn max_age_secs(lifetime: u64) -> i64 {
    i64::try_from(lifetime).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{AUDIENCE, ISSUER};
    use crate::token::VerifiedClaims;
    use secrecy::SecretString;

    fn identity() -> Identity {
        let claims = VerifiedClaims {
            subject: "user-1".into(),
            email: None,
            username: Some("ana".into()),
            display_name: None,
            roles: ["customer".to_string()].into_iter().collect(),
            issued_at: None,
            expires_at: chrono::Utc::now() + chrono::Duration::seconds(300),
            issuer: ISSUER.into(),
            audience: vec![AUDIENCE.into()],
        };
        Identity::from_claims(Arc::new(claims))
    }

    fn tokens(refresh: bool) -> ProviderTokens {
        ProviderTokens {
            access_token: SecretString::new("access-value".into()),
            refresh_token: refresh.then(|| SecretString::new("refresh-value".into())),
            id_token: None,
            token_type: "Bearer".into(),
            expires_in: 300,
            refresh_expires_in: 1800,
        }
    }

    fn find<'a>(cookies: &'a [Cookie<'static>], name: &str) -> &'a Cookie<'static> {
        cookies.iter().find(|c| c.name() == name).unwrap()
    }

    #[test]
    fn access_and_refresh_are_http_only_csrf_is_not() {
        let issuer = SessionIssuer::new(true, Arc::new(Metrics::new()));
        let artifacts = issuer.issue(&identity(), &tokens(true));
        let cookies = artifacts.cookies();

        let access = find(cookies, ACCESS_COOKIE);
        assert_eq!(access.value(), "access-value");
        assert_eq!(access.http_only(), Some(true));
        assert_eq!(access.secure(), Some(true));
        assert_eq!(access.same_site(), Some(SameSite::Lax));
        assert_eq!(access.path(), Some("/"));
        assert_eq!(access.max_age(), Some(time::Duration::seconds(300)));

        let refresh = find(cookies, REFRESH_COOKIE);
        assert_eq!(refresh.http_only(), Some(true));
        assert_eq!(refresh.max_age(), Some(time::Duration::seconds(1800)));

        let csrf = find(cookies, CSRF_COOKIE);
        assert_eq!(csrf.http_only(), Some(false));
        assert_eq!(csrf.value(), artifacts.csrf_token());
        assert_eq!(artifacts.csrf_token().len(), 32);
    }

    #[test]
    fn oversized_lifetimes_saturate() {
        let issuer = SessionIssuer::new(false, Arc::new(Metrics::new()));
        let mut huge = tokens(true);
        huge.expires_in = u64::MAX;
        huge.refresh_expires_in = i64::MAX as u64 + 1;
        let artifacts = issuer.issue(&identity(), &huge);

        for name in [ACCESS_COOKIE, REFRESH_COOKIE, CSRF_COOKIE] {
            let max_age = find(artifacts.cookies(), name).max_age().unwrap();
            assert!(max_age.is_positive(), "{name} max-age {max_age}");
        }
        assert_eq!(max_age_secs(u64::MAX), i64::MAX);
        assert_eq!(max_age_secs(300), 300);
    }

    #[test]
    fn no_refresh_cookie_without_refresh_token() {
        let issuer = SessionIssuer::new(false, Arc::new(Metrics::new()));
        let artifacts = issuer.issue(&identity(), &tokens(false));
        assert!(artifacts.cookies().iter().all(|c| c.name() != REFRESH_COOKIE));
    }

    #[test]
    fn each_session_gets_fresh_csrf() {
        let issuer = SessionIssuer::new(false, Arc::new(Metrics::new()));
        let a = issuer.issue(&identity(), &tokens(true));
        let b = issuer.issue(&identity(), &tokens(true));
        assert_ne!(a.csrf_token(), b.csrf_token());
    }

    #[test]
    fn revoke_clears_every_name() {
        let metrics = Arc::new(Metrics::new());
        let issuer = SessionIssuer::new(true, Arc::clone(&metrics));
        let revocation = issuer.revoke();

        let names: Vec<&str> = revocation.cookies().iter().map(|c| c.name()).collect();
        assert_eq!(names, SESSION_COOKIES.to_vec());
        for cookie in revocation.cookies() {
            assert_eq!(cookie.value(), "");
            assert_eq!(cookie.max_age(), Some(time::Duration::ZERO));
            assert_eq!(cookie.path(), Some("/"));
        }
        assert_eq!(metrics.snapshot().sessions_revoked, 1);
    }

    #[test]
    fn apply_adds_cookies_to_jar() {
        let issuer = SessionIssuer::new(false, Arc::new(Metrics::new()));
        let jar = issuer.issue(&identity(), &tokens(true)).apply(CookieJar::new());
        assert_eq!(jar.get(ACCESS_COOKIE).map(|c| c.value()), Some("access-value"));
        assert!(jar.get(CSRF_COOKIE).is_some());
    }
}
