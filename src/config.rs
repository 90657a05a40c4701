//! Environment-driven gate configuration.
//! Used by: main, state.

use std::str::FromStr;
use std::time::Duration;

use jsonwebtoken::Algorithm;
use secrecy::SecretString;
use url::Url;

use crate::error::{Error, Result};
use crate::ratelimit::RateLimitConfig;

/// Where the gate looks for the bearer credential. Exactly one source is
/// consulted; the other is ignored even when present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    Cookie,
    Header,
}

impl FromStr for CredentialSource {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cookie" => Ok(Self::Cookie),
            "header" | "bearer" => Ok(Self::Header),
            other => Err(Error::Config(format!("unknown credential source {other:?}"))),
        }
    }
}

#[derive(Debug)]
pub struct GateConfig {
    pub issuer: String,
    pub audience: String,
    pub jwks_uri: String,
    pub token_uri: String,
    pub logout_uri: String,
    pub client_id: String,
    pub client_secret: SecretString,
    pub algorithm: Algorithm,
    pub leeway: Duration,
    pub jwks_ttl: Duration,
    pub jwks_fetch_timeout: Duration,
    pub jwks_min_refresh: Duration,
    pub claims_ttl_ceiling: Duration,
    pub claims_capacity: u64,
    pub rate_limit: RateLimitConfig,
    pub credential_source: CredentialSource,
    pub cookie_secure: bool,
    pub cors_origins: Vec<String>,
    pub idp_timeout: Duration,
    pub bind_addr: String,
}

impl GateConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let realm_issuer = match (get("KEYCLOAK_SERVER_URL"), get("REALM_NAME")) {
            (Some(server), Some(realm)) => {
                Some(format!("{}/realms/{}", server.trim_end_matches('/'), realm))
            }
            _ => None,
        };
        let issuer = get("AUTH_ISSUER")
            .or(realm_issuer)
            .ok_or_else(|| Error::Config("AUTH_ISSUER or KEYCLOAK_SERVER_URL+REALM_NAME required".into()))?;
        let issuer = issuer.trim_end_matches('/').to_owned();
        let oidc = format!("{issuer}/protocol/openid-connect");

        let jwks_uri = get("AUTH_JWKS_URI").unwrap_or_else(|| format!("{oidc}/certs"));
        let token_uri = get("AUTH_TOKEN_URI").unwrap_or_else(|| format!("{oidc}/token"));
        let logout_uri = get("AUTH_LOGOUT_URI").unwrap_or_else(|| format!("{oidc}/logout"));
        for uri in [&issuer, &jwks_uri, &token_uri, &logout_uri] {
            require_secure_endpoint(uri)?;
        }

        let algorithm = parse_algorithm(&get("AUTH_ALGORITHM").unwrap_or_else(|| "RS256".into()))?;

        let rate_limit = RateLimitConfig {
            max_requests: parse_or(&get, "RATE_LIMIT_MAX_REQUESTS", 100)?,
            window: Duration::from_secs(parse_or(&get, "RATE_LIMIT_WINDOW_SECS", 60)?),
        };
        if rate_limit.max_requests == 0 || rate_limit.window.is_zero() {
            return Err(Error::Config("rate limit must allow at least one request per window".into()));
        }

        let credential_source = match get("CREDENTIAL_SOURCE") {
            Some(v) => v.parse()?,
            None => CredentialSource::Cookie,
        };

        let cors_origins = match get("CORS_ORIGINS") {
            Some(v) => v
                .split(',')
                .map(str::trim)
                .filter(|o| !o.is_empty())
                .map(parse_origin)
                .collect::<Result<Vec<_>>>()?,
            None => Vec::new(),
        };

        Ok(Self {
            issuer,
            audience: get("AUTH_AUDIENCE").unwrap_or_else(|| "account".into()),
            jwks_uri,
            token_uri,
            logout_uri,
            client_id: get("CLIENT_ID").unwrap_or_default(),
            client_secret: SecretString::new(get("CLIENT_SECRET").unwrap_or_default()),
            algorithm,
            leeway: Duration::from_secs(parse_or(&get, "AUTH_LEEWAY_SECS", 30)?),
            jwks_ttl: Duration::from_secs(parse_or(&get, "JWKS_TTL_SECS", 3600)?),
            jwks_fetch_timeout: Duration::from_secs(parse_or(&get, "JWKS_FETCH_TIMEOUT_SECS", 3)?),
            jwks_min_refresh: Duration::from_secs(parse_or(&get, "JWKS_MIN_REFRESH_SECS", 30)?),
            claims_ttl_ceiling: Duration::from_secs(parse_or(&get, "CLAIMS_CACHE_TTL_SECS", 300)?),
            claims_capacity: parse_or(&get, "CLAIMS_CACHE_CAPACITY", 10_000)?,
            rate_limit,
            credential_source,
            cookie_secure: parse_or(&get, "COOKIE_SECURE", true)?,
            cors_origins,
            idp_timeout: Duration::from_secs(parse_or(&get, "IDP_TIMEOUT_SECS", 10)?),
            bind_addr: get("BIND_ADDR").unwrap_or_else(|| "0.0.0.0:8000".into()),
        })
    }

    /// Client id whose `resource_access` roles are honoured.
    pub fn role_client(&self) -> Option<&str> {
        Some(self.client_id.as_str()).filter(|c| !c.is_empty())
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| Error::Config(format!("{key} has invalid value {raw:?}"))),
        None => Ok(default),
    }
}

/// Only asymmetric algorithms are accepted; an HMAC secret would let anyone
/// holding the published key material mint tokens.
fn parse_algorithm(raw: &str) -> Result<Algorithm> {
    let alg = Algorithm::from_str(raw.trim())
        .map_err(|_| Error::Config(format!("unsupported signing algorithm {raw:?}")))?;
    match alg {
        Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => Err(Error::Config(format!(
            "symmetric algorithm {raw:?} cannot be used with a published key set"
        ))),
        _ => Ok(alg),
    }
}

/// Normalized to `scheme://host[:port]`, the form browsers send in `Origin`.
fn parse_origin(raw: &str) -> Result<String> {
    let url = Url::parse(raw).map_err(|e| Error::Config(format!("invalid CORS origin {raw:?}: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(Error::Config(format!("invalid CORS origin {raw:?}")));
    }
    Ok(url.origin().ascii_serialization())
}

/// HTTPS everywhere except exact loopback hosts.
fn require_secure_endpoint(raw: &str) -> Result<()> {
    let url = Url::parse(raw).map_err(|e| Error::Config(format!("invalid url {raw:?}: {e}")))?;
    match url.scheme() {
        "https" => Ok(()),
        "http" if matches!(url.host_str(), Some("localhost") | Some("127.0.0.1")) => Ok(()),
        _ => Err(Error::Config(format!("{raw:?} must use https"))),
    }
}
