//! Verified identity claims and the provider's wire format.
//! Used by: token::verify, token::cache, gate.

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::roles::RoleSet;

/// Claims of a token whose signature, expiry, issuer and audience have all
/// been checked. Only the verifier constructs one.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerifiedClaims {
    pub subject: String,
    pub email: Option<String>,
    pub username: Option<String>,
    pub display_name: Option<String>,
    pub roles: BTreeSet<String>,
    pub issued_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
    pub issuer: String,
    pub audience: Vec<String>,
}

impl VerifiedClaims {
    pub fn role_set(&self) -> RoleSet {
        RoleSet::from_claims(self.roles.iter().map(String::as_str))
    }

    /// Time left before `exp`, or `None` once it has passed.
    pub fn remaining(&self, now: DateTime<Utc>) -> Option<Duration> {
        (self.expires_at - now).to_std().ok().filter(|d| !d.is_zero())
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(untagged)]
pub(crate) enum Audience {
    One(String),
    Many(Vec<String>),
    #[default]
    #[serde(skip)]
    Absent,
}

impl Audience {
    fn contains(&self, expected: &str) -> bool {
        match self {
            Audience::One(aud) => aud == expected,
            Audience::Many(auds) => auds.iter().any(|a| a == expected),
            Audience::Absent => false,
        }
    }

    fn into_vec(self) -> Vec<String> {
        match self {
            Audience::One(aud) => vec![aud],
            Audience::Many(auds) => auds,
            Audience::Absent => Vec::new(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct RoleClaim {
    #[serde(default)]
    roles: Vec<String>,
}

/// Payload exactly as the provider signs it. Decoded only after the
/// signature has been checked.
#[derive(Debug, Deserialize)]
pub(crate) struct RawClaims {
    sub: Option<String>,
    exp: Option<i64>,
    iat: Option<i64>,
    iss: Option<String>,
    #[serde(default)]
    aud: Audience,
    email: Option<String>,
    preferred_username: Option<String>,
    name: Option<String>,
    #[serde(default)]
    realm_access: RoleClaim,
    #[serde(default)]
    resource_access: HashMap<String, RoleClaim>,
}

impl RawClaims {
    /// Expiry first, then issuer and audience, then subject. A token with no
    /// role claim is valid but carries an empty role set.
    pub(crate) fn into_verified(
        self,
        expected_issuer: &str,
        expected_audience: &str,
        role_client: Option<&str>,
        leeway: Duration,
        now: DateTime<Utc>,
    ) -> Result<VerifiedClaims> {
        let exp = self
            .exp
            .ok_or_else(|| Error::TokenInvalid("missing exp claim".into()))?;
        let expires_at = Utc
            .timestamp_opt(exp, 0)
            .single()
            .ok_or_else(|| Error::TokenInvalid("exp out of range".into()))?;
        let leeway = chrono::Duration::from_std(leeway)
            .map_err(|_| Error::Config("leeway out of range".into()))?;
        if now >= expires_at + leeway {
            return Err(Error::TokenExpired);
        }

        if self.iss.as_deref() != Some(expected_issuer) {
            return Err(Error::TokenUntrusted("issuer mismatch".into()));
        }
        if !self.aud.contains(expected_audience) {
            return Err(Error::TokenUntrusted("audience mismatch".into()));
        }

        let subject = self
            .sub
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::TokenInvalid("missing sub claim".into()))?;

        let mut roles: BTreeSet<String> = self.realm_access.roles.into_iter().collect();
        if let Some(client) = role_client {
            if let Some(claim) = self.resource_access.get(client) {
                roles.extend(claim.roles.iter().cloned());
            }
        }

        Ok(VerifiedClaims {
            subject,
            email: self.email,
            username: self.preferred_username,
            display_name: self.name,
            roles,
            issued_at: self.iat.and_then(|iat| Utc.timestamp_opt(iat, 0).single()),
            expires_at,
            issuer: expected_issuer.to_owned(),
            audience: self.aud.into_vec(),
        })
    }
}
