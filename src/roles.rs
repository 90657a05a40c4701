//! Closed role vocabulary and capability-set checks.
//! Used by: token::claims, gate, handlers.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::Serialize;

/// Roles the booking API grants privileges to. Declaration order is
/// precedence order: earlier variants outrank later ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Superuser,
    Admin,
    Staff,
    Vendor,
    Freelance,
    Customer,
}

/// Authenticated-only: any verified identity passes.
pub const AUTHENTICATED: &[Role] = &[];
pub const ADMINS: &[Role] = &[Role::Admin, Role::Superuser];
pub const STAFF: &[Role] = &[Role::Staff, Role::Admin, Role::Superuser];

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Superuser => "superuser",
            Role::Admin => "admin",
            Role::Staff => "staff",
            Role::Vendor => "vendor",
            Role::Freelance => "freelance",
            Role::Customer => "customer",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownRole;

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "superuser" => Ok(Role::Superuser),
            "admin" => Ok(Role::Admin),
            "staff" => Ok(Role::Staff),
            "vendor" => Ok(Role::Vendor),
            "freelance" => Ok(Role::Freelance),
            "customer" | "user" => Ok(Role::Customer),
            _ => Err(UnknownRole),
        }
    }
}

/// The roles of one identity, computed once per request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct RoleSet(BTreeSet<Role>);

impl RoleSet {
    /// Maps provider role strings onto the closed vocabulary. Strings that
    /// name no known role (`offline_access`, `default-roles-*`) grant nothing.
    pub fn from_claims<'a>(roles: impl IntoIterator<Item = &'a str>) -> Self {
        Self(roles.into_iter().filter_map(|r| r.parse().ok()).collect())
    }

    #[inline]
    pub fn contains(&self, role: Role) -> bool {
        self.0.contains(&role)
    }

    /// An empty requirement admits any authenticated identity; otherwise at
    /// least one required role must be held.
    #[inline]
    pub fn permits(&self, required: &[Role]) -> bool {
        required.is_empty() || required.iter().any(|r| self.0.contains(r))
    }

    pub fn primary(&self) -> Option<Role> {
        self.0.iter().next().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = Role> + '_ {
        self.0.iter().copied()
    }
}

impl FromIterator<Role> for RoleSet {
    fn from_iter<I: IntoIterator<Item = Role>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
