//! Caller identity and roles.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Roles known to the platform.
///
/// Role checks compare these values directly, so a misspelled role in a
/// route declaration fails to compile instead of silently locking everyone
/// out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Administrator,
    Manager,
    Technician,
    Staff,
}

/// Wire names as issued by the identity provider.
const ROLE_NAMES: [(&str, Role); 4] = [
    ("Administrator", Role::Administrator),
    ("Manager", Role::Manager),
    ("Technician", Role::Technician),
    ("Staff", Role::Staff),
];

impl Role {
    pub fn as_str(&self) -> &'static str {
        ROLE_NAMES
            .iter()
            .find(|(_, role)| role == self)
            .map(|(name, _)| *name)
            .unwrap_or("Unknown")
    }

    /// Whether a caller holding this role may use a route requiring `required`.
    pub fn satisfies(&self, required: Role) -> bool {
        *self == required
    }
}

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ROLE_NAMES
            .iter()
            .find(|(name, _)| *name == s)
            .map(|(_, role)| *role)
            .ok_or_else(|| UnknownRole(s.to_string()))
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A role string that does not name any [`Role`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown role '{0}'")]
pub struct UnknownRole(pub String);

/// The authenticated caller, attached to request extensions for the
/// duration of one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    pub id: String,
    pub email: String,
    pub role: Role,
}

impl Identity {
    pub fn new(id: impl Into<String>, email: impl Into<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            email: email.into(),
            role,
        }
    }

    /// The fixed administrator identity used by the development bypass.
    pub fn dev_administrator() -> Self {
        Self::new("dev-user", "dev@localhost", Role::Administrator)
    }
}
