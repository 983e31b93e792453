use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::PolicyError;

/// The closed set of built-in roles. Not user-definable.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Owner,
    Admin,
    Manager,
    Staff,
    ReadOnly,
    Client,
    Authority,
}

/// Extra row filter a restricted role carries on top of the org filter.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum RowRestriction {
    /// Only records assigned to the principal.
    Assigned,
    /// Only records the principal owns as a client.
    Owned,
}

impl Role {
    pub const ALL: [Role; 7] = [
        Role::Owner,
        Role::Admin,
        Role::Manager,
        Role::Staff,
        Role::ReadOnly,
        Role::Client,
        Role::Authority,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Owner => "owner",
            Role::Admin => "admin",
            Role::Manager => "manager",
            Role::Staff => "staff",
            Role::ReadOnly => "read_only",
            Role::Client => "client",
            Role::Authority => "authority",
        }
    }

    pub fn row_restriction(self) -> Option<RowRestriction> {
        match self {
            Role::Staff => Some(RowRestriction::Assigned),
            Role::Client => Some(RowRestriction::Owned),
            _ => None,
        }
    }
}

impl FromStr for Role {
    type Err = PolicyError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Role::ALL
            .into_iter()
            .find(|role| role.as_str() == value)
            .ok_or_else(|| PolicyError::UnknownRole(value.to_string()))
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
