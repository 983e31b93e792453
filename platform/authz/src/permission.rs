use std::{borrow::Borrow, fmt};

use serde::{Deserialize, Serialize};

use crate::PolicyError;

/// Marker granting every permission in the catalogue.
pub const WILDCARD: &str = "*";

/// An opaque capability token such as `cases:write`.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Permission(String);

impl Permission {
    pub fn parse(value: impl Into<String>) -> Result<Self, PolicyError> {
        let value = value.into();
        let valid = value
            .split_once(':')
            .map(|(resource, action)| {
                is_token_part(resource) && is_token_part(action) && !action.contains(':')
            })
            .unwrap_or(false);
        if valid {
            Ok(Self(value))
        } else {
            Err(PolicyError::InvalidPermission(value))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn is_token_part(part: &str) -> bool {
    !part.is_empty()
        && part
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
}

impl TryFrom<String> for Permission {
    type Error = PolicyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Permission::parse(value)
    }
}

impl From<Permission> for String {
    fn from(value: Permission) -> Self {
        value.0
    }
}

impl Borrow<str> for Permission {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
