//! Authorization primitives: the closed role set, capability tokens, the
//! immutable permission matrix and the access decision point.
//!
//! Everything here is a pure function of in-memory data. Nothing in this
//! crate touches the database, so a decision can be evaluated on every
//! request without adding latency or failure modes.

mod decision;
mod matrix;
mod permission;
mod principal;
mod role;

pub use decision::{Decision, DenyReason};
pub use matrix::{MatrixDefinition, PermissionMatrix};
pub use permission::{Permission, WILDCARD};
pub use principal::Principal;
pub use role::{Role, RowRestriction};

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PolicyError {
    #[error("invalid permission token {0:?}: expected `resource:action`")]
    InvalidPermission(String),
    #[error("wildcard grant is reserved for the owner role, found on {0}")]
    WildcardNotAllowed(Role),
    #[error("unknown role {0:?}")]
    UnknownRole(String),
}
