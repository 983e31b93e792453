//! Token authentication.
//!
//! Bearer credentials and scoped share tokens are HS256-signed JWTs. The
//! signature is verified first, then expiry against the caller's clock, then
//! the subject is resolved through a [`PrincipalDirectory`].

mod authenticator;
mod claims;
mod tokens;

pub use authenticator::{Authenticator, Caller, DirectoryEntry, PrincipalDirectory};
pub use claims::{BearerClaims, ShareClaims, TokenUse};
pub use tokens::{ShareGrant, TokenKeys, bearer_from_header};

use thiserror::Error;

/// Minimum accepted secret length for the shared MAC key.
pub const MIN_SECRET_BYTES: usize = 32;

#[derive(Debug, Error)]
pub enum AuthnError {
    #[error("invalid credential")]
    InvalidCredential,
    #[error("credential expired")]
    ExpiredCredential,
    #[error("principal rejected: {0}")]
    PrincipalRejected(RejectReason),
    #[error("share token does not cover the requested resource")]
    ScopeMismatch,
    #[error("signing secret must be at least {MIN_SECRET_BYTES} bytes")]
    WeakSecret,
    #[error("failed to sign token")]
    Signing(#[source] jsonwebtoken::errors::Error),
    #[error("principal directory unavailable")]
    DirectoryUnavailable(#[source] Box<dyn std::error::Error + Send + Sync>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    UnknownMembership,
    UserInactive,
    OrgSuspended,
    UnknownRole,
}

impl RejectReason {
    pub fn as_str(self) -> &'static str {
        match self {
            RejectReason::UnknownMembership => "unknown_membership",
            RejectReason::UserInactive => "user_inactive",
            RejectReason::OrgSuspended => "org_suspended",
            RejectReason::UnknownRole => "unknown_role",
        }
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
