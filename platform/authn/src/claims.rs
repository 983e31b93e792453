use platform_authz::Role;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Distinguishes the two token families so one can never stand in for the
/// other even though both are signed with the same key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenUse {
    Bearer,
    Share,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BearerClaims {
    pub sub: Uuid,
    pub org: Uuid,
    pub role: Role,
    pub iat: i64,
    pub exp: i64,
    pub typ: TokenUse,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShareClaims {
    pub rid: String,
    pub iat: i64,
    pub exp: i64,
    pub typ: TokenUse,
}
