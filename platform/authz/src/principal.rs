use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::Role;

/// The resolved identity for one request. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub user_id: Uuid,
    pub org_id: Uuid,
    pub role: Role,
}
