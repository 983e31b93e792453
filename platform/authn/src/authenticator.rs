use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use entity::orgs::{PlanType, SubscriptionStatus};
use platform_authz::{Principal, Role};
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use crate::{AuthnError, RejectReason, tokens::TokenKeys};

/// Membership facts needed to admit a token subject.
#[derive(Debug, Clone)]
pub struct DirectoryEntry {
    pub user_active: bool,
    /// Raw role as stored; parsed by the authenticator.
    pub role: String,
    pub plan: PlanType,
    pub subscription_status: SubscriptionStatus,
}

#[async_trait]
pub trait PrincipalDirectory: Send + Sync {
    async fn lookup(
        &self,
        user_id: Uuid,
        org_id: Uuid,
    ) -> Result<Option<DirectoryEntry>, Box<dyn std::error::Error + Send + Sync>>;
}

/// An authenticated principal together with its organization's plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Caller {
    pub principal: Principal,
    pub plan: PlanType,
}

#[derive(Clone)]
pub struct Authenticator {
    keys: TokenKeys,
    directory: Arc<dyn PrincipalDirectory>,
}

impl Authenticator {
    pub fn new(keys: TokenKeys, directory: Arc<dyn PrincipalDirectory>) -> Self {
        Self { keys, directory }
    }

    pub fn keys(&self) -> &TokenKeys {
        &self.keys
    }

    /// Turns a bearer credential into a [`Caller`].
    ///
    /// The role recorded on the membership wins over the role carried in the
    /// token, so a demotion takes effect before the token expires.
    pub async fn authenticate(&self, credential: &str, now: DateTime<Utc>) -> Result<Caller, AuthnError> {
        let claims = self.keys.verify_bearer(credential, now)?;

        let entry = self
            .directory
            .lookup(claims.sub, claims.org)
            .await
            .map_err(AuthnError::DirectoryUnavailable)?
            .ok_or(AuthnError::PrincipalRejected(RejectReason::UnknownMembership))?;

        if !entry.user_active {
            return Err(AuthnError::PrincipalRejected(RejectReason::UserInactive));
        }
        if !entry.subscription_status.admits_access() {
            return Err(AuthnError::PrincipalRejected(RejectReason::OrgSuspended));
        }
        let role: Role = entry
            .role
            .parse()
            .map_err(|_| AuthnError::PrincipalRejected(RejectReason::UnknownRole))?;
        if role != claims.role {
            debug!(user_id = %claims.sub, token_role = %claims.role, %role, "membership role differs from token");
        }

        Ok(Caller {
            principal: Principal {
                user_id: claims.sub,
                org_id: claims.org,
                role,
            },
            plan: entry.plan,
        })
    }
}
