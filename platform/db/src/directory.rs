use async_trait::async_trait;
use entity::{memberships, orgs, users};
use platform_authn::{DirectoryEntry, PrincipalDirectory};
use sea_orm::{DatabaseConnection, EntityTrait};
use uuid::Uuid;

/// Resolves token subjects against the `memberships`, `users` and `orgs` tables.
#[derive(Clone, Debug)]
pub struct DbDirectory {
    db: DatabaseConnection,
}

impl DbDirectory {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

#[async_trait]
impl PrincipalDirectory for DbDirectory {
    async fn lookup(
        &self,
        user_id: Uuid,
        org_id: Uuid,
    ) -> Result<Option<DirectoryEntry>, Box<dyn std::error::Error + Send + Sync>> {
        let Some((membership, Some(user))) = memberships::Entity::find_by_id((org_id, user_id))
            .find_also_related(users::Entity)
            .one(&self.db)
            .await?
        else {
            return Ok(None);
        };
        let Some(org) = orgs::Entity::find_by_id(org_id).one(&self.db).await? else {
            return Ok(None);
        };

        Ok(Some(DirectoryEntry {
            user_active: user.is_active,
            role: membership.role,
            plan: org.plan_type,
            subscription_status: org.subscription_status,
        }))
    }
}
