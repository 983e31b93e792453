use sea_orm::prelude::{DateTimeWithTimeZone, *};
use uuid::Uuid;

/// A planning case. Stands in for the organization-owned business records
/// the engine protects; every such record carries `org_id`.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "cases")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub org_id: Uuid,
    pub title: String,
    pub assigned_user_id: Option<Uuid>,
    pub client_user_id: Option<Uuid>,
    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
