use sea_orm::prelude::{DateTimeWithTimeZone, *};
use uuid::Uuid;

/// Append-only ledger line written in the same transaction as the balance
/// change it describes. `(org_id, idempotency_key)` is unique.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "credit_entries")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub org_id: Uuid,
    pub credit_type: String,
    pub kind: EntryKind,
    pub amount: i64,
    pub balance_after: i64,
    pub action: Option<String>,
    /// What the action was applied to; part of an idempotent debit's identity.
    pub resource: Option<String>,
    pub idempotency_key: Option<String>,
    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "String(Some(16))")]
pub enum EntryKind {
    #[sea_orm(string_value = "debit")]
    Debit,
    #[sea_orm(string_value = "credit")]
    Credit,
    #[sea_orm(string_value = "release")]
    Release,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
