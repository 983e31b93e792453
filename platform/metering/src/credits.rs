use chrono::{DateTime, Utc};
use entity::{
    credit_balances::{self, Column},
    credit_entries::{self, EntryKind},
};
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, ConnectionTrait, DatabaseConnection, DbErr,
    EntityTrait, QueryFilter, QueryOrder, SqlErr, TransactionTrait,
    sea_query::{Expr, OnConflict},
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{MeteringError, MeteringResult};

/// Static price of one action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditCost {
    pub credit_type: String,
    pub amount: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DebitOutcome {
    /// `replayed` is set when the idempotency key matched an earlier debit
    /// and nothing was charged this time.
    Debited { remaining: i64, replayed: bool },
    Insufficient { available: i64, required: i64 },
}

/// Credit Ledger: balances per (org, credit type) plus an append-only entry
/// log written in the same transaction as every balance change.
#[derive(Clone, Debug)]
pub struct CreditLedger {
    db: DatabaseConnection,
}

impl CreditLedger {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn debit(
        &self,
        org_id: Uuid,
        cost: &CreditCost,
        action: Option<&str>,
        idempotency_key: Option<&str>,
        now: DateTime<Utc>,
    ) -> MeteringResult<DebitOutcome> {
        let txn = self.db.begin().await?;
        let outcome = debit(&txn, org_id, cost, action, None, idempotency_key, now).await?;
        txn.commit().await?;
        Ok(outcome)
    }

    /// Top-up. Unconditional and additive; returns the new balance.
    pub async fn credit(
        &self,
        org_id: Uuid,
        credit_type: &str,
        amount: i64,
        action: Option<&str>,
        now: DateTime<Utc>,
    ) -> MeteringResult<i64> {
        self.add(org_id, credit_type, amount, EntryKind::Credit, action, now).await
    }

    /// Compensation for a debit whose business operation later failed.
    pub async fn release(
        &self,
        org_id: Uuid,
        credit_type: &str,
        amount: i64,
        action: Option<&str>,
        now: DateTime<Utc>,
    ) -> MeteringResult<i64> {
        self.add(org_id, credit_type, amount, EntryKind::Release, action, now).await
    }

    async fn add(
        &self,
        org_id: Uuid,
        credit_type: &str,
        amount: i64,
        kind: EntryKind,
        action: Option<&str>,
        now: DateTime<Utc>,
    ) -> MeteringResult<i64> {
        if amount <= 0 {
            return Err(MeteringError::InvalidAmount(amount));
        }
        let txn = self.db.begin().await?;
        ensure_row(&txn, org_id, credit_type, now).await?;
        credit_balances::Entity::update_many()
            .col_expr(Column::Balance, Expr::col(Column::Balance).add(amount))
            .col_expr(Column::UpdatedAt, Expr::value(now.fixed_offset()))
            .filter(Column::OrgId.eq(org_id))
            .filter(Column::CreditType.eq(credit_type))
            .exec(&txn)
            .await?;
        let balance = current_balance(&txn, org_id, credit_type).await?;
        let entry = EntryTag {
            action,
            ..EntryTag::default()
        };
        append_entry(&txn, org_id, credit_type, kind, amount, balance, entry, now).await?;
        txn.commit().await?;
        info!(%org_id, credit_type, amount, balance, ?kind, "credits added");
        Ok(balance)
    }

    /// Balance for one credit type; zero when the org never held any.
    pub async fn balance(&self, org_id: Uuid, credit_type: &str) -> MeteringResult<i64> {
        Ok(current_balance(&self.db, org_id, credit_type).await?)
    }

    pub async fn balances(&self, org_id: Uuid) -> MeteringResult<Vec<(String, i64)>> {
        let rows = credit_balances::Entity::find()
            .filter(Column::OrgId.eq(org_id))
            .order_by_asc(Column::CreditType)
            .all(&self.db)
            .await?;
        Ok(rows.into_iter().map(|row| (row.credit_type, row.balance)).collect())
    }

    /// Ledger lines for an organization, oldest first.
    pub async fn entries(&self, org_id: Uuid) -> MeteringResult<Vec<credit_entries::Model>> {
        Ok(credit_entries::Entity::find()
            .filter(credit_entries::Column::OrgId.eq(org_id))
            .order_by_asc(credit_entries::Column::CreatedAt)
            .all(&self.db)
            .await?)
    }
}

#[allow(clippy::too_many_arguments)]
pub(crate) async fn debit<C: ConnectionTrait>(
    conn: &C,
    org_id: Uuid,
    cost: &CreditCost,
    action: Option<&str>,
    resource: Option<&str>,
    idempotency_key: Option<&str>,
    now: DateTime<Utc>,
) -> MeteringResult<DebitOutcome> {
    if cost.amount <= 0 {
        return Err(MeteringError::InvalidAmount(cost.amount));
    }
    if let Some(key) = idempotency_key {
        if let Some(entry) = find_by_key(conn, org_id, key).await? {
            ensure_same_debit(&entry, cost, action, resource, key)?;
            debug!(%org_id, key, "debit replayed");
            return Ok(DebitOutcome::Debited {
                remaining: entry.balance_after,
                replayed: true,
            });
        }
    }

    let result = credit_balances::Entity::update_many()
        .col_expr(Column::Balance, Expr::col(Column::Balance).sub(cost.amount))
        .col_expr(Column::UpdatedAt, Expr::value(now.fixed_offset()))
        .filter(Column::OrgId.eq(org_id))
        .filter(Column::CreditType.eq(cost.credit_type.as_str()))
        .filter(Column::Balance.gte(cost.amount))
        .exec(conn)
        .await?;
    let balance = current_balance(conn, org_id, &cost.credit_type).await?;

    if result.rows_affected != 1 {
        return Ok(DebitOutcome::Insufficient {
            available: balance,
            required: cost.amount,
        });
    }

    append_entry(
        conn,
        org_id,
        &cost.credit_type,
        EntryKind::Debit,
        cost.amount,
        balance,
        EntryTag {
            action,
            resource,
            idempotency_key,
        },
        now,
    )
    .await
    .map_err(|err| match (err.sql_err(), idempotency_key) {
        (Some(SqlErr::UniqueConstraintViolation(_)), Some(key)) => {
            MeteringError::IdempotencyConflict(key.to_string())
        }
        _ => MeteringError::Store(err),
    })?;

    Ok(DebitOutcome::Debited {
        remaining: balance,
        replayed: false,
    })
}

/// A key only replays the debit it was first used for. Reusing it for another
/// action, resource or price is refused.
pub(crate) fn ensure_same_debit(
    entry: &credit_entries::Model,
    cost: &CreditCost,
    action: Option<&str>,
    resource: Option<&str>,
    key: &str,
) -> MeteringResult<()> {
    let same = entry.kind == EntryKind::Debit
        && entry.credit_type == cost.credit_type
        && entry.amount == cost.amount
        && entry.action.as_deref() == action
        && entry.resource.as_deref() == resource;
    if same {
        Ok(())
    } else {
        warn!(org_id = %entry.org_id, key, "idempotency key reused for a different debit");
        Err(MeteringError::IdempotencyConflict(key.to_string()))
    }
}

pub(crate) async fn find_by_key<C: ConnectionTrait>(
    conn: &C,
    org_id: Uuid,
    key: &str,
) -> Result<Option<credit_entries::Model>, DbErr> {
    credit_entries::Entity::find()
        .filter(credit_entries::Column::OrgId.eq(org_id))
        .filter(credit_entries::Column::IdempotencyKey.eq(key))
        .one(conn)
        .await
}

async fn ensure_row<C: ConnectionTrait>(
    conn: &C,
    org_id: Uuid,
    credit_type: &str,
    now: DateTime<Utc>,
) -> Result<(), DbErr> {
    let row = credit_balances::ActiveModel {
        org_id: Set(org_id),
        credit_type: Set(credit_type.to_string()),
        balance: Set(0),
        updated_at: Set(now.fixed_offset()),
    };
    let inserted = credit_balances::Entity::insert(row)
        .on_conflict(
            OnConflict::columns([Column::OrgId, Column::CreditType])
                .do_nothing()
                .to_owned(),
        )
        .exec_without_returning(conn)
        .await;
    match inserted {
        Ok(_) | Err(DbErr::RecordNotInserted) => Ok(()),
        Err(err) => Err(err),
    }
}

async fn current_balance<C: ConnectionTrait>(
    conn: &C,
    org_id: Uuid,
    credit_type: &str,
) -> Result<i64, DbErr> {
    Ok(
        credit_balances::Entity::find_by_id((org_id, credit_type.to_string()))
            .one(conn)
            .await?
            .map_or(0, |row| row.balance),
    )
}

#[derive(Debug, Default, Clone, Copy)]
struct EntryTag<'a> {
    action: Option<&'a str>,
    resource: Option<&'a str>,
    idempotency_key: Option<&'a str>,
}

#[allow(clippy::too_many_arguments)]
async fn append_entry<C: ConnectionTrait>(
    conn: &C,
    org_id: Uuid,
    credit_type: &str,
    kind: EntryKind,
    amount: i64,
    balance_after: i64,
    tag: EntryTag<'_>,
    now: DateTime<Utc>,
) -> Result<(), DbErr> {
    credit_entries::ActiveModel {
        id: Set(Uuid::new_v4()),
        org_id: Set(org_id),
        credit_type: Set(credit_type.to_string()),
        kind: Set(kind),
        amount: Set(amount),
        balance_after: Set(balance_after),
        action: Set(tag.action.map(str::to_string)),
        resource: Set(tag.resource.map(str::to_string)),
        idempotency_key: Set(tag.idempotency_key.map(str::to_string)),
        created_at: Set(now.fixed_offset()),
    }
    .insert(conn)
    .await
    .map(|_| ())
}

#[cfg(test)]
mod tests {
    use migration::{Migrator, MigratorTrait};
    use sea_orm::Database;

    use super::*;

    async fn ledger() -> CreditLedger {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        Migrator::up(&db, None).await.unwrap();
        CreditLedger::new(db)
    }

    fn cost(amount: i64) -> CreditCost {
        CreditCost {
            credit_type: "AI_ANALYSIS".into(),
            amount,
        }
    }

    #[tokio::test]
    async fn missing_balance_is_zero() {
        let ledger = ledger().await;
        let org = Uuid::new_v4();
        assert_eq!(ledger.balance(org, "AI_ANALYSIS").await.unwrap(), 0);
        let outcome = ledger.debit(org, &cost(1), None, None, Utc::now()).await.unwrap();
        assert_eq!(outcome, DebitOutcome::Insufficient { available: 0, required: 1 });
    }

    #[tokio::test]
    async fn debit_never_goes_negative() {
        let ledger = ledger().await;
        let org = Uuid::new_v4();
        let now = Utc::now();
        assert_eq!(ledger.credit(org, "AI_ANALYSIS", 5, None, now).await.unwrap(), 5);

        let outcome = ledger.debit(org, &cost(3), Some("site_analysis.run"), None, now).await.unwrap();
        assert_eq!(outcome, DebitOutcome::Debited { remaining: 2, replayed: false });
        let outcome = ledger.debit(org, &cost(3), None, None, now).await.unwrap();
        assert_eq!(outcome, DebitOutcome::Insufficient { available: 2, required: 3 });
        assert_eq!(ledger.balance(org, "AI_ANALYSIS").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn replayed_key_is_charged_once() {
        let ledger = ledger().await;
        let org = Uuid::new_v4();
        let now = Utc::now();
        ledger.credit(org, "AI_ANALYSIS", 10, None, now).await.unwrap();

        let first = ledger.debit(org, &cost(4), None, Some("req-1"), now).await.unwrap();
        let second = ledger.debit(org, &cost(4), None, Some("req-1"), now).await.unwrap();
        assert_eq!(first, DebitOutcome::Debited { remaining: 6, replayed: false });
        assert_eq!(second, DebitOutcome::Debited { remaining: 6, replayed: true });
        assert_eq!(ledger.balance(org, "AI_ANALYSIS").await.unwrap(), 6);

        // the same key in another org is unrelated
        let other = Uuid::new_v4();
        ledger.credit(other, "AI_ANALYSIS", 1, None, now).await.unwrap();
        let outcome = ledger.debit(other, &cost(1), None, Some("req-1"), now).await.unwrap();
        assert_eq!(outcome, DebitOutcome::Debited { remaining: 0, replayed: false });
    }

    #[tokio::test]
    async fn key_cannot_be_reused_for_another_debit() {
        let ledger = ledger().await;
        let org = Uuid::new_v4();
        let now = Utc::now();
        ledger.credit(org, "AI_ANALYSIS", 10, None, now).await.unwrap();
        ledger
            .debit(org, &cost(1), Some("site_analysis.run"), Some("req-9"), now)
            .await
            .unwrap();

        for (action, amount) in [(Some("planning.variants"), 1), (Some("site_analysis.run"), 3), (None, 1)] {
            let err = ledger
                .debit(org, &cost(amount), action, Some("req-9"), now)
                .await
                .unwrap_err();
            assert!(matches!(err, MeteringError::IdempotencyConflict(ref key) if key == "req-9"));
        }
        assert_eq!(ledger.balance(org, "AI_ANALYSIS").await.unwrap(), 9);
    }

    #[tokio::test]
    async fn every_change_leaves_an_entry() {
        let ledger = ledger().await;
        let org = Uuid::new_v4();
        let now = Utc::now();
        let docs = CreditCost {
            credit_type: "AUTO_DOCS".into(),
            amount: 1,
        };
        ledger.credit(org, "AUTO_DOCS", 2, Some("grant"), now).await.unwrap();
        ledger
            .debit(org, &docs, Some("docs.generate"), None, now + chrono::Duration::seconds(1))
            .await
            .unwrap();
        ledger
            .release(org, "AUTO_DOCS", 1, Some("docs.generate"), now + chrono::Duration::seconds(2))
            .await
            .unwrap();

        let kinds: Vec<_> = ledger
            .entries(org)
            .await
            .unwrap()
            .into_iter()
            .map(|entry| (entry.kind, entry.balance_after))
            .collect();
        assert_eq!(
            kinds,
            vec![(EntryKind::Credit, 2), (EntryKind::Debit, 1), (EntryKind::Release, 2)]
        );
        assert_eq!(ledger.balances(org).await.unwrap(), vec![("AUTO_DOCS".to_string(), 2)]);
    }

    #[tokio::test]
    async fn non_positive_amounts_are_rejected() {
        let ledger = ledger().await;
        let org = Uuid::new_v4();
        assert!(matches!(
            ledger.credit(org, "AI_ANALYSIS", 0, None, Utc::now()).await,
            Err(MeteringError::InvalidAmount(0))
        ));
        assert!(matches!(
            ledger.debit(org, &cost(-2), None, None, Utc::now()).await,
            Err(MeteringError::InvalidAmount(-2))
        ));
    }
}
