use chrono::{DateTime, Utc};
use entity::usage_counters::{self, Column};
use sea_orm::{
    ActiveValue::Set, ColumnTrait, ConnectionTrait, DatabaseConnection, DbErr, EntityTrait,
    QueryFilter, TransactionTrait, sea_query::{Expr, OnConflict},
};
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use crate::{BillingPeriod, Ceiling, MeteringResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum QuotaOutcome {
    Allowed { used: i64 },
    Exceeded { used: i64, limit: i64 },
}

/// Usage Counter Service: one counter per (org, resource type, month).
#[derive(Clone, Debug)]
pub struct UsageCounters {
    db: DatabaseConnection,
}

impl UsageCounters {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Atomically checks `count < limit` and increments. Unlimited ceilings
    /// always increment.
    pub async fn check_and_increment(
        &self,
        org_id: Uuid,
        resource_type: &str,
        ceiling: Ceiling,
        now: DateTime<Utc>,
    ) -> MeteringResult<QuotaOutcome> {
        let txn = self.db.begin().await?;
        let outcome = increment(&txn, org_id, resource_type, ceiling, now).await?;
        txn.commit().await?;
        Ok(outcome)
    }

    /// Count for the period containing `now`; zero when no row exists yet.
    pub async fn used(&self, org_id: Uuid, resource_type: &str, now: DateTime<Utc>) -> MeteringResult<i64> {
        Ok(current_count(&self.db, org_id, resource_type, BillingPeriod::containing(now)).await?)
    }
}

pub(crate) async fn increment<C: ConnectionTrait>(
    conn: &C,
    org_id: Uuid,
    resource_type: &str,
    ceiling: Ceiling,
    now: DateTime<Utc>,
) -> Result<QuotaOutcome, DbErr> {
    let period = BillingPeriod::containing(now);
    ensure_row(conn, org_id, resource_type, period, now).await?;

    let mut update = usage_counters::Entity::update_many()
        .col_expr(Column::Count, Expr::col(Column::Count).add(1))
        .col_expr(Column::UpdatedAt, Expr::value(now.fixed_offset()))
        .filter(Column::OrgId.eq(org_id))
        .filter(Column::ResourceType.eq(resource_type))
        .filter(Column::PeriodStart.eq(period.start));
    if let Ceiling::Limited(limit) = ceiling {
        update = update.filter(Column::Count.lt(limit));
    }
    let result = update.exec(conn).await?;

    let used = current_count(conn, org_id, resource_type, period).await?;
    let outcome = match (result.rows_affected, ceiling) {
        (1, _) => QuotaOutcome::Allowed { used },
        (_, Ceiling::Limited(limit)) => QuotaOutcome::Exceeded { used, limit },
        (_, Ceiling::Unlimited) => {
            return Err(DbErr::RecordNotUpdated);
        }
    };
    debug!(%org_id, resource_type, ?outcome, "quota check");
    Ok(outcome)
}

async fn ensure_row<C: ConnectionTrait>(
    conn: &C,
    org_id: Uuid,
    resource_type: &str,
    period: BillingPeriod,
    now: DateTime<Utc>,
) -> Result<(), DbErr> {
    let row = usage_counters::ActiveModel {
        org_id: Set(org_id),
        resource_type: Set(resource_type.to_string()),
        period_start: Set(period.start),
        period_end: Set(period.end),
        count: Set(0),
        updated_at: Set(now.fixed_offset()),
    };
    let inserted = usage_counters::Entity::insert(row)
        .on_conflict(
            OnConflict::columns([Column::OrgId, Column::ResourceType, Column::PeriodStart])
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

pub(crate) async fn current_count<C: ConnectionTrait>(
    conn: &C,
    org_id: Uuid,
    resource_type: &str,
    period: BillingPeriod,
) -> Result<i64, DbErr> {
    Ok(
        usage_counters::Entity::find_by_id((org_id, resource_type.to_string(), period.start))
            .one(conn)
            .await?
            .map_or(0, |row| row.count),
    )
}
