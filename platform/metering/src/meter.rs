use chrono::{DateTime, Utc};
use sea_orm::{DatabaseConnection, TransactionTrait};
use serde::Serialize;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::{
    Ceiling, CreditCost, CreditLedger, DebitOutcome, MeteringResult, QuotaOutcome, UsageCounters,
    credits, usage,
};

/// Everything one metered action needs checked.
#[derive(Debug, Clone)]
pub struct MeteringRequest<'a> {
    pub org_id: Uuid,
    pub action: &'a str,
    /// What the action is applied to. Recorded on the ledger entry and part
    /// of an idempotent replay's identity.
    pub resource: &'a str,
    pub quota: Option<(&'a str, Ceiling)>,
    pub credit: Option<&'a CreditCost>,
    pub idempotency_key: Option<&'a str>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuotaUsage {
    pub resource_type: String,
    pub used: i64,
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreditCharge {
    pub credit_type: String,
    pub amount: i64,
    pub remaining: i64,
}

/// What an admitted action consumed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Receipt {
    pub quota: Option<QuotaUsage>,
    pub credit: Option<CreditCharge>,
    pub replayed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsumeOutcome {
    Admitted(Receipt),
    QuotaExceeded {
        resource_type: String,
        used: i64,
        limit: i64,
    },
    CreditExhausted {
        credit_type: String,
        available: i64,
        required: i64,
    },
}

/// Quota counters and the credit ledger over one connection pool.
#[derive(Clone, Debug)]
pub struct Meter {
    db: DatabaseConnection,
    counters: UsageCounters,
    ledger: CreditLedger,
}

impl Meter {
    pub fn new(db: DatabaseConnection) -> Self {
        Self {
            counters: UsageCounters::new(db.clone()),
            ledger: CreditLedger::new(db.clone()),
            db,
        }
    }

    pub fn counters(&self) -> &UsageCounters {
        &self.counters
    }

    pub fn ledger(&self) -> &CreditLedger {
        &self.ledger
    }

    /// Applies the quota increment and the credit debit in one transaction.
    ///
    /// Quota is checked first. When the debit fails the increment is rolled
    /// back, so a rejected action leaves no trace in either table. A request
    /// whose idempotency key matches an earlier debit is admitted again
    /// without touching the counter or the balance.
    #[instrument(skip_all, name = "metering.consume", fields(org_id = %request.org_id, action = request.action))]
    pub async fn consume(
        &self,
        request: &MeteringRequest<'_>,
        now: DateTime<Utc>,
    ) -> MeteringResult<ConsumeOutcome> {
        let txn = self.db.begin().await?;

        if let (Some(key), Some(cost)) = (request.idempotency_key, request.credit) {
            if let Some(entry) = credits::find_by_key(&txn, request.org_id, key).await? {
                credits::ensure_same_debit(&entry, cost, Some(request.action), Some(request.resource), key)?;
                txn.commit().await?;
                return Ok(ConsumeOutcome::Admitted(Receipt {
                    quota: None,
                    credit: Some(CreditCharge {
                        credit_type: cost.credit_type.clone(),
                        amount: entry.amount,
                        remaining: entry.balance_after,
                    }),
                    replayed: true,
                }));
            }
        }

        let mut receipt = Receipt::default();

        if let Some((resource_type, ceiling)) = request.quota {
            match usage::increment(&txn, request.org_id, resource_type, ceiling, now).await? {
                QuotaOutcome::Allowed { used } => {
                    receipt.quota = Some(QuotaUsage {
                        resource_type: resource_type.to_string(),
                        used,
                        limit: ceiling.limit(),
                    });
                }
                QuotaOutcome::Exceeded { used, limit } => {
                    txn.rollback().await?;
                    info!(resource_type, used, limit, "quota exceeded");
                    return Ok(ConsumeOutcome::QuotaExceeded {
                        resource_type: resource_type.to_string(),
                        used,
                        limit,
                    });
                }
            }
        }

        if let Some(cost) = request.credit {
            let outcome = credits::debit(
                &txn,
                request.org_id,
                cost,
                Some(request.action),
                Some(request.resource),
                request.idempotency_key,
                now,
            )
            .await?;
            match outcome {
                DebitOutcome::Debited { remaining, .. } => {
                    receipt.credit = Some(CreditCharge {
                        credit_type: cost.credit_type.clone(),
                        amount: cost.amount,
                        remaining,
                    });
                }
                DebitOutcome::Insufficient { available, required } => {
                    txn.rollback().await?;
                    info!(credit_type = %cost.credit_type, available, required, "credit exhausted");
                    return Ok(ConsumeOutcome::CreditExhausted {
                        credit_type: cost.credit_type.clone(),
                        available,
                        required,
                    });
                }
            }
        }

        txn.commit().await?;
        Ok(ConsumeOutcome::Admitted(receipt))
    }
}
