//! Usage quotas and credit balances.
//!
//! Both services change state only through conditional `UPDATE`s whose
//! affected-row count decides the outcome, so concurrent callers for the same
//! organization are serialized by the database rather than by this process.

mod credits;
mod meter;
mod period;
mod plans;
mod usage;

pub use credits::{CreditCost, CreditLedger, DebitOutcome};
pub use meter::{ConsumeOutcome, CreditCharge, Meter, MeteringRequest, QuotaUsage, Receipt};
pub use period::BillingPeriod;
pub use plans::{Ceiling, QuotaTable};
pub use usage::{QuotaOutcome, UsageCounters};

use sea_orm::DbErr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MeteringError {
    #[error("credit amount must be positive, got {0}")]
    InvalidAmount(i64),
    #[error("quota limit for {0} must not be negative")]
    InvalidLimit(String),
    #[error("idempotency key {0:?} belongs to another request")]
    IdempotencyConflict(String),
    #[error("metering store unavailable")]
    Store(#[from] DbErr),
}

pub type MeteringResult<T> = Result<T, MeteringError>;
