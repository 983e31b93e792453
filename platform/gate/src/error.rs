use platform_authn::{AuthnError, RejectReason};
use platform_db::ScopeError;
use platform_metering::MeteringError;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::error;

/// Every way a gated operation can be refused.
#[derive(Debug, Error)]
pub enum GateError {
    #[error("invalid credential")]
    InvalidCredential,
    #[error("credential expired")]
    ExpiredCredential,
    #[error("principal rejected: {0}")]
    PrincipalRejected(RejectReason),
    #[error("permission denied: {permission}")]
    PermissionDenied { permission: String },
    #[error("monthly quota for {resource_type} exhausted ({used}/{limit})")]
    QuotaExceeded {
        resource_type: String,
        used: i64,
        limit: i64,
    },
    #[error("insufficient {credit_type} credits: {available} available, {required} required")]
    CreditExhausted {
        credit_type: String,
        available: i64,
        required: i64,
    },
    /// Rendered as not-found so existence never leaks across tenants.
    #[error("not found")]
    ScopeViolation,
    #[error("metering store unavailable")]
    LedgerUnavailable,
    #[error("identity directory unavailable")]
    DirectoryUnavailable,
    #[error("idempotency key {0:?} was already used for another request")]
    DuplicateRequest(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("internal error")]
    Internal(String),
}

impl GateError {
    pub fn status(&self) -> u16 {
        match self {
            GateError::InvalidCredential
            | GateError::ExpiredCredential
            | GateError::PrincipalRejected(_) => 401,
            GateError::PermissionDenied { .. } => 403,
            GateError::QuotaExceeded { .. } => 429,
            GateError::CreditExhausted { .. } => 402,
            GateError::ScopeViolation => 404,
            GateError::DuplicateRequest(_) => 409,
            GateError::InvalidRequest(_) => 400,
            GateError::LedgerUnavailable | GateError::DirectoryUnavailable => 503,
            GateError::Internal(_) => 500,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            GateError::InvalidCredential => "invalid_credential",
            GateError::ExpiredCredential => "expired_credential",
            GateError::PrincipalRejected(_) => "principal_rejected",
            GateError::PermissionDenied { .. } => "permission_denied",
            GateError::QuotaExceeded { .. } => "quota_exceeded",
            GateError::CreditExhausted { .. } => "credit_exhausted",
            GateError::ScopeViolation => "not_found",
            GateError::LedgerUnavailable => "ledger_unavailable",
            GateError::DirectoryUnavailable => "directory_unavailable",
            GateError::DuplicateRequest(_) => "duplicate_request",
            GateError::InvalidRequest(_) => "invalid_request",
            GateError::Internal(_) => "internal",
        }
    }

    /// Structured fields a client needs to explain the refusal.
    pub fn details(&self) -> Option<Value> {
        match self {
            GateError::QuotaExceeded {
                resource_type,
                used,
                limit,
            } => Some(json!({ "resource_type": resource_type, "used": used, "limit": limit })),
            GateError::CreditExhausted {
                credit_type,
                available,
                required,
            } => Some(json!({
                "credit_type": credit_type,
                "available": available,
                "required": required,
            })),
            GateError::PermissionDenied { permission } => Some(json!({ "permission": permission })),
            _ => None,
        }
    }
}

impl From<AuthnError> for GateError {
    fn from(err: AuthnError) -> Self {
        match err {
            AuthnError::InvalidCredential | AuthnError::ScopeMismatch => GateError::InvalidCredential,
            AuthnError::ExpiredCredential => GateError::ExpiredCredential,
            AuthnError::PrincipalRejected(reason) => GateError::PrincipalRejected(reason),
            AuthnError::DirectoryUnavailable(source) => {
                error!(error = %source, "principal directory lookup failed");
                GateError::DirectoryUnavailable
            }
            other => GateError::Internal(other.to_string()),
        }
    }
}

impl From<MeteringError> for GateError {
    fn from(err: MeteringError) -> Self {
        match err {
            MeteringError::Store(source) => {
                error!(error = %source, "metering store failure");
                GateError::LedgerUnavailable
            }
            MeteringError::IdempotencyConflict(key) => GateError::DuplicateRequest(key),
            MeteringError::InvalidAmount(amount) => {
                GateError::InvalidRequest(format!("amount must be positive, got {amount}"))
            }
            MeteringError::InvalidLimit(resource) => GateError::Internal(format!("invalid quota for {resource}")),
        }
    }
}

impl From<ScopeError> for GateError {
    fn from(err: ScopeError) -> Self {
        match err {
            ScopeError::NotFound => GateError::ScopeViolation,
            ScopeError::Db(source) => GateError::Internal(source.to_string()),
        }
    }
}
