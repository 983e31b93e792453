use chrono::{DateTime, Utc};
use platform_authz::{Principal, Role};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Allow,
    Deny,
    AuthFailed,
    QuotaExceeded,
    CreditExhausted,
    Debit,
    Credit,
    Release,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Allow => "allow",
            Outcome::Deny => "deny",
            Outcome::AuthFailed => "auth_failed",
            Outcome::QuotaExceeded => "quota_exceeded",
            Outcome::CreditExhausted => "credit_exhausted",
            Outcome::Debit => "debit",
            Outcome::Credit => "credit",
            Outcome::Release => "release",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditEvent {
    pub event_id: Uuid,
    pub occurred_at: DateTime<Utc>,
    pub user_id: Option<Uuid>,
    pub org_id: Option<Uuid>,
    pub role: Option<Role>,
    pub outcome: Outcome,
    pub resource: String,
    pub reason: Option<String>,
    pub details: Value,
}

impl AuditEvent {
    pub fn new(outcome: Outcome, resource: impl Into<String>, occurred_at: DateTime<Utc>) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            occurred_at,
            user_id: None,
            org_id: None,
            role: None,
            outcome,
            resource: resource.into(),
            reason: None,
            details: Value::Null,
        }
    }

    pub fn principal(mut self, principal: &Principal) -> Self {
        self.user_id = Some(principal.user_id);
        self.org_id = Some(principal.org_id);
        self.role = Some(principal.role);
        self
    }

    pub fn org(mut self, org_id: Uuid) -> Self {
        self.org_id = Some(org_id);
        self
    }

    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }
}
