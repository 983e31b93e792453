use std::sync::Arc;

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use entity::orgs::PlanType;
use platform_audit::{AuditEvent, AuditSink, DbAuditSink, Outcome};
use platform_authn::{Authenticator, Caller, PrincipalDirectory, ShareGrant, TokenKeys, bearer_from_header};
use platform_authz::{Decision, Principal};
use platform_db::{DbDirectory, TenantScope, with_tenant};
use platform_metering::{BillingPeriod, ConsumeOutcome, Meter, MeteringRequest, Receipt};
use sea_orm::{DatabaseConnection, DatabaseTransaction};
use serde::Serialize;
use serde_json::json;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{Clock, GateError, Policy, PolicyLoadError, SystemClock};

/// Proof that an action passed every gate, with what it consumed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Admission {
    pub action: String,
    #[serde(flatten)]
    pub receipt: Receipt,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceUsage {
    pub resource_type: String,
    pub used: i64,
    /// `None` is unlimited.
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreditBalance {
    pub credit_type: String,
    pub balance: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UsageSummary {
    pub org_id: Uuid,
    pub plan: PlanType,
    pub period: BillingPeriod,
    pub resources: Vec<ResourceUsage>,
    pub credits: Vec<CreditBalance>,
}

pub struct EngineBuilder {
    db: DatabaseConnection,
    keys: TokenKeys,
    policy: Option<Policy>,
    clock: Option<Arc<dyn Clock>>,
    audit: Option<Arc<dyn AuditSink>>,
    directory: Option<Arc<dyn PrincipalDirectory>>,
}

impl EngineBuilder {
    pub fn policy(mut self, policy: Policy) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn directory(mut self, directory: Arc<dyn PrincipalDirectory>) -> Self {
        self.directory = Some(directory);
        self
    }

    /// Fills unset parts with the built-in policy, the system clock and the
    /// database-backed directory and audit sink.
    pub fn build(self) -> Result<Engine, PolicyLoadError> {
        let policy = match self.policy {
            Some(policy) => policy,
            None => Policy::builtin()?,
        };
        let directory = self
            .directory
            .unwrap_or_else(|| Arc::new(DbDirectory::new(self.db.clone())));
        let audit = self
            .audit
            .unwrap_or_else(|| Arc::new(DbAuditSink::new(self.db.clone())));
        Ok(Engine {
            policy: ArcSwap::from_pointee(policy),
            authenticator: Authenticator::new(self.keys, directory),
            meter: Meter::new(self.db.clone()),
            audit,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            db: self.db,
        })
    }
}

/// Composes the gates. Holds no mutable state besides the swappable policy.
pub struct Engine {
    policy: ArcSwap<Policy>,
    authenticator: Authenticator,
    meter: Meter,
    audit: Arc<dyn AuditSink>,
    clock: Arc<dyn Clock>,
    db: DatabaseConnection,
}

impl Engine {
    pub fn builder(db: DatabaseConnection, keys: TokenKeys) -> EngineBuilder {
        EngineBuilder {
            db,
            keys,
            policy: None,
            clock: None,
            audit: None,
            directory: None,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn db(&self) -> &DatabaseConnection {
        &self.db
    }

    pub fn keys(&self) -> &TokenKeys {
        self.authenticator.keys()
    }

    pub fn meter(&self) -> &Meter {
        &self.meter
    }

    pub fn policy(&self) -> Arc<Policy> {
        self.policy.load_full()
    }

    /// Swaps in a new policy. Requests already holding the old one finish
    /// with it.
    pub fn reload_policy(&self, policy: Policy) {
        self.policy.store(Arc::new(policy));
        info!("policy reloaded");
    }

    /// Row filter for business queries made on the caller's behalf.
    pub fn scope(&self, caller: &Caller) -> TenantScope {
        TenantScope::new(caller.principal)
    }

    /// Transaction tagged with the caller's tenant. Business queries run in it
    /// so row-level security backs up the [`TenantScope`] filter.
    pub async fn tenant_txn(&self, caller: &Caller) -> Result<DatabaseTransaction, GateError> {
        with_tenant(&self.db, caller.principal.org_id)
            .await
            .map_err(|err| GateError::Internal(err.to_string()))
    }

    /// Audit events the sink failed to persist since startup.
    pub fn audit_failures(&self) -> u64 {
        self.audit.failed_writes()
    }

    /// Authenticates a raw `Authorization` header value. A missing header or
    /// a scheme other than bearer is an audited credential failure.
    pub async fn authenticate_header(&self, header: Option<&str>) -> Result<Caller, GateError> {
        match header.and_then(bearer_from_header) {
            Some(token) => self.authenticate(token).await,
            None => {
                let err = GateError::InvalidCredential;
                self.audit
                    .record(AuditEvent::new(Outcome::AuthFailed, "authenticate", self.clock.now()).reason(err.code()))
                    .await;
                Err(err)
            }
        }
    }

    #[instrument(skip_all, name = "gate.authenticate")]
    pub async fn authenticate(&self, credential: &str) -> Result<Caller, GateError> {
        let now = self.clock.now();
        match self.authenticator.authenticate(credential, now).await {
            Ok(caller) => Ok(caller),
            Err(err) => {
                let err = GateError::from(err);
                self.audit
                    .record(AuditEvent::new(Outcome::AuthFailed, "authenticate", now).reason(err.code()))
                    .await;
                Err(err)
            }
        }
    }

    /// Checks a share token against the resource being requested. Never
    /// yields a principal.
    pub async fn verify_share_token(&self, token: &str, resource_id: &str) -> Result<ShareGrant, GateError> {
        let now = self.clock.now();
        let resource = format!("share:{resource_id}");
        match self.keys().verify_share(token, resource_id, now) {
            Ok(grant) => {
                self.audit.record(AuditEvent::new(Outcome::Allow, resource, now)).await;
                Ok(grant)
            }
            Err(err) => {
                let err = GateError::from(err);
                self.audit
                    .record(AuditEvent::new(Outcome::Deny, resource, now).reason(err.code()))
                    .await;
                Err(err)
            }
        }
    }

    pub fn issue_share_token(&self, resource_id: &str) -> Result<String, GateError> {
        Ok(self.keys().issue_share(resource_id, self.clock.now())?)
    }

    /// The access decision point, audited. `resource` is whatever the caller
    /// is acting on and is only recorded.
    pub async fn authorize(&self, principal: &Principal, permission: &str, resource: &str) -> Result<(), GateError> {
        let policy = self.policy.load_full();
        self.decide(&policy, principal, permission, resource).await
    }

    async fn decide(
        &self,
        policy: &Policy,
        principal: &Principal,
        permission: &str,
        resource: &str,
    ) -> Result<(), GateError> {
        let now = self.clock.now();
        let event = AuditEvent::new(Outcome::Allow, resource, now)
            .principal(principal)
            .details(json!({ "permission": permission }));
        match policy.matrix().decide(principal, permission) {
            Decision::Allow => {
                self.audit.record(event).await;
                Ok(())
            }
            Decision::Deny(reason) => {
                let event = AuditEvent {
                    outcome: Outcome::Deny,
                    ..event
                }
                .reason(reason.as_str());
                self.audit.record(event).await;
                Err(GateError::PermissionDenied {
                    permission: permission.to_string(),
                })
            }
        }
    }

    /// Runs the permission check, then quota and credit for a named action.
    ///
    /// The idempotency key only applies to the credit debit: replaying a key
    /// admits again without charging or counting.
    #[instrument(skip_all, name = "gate.admit", fields(action = %action, org_id = %caller.principal.org_id))]
    pub async fn admit(
        &self,
        caller: &Caller,
        action: &str,
        resource: &str,
        idempotency_key: Option<&str>,
    ) -> Result<Admission, GateError> {
        let policy = self.policy.load_full();
        let principal = &caller.principal;

        let Some(rule) = policy.action(action) else {
            let now = self.clock.now();
            self.audit
                .record(
                    AuditEvent::new(Outcome::Deny, resource, now)
                        .principal(principal)
                        .reason("unknown_action")
                        .details(json!({ "action": action })),
                )
                .await;
            return Err(GateError::PermissionDenied {
                permission: action.to_string(),
            });
        };

        self.decide(&policy, principal, rule.permission.as_str(), resource)
            .await?;

        let quota = rule
            .quota
            .as_deref()
            .map(|resource_type| (resource_type, policy.plans().ceiling(caller.plan, resource_type)));
        if quota.is_none() && rule.credit.is_none() {
            return Ok(Admission {
                action: action.to_string(),
                receipt: Receipt::default(),
            });
        }

        let request = MeteringRequest {
            org_id: principal.org_id,
            action,
            resource,
            quota,
            credit: rule.credit.as_ref(),
            idempotency_key,
        };
        let now = self.clock.now();
        let outcome = match self.meter.consume(&request, now).await {
            Ok(outcome) => outcome,
            Err(err) => {
                let err = GateError::from(err);
                warn!(action, code = err.code(), "metering refused");
                self.audit
                    .record(
                        AuditEvent::new(Outcome::Deny, action, now)
                            .principal(principal)
                            .reason(err.code())
                            .details(json!({ "resource": resource })),
                    )
                    .await;
                return Err(err);
            }
        };

        match outcome {
            ConsumeOutcome::Admitted(receipt) => {
                if !receipt.replayed {
                    if let Some(charge) = &receipt.credit {
                        let event = AuditEvent::new(Outcome::Debit, action, now)
                            .principal(principal)
                            .details(json!({
                                "resource": resource,
                                "credit_type": charge.credit_type,
                                "amount": charge.amount,
                                "remaining": charge.remaining,
                                "idempotency_key": idempotency_key,
                            }));
                        self.audit.record(event).await;
                    }
                }
                Ok(Admission {
                    action: action.to_string(),
                    receipt,
                })
            }
            ConsumeOutcome::QuotaExceeded {
                resource_type,
                used,
                limit,
            } => {
                self.audit
                    .record(
                        AuditEvent::new(Outcome::QuotaExceeded, action, now)
                            .principal(principal)
                            .details(json!({
                                "resource": resource,
                                "resource_type": resource_type,
                                "used": used,
                                "limit": limit,
                            })),
                    )
                    .await;
                Err(GateError::QuotaExceeded {
                    resource_type,
                    used,
                    limit,
                })
            }
            ConsumeOutcome::CreditExhausted {
                credit_type,
                available,
                required,
            } => {
                self.audit
                    .record(
                        AuditEvent::new(Outcome::CreditExhausted, action, now)
                            .principal(principal)
                            .details(json!({
                                "resource": resource,
                                "credit_type": credit_type,
                                "available": available,
                                "required": required,
                            })),
                    )
                    .await;
                Err(GateError::CreditExhausted {
                    credit_type,
                    available,
                    required,
                })
            }
        }
    }

    /// Gives back credits consumed by an action whose business operation
    /// failed afterwards.
    pub async fn release(&self, caller: &Caller, credit_type: &str, amount: i64, action: &str) -> Result<i64, GateError> {
        let now = self.clock.now();
        let balance = self
            .meter
            .ledger()
            .release(caller.principal.org_id, credit_type, amount, Some(action), now)
            .await?;
        self.audit
            .record(
                AuditEvent::new(Outcome::Release, action, now)
                    .principal(&caller.principal)
                    .details(json!({ "credit_type": credit_type, "amount": amount, "balance": balance })),
            )
            .await;
        Ok(balance)
    }

    /// Caller-initiated top-up; needs the `credits.top_up` action.
    pub async fn top_up(&self, caller: &Caller, credit_type: &str, amount: i64) -> Result<i64, GateError> {
        self.admit(caller, "credits.top_up", &format!("credits:{credit_type}"), None)
            .await?;
        self.add_credits(caller.principal.org_id, Some(&caller.principal), credit_type, amount)
            .await
    }

    /// Operator grant outside any request, e.g. after a payment settles.
    pub async fn grant_credits(&self, org_id: Uuid, credit_type: &str, amount: i64) -> Result<i64, GateError> {
        self.add_credits(org_id, None, credit_type, amount).await
    }

    async fn add_credits(
        &self,
        org_id: Uuid,
        principal: Option<&Principal>,
        credit_type: &str,
        amount: i64,
    ) -> Result<i64, GateError> {
        if !self.policy.load_full().credit_types().contains(credit_type) {
            return Err(GateError::InvalidRequest(format!("unknown credit type {credit_type}")));
        }
        let now = self.clock.now();
        let balance = self
            .meter
            .ledger()
            .credit(org_id, credit_type, amount, Some("credits.top_up"), now)
            .await?;
        let mut event = AuditEvent::new(Outcome::Credit, "credits.top_up", now)
            .org(org_id)
            .details(json!({ "credit_type": credit_type, "amount": amount, "balance": balance }));
        if let Some(principal) = principal {
            event = event.principal(principal);
        }
        self.audit.record(event).await;
        Ok(balance)
    }

    /// Current-period usage for every resource the caller's plan names, plus
    /// credit balances. Needs the `usage.read` action.
    pub async fn usage_summary(&self, caller: &Caller) -> Result<UsageSummary, GateError> {
        self.admit(caller, "usage.read", "usage", None).await?;
        let policy = self.policy.load_full();
        let now = self.clock.now();
        let org_id = caller.principal.org_id;

        let mut resources = Vec::new();
        for (resource_type, ceiling) in policy.plans().resources(caller.plan) {
            let used = self.meter.counters().used(org_id, resource_type, now).await?;
            resources.push(ResourceUsage {
                resource_type: resource_type.to_string(),
                used,
                limit: ceiling.limit(),
            });
        }
        let credits = self
            .meter
            .ledger()
            .balances(org_id)
            .await?
            .into_iter()
            .map(|(credit_type, balance)| CreditBalance { credit_type, balance })
            .collect();

        Ok(UsageSummary {
            org_id,
            plan: caller.plan,
            period: BillingPeriod::containing(now),
            resources,
            credits,
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use migration::{Migrator, MigratorTrait};
    use platform_audit::MemoryAuditSink;
    use platform_authz::Role;
    use sea_orm::Database;
    use serde_json::json;

    use super::*;

    async fn engine(audit: Arc<MemoryAuditSink>) -> Engine {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        Migrator::up(&db, None).await.unwrap();
        let keys = TokenKeys::new(&[3u8; 32], Duration::minutes(5), Duration::days(1)).unwrap();
        Engine::builder(db, keys).audit(audit).build().unwrap()
    }

    fn caller(role: Role) -> Caller {
        Caller {
            principal: Principal {
                user_id: Uuid::new_v4(),
                org_id: Uuid::new_v4(),
                role,
            },
            plan: PlanType::Core,
        }
    }

    #[tokio::test]
    async fn unknown_actions_are_denied_and_audited() {
        let audit = Arc::new(MemoryAuditSink::default());
        let engine = engine(audit.clone()).await;
        let err = engine
            .admit(&caller(Role::Owner), "teleport.run", "case-1", None)
            .await
            .unwrap_err();
        assert!(matches!(err, GateError::PermissionDenied { .. }));
        let events = audit.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].outcome, Outcome::Deny);
        assert_eq!(events[0].reason.as_deref(), Some("unknown_action"));
    }

    #[tokio::test]
    async fn reload_swaps_the_whole_policy() {
        let audit = Arc::new(MemoryAuditSink::default());
        let engine = engine(audit).await;
        let reader = caller(Role::ReadOnly);
        assert!(engine.admit(&reader, "case.read", "case-1", None).await.is_ok());

        let narrower = Policy::from_json(
            &json!({
                "roles": { "owner": ["*"], "admin": ["cases:read"] },
                "actions": { "case.read": { "permission": "cases:read" } }
            })
            .to_string(),
        )
        .unwrap();
        engine.reload_policy(narrower);
        assert!(matches!(
            engine.admit(&reader, "case.read", "case-1", None).await,
            Err(GateError::PermissionDenied { .. })
        ));
    }

    #[tokio::test]
    async fn denied_permission_never_reaches_metering() {
        let audit = Arc::new(MemoryAuditSink::default());
        let engine = engine(audit.clone()).await;
        let client = caller(Role::Client);
        let err = engine
            .admit(&client, "site_analysis.run", "case-1", None)
            .await
            .unwrap_err();
        assert!(matches!(err, GateError::PermissionDenied { .. }));
        let used = engine
            .meter()
            .counters()
            .used(client.principal.org_id, "site_analyses", engine.now())
            .await
            .unwrap();
        assert_eq!(used, 0);
        let outcomes: Vec<_> = audit.events().into_iter().map(|e| e.outcome).collect();
        assert_eq!(outcomes, [Outcome::Deny]);
    }

    #[tokio::test]
    async fn unknown_credit_types_are_refused() {
        let audit = Arc::new(MemoryAuditSink::default());
        let engine = engine(audit).await;
        assert!(matches!(
            engine.grant_credits(Uuid::new_v4(), "GOLD", 5).await,
            Err(GateError::InvalidRequest(_))
        ));
        assert_eq!(engine.grant_credits(Uuid::new_v4(), "AUTO_DOCS", 5).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn missing_or_foreign_scheme_headers_are_audited() {
        let audit = Arc::new(MemoryAuditSink::default());
        let engine = engine(audit.clone()).await;
        for header in [None, Some("Basic dXNlcjpwYXNz"), Some("Bearer   ")] {
            assert!(matches!(
                engine.authenticate_header(header).await,
                Err(GateError::InvalidCredential)
            ));
        }
        let events = audit.events();
        assert_eq!(events.len(), 3);
        assert!(events.iter().all(|event| event.outcome == Outcome::AuthFailed
            && event.reason.as_deref() == Some("invalid_credential")
            && event.user_id.is_none()));
        assert_eq!(engine.audit_failures(), 0);
    }
}
