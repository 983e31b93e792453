//! Fixtures shared by the integration tests: an in-memory database with the
//! real migrations applied, an engine on a manual clock, and seeding helpers.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use entity::{
    memberships,
    orgs::{self, PlanType, SubscriptionStatus},
    users,
};
use migration::{Migrator, MigratorTrait};
use platform_audit::MemoryAuditSink;
use platform_authn::{Caller, TokenKeys};
use platform_authz::{Principal, Role};
use platform_gate::{Engine, ManualClock};
use sea_orm::{ActiveModelTrait, ActiveValue::Set, Database, DatabaseConnection};
use uuid::Uuid;

pub const SECRET: [u8; 32] = *b"integration-test-secret-32-bytes";

pub struct TestEnv {
    pub engine: Arc<Engine>,
    pub clock: Arc<ManualClock>,
    pub audit: Arc<MemoryAuditSink>,
}

impl TestEnv {
    pub fn db(&self) -> &DatabaseConnection {
        self.engine.db()
    }

    pub fn bearer(&self, principal: &Principal) -> String {
        self.engine
            .keys()
            .issue_bearer(principal, self.clock_now())
            .expect("sign bearer token")
    }

    pub fn clock_now(&self) -> DateTime<Utc> {
        self.engine.now()
    }

    /// Seeds an org and one active member, then authenticates them.
    pub async fn caller(&self, plan: PlanType, role: Role) -> Caller {
        let org_id = seed_org(self.db(), plan, SubscriptionStatus::Active).await;
        let principal = seed_member(self.db(), org_id, role, true).await;
        self.engine
            .authenticate(&self.bearer(&principal))
            .await
            .expect("seeded member authenticates")
    }
}

pub fn keys() -> TokenKeys {
    TokenKeys::new(&SECRET, Duration::minutes(30), Duration::days(30)).expect("valid test keys")
}

pub async fn memory_db() -> DatabaseConnection {
    let db = Database::connect("sqlite::memory:")
        .await
        .expect("open sqlite memory db");
    Migrator::up(&db, None).await.expect("apply migrations");
    db
}

pub async fn env() -> TestEnv {
    env_at(Utc::now()).await
}

pub async fn env_at(start: DateTime<Utc>) -> TestEnv {
    let db = memory_db().await;
    let clock = Arc::new(ManualClock::new(start));
    let audit = Arc::new(MemoryAuditSink::default());
    let engine = Engine::builder(db, keys())
        .clock(clock.clone())
        .audit(audit.clone())
        .build()
        .expect("built-in policy loads");
    TestEnv {
        engine: Arc::new(engine),
        clock,
        audit,
    }
}

pub async fn seed_org(db: &DatabaseConnection, plan: PlanType, status: SubscriptionStatus) -> Uuid {
    let id = Uuid::new_v4();
    orgs::ActiveModel {
        id: Set(id),
        slug: Set(format!("org-{id}")),
        name: Set(format!("Org {id}")),
        plan_type: Set(plan),
        subscription_status: Set(status),
        created_at: Set(Utc::now().fixed_offset()),
    }
    .insert(db)
    .await
    .expect("insert org");
    id
}

pub async fn seed_member(db: &DatabaseConnection, org_id: Uuid, role: Role, active: bool) -> Principal {
    let user_id = Uuid::new_v4();
    users::ActiveModel {
        id: Set(user_id),
        email: Set(format!("{user_id}@example.test")),
        display_name: Set("Test User".into()),
        is_active: Set(active),
        created_at: Set(Utc::now().fixed_offset()),
    }
    .insert(db)
    .await
    .expect("insert user");
    memberships::ActiveModel {
        org_id: Set(org_id),
        user_id: Set(user_id),
        role: Set(role.as_str().to_string()),
        created_at: Set(Utc::now().fixed_offset()),
    }
    .insert(db)
    .await
    .expect("insert membership");
    Principal {
        user_id,
        org_id,
        role,
    }
}
