use std::sync::Arc;

use entity::orgs::PlanType;
use gate_tests::{env, memory_db};
use platform_authz::Role;
use platform_gate::GateError;
use platform_metering::{Ceiling, QuotaOutcome, UsageCounters};
use tokio::task::JoinSet;
use uuid::Uuid;

#[tokio::test]
async fn concurrent_increments_stop_exactly_at_the_ceiling() {
    const LIMIT: i64 = 7;
    const CALLS: usize = 30;

    let counters = Arc::new(UsageCounters::new(memory_db().await));
    let org = Uuid::new_v4();
    let now = chrono::Utc::now();

    let mut tasks = JoinSet::new();
    for _ in 0..CALLS {
        let counters = counters.clone();
        tasks.spawn(async move {
            counters
                .check_and_increment(org, "docs", Ceiling::Limited(LIMIT), now)
                .await
                .unwrap()
        });
    }

    let mut allowed = 0;
    let mut exceeded = 0;
    while let Some(outcome) = tasks.join_next().await {
        match outcome.unwrap() {
            QuotaOutcome::Allowed { used } => {
                assert!(used <= LIMIT);
                allowed += 1;
            }
            QuotaOutcome::Exceeded { used, limit } => {
                assert_eq!((used, limit), (LIMIT, LIMIT));
                exceeded += 1;
            }
        }
    }
    assert_eq!(allowed, LIMIT as usize);
    assert_eq!(exceeded, CALLS - LIMIT as usize);
    assert_eq!(counters.used(org, "docs", now).await.unwrap(), LIMIT);
}

#[tokio::test]
async fn concurrent_admissions_respect_the_plan() {
    let env = env().await;
    let caller = env.caller(PlanType::Core, Role::Manager).await;
    env.engine
        .grant_credits(caller.principal.org_id, "AI_ANALYSIS", 100)
        .await
        .unwrap();

    let mut tasks = JoinSet::new();
    for i in 0..25 {
        let engine = env.engine.clone();
        tasks.spawn(async move {
            engine
                .admit(&caller, "site_analysis.run", &format!("case:{i}"), None)
                .await
        });
    }

    let mut admitted = 0;
    let mut refused = 0;
    while let Some(result) = tasks.join_next().await {
        match result.unwrap() {
            Ok(_) => admitted += 1,
            Err(GateError::QuotaExceeded { used, limit, .. }) => {
                assert_eq!((used, limit), (10, 10));
                refused += 1;
            }
            Err(other) => panic!("unexpected refusal: {other}"),
        }
    }
    assert_eq!((admitted, refused), (10, 15));

    // quota refusals never charged credits
    let balance = env
        .engine
        .meter()
        .ledger()
        .balance(caller.principal.org_id, "AI_ANALYSIS")
        .await
        .unwrap();
    assert_eq!(balance, 90);
}
