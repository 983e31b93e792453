use std::sync::Arc;

use chrono::Utc;
use entity::orgs::PlanType;
use gate_tests::{env, memory_db};
use platform_authz::Role;
use platform_gate::GateError;
use platform_metering::{CreditCost, CreditLedger, DebitOutcome};
use tokio::task::JoinSet;
use uuid::Uuid;

#[tokio::test]
async fn concurrent_debits_never_overdraw() {
    let ledger = Arc::new(CreditLedger::new(memory_db().await));
    let org = Uuid::new_v4();
    let initial = 10;
    ledger.credit(org, "AUTO_DOCS", initial, None, Utc::now()).await.unwrap();

    let mut tasks = JoinSet::new();
    for i in 0..24 {
        let ledger = ledger.clone();
        // amounts 1..=3 sum well past the balance
        let amount = (i % 3) + 1;
        tasks.spawn(async move {
            let cost = CreditCost {
                credit_type: "AUTO_DOCS".into(),
                amount,
            };
            let outcome = ledger
                .debit(org, &cost, Some("docs.generate"), None, Utc::now())
                .await
                .unwrap();
            (amount, outcome)
        });
    }

    let mut debited = 0;
    while let Some(joined) = tasks.join_next().await {
        let (amount, outcome) = joined.unwrap();
        match outcome {
            DebitOutcome::Debited { remaining, .. } => {
                assert!(remaining >= 0);
                debited += amount;
            }
            DebitOutcome::Insufficient { available, required } => {
                assert!(available < required);
            }
        }
    }

    let balance = ledger.balance(org, "AUTO_DOCS").await.unwrap();
    assert!(debited <= initial);
    assert!(balance >= 0);
    assert_eq!(balance, initial - debited);

    let entries = ledger.entries(org).await.unwrap();
    let logged: i64 = entries
        .iter()
        .filter(|entry| entry.kind == entity::credit_entries::EntryKind::Debit)
        .map(|entry| entry.amount)
        .sum();
    assert_eq!(logged, debited);
}

#[tokio::test]
async fn credit_only_actions_stop_when_the_balance_runs_out() {
    let env = env().await;
    let caller = env.caller(PlanType::Enterprise, Role::Staff).await;
    env.engine
        .grant_credits(caller.principal.org_id, "AI_ANALYSIS", 3)
        .await
        .unwrap();

    let mut results = Vec::new();
    for i in 0..5 {
        results.push(
            env.engine
                .admit(&caller, "planning.variants", &format!("case:{i}"), None)
                .await,
        );
    }
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 3);
    match &results[3] {
        Err(GateError::CreditExhausted {
            credit_type,
            available,
            required,
        }) => {
            assert_eq!(credit_type, "AI_ANALYSIS");
            assert_eq!((*available, *required), (0, 1));
        }
        other => panic!("expected credit exhaustion, got {other:?}"),
    }
}

#[tokio::test]
async fn release_restores_the_balance() {
    let env = env().await;
    let caller = env.caller(PlanType::Professional, Role::Admin).await;
    let org = caller.principal.org_id;
    env.engine.grant_credits(org, "AUTO_DOCS", 2).await.unwrap();

    let admission = env
        .engine
        .admit(&caller, "docs.generate", "case:1", None)
        .await
        .unwrap();
    let charge = admission.receipt.credit.unwrap();
    assert_eq!(charge.remaining, 1);

    let balance = env
        .engine
        .release(&caller, &charge.credit_type, charge.amount, "docs.generate")
        .await
        .unwrap();
    assert_eq!(balance, 2);
}
