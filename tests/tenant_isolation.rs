use chrono::Utc;
use entity::{cases, orgs::PlanType};
use gate_tests::env;
use platform_authz::Role;
use platform_db::ScopeError;
use platform_gate::GateError;
use sea_orm::{ActiveValue::Set, EntityTrait, PaginatorTrait};
use uuid::Uuid;

fn draft(title: &str) -> cases::ActiveModel {
    cases::ActiveModel {
        id: Set(Uuid::new_v4()),
        title: Set(title.into()),
        created_at: Set(Utc::now().fixed_offset()),
        ..Default::default()
    }
}

#[tokio::test]
async fn records_of_another_org_read_as_not_found() {
    let env = env().await;
    let alice = env.caller(PlanType::Professional, Role::Owner).await;
    let mallory = env.caller(PlanType::Professional, Role::Owner).await;

    let record = env
        .engine
        .scope(&alice)
        .insert(env.db(), draft("Alice's site"))
        .await
        .unwrap();

    let miss = env
        .engine
        .scope(&mallory)
        .find_by_id::<cases::Entity, _, _>(env.db(), record.id)
        .await
        .unwrap_err();
    let absent = env
        .engine
        .scope(&mallory)
        .find_by_id::<cases::Entity, _, _>(env.db(), Uuid::new_v4())
        .await
        .unwrap_err();
    assert!(matches!(miss, ScopeError::NotFound));
    assert!(matches!(absent, ScopeError::NotFound));
    assert!(matches!(GateError::from(miss), GateError::ScopeViolation));

    let visible = env
        .engine
        .scope(&mallory)
        .select::<cases::Entity>()
        .count(env.db())
        .await
        .unwrap();
    assert_eq!(visible, 0);
    assert_eq!(cases::Entity::find().count(env.db()).await.unwrap(), 1);
}

#[tokio::test]
async fn writes_are_stamped_with_the_callers_org() {
    let env = env().await;
    let alice = env.caller(PlanType::Professional, Role::Admin).await;
    let mallory = env.caller(PlanType::Professional, Role::Admin).await;

    let mut smuggled = draft("planted");
    smuggled.org_id = Set(alice.principal.org_id);
    let record = env
        .engine
        .scope(&mallory)
        .insert(env.db(), smuggled)
        .await
        .unwrap();
    assert_eq!(record.org_id, mallory.principal.org_id);

    let removed = env
        .engine
        .scope(&mallory)
        .delete::<cases::Entity>()
        .exec(env.db())
        .await
        .unwrap();
    assert_eq!(removed.rows_affected, 1);
}

#[tokio::test]
async fn staff_and_clients_see_only_their_rows() {
    let env = env().await;
    let admin = env.caller(PlanType::Enterprise, Role::Admin).await;
    let org = admin.principal.org_id;
    let staff = gate_tests::seed_member(env.db(), org, Role::Staff, true).await;
    let client = gate_tests::seed_member(env.db(), org, Role::Client, true).await;
    let staff = env.engine.authenticate(&env.bearer(&staff)).await.unwrap();
    let client = env.engine.authenticate(&env.bearer(&client)).await.unwrap();

    let scope = env.engine.scope(&admin);
    let mut assigned = draft("assigned");
    assigned.assigned_user_id = Set(Some(staff.principal.user_id));
    scope.insert(env.db(), assigned).await.unwrap();
    let mut owned = draft("owned");
    owned.client_user_id = Set(Some(client.principal.user_id));
    scope.insert(env.db(), owned).await.unwrap();
    scope.insert(env.db(), draft("unrelated")).await.unwrap();

    let titles = |rows: Vec<cases::Model>| rows.into_iter().map(|r| r.title).collect::<Vec<_>>();
    let staff_rows = env.engine.scope(&staff).select::<cases::Entity>().all(env.db()).await.unwrap();
    let client_rows = env.engine.scope(&client).select::<cases::Entity>().all(env.db()).await.unwrap();
    assert_eq!(titles(staff_rows), ["assigned"]);
    assert_eq!(titles(client_rows), ["owned"]);
    assert_eq!(scope.select::<cases::Entity>().count(env.db()).await.unwrap(), 3);
}
