use futures_util::{future::join_all, TryStreamExt};
use tenanto_store::{
    ConnectionDescriptor, NewTenant, ProvisioningStage, RunOutcome, RunRecord, RunScope, Store,
    StoreError, Subscription, SubscriptionStatus, TenantFilter, TenantState,
};
use uuid::Uuid;

pub fn new_tenant(code: &str) -> NewTenant {
    NewTenant {
        id: Uuid::new_v4(),
        name: format!("Tenant {code}"),
        routing_code: code.to_owned(),
        primary_domain: format!("{code}.stocker.app"),
        contact_email: format!("admin@{code}.test"),
        package_id: "starter".to_owned(),
        connection: ConnectionDescriptor::new(
            "localhost",
            5432,
            format!("tenant_{}", code.replace('-', "_")),
            "default",
        ),
    }
}

pub async fn test_register(store: &Store, prefix: &str) -> anyhow::Result<()> {
    let code = format!("{prefix}-acme-co");
    let tenant = store.register(new_tenant(&code)).await?;

    assert_eq!(tenant.state, TenantState::Provisioning);
    assert_eq!(tenant.stage, ProvisioningStage::Registered);

    let found = store.find_by_routing_key(&code).await?;
    assert_eq!(found.id, tenant.id);
    assert_eq!(found.connection, tenant.connection);

    assert!(matches!(
        store.find_by_routing_key(&format!("{prefix}-nobody")).await,
        Err(StoreError::NotFound(_))
    ));

    let duplicate = store.register(new_tenant(&code)).await;
    assert!(matches!(
        duplicate,
        Err(StoreError::DuplicateRoutingCode(c)) if c == code
    ));

    Ok(())
}

pub async fn test_concurrent_register(store: &Store, prefix: &str) -> anyhow::Result<()> {
    let code = format!("{prefix}-race");
    let attempts = (0..10)
        .map(|_| store.register(new_tenant(&code)))
        .collect::<Vec<_>>();

    let results = join_all(attempts).await;
    let succeeded = results.iter().filter(|res| res.is_ok()).count();
    let duplicates = results
        .iter()
        .filter(|res| matches!(res, Err(StoreError::DuplicateRoutingCode(_))))
        .count();

    assert_eq!(succeeded, 1);
    assert_eq!(duplicates, 9);

    Ok(())
}

pub async fn test_transition(store: &Store, prefix: &str) -> anyhow::Result<()> {
    let tenant = store
        .register(new_tenant(&format!("{prefix}-cas")))
        .await?;

    let active = store
        .transition(tenant.id, TenantState::Provisioning, TenantState::Active)
        .await?;
    assert_eq!(active.state, TenantState::Active);
    assert_eq!(active.revision, tenant.revision + 1);

    let stale = store
        .transition(tenant.id, TenantState::Provisioning, TenantState::Deprovisioned)
        .await;
    assert!(matches!(
        stale,
        Err(StoreError::UnexpectedState {
            expected: TenantState::Provisioning,
            actual: TenantState::Active,
            ..
        })
    ));

    let suspended = store.set_state(tenant.id, TenantState::Suspended).await?;
    assert_eq!(suspended.state, TenantState::Suspended);

    assert!(matches!(
        store.set_state(Uuid::new_v4(), TenantState::Active).await,
        Err(StoreError::NotFound(_))
    ));

    Ok(())
}

pub async fn test_concurrent_transition(store: &Store, prefix: &str) -> anyhow::Result<()> {
    let tenant = store
        .register(new_tenant(&format!("{prefix}-cas-race")))
        .await?;
    store
        .transition(tenant.id, TenantState::Provisioning, TenantState::Active)
        .await?;

    let attempts = (0..5)
        .map(|_| store.transition(tenant.id, TenantState::Active, TenantState::Deprovisioned))
        .collect::<Vec<_>>();

    let results = join_all(attempts).await;

    assert_eq!(results.iter().filter(|res| res.is_ok()).count(), 1);
    assert_eq!(
        store.find(tenant.id).await?.state,
        TenantState::Deprovisioned
    );

    Ok(())
}

pub async fn test_stage_and_failure(store: &Store, prefix: &str) -> anyhow::Result<()> {
    let tenant = store
        .register(new_tenant(&format!("{prefix}-stages")))
        .await?;

    store
        .record_stage(tenant.id, ProvisioningStage::DatabaseCreated)
        .await?;

    let failed = store
        .record_failure(tenant.id, ProvisioningStage::DatabaseCreated, "migration boom")
        .await?;

    assert_eq!(failed.state, TenantState::Failed);
    assert_eq!(failed.stage, ProvisioningStage::DatabaseCreated);

    let failure = store.find(tenant.id).await?.failure;
    assert_eq!(
        failure.map(|f| (f.stage, f.reason)),
        Some((ProvisioningStage::DatabaseCreated, "migration boom".to_owned()))
    );

    assert!(matches!(
        store
            .record_stage(tenant.id, ProvisioningStage::SchemaMigrated)
            .await,
        Err(StoreError::UnexpectedState { .. })
    ));

    Ok(())
}

pub async fn test_list_all(store: &Store, prefix: &str) -> anyhow::Result<()> {
    let mut ids = Vec::new();

    for i in 0..7 {
        let tenant = store
            .register(new_tenant(&format!("{prefix}-list-{i}")))
            .await?;

        if i % 2 == 0 {
            store
                .transition(tenant.id, TenantState::Provisioning, TenantState::Active)
                .await?;
        }

        ids.push(tenant.id);
    }

    let mut active = store
        .stream_all(TenantFilter::state(TenantState::Active), 2)
        .try_collect::<Vec<_>>()
        .await?
        .into_iter()
        .filter(|tenant| tenant.routing_code.starts_with(&format!("{prefix}-list-")))
        .map(|tenant| tenant.id)
        .collect::<Vec<_>>();

    let mut expected = ids.iter().step_by(2).cloned().collect::<Vec<_>>();
    active.sort();
    expected.sort();

    assert_eq!(active, expected);

    let first = store.list_all(&TenantFilter::all(), 3, None).await?;
    assert_eq!(first.edges.len(), 3);
    assert!(first.page_info.has_next_page);

    Ok(())
}

pub async fn test_stream_survives_state_change(
    store: &Store,
    prefix: &str,
) -> anyhow::Result<()> {
    let mut ids = Vec::new();

    for i in 0..4 {
        let tenant = store
            .register(new_tenant(&format!("{prefix}-streamed-{i}")))
            .await?;

        store
            .transition(tenant.id, TenantState::Provisioning, TenantState::Active)
            .await?;

        ids.push(tenant.id);
    }

    let mut stream = Box::pin(store.stream_all(TenantFilter::state(TenantState::Active), 1));
    let mut seen = Vec::new();

    while let Some(tenant) = stream.try_next().await? {
        if !ids.contains(&tenant.id) {
            continue;
        }

        // the tenant behind the current cursor leaves the filter before the next page
        if seen.is_empty() {
            store.set_state(tenant.id, TenantState::Suspended).await?;
        }

        seen.push(tenant.id);
    }

    seen.sort();
    ids.sort();
    assert_eq!(seen, ids);

    Ok(())
}

pub async fn test_stage_never_moves_back(store: &Store, prefix: &str) -> anyhow::Result<()> {
    let tenant = store
        .register(new_tenant(&format!("{prefix}-stage-race")))
        .await?;

    store
        .record_stage(tenant.id, ProvisioningStage::DatabaseCreated)
        .await?;
    store
        .record_stage(tenant.id, ProvisioningStage::SchemaMigrated)
        .await?;

    // a slower attempt checkpoints a stage the tenant already passed
    assert!(matches!(
        store
            .record_stage(tenant.id, ProvisioningStage::DatabaseCreated)
            .await,
        Err(StoreError::StageRegression {
            current: ProvisioningStage::SchemaMigrated,
            requested: ProvisioningStage::DatabaseCreated,
            ..
        })
    ));

    assert!(matches!(
        store
            .record_stage(tenant.id, ProvisioningStage::SchemaMigrated)
            .await,
        Err(StoreError::StageRegression { .. })
    ));

    let racers = join_all(
        (0..4).map(|_| store.record_stage(tenant.id, ProvisioningStage::Seeded)),
    )
    .await
        .into_iter()
        .filter(|res| res.is_ok())
        .count();

    assert_eq!(racers, 1);

    let stored = store.find(tenant.id).await?;
    assert_eq!(stored.stage, ProvisioningStage::Seeded);
    assert_eq!(stored.revision, 3);

    Ok(())
}

pub async fn test_subscription(store: &Store, prefix: &str) -> anyhow::Result<()> {
    let tenant = store
        .register(new_tenant(&format!("{prefix}-subscription")))
        .await?;

    assert_eq!(store.subscription(tenant.id).await?, None);

    let first = store
        .activate_subscription(Subscription::open(tenant.id, "starter", 14))
        .await?;
    let second = store
        .activate_subscription(Subscription::open(tenant.id, "enterprise", 0))
        .await?;

    assert_eq!(first.id, second.id);
    assert_eq!(second.status, SubscriptionStatus::Trial);
    assert_eq!(store.subscription(tenant.id).await?, Some(first));

    Ok(())
}

pub async fn test_run_log(store: &Store) -> anyhow::Result<()> {
    let tenant_id = Uuid::new_v4();
    let scope = RunScope::Tenant(tenant_id);
    let run_id = Uuid::new_v4();

    store
        .append_run(vec![
            RunRecord::new(run_id, scope, "20240101000000_init", RunOutcome::Success),
            RunRecord::new(run_id, scope, "20240201000000_modules", RunOutcome::Failed)
                .error("connection refused"),
        ])
        .await?;

    assert!(store.has_completed(scope, "20240101000000_init").await?);
    assert!(!store.has_completed(scope, "20240201000000_modules").await?);

    let runs = store.runs_of(scope).await?;
    assert_eq!(runs.len(), 2);
    assert_eq!(runs[1].error.as_deref(), Some("connection refused"));

    let latest = store.latest_runs().await?;
    assert_eq!(
        latest.get(&scope).map(|run| run.outcome),
        Some(RunOutcome::Failed)
    );

    let last = store.latest_run(scope).await?;
    assert_eq!(last.map(|run| run.version), Some("20240201000000_modules".to_owned()));
    assert_eq!(
        store.latest_run(RunScope::Tenant(Uuid::new_v4())).await?,
        None
    );

    let completed = store.completed(scope).await?;
    assert_eq!(completed.len(), 1);
    assert!(completed.contains("20240101000000_init"));

    Ok(())
}
