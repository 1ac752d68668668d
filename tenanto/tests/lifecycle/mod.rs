use anyhow::{anyhow, bail};
use async_trait::async_trait;
use futures_util::future::join_all;
use std::{
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};
use tenanto::{
    config::ConfigBuilder, schema::tenant_migrations, FleetError, FleetRequest, ProvisionError,
    ProvisionRequest, ResolveError, Tenanto,
};
use tenanto_migrator::{
    Connector, Consistency, Database, MemoryCluster, MemoryDatabase, MigrateError, MigrationSet,
    SqlMigration, Version,
};
use tenanto_store::{
    ConnectionDescriptor, MemoryStore, ProvisioningStage, RunOutcome, RunScope,
    SubscriptionStatus, TenantRecord, TenantState,
};
use tokio::sync::Semaphore;
use uuid::Uuid;

pub const TAGS: &str = "20240420000000_tenant_tags";
pub const LABELS: &str = "20240501000000_tenant_labels";

/// Memory cluster whose `connect` can be held until released.
#[derive(Clone)]
pub struct GatedCluster {
    pub inner: MemoryCluster,
    gate: Arc<Semaphore>,
    held: Arc<AtomicBool>,
    waiting: Arc<AtomicUsize>,
}

impl GatedCluster {
    pub fn new() -> Self {
        Self {
            inner: MemoryCluster::new(),
            gate: Arc::new(Semaphore::new(0)),
            held: Arc::new(AtomicBool::new(false)),
            waiting: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn hold(&self) {
        self.held.store(true, Ordering::SeqCst);
    }

    pub fn release(&self) {
        self.held.store(false, Ordering::SeqCst);
        self.gate.close();
    }

    pub async fn wait_for_held(&self, count: usize) {
        while self.waiting.load(Ordering::SeqCst) < count {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

#[async_trait]
impl Connector for GatedCluster {
    async fn exists(&self, descriptor: &'_ ConnectionDescriptor) -> Result<bool, MigrateError> {
        self.inner.exists(descriptor).await
    }

    async fn create(&self, descriptor: &'_ ConnectionDescriptor) -> Result<(), MigrateError> {
        self.inner.create(descriptor).await
    }

    async fn connect(
        &self,
        descriptor: &'_ ConnectionDescriptor,
    ) -> Result<Box<dyn Database>, MigrateError> {
        if self.held.load(Ordering::SeqCst) {
            self.waiting.fetch_add(1, Ordering::SeqCst);
            let _ = self.gate.acquire().await;
        }

        self.inner.connect(descriptor).await
    }
}

pub struct Harness {
    pub tenanto: Tenanto,
    pub cluster: GatedCluster,
    pub master: MemoryDatabase,
}

impl Harness {
    pub fn new() -> anyhow::Result<Self> {
        Self::with_config(ConfigBuilder::new())
    }

    pub fn with_config(config: ConfigBuilder) -> anyhow::Result<Self> {
        let master = MemoryDatabase::new("master");
        let cluster = GatedCluster::new();
        let config = config.fleet_workers(4).page_size(7).build()?;
        let tenanto = Tenanto::builder(MemoryStore::new(), master.clone(), cluster.clone())
            .config(config)
            .build()?;

        Ok(Self {
            tenanto,
            cluster,
            master,
        })
    }

    pub async fn bootstrapped() -> anyhow::Result<Self> {
        let harness = Self::new()?;
        harness.tenanto.bootstrap().await?;

        Ok(harness)
    }

    pub fn database(&self, tenant: &TenantRecord) -> anyhow::Result<MemoryDatabase> {
        self.cluster
            .inner
            .database(&tenant.connection.database)
            .ok_or_else(|| anyhow!("no database for {}", tenant.routing_code))
    }

    pub fn created(&self, database: &str) -> usize {
        self.cluster
            .inner
            .created()
            .iter()
            .filter(|name| name.as_str() == database)
            .count()
    }

    pub async fn provision_many(&self, prefix: &str, count: usize) -> anyhow::Result<Vec<TenantRecord>> {
        let provisioner = self.tenanto.provisioner();
        let attempts = (0..count)
            .map(|i| provisioner.provision(request(&format!("{prefix}-{i}"))))
            .collect::<Vec<_>>();

        let mut tenants = Vec::new();
        for res in join_all(attempts).await {
            tenants.push(res?);
        }

        Ok(tenants)
    }

    pub async fn applied(&self, tenant: &TenantRecord) -> anyhow::Result<Vec<String>> {
        Ok(self
            .database(tenant)?
            .applied()
            .await?
            .into_iter()
            .map(|v| v.id)
            .collect())
    }
}

pub fn request(code: &str) -> ProvisionRequest {
    ProvisionRequest::new(format!("Tenant {code}"), code, format!("ops@{code}.test"))
}

pub fn with_tags() -> Result<MigrationSet, MigrateError> {
    tenant_migrations().with(
        SqlMigration::new(TAGS, "tenant tags")
            .sql("CREATE TABLE IF NOT EXISTS \"tenant_tag\" (\"name\" varchar(50) PRIMARY KEY)")
            .down_sql("DROP TABLE \"tenant_tag\""),
    )
}

pub fn with_labels() -> Result<MigrationSet, MigrateError> {
    with_tags()?.with(
        SqlMigration::new(LABELS, "tenant labels")
            .sql("CREATE TABLE IF NOT EXISTS \"tenant_label\" (\"name\" varchar(50) PRIMARY KEY)"),
    )
}

fn tenant_versions() -> Vec<String> {
    tenant_migrations()
        .versions()
        .into_iter()
        .map(|v| v.id)
        .collect()
}

pub async fn test_provision(h: &Harness) -> anyhow::Result<()> {
    let store = h.tenanto.store();
    let tenant = h
        .tenanto
        .provisioner()
        .provision(ProvisionRequest::new(
            "Acme Corporation",
            "acme-co",
            "ops@acme.test",
        ))
        .await?;

    assert_eq!(tenant.state, TenantState::Active);
    assert_eq!(tenant.stage, ProvisioningStage::Active);
    assert_eq!(tenant.failure, None);
    assert_eq!(tenant.primary_domain, "acme-co.stocker.app");
    assert_eq!(tenant.connection.database, "tenant_acme_co");
    assert_eq!(h.cluster.inner.created(), vec!["tenant_acme_co".to_owned()]);
    assert_eq!(h.applied(&tenant).await?, tenant_versions());

    let statements = h.database(&tenant)?.statements().await;
    assert!(statements
        .iter()
        .any(|s| s.contains("tenant_module") && s.contains("'crm'")));

    let subscription = store
        .subscription(tenant.id)
        .await?
        .ok_or_else(|| anyhow!("no subscription"))?;
    assert_eq!(subscription.status, SubscriptionStatus::Trial);
    assert_eq!(subscription.package_id, "starter");

    let runs = store.runs_of(RunScope::Tenant(tenant.id)).await?;
    assert_eq!(runs.len(), 3);
    assert!(runs.iter().all(|run| run.outcome == RunOutcome::Success));

    let resolver = h.tenanto.resolver();
    assert_eq!(resolver.resolve("acme-co.stocker.app").await?, tenant.connection);
    assert_eq!(resolver.resolve("ACME-CO").await?, tenant.connection);
    assert_eq!(
        resolver.resolve(&tenant.id.to_string()).await?,
        tenant.connection
    );

    Ok(())
}

pub async fn test_rejected_requests(h: &Harness) -> anyhow::Result<()> {
    let provisioner = h.tenanto.provisioner();

    let res = provisioner
        .provision(ProvisionRequest::new("Bad Mail", "bad-mail", "nope"))
        .await;
    assert!(matches!(res, Err(ProvisionError::Validation(_))));

    let res = provisioner
        .provision(ProvisionRequest::new("Shouting", "Shouting", "ops@loud.test"))
        .await;
    assert!(matches!(res, Err(ProvisionError::Validation(_))));

    let res = provisioner
        .provision(request("bad-pkg").package("enterprise"))
        .await;
    assert!(matches!(res, Err(ProvisionError::UnknownPackage(p)) if p == "enterprise"));

    assert!(h.cluster.inner.created().is_empty());
    assert!(h
        .tenanto
        .store()
        .find_by_routing_key("bad-pkg")
        .await
        .is_err());

    Ok(())
}

pub async fn test_duplicate_identity(h: &Harness) -> anyhow::Result<()> {
    let provisioner = h.tenanto.provisioner();
    let attempts = (0..2)
        .map(|_| provisioner.provision(request("twin-co")))
        .collect::<Vec<_>>();

    let results = join_all(attempts).await;
    let succeeded = results.iter().filter(|res| res.is_ok()).count();
    let duplicates = results
        .iter()
        .filter(|res| matches!(res, Err(ProvisionError::DuplicateIdentity(code)) if code == "twin-co"))
        .count();

    assert_eq!(succeeded, 1);
    assert_eq!(duplicates, 1);
    assert_eq!(h.created("tenant_twin_co"), 1);

    assert!(matches!(
        provisioner.provision(request("twin-co")).await,
        Err(ProvisionError::DuplicateIdentity(_))
    ));
    assert_eq!(h.created("tenant_twin_co"), 1);

    Ok(())
}

pub async fn test_retry_after_create_failure(h: &Harness) -> anyhow::Result<()> {
    let provisioner = h.tenanto.provisioner();
    h.cluster.inner.fail_creation_of("tenant_flaky_co");

    let err = provisioner.provision(request("flaky-co")).await;
    let Err(ProvisionError::StageFailed {
        tenant_id, stage, ..
    }) = err
    else {
        bail!("expected a stage failure");
    };

    assert_eq!(stage, ProvisioningStage::DatabaseCreated);

    let tenant = h.tenanto.store().find(tenant_id).await?;
    assert_eq!(tenant.state, TenantState::Failed);
    assert_eq!(tenant.stage, ProvisioningStage::Registered);
    assert_eq!(
        tenant.failure.map(|f| f.stage),
        Some(ProvisioningStage::DatabaseCreated)
    );

    assert!(matches!(
        provisioner.provision(request("flaky-co")).await,
        Err(ProvisionError::DuplicateIdentity(_))
    ));

    h.cluster.inner.allow_creation_of("tenant_flaky_co");

    let tenant = provisioner.retry(tenant_id).await?;
    assert_eq!(tenant.state, TenantState::Active);
    assert_eq!(tenant.failure, None);
    assert_eq!(h.created("tenant_flaky_co"), 1);
    assert_eq!(h.applied(&tenant).await?, tenant_versions());

    Ok(())
}

pub async fn test_retry_resumes_migration(h: &Harness) -> anyhow::Result<()> {
    let provisioner = h.tenanto.provisioner();
    let store = h.tenanto.store();

    let descriptor = ConnectionDescriptor::new("localhost", 5432, "tenant_halfway_co", "default");
    h.cluster.create(&descriptor).await?;

    let database = h
        .cluster
        .inner
        .database("tenant_halfway_co")
        .ok_or_else(|| anyhow!("database missing"))?;
    database.fail_statements_containing("setup_checklist");

    let err = provisioner.provision(request("halfway-co")).await;
    let Err(ProvisionError::StageFailed {
        tenant_id, stage, ..
    }) = err
    else {
        bail!("expected a stage failure");
    };

    assert_eq!(stage, ProvisioningStage::SchemaMigrated);

    let tenant = store.find(tenant_id).await?;
    assert_eq!(tenant.state, TenantState::Failed);
    assert_eq!(tenant.stage, ProvisioningStage::DatabaseCreated);
    assert!(tenant
        .failure
        .as_ref()
        .is_some_and(|f| f.reason.contains("20240201000000_setup_checklist")));
    assert_eq!(h.applied(&tenant).await?.len(), 2);

    assert!(matches!(
        h.tenanto.resolver().resolve("halfway-co").await,
        Err(ResolveError::TenantNotActive {
            state: TenantState::Failed,
            ..
        })
    ));

    let runs = store.runs_of(RunScope::Tenant(tenant_id)).await?;
    let last = runs.last().ok_or_else(|| anyhow!("no runs"))?;
    assert_eq!(last.outcome, RunOutcome::Failed);
    assert_eq!(last.version, "20240201000000_setup_checklist");

    database.clear_failures();

    let tenant = provisioner.retry(tenant_id).await?;
    assert_eq!(tenant.state, TenantState::Active);
    assert_eq!(h.created("tenant_halfway_co"), 1);
    assert_eq!(h.applied(&tenant).await?, tenant_versions());

    let runs = store.runs_of(RunScope::Tenant(tenant_id)).await?;
    for version in tenant_versions() {
        let successes = runs
            .iter()
            .filter(|run| run.version == version && run.outcome == RunOutcome::Success)
            .count();

        assert_eq!(successes, 1, "{version}");
    }

    let settings_created = database
        .statements()
        .await
        .iter()
        .filter(|s| s.starts_with("CREATE TABLE") && s.contains("\"tenant_setting\""))
        .count();
    assert_eq!(settings_created, 1);

    Ok(())
}

pub async fn test_state_changes(h: &Harness) -> anyhow::Result<()> {
    let provisioner = h.tenanto.provisioner();
    let resolver = h.tenanto.resolver();
    let tenant = provisioner.provision(request("cycle-co")).await?;

    resolver.resolve("cycle-co").await?;
    assert_eq!(resolver.cached(), 1);

    let suspended = provisioner.suspend(tenant.id).await?;
    assert_eq!(suspended.state, TenantState::Suspended);
    assert_eq!(resolver.cached(), 0);
    assert!(matches!(
        resolver.resolve("cycle-co").await,
        Err(ResolveError::TenantSuspended(id)) if id == tenant.id
    ));

    assert!(matches!(
        provisioner.suspend(tenant.id).await,
        Err(ProvisionError::InvalidState {
            state: TenantState::Suspended,
            ..
        })
    ));

    provisioner.reactivate(tenant.id).await?;
    assert_eq!(resolver.resolve("cycle-co").await?, tenant.connection);

    let retired = provisioner.deprovision(tenant.id).await?;
    assert_eq!(retired.state, TenantState::Deprovisioned);
    assert!(matches!(
        resolver.resolve("cycle-co.stocker.app").await,
        Err(ResolveError::TenantNotActive {
            state: TenantState::Deprovisioned,
            ..
        })
    ));

    assert_eq!(
        provisioner.deprovision(tenant.id).await?.state,
        TenantState::Deprovisioned
    );
    assert!(matches!(
        provisioner.reactivate(tenant.id).await,
        Err(ProvisionError::InvalidState { .. })
    ));
    assert!(matches!(
        provisioner.retry(tenant.id).await,
        Err(ProvisionError::InvalidState { .. })
    ));
    assert!(h.database(&tenant).is_ok());

    assert!(matches!(
        resolver.resolve("nobody-co").await,
        Err(ResolveError::NotFound(_))
    ));
    assert!(matches!(
        resolver.resolve("stocker.app").await,
        Err(ResolveError::NotFound(_))
    ));

    Ok(())
}

pub async fn test_fleet_unreachable(h: &Harness) -> anyhow::Result<()> {
    let store = h.tenanto.store();
    let tenants = h.provision_many("fleet", 5).await?;
    let unreachable = &tenants[2];
    h.database(unreachable)?.set_reachable(false);

    let run = h
        .tenanto
        .coordinator()
        .start(FleetRequest::new().publish(with_tags()?))
        .await?;
    let report = run.wait().await?;

    assert_eq!(report.succeeded, 4);
    assert_eq!(report.skipped, 0);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].tenant_id, unreachable.id);
    assert!(!report.cancelled);

    for tenant in &tenants {
        let runs = store.runs_of(RunScope::Tenant(tenant.id)).await?;
        let last = runs.last().ok_or_else(|| anyhow!("no runs"))?;
        assert_eq!(last.version, TAGS);

        if tenant.id == unreachable.id {
            assert_eq!(last.outcome, RunOutcome::Failed);
            assert!(last.error.is_some());
        } else {
            assert_eq!(last.outcome, RunOutcome::Success);
            assert_eq!(h.applied(tenant).await?.last(), Some(&TAGS.to_owned()));
        }
    }

    assert_eq!(h.tenanto.coordinator().running(), None);

    Ok(())
}

pub async fn test_summary_after_rollout(h: &Harness) -> anyhow::Result<()> {
    let tenants = h.provision_many("sum", 50).await?;
    let dropped = &tenants[17];
    h.tenanto.catalog().publish(with_tags()?)?;

    let reporter = h.tenanto.reporter();
    let summary = reporter.summary().await?;
    assert_eq!(summary.total_pending, 50);
    assert!(summary.master.pending.is_empty());

    let summary = reporter.summary().await?;
    assert_eq!(summary.total_pending, 50);
    assert_eq!(h.applied(&tenants[0]).await?.len(), 3);

    h.database(dropped)?.set_reachable(false);

    let report = h
        .tenanto
        .coordinator()
        .start(FleetRequest::new())
        .await?
        .wait()
        .await?;
    assert_eq!(report.succeeded, 49);
    assert_eq!(report.failed.len(), 1);

    let summary = reporter.summary().await?;
    assert_eq!(summary.total_pending, 1);
    assert!(summary.any_pending);
    assert_eq!(summary.tenants.len(), 50);
    assert_eq!(summary.per_tenant_pending.get(&dropped.id), Some(&1));
    assert_eq!(
        summary
            .per_tenant_pending
            .iter()
            .filter(|(id, pending)| **id != dropped.id && **pending == 0)
            .count(),
        49
    );

    let status = reporter.tenant_status(dropped.id).await?;
    assert!(!status.reachable);
    assert_eq!(status.pending, vec![TAGS.to_owned()]);
    assert!(status.last_error.is_some());

    let history = reporter.history(dropped.id).await?;
    assert!(history.applied.is_none());
    assert!(!history.runs.is_empty());

    let history = reporter.history(tenants[0].id).await?;
    assert_eq!(history.applied.map(|a| a.count), Some(4));

    Ok(())
}

pub async fn test_rerun_is_noop(h: &Harness) -> anyhow::Result<()> {
    let store = h.tenanto.store();
    let coordinator = h.tenanto.coordinator();
    let tenants = h.provision_many("rerun", 3).await?;

    let report = coordinator
        .start(FleetRequest::new().publish(with_tags()?))
        .await?
        .wait()
        .await?;
    assert_eq!(report.succeeded, 3);

    let mut counts = Vec::new();
    for tenant in &tenants {
        counts.push(store.runs_of(RunScope::Tenant(tenant.id)).await?.len());
    }

    let report = coordinator.start(FleetRequest::new()).await?.wait().await?;
    assert_eq!(report.succeeded, 0);
    assert_eq!(report.skipped, 3);

    for (tenant, count) in tenants.iter().zip(counts) {
        assert_eq!(store.runs_of(RunScope::Tenant(tenant.id)).await?.len(), count);
    }

    assert!(matches!(
        coordinator
            .start(FleetRequest::new().target("20990101000000_unknown"))
            .await,
        Err(FleetError::Migrate(MigrateError::UnknownVersion(_)))
    ));
    assert_eq!(coordinator.running(), None);

    Ok(())
}

pub async fn test_cancel_and_exclusive(h: &Harness) -> anyhow::Result<()> {
    let coordinator = h.tenanto.coordinator();
    h.provision_many("cancel", 6).await?;

    h.cluster.hold();

    let run = coordinator
        .start(FleetRequest::new().publish(with_tags()?).workers(1))
        .await?;
    h.cluster.wait_for_held(1).await;

    assert_eq!(coordinator.running(), Some(run.id()));
    assert!(matches!(
        coordinator.start(FleetRequest::new()).await,
        Err(FleetError::AlreadyRunning(id)) if id == run.id()
    ));

    run.cancel();
    h.cluster.release();

    let report = run.wait().await?;
    assert!(report.cancelled);
    assert_eq!(report.processed(), 1);
    assert_eq!(report.succeeded, 1);
    assert_eq!(coordinator.running(), None);

    let report = coordinator.start(FleetRequest::new()).await?.wait().await?;
    assert!(!report.cancelled);
    assert_eq!(report.succeeded, 5);
    assert_eq!(report.skipped, 1);

    Ok(())
}

pub async fn test_master_failure(h: &Harness) -> anyhow::Result<()> {
    h.master.fail_statements_containing("CREATE TABLE");

    assert!(matches!(
        h.tenanto.bootstrap().await,
        Err(tenanto::Error::Fleet(FleetError::MasterFailed(_)))
    ));

    let coordinator = h.tenanto.coordinator();
    assert!(matches!(
        coordinator.start(FleetRequest::new()).await,
        Err(FleetError::MasterFailed(_))
    ));
    assert_eq!(coordinator.running(), None);

    let runs = h.tenanto.store().runs_of(RunScope::Master).await?;
    assert!(runs.iter().all(|run| run.outcome == RunOutcome::Failed));
    assert!(!runs.is_empty());

    let summary = h.tenanto.reporter().summary().await?;
    assert!(summary.any_pending);
    assert_eq!(summary.master.pending.len(), 1);
    assert!(summary.master.last_error.is_some());

    h.master.clear_failures();
    h.tenanto.bootstrap().await?;

    let report = coordinator.start(FleetRequest::new()).await?.wait().await?;
    assert_eq!(report.processed(), 0);
    assert!(!h.tenanto.reporter().summary().await?.any_pending);

    Ok(())
}

pub async fn test_fleet_skips_inconsistent(h: &Harness) -> anyhow::Result<()> {
    let store = h.tenanto.store();
    let tenants = h.provision_many("drift", 3).await?;
    let drifted = &tenants[1];
    let database = h.database(drifted)?;

    // a hand-applied hotfix recorded the newest version ahead of its predecessor
    database
        .force_record(&Version {
            id: LABELS.to_owned(),
            description: "tenant labels".to_owned(),
        })
        .await;
    let before = database.statements().await;

    let report = h
        .tenanto
        .coordinator()
        .start(FleetRequest::new().publish(with_labels()?))
        .await?
        .wait()
        .await?;

    assert_eq!(report.succeeded, 2);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].tenant_id, drifted.id);
    assert!(report.failed[0].reason.contains("inconsistent"));

    assert_eq!(database.statements().await, before);

    for tenant in &tenants {
        let last = store
            .latest_run(RunScope::Tenant(tenant.id))
            .await?
            .ok_or_else(|| anyhow!("no runs"))?;

        if tenant.id == drifted.id {
            assert_eq!(last.outcome, RunOutcome::Failed);
            assert_eq!(last.version, TAGS);
        } else {
            assert_eq!(last.outcome, RunOutcome::Success);
            assert_eq!(last.version, LABELS);
            assert_eq!(h.applied(tenant).await?.len(), 5);
        }
    }

    let summary = h.tenanto.reporter().summary().await?;
    let status = summary
        .tenants
        .iter()
        .find(|status| status.scope == RunScope::Tenant(drifted.id))
        .ok_or_else(|| anyhow!("drifted tenant missing from summary"))?;

    assert!(matches!(status.consistency, Consistency::Inconsistent(_)));
    assert!(status.reachable);
    assert_eq!(status.pending, vec![TAGS.to_owned()]);
    assert!(status.last_error.is_some());
    assert_eq!(summary.total_pending, 1);
    assert!(summary
        .tenants
        .iter()
        .filter(|status| status.scope != RunScope::Tenant(drifted.id))
        .all(|status| status.consistency == Consistency::Consistent));

    Ok(())
}

pub async fn test_statement_timeout(h: &Harness) -> anyhow::Result<()> {
    let tenants = h.provision_many("slow", 3).await?;
    let slow = &tenants[0];
    h.database(slow)?
        .slow_statements_containing("tenant_tag", Duration::from_secs(30));

    let report = h
        .tenanto
        .coordinator()
        .start(FleetRequest::new().publish(with_tags()?))
        .await?
        .wait()
        .await?;

    assert_eq!(report.succeeded, 2);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].tenant_id, slow.id);
    assert!(report.failed[0].reason.contains("statement timeout"));
    assert_eq!(h.applied(slow).await?, tenant_versions());

    let last = h
        .tenanto
        .store()
        .latest_run(RunScope::Tenant(slow.id))
        .await?
        .ok_or_else(|| anyhow!("no runs"))?;
    assert_eq!(last.outcome, RunOutcome::Failed);
    assert_eq!(last.version, TAGS);

    Ok(())
}

pub async fn test_preview(h: &Harness) -> anyhow::Result<()> {
    let tenants = h.provision_many("preview", 2).await?;
    let reporter = h.tenanto.reporter();

    assert!(reporter.preview(tenants[0].id, None).await?.is_empty());
    assert!(reporter.preview_master(None).await?.is_empty());

    h.tenanto.catalog().publish(with_labels()?)?;
    let before = h.database(&tenants[0])?.statements().await;

    let preview = reporter.preview(tenants[0].id, None).await?;
    assert_eq!(
        preview
            .iter()
            .map(|p| p.version.id.as_str())
            .collect::<Vec<_>>(),
        vec![TAGS, LABELS]
    );
    assert!(preview[0].statements[0].contains("tenant_tag"));

    let preview = reporter.preview(tenants[0].id, Some(TAGS)).await?;
    assert_eq!(preview.len(), 1);

    assert_eq!(h.database(&tenants[0])?.statements().await, before);
    assert_eq!(h.applied(&tenants[0]).await?, tenant_versions());
    assert_eq!(reporter.tenant_status(tenants[0].id).await?.pending.len(), 2);

    assert!(matches!(
        reporter.preview(Uuid::new_v4(), None).await,
        Err(ProvisionError::NotFound(_))
    ));
    assert!(matches!(
        reporter.preview(tenants[1].id, Some("20990101000000_nope")).await,
        Err(ProvisionError::Migrate(MigrateError::UnknownVersion(_)))
    ));

    Ok(())
}
