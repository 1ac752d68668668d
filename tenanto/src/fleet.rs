use futures_util::TryStreamExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::{pin::pin, sync::Arc};
use tenanto_migrator::{
    Connector, Database, MigrateError, MigrationSet, Migrator, OutcomeStatus,
};
use tenanto_store::{RunScope, Store, StoreError, TenantFilter, TenantRecord, TenantState};
use tokio::{
    sync::Semaphore,
    task::{JoinHandle, JoinSet},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{catalog::Catalog, config::FleetConfig, error::FleetError, run_log};

/// Parameters of a fleet run. Everything is optional.
#[derive(Debug, Clone, Default)]
pub struct FleetRequest {
    /// Published before the run starts; must extend the current tenant set.
    pub migrations: Option<MigrationSet>,
    /// Last version to apply; all known versions when `None`.
    pub target: Option<String>,
    pub workers: Option<usize>,
}

impl FleetRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(mut self, migrations: MigrationSet) -> Self {
        self.migrations = Some(migrations);
        self
    }

    pub fn target(mut self, version: impl Into<String>) -> Self {
        self.target = Some(version.into());
        self
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantFailure {
    pub tenant_id: Uuid,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FleetReport {
    pub run_id: Uuid,
    /// Tenants that had at least one version applied.
    pub succeeded: usize,
    /// Tenants that were already up to date.
    pub skipped: usize,
    pub failed: Vec<TenantFailure>,
    /// Stopped dispatching tenants before reaching the end of the registry.
    pub cancelled: bool,
}

impl FleetReport {
    fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            succeeded: 0,
            skipped: 0,
            failed: Vec::new(),
            cancelled: false,
        }
    }

    pub fn processed(&self) -> usize {
        self.succeeded + self.skipped + self.failed.len()
    }
}

/// Handle of a fleet run executing in the background.
pub struct FleetRun {
    run_id: Uuid,
    token: CancellationToken,
    handle: JoinHandle<Result<FleetReport, FleetError>>,
}

impl FleetRun {
    pub fn id(&self) -> Uuid {
        self.run_id
    }

    /// Stops dispatching tenants. Tenants already being migrated run to commit or rollback.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub async fn wait(self) -> Result<FleetReport, FleetError> {
        self.handle.await?
    }
}

enum TenantOutcome {
    Succeeded,
    Skipped,
    Failed(String),
}

struct RunSlot(Arc<Mutex<Option<Uuid>>>);

impl Drop for RunSlot {
    fn drop(&mut self) {
        *self.0.lock() = None;
    }
}

/// Rolls a schema version out to every active tenant database.
#[derive(Clone)]
pub struct Coordinator {
    store: Store,
    master: Box<dyn Database>,
    connector: Box<dyn Connector>,
    catalog: Catalog,
    config: FleetConfig,
    running: Arc<Mutex<Option<Uuid>>>,
}

impl Coordinator {
    pub fn new(
        store: Store,
        master: Box<dyn Database>,
        connector: Box<dyn Connector>,
        catalog: Catalog,
        config: FleetConfig,
    ) -> Self {
        Self {
            store,
            master,
            connector,
            catalog,
            config,
            running: Arc::default(),
        }
    }

    /// Id of the run in progress, if any.
    pub fn running(&self) -> Option<Uuid> {
        *self.running.lock()
    }

    /// Migrates the master database, then spawns the tenant rollout and returns at once.
    ///
    /// Refuses to start while another run is in progress or when the master database
    /// cannot be brought up to date.
    pub async fn start(&self, request: FleetRequest) -> Result<FleetRun, FleetError> {
        let run_id = Uuid::new_v4();
        let slot = {
            let mut running = self.running.lock();

            if let Some(current) = *running {
                return Err(FleetError::AlreadyRunning(current));
            }

            *running = Some(run_id);
            RunSlot(self.running.clone())
        };

        if let Some(migrations) = request.migrations {
            self.catalog.publish(migrations)?;
        }

        migrate_master(
            &self.store,
            self.master.as_ref(),
            self.catalog.master(),
            run_id,
        )
        .await?;

        let migrator = self.catalog.tenant();

        if let Some(target) = &request.target {
            if migrator.migrations().position(target).is_none() {
                return Err(MigrateError::UnknownVersion(target.to_owned()).into());
            }
        }

        let workers = request.workers.unwrap_or(self.config.workers).max(1);
        let token = CancellationToken::new();
        let rollout = Rollout {
            run_id,
            store: self.store.clone(),
            connector: self.connector.clone(),
            migrator,
            target: request.target,
            page_size: self.config.page_size,
            token: token.clone(),
        };

        info!(%run_id, workers, "fleet run started");

        let handle = tokio::spawn(async move {
            let _slot = slot;
            rollout.run(workers).await
        });

        Ok(FleetRun {
            run_id,
            token,
            handle,
        })
    }
}

/// Brings the master database up to date and logs the outcome under `RunScope::Master`.
pub(crate) async fn migrate_master(
    store: &Store,
    master: &dyn Database,
    migrator: &Migrator,
    run_id: Uuid,
) -> Result<(), FleetError> {
    let outcomes = match migrator.apply_all(master).await {
        Ok(outcomes) => outcomes,
        Err(e) => {
            let reason = e.to_string();
            run_log::record_unreachable(
                store,
                run_id,
                RunScope::Master,
                migrator.migrations(),
                &reason,
            )
            .await?;

            error!(%reason, "master migration failed");

            return Err(FleetError::MasterFailed(reason));
        }
    };

    run_log::record_outcomes(store, run_id, RunScope::Master, &outcomes).await?;

    for outcome in outcomes {
        if let OutcomeStatus::Failed(reason) = outcome.status {
            error!(version = %outcome.version.id, %reason, "master migration failed");

            return Err(FleetError::MasterFailed(format!(
                "{}: {reason}",
                outcome.version.id
            )));
        }
    }

    let pending = migrator.pending(master).await?;
    if !pending.is_empty() {
        return Err(FleetError::MasterPending(pending.len()));
    }

    Ok(())
}

struct Rollout {
    run_id: Uuid,
    store: Store,
    connector: Box<dyn Connector>,
    migrator: Migrator,
    target: Option<String>,
    page_size: u16,
    token: CancellationToken,
}

impl Rollout {
    async fn run(self, workers: usize) -> Result<FleetReport, FleetError> {
        let rollout = Arc::new(self);
        let permits = Arc::new(Semaphore::new(workers));
        let mut tasks = JoinSet::new();
        let mut report = FleetReport::new(rollout.run_id);
        let mut fatal: Option<FleetError> = None;

        {
            let mut tenants = pin!(rollout
                .store
                .stream_all(TenantFilter::state(TenantState::Active), rollout.page_size));

            loop {
                let next = tokio::select! {
                    biased;

                    _ = rollout.token.cancelled() => {
                        report.cancelled = true;
                        break;
                    }
                    next = tenants.try_next() => next,
                };

                let tenant = match next {
                    Ok(Some(tenant)) => tenant,
                    Ok(None) => break,
                    Err(e) => {
                        rollout.token.cancel();
                        fatal = Some(e.into());
                        break;
                    }
                };

                let permit = tokio::select! {
                    biased;

                    _ = rollout.token.cancelled() => {
                        report.cancelled = true;
                        break;
                    }
                    permit = permits.clone().acquire_owned() => permit,
                };

                let Ok(permit) = permit else {
                    break;
                };

                let worker = rollout.clone();
                tasks.spawn(async move {
                    let outcome = worker.migrate(&tenant).await;
                    drop(permit);

                    (tenant.id, outcome)
                });
            }
        }

        while let Some(res) = tasks.join_next().await {
            let (tenant_id, outcome) = res?;

            match outcome {
                Ok(TenantOutcome::Succeeded) => report.succeeded += 1,
                Ok(TenantOutcome::Skipped) => report.skipped += 1,
                Ok(TenantOutcome::Failed(reason)) => {
                    report.failed.push(TenantFailure { tenant_id, reason })
                }
                Err(e) => {
                    if fatal.is_none() {
                        rollout.token.cancel();
                        fatal = Some(e.into());
                    }
                }
            }
        }

        if let Some(e) = fatal {
            error!(run_id = %report.run_id, error = %e, "fleet run aborted");

            return Err(e);
        }

        info!(
            run_id = %report.run_id,
            succeeded = report.succeeded,
            skipped = report.skipped,
            failed = report.failed.len(),
            cancelled = report.cancelled,
            "fleet run finished"
        );

        Ok(report)
    }

    /// Per-tenant failures become run log entries; only registry errors escape.
    async fn migrate(&self, tenant: &TenantRecord) -> Result<TenantOutcome, StoreError> {
        let scope = RunScope::Tenant(tenant.id);
        let res = match self.connector.connect(&tenant.connection).await {
            Ok(database) => {
                self.migrator
                    .apply_to(database.as_ref(), self.target.as_deref())
                    .await
            }
            Err(e) => Err(e),
        };

        let outcomes = match res {
            Ok(outcomes) => outcomes,
            Err(e) => {
                let reason = e.to_string();
                warn!(tenant_id = %tenant.id, %reason, "tenant migration failed");

                run_log::record_unreachable(
                    &self.store,
                    self.run_id,
                    scope,
                    self.migrator.migrations(),
                    &reason,
                )
                .await?;

                return Ok(TenantOutcome::Failed(reason));
            }
        };

        run_log::record_outcomes(&self.store, self.run_id, scope, &outcomes).await?;

        for outcome in &outcomes {
            if let OutcomeStatus::Failed(reason) = &outcome.status {
                return Ok(TenantOutcome::Failed(format!(
                    "{}: {reason}",
                    outcome.version.id
                )));
            }
        }

        if outcomes
            .iter()
            .all(|outcome| outcome.status == OutcomeStatus::Skipped)
        {
            debug!(tenant_id = %tenant.id, "tenant already up to date");

            return Ok(TenantOutcome::Skipped);
        }

        debug!(tenant_id = %tenant.id, "tenant migrated");

        Ok(TenantOutcome::Succeeded)
    }
}
