use chrono::{DateTime, Utc};
use futures_util::{StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tenanto_migrator::{
    Connector, Consistency, Database, MigrateError, MigrationHistory, MigrationPreview,
    MigrationStatus, Migrator,
};
use tenanto_store::{
    RunOutcome, RunRecord, RunScope, Store, StoreError, TenantFilter, TenantRecord, TenantState,
};
use tracing::debug;
use uuid::Uuid;

use crate::{
    catalog::Catalog,
    config::{ReportConfig, ReportScope},
    error::ProvisionError,
    run_log,
};

/// Migration status of one database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetStatus {
    pub scope: RunScope,
    pub database: String,
    pub applied: Vec<String>,
    /// Known versions not applied yet. Taken from the run log when the database is unreachable.
    pub pending: Vec<String>,
    pub consistency: Consistency,
    pub reachable: bool,
    /// Error of the latest run log entry, when that entry failed.
    pub last_error: Option<String>,
}

impl TargetStatus {
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusSummary {
    pub master: TargetStatus,
    pub tenants: Vec<TargetStatus>,
    pub per_tenant_pending: HashMap<Uuid, usize>,
    /// Sum of the tenants' pending counts.
    pub total_pending: usize,
    /// Whether the master or any inspected tenant has something pending.
    pub any_pending: bool,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantHistory {
    pub tenant_id: Uuid,
    /// `None` when the tenant database could not be read.
    pub applied: Option<MigrationHistory>,
    pub runs: Vec<RunRecord>,
}

/// Read-only view over the migration state of the master and tenant databases.
#[derive(Clone)]
pub struct Reporter {
    store: Store,
    master: Box<dyn Database>,
    connector: Box<dyn Connector>,
    catalog: Catalog,
    config: ReportConfig,
    workers: usize,
    page_size: u16,
}

impl Reporter {
    pub fn new(
        store: Store,
        master: Box<dyn Database>,
        connector: Box<dyn Connector>,
        catalog: Catalog,
        config: ReportConfig,
        workers: usize,
        page_size: u16,
    ) -> Self {
        Self {
            store,
            master,
            connector,
            catalog,
            config,
            workers: workers.max(1),
            page_size,
        }
    }

    pub async fn summary(&self) -> Result<StatusSummary, StoreError> {
        let master = self
            .status_of(
                RunScope::Master,
                Ok(self.master.clone()),
                self.catalog.master(),
            )
            .await?;

        let limit = match self.config.scope {
            ReportScope::Full => usize::MAX,
            ReportScope::Sample(n) => n,
        };

        let migrator = self.catalog.tenant();
        let tenants = self
            .store
            .stream_all(TenantFilter::state(TenantState::Active), self.page_size)
            .take(limit)
            .map_ok(|tenant| self.tenant_status_with(tenant, &migrator))
            .try_buffered(self.workers)
            .try_collect::<Vec<_>>()
            .await?;

        let per_tenant_pending = tenants
            .iter()
            .filter_map(|status| match status.scope {
                RunScope::Tenant(id) => Some((id, status.pending_count())),
                RunScope::Master => None,
            })
            .collect::<HashMap<_, _>>();

        let total_pending = per_tenant_pending.values().sum::<usize>();
        let any_pending = total_pending > 0 || !master.pending.is_empty();

        debug!(
            tenants = tenants.len(),
            total_pending, any_pending, "status summary computed"
        );

        Ok(StatusSummary {
            master,
            tenants,
            per_tenant_pending,
            total_pending,
            any_pending,
            generated_at: Utc::now(),
        })
    }

    pub async fn tenant_status(&self, tenant_id: Uuid) -> Result<TargetStatus, ProvisionError> {
        let tenant = self.find(tenant_id).await?;

        Ok(self
            .tenant_status_with(tenant, &self.catalog.tenant())
            .await?)
    }

    pub async fn history(&self, tenant_id: Uuid) -> Result<TenantHistory, ProvisionError> {
        let tenant = self.find(tenant_id).await?;
        let migrator = self.catalog.tenant();

        let applied = match self.connector.connect(&tenant.connection).await {
            Ok(database) => migrator.history(database.as_ref()).await.ok(),
            Err(_) => None,
        };

        let runs = self.store.runs_of(RunScope::Tenant(tenant_id)).await?;

        Ok(TenantHistory {
            tenant_id,
            applied,
            runs,
        })
    }

    /// Sql the next rollout would run on the tenant's database, up to `target`.
    pub async fn preview(
        &self,
        tenant_id: Uuid,
        target: Option<&str>,
    ) -> Result<Vec<MigrationPreview>, ProvisionError> {
        let tenant = self.find(tenant_id).await?;
        let database = self.connector.connect(&tenant.connection).await?;

        Ok(self
            .catalog
            .tenant()
            .preview(database.as_ref(), target)
            .await?)
    }

    pub async fn preview_master(
        &self,
        target: Option<&str>,
    ) -> Result<Vec<MigrationPreview>, MigrateError> {
        self.catalog
            .master()
            .preview(self.master.as_ref(), target)
            .await
    }

    async fn find(&self, tenant_id: Uuid) -> Result<TenantRecord, ProvisionError> {
        match self.store.find(tenant_id).await {
            Ok(tenant) => Ok(tenant),
            Err(StoreError::NotFound(_)) => Err(ProvisionError::NotFound(tenant_id)),
            Err(e) => Err(e.into()),
        }
    }

    async fn tenant_status_with(
        &self,
        tenant: TenantRecord,
        migrator: &Migrator,
    ) -> Result<TargetStatus, StoreError> {
        let database = self.connector.connect(&tenant.connection).await;

        self.status_of(RunScope::Tenant(tenant.id), database, migrator)
            .await
    }

    async fn status_of(
        &self,
        scope: RunScope,
        database: Result<Box<dyn Database>, MigrateError>,
        migrator: &Migrator,
    ) -> Result<TargetStatus, StoreError> {
        let last_error = self
            .store
            .latest_run(scope)
            .await?
            .filter(|run| run.outcome == RunOutcome::Failed)
            .and_then(|run| run.error);

        let (name, status) = match database {
            Ok(database) => (
                database.name().to_owned(),
                migrator.status(database.as_ref()).await,
            ),
            Err(e) => (scope.to_string(), Err(e)),
        };

        let status = match status {
            Ok(status) => status,
            Err(e) => {
                debug!(%scope, error = %e, "database unreachable, using run log");

                return Ok(TargetStatus {
                    scope,
                    database: name,
                    applied: Vec::new(),
                    pending: run_log::pending_from_log(&self.store, scope, migrator.migrations())
                        .await?,
                    consistency: Consistency::Consistent,
                    reachable: false,
                    last_error: last_error.or_else(|| Some(e.to_string())),
                });
            }
        };

        Ok(target_status(scope, status, migrator, last_error))
    }
}

fn target_status(
    scope: RunScope,
    status: MigrationStatus,
    migrator: &Migrator,
    last_error: Option<String>,
) -> TargetStatus {
    let pending = match &status.consistency {
        Consistency::Consistent => status.pending.into_iter().map(|v| v.id).collect(),
        Consistency::Inconsistent(_) => {
            let applied = status.applied.iter().collect::<HashSet<_>>();

            migrator
                .migrations()
                .versions()
                .into_iter()
                .filter(|version| !applied.contains(&version.id))
                .map(|version| version.id)
                .collect()
        }
    };

    TargetStatus {
        scope,
        database: status.database,
        applied: status.applied,
        pending,
        consistency: status.consistency,
        reachable: true,
        last_error,
    }
}
