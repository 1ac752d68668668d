use parking_lot::RwLock;
use std::{sync::Arc, time::Duration};
use tenanto_migrator::{MigrateError, MigrationSet, Migrator};
use tracing::info;

/// Known migrations of the master database and of every tenant database.
///
/// The tenant set grows when operators publish a new schema version.
#[derive(Clone)]
pub struct Catalog {
    master: Migrator,
    tenant: Arc<RwLock<Migrator>>,
}

impl Catalog {
    pub fn new(master: MigrationSet, tenant: MigrationSet) -> Self {
        Self {
            master: Migrator::new(master),
            tenant: Arc::new(RwLock::new(Migrator::new(tenant))),
        }
    }

    /// Applies `timeout` to every statement of both schemas, including later publications.
    pub fn statement_timeout(self, timeout: Duration) -> Self {
        let tenant = self.tenant.read().clone().statement_timeout(timeout);

        Self {
            master: self.master.statement_timeout(timeout),
            tenant: Arc::new(RwLock::new(tenant)),
        }
    }

    pub fn master(&self) -> &Migrator {
        &self.master
    }

    /// Snapshot of the current tenant migrator.
    pub fn tenant(&self) -> Migrator {
        self.tenant.read().clone()
    }

    /// Replaces the tenant set with one that extends it.
    pub fn publish(&self, migrations: MigrationSet) -> Result<(), MigrateError> {
        let mut tenant = self.tenant.write();
        migrations.ensure_extends(tenant.migrations())?;

        if let Some(latest) = migrations.latest() {
            info!(version = %latest.id, count = migrations.len(), "tenant schema published");
        }

        let next = tenant.with_migrations(migrations);
        *tenant = next;

        Ok(())
    }
}
