#![forbid(unsafe_code)]

mod catalog;
mod error;
mod fleet;
mod provision;
mod report;
mod resolver;
mod routing;
mod run_log;
mod seed;

pub mod config;
pub mod schema;

pub use catalog::*;
pub use error::*;
pub use fleet::*;
pub use provision::*;
pub use report::*;
pub use resolver::*;
pub use routing::*;
pub use seed::*;
pub use tenanto_migrator as migrator;
pub use tenanto_store as store;

use std::sync::Arc;
use tenanto_migrator::{Connector, Database, MigrationSet};
use tenanto_store::Store;
use tracing::info;
use uuid::Uuid;

use crate::config::TenantoConfig;

/// The orchestrator: one registry, one master database and the server hosting tenant databases.
#[derive(Clone)]
pub struct Tenanto {
    store: Store,
    master: Box<dyn Database>,
    config: TenantoConfig,
    catalog: Catalog,
    resolver: Resolver,
    provisioner: Provisioner,
    coordinator: Coordinator,
    reporter: Reporter,
}

impl Tenanto {
    pub fn builder<D, C>(store: Store, master: D, connector: C) -> TenantoBuilder
    where
        D: Database + 'static,
        C: Connector + 'static,
    {
        TenantoBuilder {
            store,
            master: Box::new(master),
            connector: Box::new(connector),
            config: TenantoConfig::default(),
            migrations: None,
            seeder: Arc::new(BaselineSeeder),
        }
    }

    /// Migrates the master database when `auto_apply_master` is set.
    pub async fn bootstrap(&self) -> Result<()> {
        if !self.config.migration.auto_apply_master {
            return Ok(());
        }

        let run_id = Uuid::new_v4();
        fleet::migrate_master(
            &self.store,
            self.master.as_ref(),
            self.catalog.master(),
            run_id,
        )
        .await?;

        info!(%run_id, database = self.master.name(), "master database up to date");

        Ok(())
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn config(&self) -> &TenantoConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    pub fn provisioner(&self) -> &Provisioner {
        &self.provisioner
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    pub fn reporter(&self) -> &Reporter {
        &self.reporter
    }
}

pub struct TenantoBuilder {
    store: Store,
    master: Box<dyn Database>,
    connector: Box<dyn Connector>,
    config: TenantoConfig,
    migrations: Option<(MigrationSet, MigrationSet)>,
    seeder: Arc<dyn Seeder>,
}

impl TenantoBuilder {
    pub fn config(mut self, config: TenantoConfig) -> Self {
        self.config = config;
        self
    }

    /// Replaces the bundled master and tenant schema.
    pub fn migrations(mut self, master: MigrationSet, tenant: MigrationSet) -> Self {
        self.migrations = Some((master, tenant));
        self
    }

    pub fn seeder<S: Seeder + 'static>(mut self, seeder: S) -> Self {
        self.seeder = Arc::new(seeder);
        self
    }

    pub fn build(self) -> Result<Tenanto> {
        self.config.validate()?;

        let (master_set, tenant_set) = self
            .migrations
            .unwrap_or_else(|| (schema::master_migrations(), schema::tenant_migrations()));

        let catalog = Catalog::new(master_set, tenant_set)
            .statement_timeout(self.config.migration.statement_timeout);
        let resolver = Resolver::new(self.store.clone(), self.config.resolver.clone());
        let provisioner = Provisioner::new(
            self.store.clone(),
            self.connector.clone(),
            catalog.clone(),
            resolver.clone(),
            self.seeder,
            self.config.provisioning.clone(),
            &self.config.resolver.base_domain,
        );
        let coordinator = Coordinator::new(
            self.store.clone(),
            self.master.clone(),
            self.connector.clone(),
            catalog.clone(),
            self.config.fleet.clone(),
        );
        let reporter = Reporter::new(
            self.store.clone(),
            self.master.clone(),
            self.connector,
            catalog.clone(),
            self.config.report.clone(),
            self.config.fleet.workers,
            self.config.fleet.page_size,
        );

        Ok(Tenanto {
            store: self.store,
            master: self.master,
            config: self.config,
            catalog,
            resolver,
            provisioner,
            coordinator,
            reporter,
        })
    }
}
