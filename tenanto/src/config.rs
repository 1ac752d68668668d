//! Configuration of the orchestrator.
//!
//! Every section has sensible defaults; an embedding application usually only sets the
//! package catalog and the tenant database host.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Error, Result};

/// Default lifetime of a resolved connection descriptor.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(60);

/// Default upper bound on cached descriptors.
pub const DEFAULT_CACHE_CAPACITY: usize = 10_000;

pub const DEFAULT_BASE_DOMAIN: &str = "stocker.app";

/// Default number of tenants migrated in parallel by a fleet run.
pub const DEFAULT_FLEET_WORKERS: usize = 4;

/// Default registry page size used when walking the fleet.
pub const DEFAULT_PAGE_SIZE: u16 = 100;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TenantoConfig {
    pub resolver: ResolverConfig,
    pub fleet: FleetConfig,
    pub report: ReportConfig,
    pub provisioning: ProvisioningConfig,
    pub migration: MigrationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    pub cache_ttl: Duration,
    pub cache_capacity: usize,
    /// Host suffix stripped from subdomain routing keys.
    pub base_domain: String,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            cache_ttl: DEFAULT_CACHE_TTL,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            base_domain: DEFAULT_BASE_DOMAIN.to_owned(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    pub workers: usize,
    pub page_size: u16,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_FLEET_WORKERS,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

/// Which active tenants the status summary inspects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportScope {
    #[default]
    Full,
    /// The first `n` active tenants in registry order.
    Sample(usize),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    pub scope: ReportScope,
}

/// Subscription package a tenant can start with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Package {
    pub id: String,
    pub name: String,
    pub trial_days: u32,
    /// Modules enabled in the tenant database when it is seeded.
    pub modules: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisioningConfig {
    /// Tenant databases are named `{database_prefix}_{routing code}`.
    pub database_prefix: String,
    pub host: String,
    pub port: u16,
    pub credentials_ref: String,
    pub packages: Vec<Package>,
    pub default_package: String,
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        Self {
            database_prefix: "tenant".to_owned(),
            host: "localhost".to_owned(),
            port: 5432,
            credentials_ref: "default".to_owned(),
            packages: vec![Package {
                id: "starter".to_owned(),
                name: "Starter".to_owned(),
                trial_days: 14,
                modules: vec!["crm".to_owned(), "inventory".to_owned()],
            }],
            default_package: "starter".to_owned(),
        }
    }
}

impl ProvisioningConfig {
    pub fn package(&self, id: &str) -> Option<&Package> {
        self.packages.iter().find(|package| package.id == id)
    }

    pub fn database_name(&self, routing_code: &str) -> String {
        format!("{}_{}", self.database_prefix, routing_code.replace('-', "_"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationConfig {
    /// Migrate the master database from `Tenanto::bootstrap`.
    pub auto_apply_master: bool,
    /// Longest a single migration statement may run before the database cancels it.
    pub statement_timeout: Duration,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            auto_apply_master: true,
            statement_timeout: Duration::from_secs(300),
        }
    }
}

impl TenantoConfig {
    pub fn from_json(value: &str) -> Result<Self> {
        let config: TenantoConfig = serde_json::from_str(value)?;
        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.resolver.cache_capacity == 0 {
            return Err(Error::Config("cache_capacity must be at least 1".into()));
        }

        if self.resolver.cache_ttl.is_zero() {
            return Err(Error::Config("cache_ttl must be positive".into()));
        }

        if self.migration.statement_timeout.is_zero() {
            return Err(Error::Config("statement_timeout must be positive".into()));
        }

        if self.fleet.workers == 0 {
            return Err(Error::Config("fleet workers must be at least 1".into()));
        }

        if self.fleet.page_size == 0 {
            return Err(Error::Config("fleet page_size must be at least 1".into()));
        }

        if let ReportScope::Sample(0) = self.report.scope {
            return Err(Error::Config("report sample must be at least 1".into()));
        }

        if self.provisioning.database_prefix.is_empty() {
            return Err(Error::Config("database_prefix must not be empty".into()));
        }

        if self
            .provisioning
            .package(&self.provisioning.default_package)
            .is_none()
        {
            return Err(Error::Config(format!(
                "default package `{}` is not in the catalog",
                self.provisioning.default_package
            )));
        }

        Ok(())
    }
}

/// Configuration builder starting from the defaults.
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config: TenantoConfig,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.config.resolver.cache_ttl = ttl;
        self
    }

    pub fn cache_capacity(mut self, capacity: usize) -> Self {
        self.config.resolver.cache_capacity = capacity;
        self
    }

    pub fn base_domain(mut self, domain: impl Into<String>) -> Self {
        self.config.resolver.base_domain = domain.into();
        self
    }

    pub fn fleet_workers(mut self, workers: usize) -> Self {
        self.config.fleet.workers = workers;
        self
    }

    pub fn page_size(mut self, size: u16) -> Self {
        self.config.fleet.page_size = size;
        self
    }

    pub fn report_scope(mut self, scope: ReportScope) -> Self {
        self.config.report.scope = scope;
        self
    }

    pub fn database_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.provisioning.database_prefix = prefix.into();
        self
    }

    pub fn database_host(mut self, host: impl Into<String>, port: u16) -> Self {
        self.config.provisioning.host = host.into();
        self.config.provisioning.port = port;
        self
    }

    pub fn credentials_ref(mut self, name: impl Into<String>) -> Self {
        self.config.provisioning.credentials_ref = name.into();
        self
    }

    /// Adds a package, replacing one with the same id.
    pub fn package(mut self, package: Package) -> Self {
        let packages = &mut self.config.provisioning.packages;
        packages.retain(|p| p.id != package.id);
        packages.push(package);
        self
    }

    pub fn default_package(mut self, id: impl Into<String>) -> Self {
        self.config.provisioning.default_package = id.into();
        self
    }

    pub fn auto_apply_master(mut self, value: bool) -> Self {
        self.config.migration.auto_apply_master = value;
        self
    }

    pub fn statement_timeout(mut self, timeout: Duration) -> Self {
        self.config.migration.statement_timeout = timeout;
        self
    }

    pub fn build(self) -> Result<TenantoConfig> {
        self.config.validate()?;

        Ok(self.config)
    }
}
