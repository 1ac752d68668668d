use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tenanto_migrator::{Connector, MigrateError, OutcomeStatus};
use tenanto_store::{
    ConnectionDescriptor, NewTenant, ProvisioningStage, RunScope, Store, StoreError,
    Subscription, TenantChange, TenantRecord, TenantState,
};
use tracing::{debug, info, warn};
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::{
    catalog::Catalog,
    config::{Package, ProvisioningConfig},
    error::ProvisionError,
    resolver::Resolver,
    run_log,
    seed::Seeder,
};

const RESERVED_CODES: [&str; 6] = ["www", "api", "admin", "master", "app", "mail"];

fn validate_routing_code(code: &str) -> Result<(), ValidationError> {
    let valid_chars = code
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');

    if !valid_chars || code.starts_with('-') || code.ends_with('-') {
        return Err(ValidationError::new("routing_code_format"));
    }

    if RESERVED_CODES.contains(&code) {
        return Err(ValidationError::new("routing_code_reserved"));
    }

    Ok(())
}

/// What the registration flow hands over to create a tenant.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ProvisionRequest {
    #[validate(length(min = 2, max = 100))]
    pub name: String,

    /// Lowercase letters, digits and inner hyphens.
    #[validate(length(min = 3, max = 50), custom = "validate_routing_code")]
    pub routing_code: String,

    #[validate(email)]
    pub contact_email: String,

    /// Falls back to the configured default package.
    pub package_id: Option<String>,
}

impl ProvisionRequest {
    pub fn new(
        name: impl Into<String>,
        routing_code: impl Into<String>,
        contact_email: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            routing_code: routing_code.into(),
            contact_email: contact_email.into(),
            package_id: None,
        }
    }

    pub fn package(mut self, id: impl Into<String>) -> Self {
        self.package_id = Some(id.into());
        self
    }
}

enum StepError {
    Failed(String),
    Registry(StoreError),
}

impl From<StoreError> for StepError {
    fn from(e: StoreError) -> Self {
        StepError::Registry(e)
    }
}

impl From<MigrateError> for StepError {
    fn from(e: MigrateError) -> Self {
        StepError::Failed(e.to_string())
    }
}

fn map_store_error(tenant_id: Uuid, e: StoreError) -> ProvisionError {
    match e {
        StoreError::NotFound(_) => ProvisionError::NotFound(tenant_id),
        StoreError::UnexpectedState { actual, .. } => ProvisionError::InvalidState {
            tenant_id,
            state: actual,
        },
        e => ProvisionError::Registry(e),
    }
}

/// Drives a tenant from registration to `Active`.
///
/// Each step is guarded or idempotent and the tenant's `stage` is the durable checkpoint,
/// so a failed attempt resumes where it stopped.
#[derive(Clone)]
pub struct Provisioner {
    store: Store,
    connector: Box<dyn Connector>,
    catalog: Catalog,
    resolver: Resolver,
    seeder: Arc<dyn Seeder>,
    config: ProvisioningConfig,
    base_domain: String,
}

impl Provisioner {
    pub fn new(
        store: Store,
        connector: Box<dyn Connector>,
        catalog: Catalog,
        resolver: Resolver,
        seeder: Arc<dyn Seeder>,
        config: ProvisioningConfig,
        base_domain: impl Into<String>,
    ) -> Self {
        Self {
            store,
            connector,
            catalog,
            resolver,
            seeder,
            config,
            base_domain: base_domain.into(),
        }
    }

    pub async fn provision(&self, request: ProvisionRequest) -> Result<TenantRecord, ProvisionError> {
        request.validate()?;

        let package_id = request
            .package_id
            .unwrap_or_else(|| self.config.default_package.to_owned());

        if self.config.package(&package_id).is_none() {
            return Err(ProvisionError::UnknownPackage(package_id));
        }

        let code = request.routing_code;
        let tenant = NewTenant {
            id: Uuid::new_v4(),
            name: request.name,
            primary_domain: format!("{code}.{}", self.base_domain),
            contact_email: request.contact_email,
            package_id,
            connection: ConnectionDescriptor::new(
                &self.config.host,
                self.config.port,
                self.config.database_name(&code),
                &self.config.credentials_ref,
            ),
            routing_code: code,
        };

        let tenant = match self.store.register(tenant).await {
            Ok(tenant) => tenant,
            Err(StoreError::DuplicateRoutingCode(code)) => {
                return Err(ProvisionError::DuplicateIdentity(code))
            }
            Err(e) => return Err(e.into()),
        };

        info!(tenant_id = %tenant.id, routing_code = %tenant.routing_code, "provisioning tenant");

        self.resume(tenant).await
    }

    /// Resumes a `Failed` or interrupted tenant from its last completed stage.
    pub async fn retry(&self, tenant_id: Uuid) -> Result<TenantRecord, ProvisionError> {
        let tenant = self
            .store
            .find(tenant_id)
            .await
            .map_err(|e| map_store_error(tenant_id, e))?;

        let tenant = match tenant.state {
            TenantState::Failed => self
                .store
                .transition(tenant_id, TenantState::Failed, TenantState::Provisioning)
                .await
                .map_err(|e| map_store_error(tenant_id, e))?,
            TenantState::Provisioning => tenant,
            TenantState::Active => return Ok(tenant),
            state => return Err(ProvisionError::InvalidState { tenant_id, state }),
        };

        info!(%tenant_id, stage = %tenant.stage, "retrying provisioning");

        self.resume(tenant).await
    }

    pub async fn suspend(&self, tenant_id: Uuid) -> Result<TenantRecord, ProvisionError> {
        self.change_state(tenant_id, TenantState::Active, TenantState::Suspended)
            .await
    }

    pub async fn reactivate(&self, tenant_id: Uuid) -> Result<TenantRecord, ProvisionError> {
        self.change_state(tenant_id, TenantState::Suspended, TenantState::Active)
            .await
    }

    /// Retires the tenant. The record and its database are kept.
    pub async fn deprovision(&self, tenant_id: Uuid) -> Result<TenantRecord, ProvisionError> {
        let tenant = self
            .store
            .find(tenant_id)
            .await
            .map_err(|e| map_store_error(tenant_id, e))?;

        match tenant.state {
            TenantState::Deprovisioned => Ok(tenant),
            TenantState::Provisioning => Err(ProvisionError::InvalidState {
                tenant_id,
                state: tenant.state,
            }),
            state => {
                self.change_state(tenant_id, state, TenantState::Deprovisioned)
                    .await
            }
        }
    }

    async fn change_state(
        &self,
        tenant_id: Uuid,
        from: TenantState,
        to: TenantState,
    ) -> Result<TenantRecord, ProvisionError> {
        let tenant = self
            .store
            .transition(tenant_id, from, to)
            .await
            .map_err(|e| map_store_error(tenant_id, e))?;

        self.resolver.invalidate(tenant_id);
        info!(%tenant_id, %from, %to, "tenant state changed");

        Ok(tenant)
    }

    async fn resume(&self, mut tenant: TenantRecord) -> Result<TenantRecord, ProvisionError> {
        let package = self
            .config
            .package(&tenant.package_id)
            .cloned()
            .ok_or_else(|| ProvisionError::UnknownPackage(tenant.package_id.to_owned()))?;

        let attempt = Uuid::new_v4();

        while let Some(stage) = tenant.stage.next() {
            let step = match stage {
                ProvisioningStage::Registered => Ok(()),
                ProvisioningStage::DatabaseCreated => self.create_database(&tenant).await,
                ProvisioningStage::SchemaMigrated => self.migrate(&tenant, attempt).await,
                ProvisioningStage::Seeded => self.seed(&tenant, &package).await,
                ProvisioningStage::Active => return self.activate(&tenant, &package).await,
            };

            match step {
                Ok(()) => {
                    tenant = self
                        .store
                        .record_stage(tenant.id, stage)
                        .await
                        .map_err(|e| map_store_error(tenant.id, e))?;

                    debug!(tenant_id = %tenant.id, %stage, "provisioning stage completed");
                }
                Err(StepError::Registry(e)) => return Err(map_store_error(tenant.id, e)),
                Err(StepError::Failed(reason)) => return Err(self.fail(&tenant, stage, reason).await),
            }
        }

        Ok(tenant)
    }

    async fn fail(&self, tenant: &TenantRecord, stage: ProvisioningStage, reason: String) -> ProvisionError {
        warn!(tenant_id = %tenant.id, %stage, %reason, "provisioning failed");

        if let Err(e) = self.store.record_failure(tenant.id, stage, &reason).await {
            return map_store_error(tenant.id, e);
        }

        ProvisionError::StageFailed {
            tenant_id: tenant.id,
            stage,
            reason,
        }
    }

    async fn create_database(&self, tenant: &TenantRecord) -> Result<(), StepError> {
        if self.connector.exists(&tenant.connection).await? {
            debug!(database = %tenant.connection.database, "database already exists");

            return Ok(());
        }

        match self.connector.create(&tenant.connection).await {
            Ok(()) | Err(MigrateError::DatabaseExists(_)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn migrate(&self, tenant: &TenantRecord, attempt: Uuid) -> Result<(), StepError> {
        let migrator = self.catalog.tenant();
        let scope = RunScope::Tenant(tenant.id);

        let res = match self.connector.connect(&tenant.connection).await {
            Ok(database) => migrator.apply_all(database.as_ref()).await,
            Err(e) => Err(e),
        };

        let outcomes = match res {
            Ok(outcomes) => outcomes,
            Err(e) => {
                run_log::record_unreachable(
                    &self.store,
                    attempt,
                    scope,
                    migrator.migrations(),
                    &e.to_string(),
                )
                .await?;

                return Err(e.into());
            }
        };

        run_log::record_outcomes(&self.store, attempt, scope, &outcomes).await?;

        for outcome in outcomes {
            if let OutcomeStatus::Failed(reason) = outcome.status {
                return Err(StepError::Failed(format!("{}: {reason}", outcome.version.id)));
            }
        }

        Ok(())
    }

    async fn seed(&self, tenant: &TenantRecord, package: &Package) -> Result<(), StepError> {
        let database = self.connector.connect(&tenant.connection).await?;
        self.seeder.seed(database.as_ref(), tenant, package).await?;

        Ok(())
    }

    async fn activate(&self, tenant: &TenantRecord, package: &Package) -> Result<TenantRecord, ProvisionError> {
        self.store
            .activate_subscription(Subscription::open(
                tenant.id,
                &package.id,
                package.trial_days,
            ))
            .await?;

        let tenant = self
            .store
            .update(
                tenant.id,
                TenantState::Provisioning,
                TenantChange::state(TenantState::Active)
                    .stage(ProvisioningStage::Active)
                    .clear_failure(),
            )
            .await
            .map_err(|e| map_store_error(tenant.id, e))?;

        self.resolver.invalidate(tenant.id);
        info!(tenant_id = %tenant.id, routing_code = %tenant.routing_code, "tenant active");

        Ok(tenant)
    }
}
