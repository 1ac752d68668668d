use tenanto_migrator::MigrateError;
use tenanto_store::{ProvisioningStage, StoreError, TenantState};
use uuid::Uuid;
use validator::ValidationErrors;

#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    #[error("{0}")]
    Validation(#[from] ValidationErrors),

    #[error("routing code `{0}` is already taken")]
    DuplicateIdentity(String),

    #[error("unknown package `{0}`")]
    UnknownPackage(String),

    #[error("tenant `{0}` not found")]
    NotFound(Uuid),

    /// The tenant is left `Failed` and can be retried.
    #[error("provisioning of `{tenant_id}` failed at {stage}: {reason}")]
    StageFailed {
        tenant_id: Uuid,
        stage: ProvisioningStage,
        reason: String,
    },

    #[error("tenant `{tenant_id}` is {state}")]
    InvalidState { tenant_id: Uuid, state: TenantState },

    #[error("{0}")]
    Migrate(#[from] MigrateError),

    #[error("registry: {0}")]
    Registry(#[from] StoreError),
}

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("no tenant for routing key `{0}`")]
    NotFound(String),

    #[error("tenant `{0}` is suspended")]
    TenantSuspended(Uuid),

    #[error("tenant `{tenant_id}` is not active ({state})")]
    TenantNotActive { tenant_id: Uuid, state: TenantState },

    #[error("registry: {0}")]
    Registry(#[from] StoreError),
}

#[derive(Debug, thiserror::Error)]
pub enum FleetError {
    #[error("fleet run `{0}` is already in progress")]
    AlreadyRunning(Uuid),

    #[error("master database has {0} pending migration(s)")]
    MasterPending(usize),

    #[error("master migration failed: {0}")]
    MasterFailed(String),

    #[error("{0}")]
    Migrate(#[from] MigrateError),

    #[error("registry: {0}")]
    Registry(#[from] StoreError),

    #[error("fleet run aborted: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config: {0}")]
    Config(String),

    #[error(transparent)]
    Provision(#[from] ProvisionError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Fleet(#[from] FleetError),

    #[error(transparent)]
    Migrate(#[from] MigrateError),

    #[error("registry: {0}")]
    Registry(#[from] StoreError),

    #[error("serde_json `{0}`")]
    SerdeJson(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
