use crate::tenant::{ProvisioningStage, TenantState};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("routing code `{0}` is already registered")]
    DuplicateRoutingCode(String),

    #[error("tenant `{0}` not found")]
    NotFound(String),

    #[error("tenant `{id}` is {actual}, expected {expected}")]
    UnexpectedState {
        id: uuid::Uuid,
        expected: TenantState,
        actual: TenantState,
    },

    #[error("tenant `{id}` already reached {current}, cannot go back to {requested}")]
    StageRegression {
        id: uuid::Uuid,
        current: ProvisioningStage,
        requested: ProvisioningStage,
    },

    #[error("invalid stored value `{value}` for {field}")]
    InvalidValue { field: &'static str, value: String },

    #[cfg(feature = "pg")]
    #[error("sqlx `{0}`")]
    Sqlx(#[from] sqlx::Error),

    #[error("tenanto_query `{0}`")]
    Query(#[from] tenanto_query::QueryError),

    #[error("{0}")]
    Any(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;
