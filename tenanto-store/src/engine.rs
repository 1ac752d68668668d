use async_trait::async_trait;
use dyn_clone::DynClone;
use tenanto_query::{CursorType, QueryResult};
use uuid::Uuid;

use crate::{
    error::Result,
    run::{RunRecord, RunScope},
    subscription::Subscription,
    tenant::{TenantChange, TenantFilter, TenantRecord, TenantState},
};

#[cfg(feature = "memory")]
mod memory;
#[cfg(feature = "pg")]
mod pg;

#[cfg(feature = "memory")]
pub use memory::*;
#[cfg(feature = "pg")]
pub use pg::*;

#[async_trait]
pub trait Engine: DynClone + Send + Sync {
    /// Fails with `DuplicateRoutingCode` when the code is taken, atomically with the insert.
    async fn insert(&self, tenant: TenantRecord) -> Result<TenantRecord>;

    async fn get(&self, id: Uuid) -> Result<Option<TenantRecord>>;

    async fn get_by_code(&self, routing_code: &'_ str) -> Result<Option<TenantRecord>>;

    /// Applies `change` only while the stored state equals `expected` (any state when `None`).
    ///
    /// Returns `NotFound` for an unknown id and `UnexpectedState` when the guard fails.
    async fn update(
        &self,
        id: Uuid,
        expected: Option<TenantState>,
        change: TenantChange,
    ) -> Result<TenantRecord>;

    async fn list(
        &self,
        filter: &TenantFilter,
        first: u16,
        after: Option<CursorType>,
    ) -> Result<QueryResult<TenantRecord>>;

    /// Keeps the existing row when the tenant already has a subscription.
    async fn upsert_subscription(&self, subscription: Subscription) -> Result<Subscription>;

    async fn get_subscription(&self, tenant_id: Uuid) -> Result<Option<Subscription>>;

    async fn append_run(&self, runs: Vec<RunRecord>) -> Result<()>;

    /// Runs of one scope, oldest first. Every scope when `None`.
    async fn read_runs(&self, scope: Option<RunScope>) -> Result<Vec<RunRecord>>;

    async fn latest_run(&self, scope: RunScope) -> Result<Option<RunRecord>>;
}

dyn_clone::clone_trait_object!(Engine);
