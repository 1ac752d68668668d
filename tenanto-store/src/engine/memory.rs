use async_trait::async_trait;
use parking_lot::RwLock;
use std::{collections::HashMap, sync::Arc};
use tenanto_query::{paginate, CursorType, QueryArgs, QueryResult};
use uuid::Uuid;

use crate::{
    engine::Engine,
    error::{Result, StoreError},
    run::{RunRecord, RunScope},
    store::Store,
    subscription::Subscription,
    tenant::{TenantChange, TenantFilter, TenantRecord, TenantState},
};

#[derive(Debug, Default)]
struct Data {
    tenants: HashMap<Uuid, TenantRecord>,
    codes: HashMap<String, Uuid>,
    subscriptions: HashMap<Uuid, Subscription>,
    runs: Vec<RunRecord>,
}

/// Registry kept in process memory. Clones share the same data.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore(Arc<RwLock<Data>>);

impl MemoryStore {
    #[allow(clippy::new_ret_no_self)]
    pub fn new() -> Store {
        Store::new(Self::default())
    }
}

#[async_trait]
impl Engine for MemoryStore {
    async fn insert(&self, tenant: TenantRecord) -> Result<TenantRecord> {
        let mut data = self.0.write();

        if data.codes.contains_key(&tenant.routing_code) {
            return Err(StoreError::DuplicateRoutingCode(tenant.routing_code));
        }

        data.codes.insert(tenant.routing_code.to_owned(), tenant.id);
        data.tenants.insert(tenant.id, tenant.clone());

        Ok(tenant)
    }

    async fn get(&self, id: Uuid) -> Result<Option<TenantRecord>> {
        Ok(self.0.read().tenants.get(&id).cloned())
    }

    async fn get_by_code(&self, routing_code: &'_ str) -> Result<Option<TenantRecord>> {
        let data = self.0.read();

        Ok(data
            .codes
            .get(routing_code)
            .and_then(|id| data.tenants.get(id))
            .cloned())
    }

    async fn update(
        &self,
        id: Uuid,
        expected: Option<TenantState>,
        change: TenantChange,
    ) -> Result<TenantRecord> {
        let mut data = self.0.write();
        let tenant = data
            .tenants
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        if let Some(expected) = expected {
            if tenant.state != expected {
                return Err(StoreError::UnexpectedState {
                    id,
                    expected,
                    actual: tenant.state,
                });
            }
        }

        if let (false, Some(requested)) = (change.moves_forward(tenant), change.stage) {
            return Err(StoreError::StageRegression {
                id,
                current: tenant.stage,
                requested,
            });
        }

        change.apply(tenant);

        Ok(tenant.clone())
    }

    async fn list(
        &self,
        filter: &TenantFilter,
        first: u16,
        after: Option<CursorType>,
    ) -> Result<QueryResult<TenantRecord>> {
        let mut tenants = self
            .0
            .read()
            .tenants
            .values()
            .filter(|tenant| filter.matches(tenant))
            .cloned()
            .collect::<Vec<_>>();

        // cursors carry microseconds, like the pg column
        let key = |tenant: &TenantRecord| (tenant.created_at.timestamp_micros(), tenant.id);
        tenants.sort_by_key(key);

        Ok(paginate(tenants, QueryArgs::forward(first, after), key)?)
    }

    async fn upsert_subscription(&self, subscription: Subscription) -> Result<Subscription> {
        let mut data = self.0.write();

        Ok(data
            .subscriptions
            .entry(subscription.tenant_id)
            .or_insert(subscription)
            .clone())
    }

    async fn get_subscription(&self, tenant_id: Uuid) -> Result<Option<Subscription>> {
        Ok(self.0.read().subscriptions.get(&tenant_id).cloned())
    }

    async fn append_run(&self, runs: Vec<RunRecord>) -> Result<()> {
        self.0.write().runs.extend(runs);

        Ok(())
    }

    async fn read_runs(&self, scope: Option<RunScope>) -> Result<Vec<RunRecord>> {
        Ok(self
            .0
            .read()
            .runs
            .iter()
            .filter(|run| scope.map(|scope| run.scope == scope).unwrap_or(true))
            .cloned()
            .collect())
    }

    async fn latest_run(&self, scope: RunScope) -> Result<Option<RunRecord>> {
        Ok(self
            .0
            .read()
            .runs
            .iter()
            .rev()
            .find(|run| run.scope == scope)
            .cloned())
    }
}
