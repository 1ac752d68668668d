use futures_util::{stream, Stream, TryStreamExt};
use std::collections::{HashMap, HashSet};
use tenanto_query::{CursorType, QueryResult};
use tracing::debug;
use uuid::Uuid;

use crate::{
    engine::Engine,
    error::{Result, StoreError},
    run::{RunOutcome, RunRecord, RunScope},
    subscription::Subscription,
    tenant::{NewTenant, ProvisioningStage, TenantChange, TenantFilter, TenantRecord, TenantState},
};

/// Registry of tenants, their subscription and the migration run log.
#[derive(Clone)]
pub struct Store {
    pub(crate) engine: Box<dyn Engine>,
}

impl Store {
    pub fn new<E: Engine + 'static>(engine: E) -> Self {
        Self {
            engine: Box::new(engine),
        }
    }

    /// Inserts a tenant in `Provisioning`; the routing code must be free.
    pub async fn register(&self, tenant: NewTenant) -> Result<TenantRecord> {
        let tenant = self.engine.insert(tenant.into_record()).await?;

        debug!(tenant_id = %tenant.id, routing_code = %tenant.routing_code, "tenant registered");

        Ok(tenant)
    }

    pub async fn find(&self, id: Uuid) -> Result<TenantRecord> {
        self.engine
            .get(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    pub async fn find_by_routing_key(&self, routing_code: &'_ str) -> Result<TenantRecord> {
        self.engine
            .get_by_code(routing_code)
            .await?
            .ok_or_else(|| StoreError::NotFound(routing_code.to_owned()))
    }

    /// Unconditional state write.
    pub async fn set_state(&self, id: Uuid, state: TenantState) -> Result<TenantRecord> {
        self.engine
            .update(id, None, TenantChange::state(state))
            .await
    }

    /// Compare-and-swap of the lifecycle state.
    pub async fn transition(
        &self,
        id: Uuid,
        from: TenantState,
        to: TenantState,
    ) -> Result<TenantRecord> {
        let tenant = self
            .engine
            .update(id, Some(from), TenantChange::state(to))
            .await?;

        debug!(tenant_id = %id, %from, %to, "tenant state changed");

        Ok(tenant)
    }

    /// Arbitrary guarded change, used by the provisioner to move several columns at once.
    pub async fn update(
        &self,
        id: Uuid,
        expected: TenantState,
        change: TenantChange,
    ) -> Result<TenantRecord> {
        self.engine.update(id, Some(expected), change).await
    }

    /// Checkpoints provisioning progress of a tenant still in `Provisioning`.
    ///
    /// The stage only moves forward; recording a stage the tenant already reached returns
    /// `StageRegression`.
    pub async fn record_stage(&self, id: Uuid, stage: ProvisioningStage) -> Result<TenantRecord> {
        self.engine
            .update(
                id,
                Some(TenantState::Provisioning),
                TenantChange::default().advance(stage),
            )
            .await
    }

    /// Moves a `Provisioning` tenant to `Failed`, keeping the stage it reached.
    pub async fn record_failure(
        &self,
        id: Uuid,
        stage: ProvisioningStage,
        reason: impl Into<String>,
    ) -> Result<TenantRecord> {
        self.engine
            .update(
                id,
                Some(TenantState::Provisioning),
                TenantChange::state(TenantState::Failed).failed(stage, reason),
            )
            .await
    }

    pub async fn list_all(
        &self,
        filter: &TenantFilter,
        first: u16,
        after: Option<CursorType>,
    ) -> Result<QueryResult<TenantRecord>> {
        self.engine.list(filter, first, after).await
    }

    /// Lazily pages through the registry, fetching `page_size` tenants at a time.
    pub fn stream_all(
        &self,
        filter: TenantFilter,
        page_size: u16,
    ) -> impl Stream<Item = Result<TenantRecord>> + Send + '_ {
        stream::try_unfold(
            (Some(None::<CursorType>), filter),
            move |(after, filter)| async move {
                let Some(after) = after else {
                    return Ok(None);
                };

                let page = self.engine.list(&filter, page_size, after).await?;
                let next = page
                    .page_info
                    .has_next_page
                    .then(|| page.page_info.end_cursor.clone());

                Ok::<_, StoreError>(Some((
                    stream::iter(page.into_nodes().into_iter().map(Ok::<_, StoreError>)),
                    (next, filter),
                )))
            },
        )
        .try_flatten()
    }

    /// Opens the tenant's subscription; a second call returns the existing one.
    pub async fn activate_subscription(&self, subscription: Subscription) -> Result<Subscription> {
        self.engine.upsert_subscription(subscription).await
    }

    pub async fn subscription(&self, tenant_id: Uuid) -> Result<Option<Subscription>> {
        self.engine.get_subscription(tenant_id).await
    }

    pub async fn append_run(&self, runs: Vec<RunRecord>) -> Result<()> {
        self.engine.append_run(runs).await
    }

    pub async fn runs_of(&self, scope: RunScope) -> Result<Vec<RunRecord>> {
        self.engine.read_runs(Some(scope)).await
    }

    /// Most recent run of every scope.
    pub async fn latest_runs(&self) -> Result<HashMap<RunScope, RunRecord>> {
        let mut latest = HashMap::new();

        for run in self.engine.read_runs(None).await? {
            latest.insert(run.scope, run);
        }

        Ok(latest)
    }

    pub async fn latest_run(&self, scope: RunScope) -> Result<Option<RunRecord>> {
        self.engine.latest_run(scope).await
    }

    /// Versions the log shows as applied to `scope`, by any run.
    pub async fn completed(&self, scope: RunScope) -> Result<HashSet<String>> {
        Ok(self
            .engine
            .read_runs(Some(scope))
            .await?
            .into_iter()
            .filter(|run| matches!(run.outcome, RunOutcome::Success | RunOutcome::Skipped))
            .map(|run| run.version)
            .collect())
    }

    /// Whether the log shows `version` as applied to `scope`, by this run or an earlier one.
    pub async fn has_completed(&self, scope: RunScope, version: &'_ str) -> Result<bool> {
        Ok(self.completed(scope).await?.contains(version))
    }
}
