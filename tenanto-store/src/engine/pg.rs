use async_trait::async_trait;
use sqlx::{postgres::PgRow, FromRow, PgPool, Row};
use std::str::FromStr;
use tenanto_query::{CursorType, PgQuery, QueryResult};
use uuid::Uuid;

use crate::{
    engine::Engine,
    error::{Result, StoreError},
    run::{RunRecord, RunScope},
    store::Store,
    subscription::Subscription,
    tenant::{
        ConnectionDescriptor, StageFailure, TenantChange, TenantFilter, TenantRecord, TenantState,
    },
};

const UNIQUE_VIOLATION: &str = "23505";

/// Registry stored in the master Postgres database.
///
/// Tables are created by the master migrations, see [`crate::schema`].
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[allow(clippy::new_ret_no_self)]
    pub fn new(pool: &PgPool) -> Store {
        Store::new(Self { pool: pool.clone() })
    }
}

fn parse<T: FromStr>(field: &'static str, value: String) -> std::result::Result<T, sqlx::Error> {
    value.parse::<T>().map_err(|_| sqlx::Error::ColumnDecode {
        index: field.to_owned(),
        source: Box::new(StoreError::InvalidValue { field, value }),
    })
}

impl<'r> FromRow<'r, PgRow> for TenantRecord {
    fn from_row(row: &'r PgRow) -> std::result::Result<Self, sqlx::Error> {
        let failed_stage: Option<String> = row.try_get("failed_stage")?;
        let failure = match failed_stage {
            Some(stage) => Some(StageFailure {
                stage: parse("failed_stage", stage)?,
                reason: row.try_get::<Option<String>, _>("last_error")?.unwrap_or_default(),
                failed_at: row.try_get("failed_at")?,
            }),
            None => None,
        };

        Ok(TenantRecord {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            routing_code: row.try_get("routing_code")?,
            primary_domain: row.try_get("primary_domain")?,
            contact_email: row.try_get("contact_email")?,
            package_id: row.try_get("package_id")?,
            connection: ConnectionDescriptor {
                host: row.try_get("db_host")?,
                port: u16::try_from(row.try_get::<i32, _>("db_port")?).map_err(|e| {
                    sqlx::Error::ColumnDecode {
                        index: "db_port".to_owned(),
                        source: Box::new(e),
                    }
                })?,
                database: row.try_get("db_name")?,
                credentials_ref: row.try_get("credentials_ref")?,
            },
            state: parse("state", row.try_get("state")?)?,
            stage: parse("stage", row.try_get("stage")?)?,
            failure,
            revision: row.try_get("revision")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl<'r> FromRow<'r, PgRow> for Subscription {
    fn from_row(row: &'r PgRow) -> std::result::Result<Self, sqlx::Error> {
        Ok(Subscription {
            id: row.try_get("id")?,
            tenant_id: row.try_get("tenant_id")?,
            package_id: row.try_get("package_id")?,
            status: parse("status", row.try_get("status")?)?,
            started_at: row.try_get("started_at")?,
            trial_ends_at: row.try_get("trial_ends_at")?,
        })
    }
}

impl<'r> FromRow<'r, PgRow> for RunRecord {
    fn from_row(row: &'r PgRow) -> std::result::Result<Self, sqlx::Error> {
        Ok(RunRecord {
            id: row.try_get("id")?,
            run_id: row.try_get("run_id")?,
            scope: parse("scope", row.try_get("scope")?)?,
            version: row.try_get("version")?,
            outcome: parse("outcome", row.try_get("outcome")?)?,
            error: row.try_get("error")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[async_trait]
impl Engine for PgStore {
    async fn insert(&self, tenant: TenantRecord) -> Result<TenantRecord> {
        let res = sqlx::query(
            r#"
            INSERT INTO tenant (
                id, name, routing_code, primary_domain, contact_email, package_id,
                db_host, db_port, db_name, credentials_ref,
                state, stage, revision, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
        )
        .bind(tenant.id)
        .bind(&tenant.name)
        .bind(&tenant.routing_code)
        .bind(&tenant.primary_domain)
        .bind(&tenant.contact_email)
        .bind(&tenant.package_id)
        .bind(&tenant.connection.host)
        .bind(i32::from(tenant.connection.port))
        .bind(&tenant.connection.database)
        .bind(&tenant.connection.credentials_ref)
        .bind(tenant.state.to_string())
        .bind(tenant.stage.to_string())
        .bind(tenant.revision)
        .bind(tenant.created_at)
        .bind(tenant.updated_at)
        .execute(&self.pool)
        .await;

        match res {
            Ok(_) => Ok(tenant),
            Err(sqlx::Error::Database(e)) if e.code().as_deref() == Some(UNIQUE_VIOLATION) => {
                Err(StoreError::DuplicateRoutingCode(tenant.routing_code))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get(&self, id: Uuid) -> Result<Option<TenantRecord>> {
        let tenant = sqlx::query_as::<_, TenantRecord>("SELECT * FROM tenant WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(tenant)
    }

    async fn get_by_code(&self, routing_code: &'_ str) -> Result<Option<TenantRecord>> {
        let tenant =
            sqlx::query_as::<_, TenantRecord>("SELECT * FROM tenant WHERE routing_code = $1")
                .bind(routing_code)
                .fetch_optional(&self.pool)
                .await?;

        Ok(tenant)
    }

    async fn update(
        &self,
        id: Uuid,
        expected: Option<TenantState>,
        change: TenantChange,
    ) -> Result<TenantRecord> {
        let (set_failure, failed_stage, last_error, failed_at) = match &change.failure {
            Some(Some(failure)) => (
                true,
                Some(failure.stage.to_string()),
                Some(failure.reason.to_owned()),
                Some(failure.failed_at),
            ),
            Some(None) => (true, None, None, None),
            None => (false, None, None, None),
        };

        let earlier = match change.stage {
            Some(stage) if change.forward_only => Some(
                stage
                    .earlier()
                    .into_iter()
                    .map(|stage| stage.to_string())
                    .collect::<Vec<_>>(),
            ),
            _ => None,
        };

        let updated = sqlx::query_as::<_, TenantRecord>(
            r#"
            UPDATE tenant SET
                state = COALESCE($3, state),
                stage = COALESCE($4, stage),
                failed_stage = CASE WHEN $5 THEN $6 ELSE failed_stage END,
                last_error = CASE WHEN $5 THEN $7 ELSE last_error END,
                failed_at = CASE WHEN $5 THEN $8 ELSE failed_at END,
                revision = revision + 1,
                updated_at = now()
            WHERE id = $1 AND ($2::varchar IS NULL OR state = $2)
                AND ($9::varchar[] IS NULL OR stage = ANY($9))
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(expected.map(|state| state.to_string()))
        .bind(change.state.map(|state| state.to_string()))
        .bind(change.stage.map(|stage| stage.to_string()))
        .bind(set_failure)
        .bind(failed_stage)
        .bind(last_error)
        .bind(failed_at)
        .bind(earlier)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(tenant) = updated {
            return Ok(tenant);
        }

        let Some(tenant) = self.get(id).await? else {
            return Err(StoreError::NotFound(id.to_string()));
        };

        match (expected, change.stage) {
            (Some(expected), _) if tenant.state != expected => Err(StoreError::UnexpectedState {
                id,
                expected,
                actual: tenant.state,
            }),
            (_, Some(requested)) if change.forward_only => Err(StoreError::StageRegression {
                id,
                current: tenant.stage,
                requested,
            }),
            _ => Err(StoreError::NotFound(id.to_string())),
        }
    }

    async fn list(
        &self,
        filter: &TenantFilter,
        first: u16,
        after: Option<CursorType>,
    ) -> Result<QueryResult<TenantRecord>> {
        let query = if filter.states.is_empty() {
            PgQuery::<TenantRecord>::new("SELECT * FROM tenant")
        } else {
            PgQuery::<TenantRecord>::new("SELECT * FROM tenant WHERE state = ANY($1)").bind(
                filter
                    .states
                    .iter()
                    .map(|state| state.to_string())
                    .collect::<Vec<_>>(),
            )
        };

        let tenants = query.forward(first, after).fetch_all(&self.pool).await?;

        Ok(tenants)
    }

    async fn upsert_subscription(&self, subscription: Subscription) -> Result<Subscription> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO tenant_subscription (id, tenant_id, package_id, status, started_at, trial_ends_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (tenant_id) DO NOTHING
            "#,
        )
        .bind(subscription.id)
        .bind(subscription.tenant_id)
        .bind(&subscription.package_id)
        .bind(subscription.status.to_string())
        .bind(subscription.started_at)
        .bind(subscription.trial_ends_at)
        .execute(&mut *tx)
        .await?;

        let subscription = sqlx::query_as::<_, Subscription>(
            "SELECT * FROM tenant_subscription WHERE tenant_id = $1",
        )
        .bind(subscription.tenant_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(subscription)
    }

    async fn get_subscription(&self, tenant_id: Uuid) -> Result<Option<Subscription>> {
        let subscription = sqlx::query_as::<_, Subscription>(
            "SELECT * FROM tenant_subscription WHERE tenant_id = $1",
        )
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(subscription)
    }

    async fn append_run(&self, runs: Vec<RunRecord>) -> Result<()> {
        if runs.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;

        for runs in runs.chunks(100) {
            let mut query_builder = sqlx::QueryBuilder::<sqlx::Postgres>::new(
                "INSERT INTO migration_run (id, run_id, scope, version, outcome, error, created_at) ",
            );

            query_builder.push_values(runs, |mut b, run| {
                b.push_bind(run.id)
                    .push_bind(run.run_id)
                    .push_bind(run.scope.to_string())
                    .push_bind(run.version.to_owned())
                    .push_bind(run.outcome.to_string())
                    .push_bind(run.error.clone())
                    .push_bind(run.created_at);
            });

            query_builder.build().execute(&mut *tx).await?;
        }

        tx.commit().await?;

        Ok(())
    }

    async fn read_runs(&self, scope: Option<RunScope>) -> Result<Vec<RunRecord>> {
        let runs = match scope {
            Some(scope) => {
                sqlx::query_as::<_, RunRecord>(
                    "SELECT * FROM migration_run WHERE scope = $1 ORDER BY created_at ASC, id ASC",
                )
                .bind(scope.to_string())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, RunRecord>(
                    "SELECT * FROM migration_run ORDER BY created_at ASC, id ASC",
                )
                .fetch_all(&self.pool)
                .await?
            }
        };

        Ok(runs)
    }

    async fn latest_run(&self, scope: RunScope) -> Result<Option<RunRecord>> {
        Ok(sqlx::query_as::<_, RunRecord>(
            "SELECT * FROM migration_run WHERE scope = $1 ORDER BY created_at DESC, id DESC LIMIT 1",
        )
        .bind(scope.to_string())
        .fetch_optional(&self.pool)
        .await?)
    }
}
