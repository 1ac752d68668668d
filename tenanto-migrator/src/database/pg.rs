use async_trait::async_trait;
use parking_lot::RwLock;
use sqlx::{
    postgres::{PgConnectOptions, PgPoolOptions},
    PgPool, Postgres, Row,
};
use std::{collections::HashMap, sync::Arc, time::Duration};
use tenanto_store::ConnectionDescriptor;
use tracing::debug;

use crate::{
    database::{Connector, Database, Transaction},
    error::{MigrateError, Result},
    migration::{AppliedVersion, Version},
};

const TABLE: &str = "_tenanto_migrations";
const DUPLICATE_DATABASE: &str = "42P04";

fn map_err(database: &str) -> impl Fn(sqlx::Error) -> MigrateError + '_ {
    move |e| match e {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => MigrateError::ConnectionUnavailable(database.to_owned()),
        e => MigrateError::Sqlx(e),
    }
}

/// Postgres database holding its own `_tenanto_migrations` table.
///
/// The table is created by the first transaction; reads never write.
#[derive(Debug, Clone)]
pub struct PgDatabase {
    name: String,
    pool: PgPool,
}

impl PgDatabase {
    pub fn new(name: impl Into<String>, pool: &PgPool) -> Self {
        Self {
            name: name.into(),
            pool: pool.clone(),
        }
    }

    async fn ensure_table<'c, E>(&self, executor: E) -> Result<()>
    where
        E: sqlx::Executor<'c, Database = Postgres>,
    {
        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {TABLE} (
                id VARCHAR(100) PRIMARY KEY,
                description TEXT NOT NULL,
                applied_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#
        ))
        .execute(executor)
        .await
        .map_err(map_err(&self.name))?;

        Ok(())
    }
}

async fn read_applied<'c, E>(database: &str, executor: E) -> Result<Vec<AppliedVersion>>
where
    E: sqlx::Executor<'c, Database = Postgres>,
{
    let rows = sqlx::query(&format!(
        "SELECT id, description, applied_at FROM {TABLE} ORDER BY id ASC"
    ))
    .fetch_all(executor)
    .await
    .map_err(map_err(database))?;

    rows.into_iter()
        .map(|row| {
            Ok(AppliedVersion {
                id: row.try_get("id")?,
                description: row.try_get("description")?,
                applied_at: row.try_get("applied_at")?,
            })
        })
        .collect::<std::result::Result<Vec<_>, sqlx::Error>>()
        .map_err(MigrateError::Sqlx)
}

#[async_trait]
impl Database for PgDatabase {
    fn name(&self) -> &str {
        &self.name
    }

    async fn applied(&self) -> Result<Vec<AppliedVersion>> {
        let exists: bool = sqlx::query_scalar("SELECT to_regclass($1) IS NOT NULL")
            .bind(TABLE)
            .fetch_one(&self.pool)
            .await
            .map_err(map_err(&self.name))?;

        if !exists {
            return Ok(Vec::new());
        }

        read_applied(&self.name, &self.pool).await
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        let mut tx = self.pool.begin().await.map_err(map_err(&self.name))?;

        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(TABLE)
            .execute(&mut *tx)
            .await
            .map_err(map_err(&self.name))?;

        self.ensure_table(&mut *tx).await?;

        Ok(Box::new(PgTransaction {
            name: self.name.to_owned(),
            tx,
        }))
    }
}

struct PgTransaction {
    name: String,
    tx: sqlx::Transaction<'static, Postgres>,
}

#[async_trait]
impl Transaction for PgTransaction {
    async fn applied(&mut self) -> Result<Vec<AppliedVersion>> {
        read_applied(&self.name, &mut *self.tx).await
    }

    async fn statement_timeout(&mut self, timeout: Duration) -> Result<()> {
        sqlx::query(&format!(
            "SET LOCAL statement_timeout = {}",
            timeout.as_millis()
        ))
        .execute(&mut *self.tx)
        .await
        .map_err(map_err(&self.name))?;

        Ok(())
    }

    async fn execute(&mut self, statement: &'_ str) -> Result<()> {
        sqlx::raw_sql(statement)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(e) => MigrateError::Statement(e.to_string()),
                e => map_err(&self.name)(e),
            })?;

        Ok(())
    }

    async fn record(&mut self, version: &'_ Version) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO {TABLE} (id, description, applied_at) VALUES ($1, $2, now())"
        ))
        .bind(&version.id)
        .bind(&version.description)
        .execute(&mut *self.tx)
        .await
        .map_err(map_err(&self.name))?;

        Ok(())
    }

    async fn unrecord(&mut self, version: &'_ str) -> Result<()> {
        sqlx::query(&format!("DELETE FROM {TABLE} WHERE id = $1"))
            .bind(version)
            .execute(&mut *self.tx)
            .await
            .map_err(map_err(&self.name))?;

        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let name = self.name;
        self.tx.commit().await.map_err(map_err(&name))
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        let name = self.name;
        self.tx.rollback().await.map_err(map_err(&name))
    }
}

/// Postgres server hosting the tenant databases.
///
/// Pools are opened lazily, one per tenant database, and reused.
#[derive(Debug, Clone)]
pub struct PgCluster {
    admin: PgPool,
    options: PgConnectOptions,
    credentials: Arc<HashMap<String, (String, String)>>,
    pools: Arc<RwLock<HashMap<String, PgPool>>>,
    max_connections: u32,
    acquire_timeout: Duration,
}

impl PgCluster {
    /// `admin` must be connected to a maintenance database allowed to `CREATE DATABASE`.
    pub fn new(admin: &PgPool, options: PgConnectOptions) -> Self {
        Self {
            admin: admin.clone(),
            options,
            credentials: Arc::default(),
            pools: Arc::default(),
            max_connections: 5,
            acquire_timeout: Duration::from_secs(5),
        }
    }

    /// Login used for descriptors whose `credentials_ref` is `name`.
    pub fn credentials(
        mut self,
        name: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Arc::make_mut(&mut self.credentials)
            .insert(name.into(), (username.into(), password.into()));
        self
    }

    pub fn max_connections(mut self, value: u32) -> Self {
        self.max_connections = value;
        self
    }

    pub fn acquire_timeout(mut self, value: Duration) -> Self {
        self.acquire_timeout = value;
        self
    }

    fn pool(&self, descriptor: &ConnectionDescriptor) -> PgPool {
        if let Some(pool) = self.pools.read().get(&descriptor.database) {
            return pool.clone();
        }

        let mut options = self
            .options
            .clone()
            .host(&descriptor.host)
            .port(descriptor.port)
            .database(&descriptor.database);

        if let Some((username, password)) = self.credentials.get(&descriptor.credentials_ref) {
            options = options.username(username).password(password);
        }

        let pool = PgPoolOptions::new()
            .max_connections(self.max_connections)
            .acquire_timeout(self.acquire_timeout)
            .connect_lazy_with(options);

        self.pools
            .write()
            .entry(descriptor.database.to_owned())
            .or_insert(pool)
            .clone()
    }
}

fn valid_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 63
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

#[async_trait]
impl Connector for PgCluster {
    async fn exists(&self, descriptor: &'_ ConnectionDescriptor) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM pg_database WHERE datname = $1")
            .bind(&descriptor.database)
            .fetch_optional(&self.admin)
            .await
            .map_err(map_err(&descriptor.database))?;

        Ok(row.is_some())
    }

    async fn create(&self, descriptor: &'_ ConnectionDescriptor) -> Result<()> {
        let name = &descriptor.database;

        if !valid_name(name) {
            return Err(MigrateError::Statement(format!(
                "invalid database name `{name}`"
            )));
        }

        let res = sqlx::query(&format!("CREATE DATABASE \"{name}\""))
            .execute(&self.admin)
            .await;

        match res {
            Ok(_) => {
                debug!(database = %name, "database created");
                Ok(())
            }
            Err(sqlx::Error::Database(e)) if e.code().as_deref() == Some(DUPLICATE_DATABASE) => {
                Err(MigrateError::DatabaseExists(name.to_owned()))
            }
            Err(e) => Err(map_err(name)(e)),
        }
    }

    async fn connect(&self, descriptor: &'_ ConnectionDescriptor) -> Result<Box<dyn Database>> {
        Ok(Box::new(PgDatabase::new(
            &descriptor.database,
            &self.pool(descriptor),
        )))
    }
}
