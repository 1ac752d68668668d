use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tenanto_store::ConnectionDescriptor;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::{
    database::{Connector, Database, Transaction},
    error::{MigrateError, Result},
    migration::{AppliedVersion, Version},
};

#[derive(Debug, Default)]
struct DbState {
    statements: Vec<String>,
    applied: Vec<AppliedVersion>,
}

/// Database simulated in memory: statements are only recorded, never interpreted.
#[derive(Debug, Clone)]
pub struct MemoryDatabase {
    name: String,
    state: Arc<Mutex<DbState>>,
    reachable: Arc<AtomicBool>,
    failures: Arc<RwLock<Vec<String>>>,
    slow: Arc<RwLock<Vec<(String, Duration)>>>,
}

impl MemoryDatabase {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Arc::default(),
            reachable: Arc::new(AtomicBool::new(true)),
            failures: Arc::default(),
            slow: Arc::default(),
        }
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn is_reachable(&self) -> bool {
        self.reachable.load(Ordering::SeqCst)
    }

    /// Every later statement containing `pattern` fails.
    pub fn fail_statements_containing(&self, pattern: impl Into<String>) {
        self.failures.write().push(pattern.into());
    }

    /// Every later statement containing `pattern` takes `delay` to run.
    pub fn slow_statements_containing(&self, pattern: impl Into<String>, delay: Duration) {
        self.slow.write().push((pattern.into(), delay));
    }

    pub fn clear_failures(&self) {
        self.failures.write().clear();
        self.slow.write().clear();
    }

    /// Committed statements, in execution order.
    pub async fn statements(&self) -> Vec<String> {
        self.state.lock().await.statements.clone()
    }

    /// Marks a version applied without running it, as a manual hotfix would.
    pub async fn force_record(&self, version: &Version) {
        let mut state = self.state.lock().await;
        state.applied.push(AppliedVersion {
            id: version.id.to_owned(),
            description: version.description.to_owned(),
            applied_at: Utc::now(),
        });
        state.applied.sort_by(|a, b| a.id.cmp(&b.id));
    }

    fn ensure_reachable(&self) -> Result<()> {
        if self.is_reachable() {
            Ok(())
        } else {
            Err(MigrateError::ConnectionUnavailable(self.name.to_owned()))
        }
    }
}

#[async_trait]
impl Database for MemoryDatabase {
    fn name(&self) -> &str {
        &self.name
    }

    async fn applied(&self) -> Result<Vec<AppliedVersion>> {
        self.ensure_reachable()?;

        Ok(self.state.lock().await.applied.clone())
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        self.ensure_reachable()?;

        let guard = self.state.clone().lock_owned().await;

        Ok(Box::new(MemoryTransaction {
            database: self.clone(),
            guard,
            statements: Vec::new(),
            applied: None,
            timeout: None,
        }))
    }
}

struct MemoryTransaction {
    database: MemoryDatabase,
    guard: OwnedMutexGuard<DbState>,
    statements: Vec<String>,
    applied: Option<Vec<AppliedVersion>>,
    timeout: Option<Duration>,
}

impl MemoryTransaction {
    fn staged_applied(&mut self) -> &mut Vec<AppliedVersion> {
        let committed = &self.guard.applied;

        self.applied.get_or_insert_with(|| committed.clone())
    }
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn applied(&mut self) -> Result<Vec<AppliedVersion>> {
        self.database.ensure_reachable()?;

        Ok(self.staged_applied().clone())
    }

    async fn statement_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.timeout = Some(timeout);

        Ok(())
    }

    async fn execute(&mut self, statement: &'_ str) -> Result<()> {
        self.database.ensure_reachable()?;

        let failed = self
            .database
            .failures
            .read()
            .iter()
            .any(|pattern| statement.contains(pattern.as_str()));

        if failed {
            return Err(MigrateError::Statement(format!(
                "{statement} rejected by {}",
                self.database.name
            )));
        }

        let delay = self
            .database
            .slow
            .read()
            .iter()
            .find(|(pattern, _)| statement.contains(pattern.as_str()))
            .map(|(_, delay)| *delay);

        match (delay, self.timeout) {
            (Some(delay), Some(timeout)) if delay > timeout => {
                tokio::time::sleep(timeout).await;

                return Err(MigrateError::Statement(format!(
                    "canceling statement due to statement timeout ({}ms)",
                    timeout.as_millis()
                )));
            }
            (Some(delay), _) => tokio::time::sleep(delay).await,
            _ => {}
        }

        self.statements.push(statement.to_owned());

        Ok(())
    }

    async fn record(&mut self, version: &'_ Version) -> Result<()> {
        let applied = self.staged_applied();
        applied.push(AppliedVersion {
            id: version.id.to_owned(),
            description: version.description.to_owned(),
            applied_at: Utc::now(),
        });
        applied.sort_by(|a, b| a.id.cmp(&b.id));

        Ok(())
    }

    async fn unrecord(&mut self, version: &'_ str) -> Result<()> {
        self.staged_applied().retain(|applied| applied.id != version);

        Ok(())
    }

    async fn commit(mut self: Box<Self>) -> Result<()> {
        self.database.ensure_reachable()?;

        let statements = std::mem::take(&mut self.statements);
        self.guard.statements.extend(statements);

        if let Some(applied) = self.applied.take() {
            self.guard.applied = applied;
        }

        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Default)]
struct ClusterState {
    databases: HashMap<String, MemoryDatabase>,
    failing_creations: HashSet<String>,
    created: Vec<String>,
}

/// In-memory database server.
#[derive(Debug, Clone, Default)]
pub struct MemoryCluster(Arc<RwLock<ClusterState>>);

impl MemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn database(&self, name: &str) -> Option<MemoryDatabase> {
        self.0.read().databases.get(name).cloned()
    }

    /// Names passed to a successful `create`, in order.
    pub fn created(&self) -> Vec<String> {
        self.0.read().created.clone()
    }

    pub fn fail_creation_of(&self, name: impl Into<String>) {
        self.0.write().failing_creations.insert(name.into());
    }

    pub fn allow_creation_of(&self, name: &str) {
        self.0.write().failing_creations.remove(name);
    }
}

#[async_trait]
impl Connector for MemoryCluster {
    async fn exists(&self, descriptor: &'_ ConnectionDescriptor) -> Result<bool> {
        Ok(self.0.read().databases.contains_key(&descriptor.database))
    }

    async fn create(&self, descriptor: &'_ ConnectionDescriptor) -> Result<()> {
        let mut cluster = self.0.write();
        let name = &descriptor.database;

        if cluster.failing_creations.contains(name) {
            return Err(MigrateError::Statement(format!(
                "could not create database {name}"
            )));
        }

        if cluster.databases.contains_key(name) {
            return Err(MigrateError::DatabaseExists(name.to_owned()));
        }

        cluster
            .databases
            .insert(name.to_owned(), MemoryDatabase::new(name));
        cluster.created.push(name.to_owned());

        Ok(())
    }

    async fn connect(&self, descriptor: &'_ ConnectionDescriptor) -> Result<Box<dyn Database>> {
        match self.database(&descriptor.database) {
            Some(database) => Ok(Box::new(database)),
            None => Err(MigrateError::ConnectionUnavailable(
                descriptor.database.to_owned(),
            )),
        }
    }
}
