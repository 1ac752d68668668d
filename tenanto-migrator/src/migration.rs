use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::{
    database::Transaction,
    error::{MigrateError, Result},
};

/// Identifier and description of one schema change.
///
/// Ids are timestamp prefixed (`20240115093000_create_settings`) and ordered as strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Version {
    pub id: String,
    pub description: String,
}

/// A version as recorded inside the target database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedVersion {
    pub id: String,
    pub description: String,
    pub applied_at: DateTime<Utc>,
}

#[async_trait]
pub trait Migration: Send + Sync {
    fn version(&self) -> &str;

    fn description(&self) -> &str;

    async fn up(&self, tx: &mut dyn Transaction) -> Result<()>;

    /// Sql that `up` runs, when it is known without a database. Empty for code migrations.
    fn statements(&self) -> Vec<String> {
        Vec::new()
    }

    async fn down(&self, _tx: &mut dyn Transaction) -> Result<()> {
        Err(MigrateError::Irreversible(self.version().to_owned()))
    }

    fn to_version(&self) -> Version {
        Version {
            id: self.version().to_owned(),
            description: self.description().to_owned(),
        }
    }
}

/// Migration made of plain sql statements.
#[derive(Debug, Clone)]
pub struct SqlMigration {
    version: String,
    description: String,
    up: Vec<String>,
    down: Option<Vec<String>>,
}

impl SqlMigration {
    pub fn new(version: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            description: description.into(),
            up: Vec::new(),
            down: None,
        }
    }

    pub fn sql(mut self, statement: impl Into<String>) -> Self {
        self.up.push(statement.into());
        self
    }

    pub fn down_sql(mut self, statement: impl Into<String>) -> Self {
        self.down
            .get_or_insert_with(Vec::new)
            .push(statement.into());
        self
    }
}

#[async_trait]
impl Migration for SqlMigration {
    fn version(&self) -> &str {
        &self.version
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn up(&self, tx: &mut dyn Transaction) -> Result<()> {
        for statement in self.up.iter() {
            tx.execute(statement).await?;
        }

        Ok(())
    }

    fn statements(&self) -> Vec<String> {
        self.up.clone()
    }

    async fn down(&self, tx: &mut dyn Transaction) -> Result<()> {
        let Some(down) = &self.down else {
            return Err(MigrateError::Irreversible(self.version.to_owned()));
        };

        for statement in down.iter() {
            tx.execute(statement).await?;
        }

        Ok(())
    }
}

/// The globally known, strictly ordered list of migrations of one kind of database.
#[derive(Clone, Default)]
pub struct MigrationSet {
    migrations: Arc<Vec<Arc<dyn Migration>>>,
}

impl MigrationSet {
    pub fn new(migrations: Vec<Arc<dyn Migration>>) -> Result<Self> {
        for pair in migrations.windows(2) {
            let (previous, version) = (pair[0].version(), pair[1].version());

            if previous == version {
                return Err(MigrateError::DuplicateVersion(version.to_owned()));
            }

            if previous > version {
                return Err(MigrateError::Unordered {
                    version: version.to_owned(),
                    previous: previous.to_owned(),
                });
            }
        }

        Ok(Self {
            migrations: Arc::new(migrations),
        })
    }

    /// Same set with `migration` appended.
    pub fn with(&self, migration: impl Migration + 'static) -> Result<Self> {
        let mut migrations = self.migrations.as_ref().clone();
        migrations.push(Arc::new(migration));

        Self::new(migrations)
    }

    pub fn len(&self) -> usize {
        self.migrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Migration>> {
        self.migrations.iter()
    }

    pub fn versions(&self) -> Vec<Version> {
        self.migrations.iter().map(|m| m.to_version()).collect()
    }

    pub fn position(&self, version: &str) -> Option<usize> {
        self.migrations.iter().position(|m| m.version() == version)
    }

    pub fn get(&self, version: &str) -> Option<&Arc<dyn Migration>> {
        self.migrations.iter().find(|m| m.version() == version)
    }

    pub fn latest(&self) -> Option<Version> {
        self.migrations.last().map(|m| m.to_version())
    }

    /// Fails unless `previous` is a prefix of this set; published versions cannot be rewritten.
    pub fn ensure_extends(&self, previous: &MigrationSet) -> Result<()> {
        if previous.len() > self.len() {
            return Err(MigrateError::UnknownVersion(
                previous.migrations[self.len()].version().to_owned(),
            ));
        }

        for (known, next) in previous.iter().zip(self.iter()) {
            if known.version() != next.version() {
                return Err(MigrateError::OutOfOrder {
                    version: next.version().to_owned(),
                    expected: known.version().to_owned(),
                });
            }
        }

        Ok(())
    }
}

impl std::fmt::Debug for MigrationSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.migrations.iter().map(|m| m.version()))
            .finish()
    }
}
