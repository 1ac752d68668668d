use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::{
    database::{Database, Transaction},
    error::{MigrateError, Result},
    migration::{AppliedVersion, Migration, MigrationSet, Version},
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutcomeStatus {
    Success,
    /// Already applied; nothing was executed.
    Skipped,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationOutcome {
    pub version: Version,
    pub status: OutcomeStatus,
}

impl MigrationOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self.status, OutcomeStatus::Failed(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Consistency {
    Consistent,
    Inconsistent(String),
}

/// Applied/pending diff of one database against the known versions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationStatus {
    pub database: String,
    pub applied: Vec<String>,
    pub pending: Vec<Version>,
    pub consistency: Consistency,
}

impl MigrationStatus {
    pub fn is_up_to_date(&self) -> bool {
        self.pending.is_empty() && self.consistency == Consistency::Consistent
    }
}

/// What applying one pending version would run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationPreview {
    pub version: Version,
    pub statements: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationHistory {
    pub database: String,
    pub applied: Vec<AppliedVersion>,
    pub count: usize,
}

/// Checks that `applied` is exactly the first `applied.len()` entries of `known`.
///
/// Returns a description of the first violation.
pub fn check_prefix(known: &[Version], applied: &[AppliedVersion]) -> Consistency {
    for (pos, applied) in applied.iter().enumerate() {
        match known.get(pos) {
            Some(version) if version.id == applied.id => continue,
            Some(version) => {
                let reason = if known.iter().any(|v| v.id == applied.id) {
                    format!("`{}` is applied but its predecessor `{}` is not", applied.id, version.id)
                } else {
                    format!("`{}` is applied but unknown", applied.id)
                };

                return Consistency::Inconsistent(reason);
            }
            None => {
                return Consistency::Inconsistent(format!("`{}` is applied but unknown", applied.id))
            }
        }
    }

    Consistency::Consistent
}

/// Applies one ordered [`MigrationSet`] to any number of databases.
#[derive(Debug, Clone)]
pub struct Migrator {
    migrations: MigrationSet,
    statement_timeout: Option<Duration>,
}

impl Migrator {
    pub fn new(migrations: MigrationSet) -> Self {
        Self {
            migrations,
            statement_timeout: None,
        }
    }

    /// Bounds every statement run by `apply` and `revert`. The database cancels the
    /// statement and the version fails.
    pub fn statement_timeout(mut self, timeout: Duration) -> Self {
        self.statement_timeout = Some(timeout);
        self
    }

    /// Same settings over another migration set.
    pub fn with_migrations(&self, migrations: MigrationSet) -> Self {
        Self {
            migrations,
            statement_timeout: self.statement_timeout,
        }
    }

    pub fn migrations(&self) -> &MigrationSet {
        &self.migrations
    }

    pub async fn status(&self, database: &dyn Database) -> Result<MigrationStatus> {
        let applied = database.applied().await?;
        let known = self.migrations.versions();
        let consistency = check_prefix(&known, &applied);

        let pending = match consistency {
            Consistency::Consistent => known.into_iter().skip(applied.len()).collect(),
            Consistency::Inconsistent(_) => Vec::new(),
        };

        Ok(MigrationStatus {
            database: database.name().to_owned(),
            applied: applied.into_iter().map(|v| v.id).collect(),
            pending,
            consistency,
        })
    }

    /// Versions not yet applied, in application order.
    pub async fn pending(&self, database: &dyn Database) -> Result<Vec<Version>> {
        let status = self.status(database).await?;

        match status.consistency {
            Consistency::Consistent => Ok(status.pending),
            Consistency::Inconsistent(reason) => Err(MigrateError::Inconsistent {
                database: status.database,
                reason,
            }),
        }
    }

    /// Applies a single version in its own transaction.
    ///
    /// An error raised by the migration itself is reported as `Failed` after the
    /// transaction rolled back; infrastructure problems are returned as `Err`.
    pub async fn apply(&self, database: &dyn Database, version: &str) -> Result<MigrationOutcome> {
        let (Some(pos), Some(migration)) = (
            self.migrations.position(version),
            self.migrations.get(version),
        ) else {
            return Err(MigrateError::UnknownVersion(version.to_owned()));
        };
        let known = self.migrations.versions();

        let mut tx = self.begin(database).await?;
        let applied = match tx.applied().await {
            Ok(applied) => applied,
            Err(e) => {
                tx.rollback().await?;
                return Err(e);
            }
        };

        if let Consistency::Inconsistent(reason) = check_prefix(&known, &applied) {
            tx.rollback().await?;

            return Err(MigrateError::Inconsistent {
                database: database.name().to_owned(),
                reason,
            });
        }

        if applied.iter().any(|v| v.id == version) {
            tx.rollback().await?;
            debug!(database = database.name(), version, "already applied");

            return Ok(MigrationOutcome {
                version: migration.to_version(),
                status: OutcomeStatus::Skipped,
            });
        }

        if applied.len() != pos {
            tx.rollback().await?;

            return Err(MigrateError::OutOfOrder {
                version: version.to_owned(),
                expected: known[applied.len()].id.to_owned(),
            });
        }

        let status = match run_up(migration.as_ref(), tx.as_mut()).await {
            Ok(()) => match tx.commit().await {
                Ok(()) => OutcomeStatus::Success,
                Err(e) if e.is_unavailable() => return Err(e),
                Err(e) => OutcomeStatus::Failed(e.to_string()),
            },
            Err(e) => {
                tx.rollback().await?;

                if e.is_unavailable() {
                    return Err(e);
                }

                OutcomeStatus::Failed(e.to_string())
            }
        };

        match &status {
            OutcomeStatus::Failed(reason) => {
                warn!(database = database.name(), version, %reason, "migration failed")
            }
            _ => info!(database = database.name(), version, "migration applied"),
        }

        Ok(MigrationOutcome {
            version: migration.to_version(),
            status,
        })
    }

    /// Applies every version up to and including `target`, stopping at the first failure.
    pub async fn apply_to(
        &self,
        database: &dyn Database,
        target: Option<&str>,
    ) -> Result<Vec<MigrationOutcome>> {
        let last = match target {
            Some(target) => self
                .migrations
                .position(target)
                .ok_or_else(|| MigrateError::UnknownVersion(target.to_owned()))?,
            None if self.migrations.is_empty() => return Ok(Vec::new()),
            None => self.migrations.len() - 1,
        };

        // Surfaces inconsistency before anything is attempted.
        self.pending(database).await?;

        let mut outcomes = Vec::new();

        for migration in self.migrations.iter().take(last + 1) {
            let outcome = self.apply(database, migration.version()).await?;
            let failed = outcome.is_failed();
            outcomes.push(outcome);

            if failed {
                break;
            }
        }

        Ok(outcomes)
    }

    pub async fn apply_all(&self, database: &dyn Database) -> Result<Vec<MigrationOutcome>> {
        self.apply_to(database, None).await
    }

    /// Pending versions up to and including `target`, with their sql. Nothing is executed.
    pub async fn preview(
        &self,
        database: &dyn Database,
        target: Option<&str>,
    ) -> Result<Vec<MigrationPreview>> {
        let last = match target {
            Some(target) => self
                .migrations
                .position(target)
                .ok_or_else(|| MigrateError::UnknownVersion(target.to_owned()))?,
            None => self.migrations.len(),
        };

        let mut previews = Vec::new();

        for version in self.pending(database).await? {
            let (Some(pos), Some(migration)) = (
                self.migrations.position(&version.id),
                self.migrations.get(&version.id),
            ) else {
                continue;
            };

            if pos > last {
                break;
            }

            previews.push(MigrationPreview {
                statements: migration.statements(),
                version,
            });
        }

        Ok(previews)
    }

    pub async fn history(&self, database: &dyn Database) -> Result<MigrationHistory> {
        let applied = database.applied().await?;

        Ok(MigrationHistory {
            database: database.name().to_owned(),
            count: applied.len(),
            applied,
        })
    }

    /// Runs the down step of `version`, which must be the latest applied one.
    pub async fn revert(&self, database: &dyn Database, version: &str) -> Result<Version> {
        let migration = self
            .migrations
            .get(version)
            .ok_or_else(|| MigrateError::UnknownVersion(version.to_owned()))?;

        let mut tx = self.begin(database).await?;
        let applied = match tx.applied().await {
            Ok(applied) => applied,
            Err(e) => {
                tx.rollback().await?;
                return Err(e);
            }
        };

        let latest = applied.last().map(|v| v.id.to_owned());
        if latest.as_deref() != Some(version) {
            tx.rollback().await?;

            return Err(MigrateError::NotLatest {
                version: version.to_owned(),
                latest,
            });
        }

        let res = match migration.down(tx.as_mut()).await {
            Ok(()) => tx.unrecord(version).await,
            Err(e) => Err(e),
        };

        if let Err(e) = res {
            tx.rollback().await?;
            return Err(e);
        }

        tx.commit().await?;

        info!(database = database.name(), version, "migration reverted");

        Ok(migration.to_version())
    }
}

impl Migrator {
    async fn begin(&self, database: &dyn Database) -> Result<Box<dyn Transaction>> {
        let mut tx = database.begin().await?;

        if let Some(timeout) = self.statement_timeout {
            if let Err(e) = tx.statement_timeout(timeout).await {
                tx.rollback().await?;
                return Err(e);
            }
        }

        Ok(tx)
    }
}

async fn run_up(
    migration: &dyn Migration,
    tx: &mut dyn Transaction,
) -> Result<()> {
    migration.up(tx).await?;
    tx.record(&migration.to_version()).await
}
