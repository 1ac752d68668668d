use chrono::{DateTime, Utc};
use parse_display::{Display, FromStr};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use uuid::Uuid;

use crate::error::StoreError;

/// Database a migration run targeted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RunScope {
    Master,
    Tenant(Uuid),
}

impl fmt::Display for RunScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunScope::Master => f.write_str("master"),
            RunScope::Tenant(id) => write!(f, "{id}"),
        }
    }
}

impl FromStr for RunScope {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "master" {
            return Ok(RunScope::Master);
        }

        s.parse::<Uuid>()
            .map(RunScope::Tenant)
            .map_err(|_| StoreError::InvalidValue {
                field: "scope",
                value: s.to_owned(),
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, FromStr)]
#[display(style = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Success,
    Failed,
    Skipped,
}

/// One entry of the append-only migration run log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: Uuid,
    /// Fleet run or provisioning attempt that produced the entry.
    pub run_id: Uuid,
    pub scope: RunScope,
    pub version: String,
    pub outcome: RunOutcome,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl RunRecord {
    pub fn new(
        run_id: Uuid,
        scope: RunScope,
        version: impl Into<String>,
        outcome: RunOutcome,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            run_id,
            scope,
            version: version.into(),
            outcome,
            error: None,
            created_at: Utc::now(),
        }
    }

    pub fn error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}
