use chrono::{DateTime, Utc};
use parse_display::{Display, FromStr};
use serde::{Deserialize, Serialize};
use tenanto_query::{Cursor, QueryError};
use uuid::Uuid;

/// Lifecycle of a tenant inside the registry.
///
/// Records are never removed; `Deprovisioned` is the terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, FromStr)]
#[display(style = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TenantState {
    Provisioning,
    Failed,
    Active,
    Suspended,
    Deprovisioned,
}

/// How far provisioning progressed. Doubles as the resume point of a retry.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    FromStr,
)]
#[display(style = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ProvisioningStage {
    Registered,
    DatabaseCreated,
    SchemaMigrated,
    Seeded,
    Active,
}

impl ProvisioningStage {
    pub fn next(self) -> Option<Self> {
        match self {
            Self::Registered => Some(Self::DatabaseCreated),
            Self::DatabaseCreated => Some(Self::SchemaMigrated),
            Self::SchemaMigrated => Some(Self::Seeded),
            Self::Seeded => Some(Self::Active),
            Self::Active => None,
        }
    }

    /// Stages strictly before this one.
    pub fn earlier(self) -> Vec<Self> {
        std::iter::successors(Some(Self::Registered), |stage| stage.next())
            .take_while(|stage| *stage < self)
            .collect()
    }
}

/// Where a tenant's isolated database lives. Credentials are referenced, never stored.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionDescriptor {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub credentials_ref: String,
}

impl ConnectionDescriptor {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        database: impl Into<String>,
        credentials_ref: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            database: database.into(),
            credentials_ref: credentials_ref.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageFailure {
    pub stage: ProvisioningStage,
    pub reason: String,
    pub failed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TenantRecord {
    pub id: Uuid,
    pub name: String,
    pub routing_code: String,
    pub primary_domain: String,
    pub contact_email: String,
    pub package_id: String,
    pub connection: ConnectionDescriptor,
    pub state: TenantState,
    pub stage: ProvisioningStage,
    pub failure: Option<StageFailure>,
    pub revision: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TenantRecord {
    pub fn is_active(&self) -> bool {
        self.state == TenantState::Active
    }
}

/// Input of [`crate::Store::register`].
#[derive(Debug, Clone)]
pub struct NewTenant {
    pub id: Uuid,
    pub name: String,
    pub routing_code: String,
    pub primary_domain: String,
    pub contact_email: String,
    pub package_id: String,
    pub connection: ConnectionDescriptor,
}

impl NewTenant {
    pub fn into_record(self) -> TenantRecord {
        let now = Utc::now();

        TenantRecord {
            id: self.id,
            name: self.name,
            routing_code: self.routing_code,
            primary_domain: self.primary_domain,
            contact_email: self.contact_email,
            package_id: self.package_id,
            connection: self.connection,
            state: TenantState::Provisioning,
            stage: ProvisioningStage::Registered,
            failure: None,
            revision: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Restricts `list_all` to the given states; empty means every tenant.
#[derive(Debug, Clone, Default)]
pub struct TenantFilter {
    pub states: Vec<TenantState>,
}

impl TenantFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn state(state: TenantState) -> Self {
        Self {
            states: vec![state],
        }
    }

    pub fn matches(&self, tenant: &TenantRecord) -> bool {
        self.states.is_empty() || self.states.contains(&tenant.state)
    }
}

/// Fields written by a conditional update. `None` leaves the column untouched.
#[derive(Debug, Clone, Default)]
pub struct TenantChange {
    pub state: Option<TenantState>,
    pub stage: Option<ProvisioningStage>,
    pub failure: Option<Option<StageFailure>>,
    /// Only write `stage` when the stored one is earlier.
    pub forward_only: bool,
}

impl TenantChange {
    pub fn state(state: TenantState) -> Self {
        Self {
            state: Some(state),
            ..Self::default()
        }
    }

    pub fn stage(mut self, stage: ProvisioningStage) -> Self {
        self.stage = Some(stage);
        self
    }

    pub fn advance(mut self, stage: ProvisioningStage) -> Self {
        self.stage = Some(stage);
        self.forward_only = true;
        self
    }

    /// Whether the stage guard lets this change through for `tenant`.
    pub fn moves_forward(&self, tenant: &TenantRecord) -> bool {
        match self.stage {
            Some(stage) if self.forward_only => tenant.stage < stage,
            _ => true,
        }
    }

    pub fn failed(mut self, stage: ProvisioningStage, reason: impl Into<String>) -> Self {
        self.failure = Some(Some(StageFailure {
            stage,
            reason: reason.into(),
            failed_at: Utc::now(),
        }));
        self
    }

    pub fn clear_failure(mut self) -> Self {
        self.failure = Some(None);
        self
    }

    pub fn apply(&self, tenant: &mut TenantRecord) {
        if let Some(state) = self.state {
            tenant.state = state;
        }

        if let Some(stage) = self.stage {
            tenant.stage = stage;
        }

        if let Some(failure) = &self.failure {
            tenant.failure = failure.clone();
        }

        tenant.revision += 1;
        tenant.updated_at = Utc::now();
    }
}

impl Cursor for TenantRecord {
    fn keys() -> Vec<&'static str> {
        vec!["created_at", "id"]
    }

    #[cfg(feature = "pg")]
    fn bind<'q, O>(
        self,
        query: sqlx::query::QueryAs<'q, sqlx::Postgres, O, sqlx::postgres::PgArguments>,
    ) -> sqlx::query::QueryAs<'q, sqlx::Postgres, O, sqlx::postgres::PgArguments>
    where
        O: for<'r> sqlx::FromRow<'r, <sqlx::Postgres as sqlx::Database>::Row>,
        O: 'q + std::marker::Send,
        O: 'q + Unpin,
        O: 'q + Cursor,
    {
        query.bind(self.created_at).bind(self.id)
    }

    fn serialize(&self) -> Vec<String> {
        vec![Self::serialize_utc(self.created_at), self.id.to_string()]
    }

    fn deserialize(values: Vec<&str>) -> Result<Self, QueryError> {
        let mut values = values.iter();
        let created_at = Self::deserialize_as_utc("created_at", values.next())?;
        let id = Self::deserialize_as("id", values.next())?;

        Ok(TenantRecord {
            id,
            name: String::default(),
            routing_code: String::default(),
            primary_domain: String::default(),
            contact_email: String::default(),
            package_id: String::default(),
            connection: ConnectionDescriptor::new("", 0, "", ""),
            state: TenantState::Provisioning,
            stage: ProvisioningStage::Registered,
            failure: None,
            revision: 0,
            created_at,
            updated_at: created_at,
        })
    }
}
