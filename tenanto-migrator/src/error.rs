#[derive(Debug, thiserror::Error)]
pub enum MigrateError {
    #[error("database `{0}` is unavailable")]
    ConnectionUnavailable(String),

    #[error("database `{database}` is inconsistent: {reason}")]
    Inconsistent { database: String, reason: String },

    #[error("unknown migration version `{0}`")]
    UnknownVersion(String),

    #[error("version `{version}` cannot be applied before `{expected}`")]
    OutOfOrder { version: String, expected: String },

    #[error("version `{0}` is declared twice")]
    DuplicateVersion(String),

    #[error("version `{version}` must sort after `{previous}`")]
    Unordered { version: String, previous: String },

    #[error("version `{0}` has no down step")]
    Irreversible(String),

    #[error("only the latest applied version can be reverted, `{version}` is not (latest: {latest:?})")]
    NotLatest {
        version: String,
        latest: Option<String>,
    },

    #[error("statement failed: {0}")]
    Statement(String),

    #[error("database `{0}` already exists")]
    DatabaseExists(String),

    #[cfg(feature = "pg")]
    #[error("sqlx `{0}`")]
    Sqlx(#[from] sqlx::Error),

    #[error("{0}")]
    Any(#[from] anyhow::Error),
}

impl MigrateError {
    /// Transient failures that a later run may get past.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, MigrateError::ConnectionUnavailable(_))
    }
}

pub type Result<T> = std::result::Result<T, MigrateError>;
