/// Errors raised while decoding cursors or running a paged query.
#[derive(thiserror::Error, Debug)]
pub enum QueryError {
    /// A cursor was decoded but one of its keys is missing.
    #[error("missing cursor field `{0}`")]
    MissingField(String),

    /// A cursor key could not be parsed back into its column type.
    #[error("invalid cursor field `{field}`: {value}")]
    InvalidField { field: String, value: String },

    #[error("chrono: {0}")]
    ChronoParseError(#[from] chrono::ParseError),

    #[cfg(feature = "pg")]
    #[error("sqlx: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("str utf8: {0}")]
    StrUtf8(#[from] std::str::Utf8Error),

    #[error("harsh: {0}")]
    Harsh(#[from] harsh::Error),
}
