use base64::{
    alphabet,
    engine::{general_purpose, GeneralPurpose},
    Engine,
};
use chrono::{DateTime, Utc};
use harsh::Harsh;
use serde::{Deserialize, Serialize};
#[cfg(feature = "pg")]
use sqlx::{postgres::PgArguments, query::QueryAs, FromRow, Postgres};
use std::{fmt, str::FromStr};

use crate::error::QueryError;

const SEPARATOR: char = '|';

/// Opaque, url-safe position inside an ordered result set.
#[derive(Debug, PartialEq, Eq, Hash, Deserialize, Serialize, Clone)]
pub struct CursorType(pub String);

impl From<String> for CursorType {
    fn from(val: String) -> Self {
        CursorType(val)
    }
}

impl AsRef<[u8]> for CursorType {
    fn as_ref(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Display for CursorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CursorOrder {
    #[default]
    Asc,
    Desc,
}

/// A node that can be located by the values of its ordering keys.
///
/// `keys` lists the ordering columns from most to least significant; the last one must be
/// unique so that every cursor designates exactly one node.
pub trait Cursor: Sized {
    fn keys() -> Vec<&'static str>;

    #[cfg(feature = "pg")]
    fn bind<'q, O>(
        self,
        query: QueryAs<'q, Postgres, O, PgArguments>,
    ) -> QueryAs<'q, Postgres, O, PgArguments>
    where
        O: for<'r> FromRow<'r, <sqlx::Postgres as sqlx::Database>::Row>,
        O: 'q + std::marker::Send,
        O: 'q + Unpin,
        O: 'q + Cursor;

    fn serialize(&self) -> Vec<String>;
    fn deserialize(values: Vec<&str>) -> Result<Self, QueryError>;

    fn serialize_utc(value: DateTime<Utc>) -> String {
        Harsh::default().encode(&[value.timestamp_micros() as u64])
    }

    fn deserialize_as<F: Into<String>, D: FromStr>(
        field: F,
        value: Option<&&str>,
    ) -> Result<D, QueryError> {
        let field = field.into();
        let value = value.ok_or_else(|| QueryError::MissingField(field.to_owned()))?;

        value.parse::<D>().map_err(|_| QueryError::InvalidField {
            field,
            value: value.to_string(),
        })
    }

    fn deserialize_as_utc<F: Into<String>>(
        field: F,
        value: Option<&&str>,
    ) -> Result<DateTime<Utc>, QueryError> {
        let field = field.into();
        let value = value.ok_or_else(|| QueryError::MissingField(field.to_owned()))?;
        let decoded = Harsh::default().decode(value)?;

        decoded
            .first()
            .and_then(|micros| DateTime::from_timestamp_micros(*micros as i64))
            .ok_or(QueryError::InvalidField {
                field,
                value: value.to_string(),
            })
    }

    fn to_cursor(&self) -> CursorType {
        let data = self.serialize().join(&SEPARATOR.to_string());
        let engine = GeneralPurpose::new(&alphabet::URL_SAFE, general_purpose::PAD);

        CursorType(engine.encode(data))
    }

    fn from_cursor(cursor: &CursorType) -> Result<Self, QueryError> {
        let engine = GeneralPurpose::new(&alphabet::URL_SAFE, general_purpose::PAD);
        let decoded = engine.decode(cursor)?;
        let data = std::str::from_utf8(&decoded)?;

        Self::deserialize(data.split(SEPARATOR).collect())
    }

    /// Keyset predicate selecting the rows strictly after the bound cursor values,
    /// e.g. `created_at > $1 OR (created_at = $1 AND id > $2)`.
    fn to_pg_filter(order: CursorOrder, pos: usize) -> String {
        Self::pg_filter_keys(order, Self::keys(), pos)
    }

    #[doc(hidden)]
    fn pg_filter_keys(order: CursorOrder, mut keys: Vec<&str>, pos: usize) -> String {
        let sign = match order {
            CursorOrder::Asc => ">",
            CursorOrder::Desc => "<",
        };

        if keys.is_empty() {
            return String::new();
        }

        let key = keys.remove(0);
        let filter = format!("{key} {sign} ${pos}");

        if keys.is_empty() {
            return filter;
        }

        format!(
            "{filter} OR ({key} = ${pos} AND ({}))",
            Self::pg_filter_keys(order, keys, pos + 1)
        )
    }

    fn to_pg_order(order: CursorOrder) -> String {
        let order = match order {
            CursorOrder::Asc => "ASC",
            CursorOrder::Desc => "DESC",
        };

        Self::keys()
            .iter()
            .map(|key| format!("{key} {order}"))
            .collect::<Vec<_>>()
            .join(", ")
    }
}
