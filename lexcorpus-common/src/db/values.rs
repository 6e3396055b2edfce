//! Dynamic row values
//!
//! Row snapshots handled by the denormalization engine are not statically
//! typed: a trigger registration names tables and columns as data, so the
//! engine reads and writes rows as maps of column name to storage-class
//! value. This module is that representation plus the sqlx glue around it.

use crate::Result;
use sqlx::query::Query;
use sqlx::sqlite::{Sqlite, SqliteArguments, SqliteRow};
use sqlx::{Column, Row, TypeInfo, ValueRef};
use std::collections::BTreeMap;
use std::fmt;

/// One SQLite storage-class value
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

/// One row, keyed by column name
pub type RowValues = BTreeMap<String, SqlValue>;

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// Convert a JSON value to its storage-class equivalent.
    ///
    /// Compound JSON values (arrays, objects) are stored as serialized JSON
    /// text, matching how the site stores structured columns.
    pub fn from_json(value: &serde_json::Value) -> SqlValue {
        match value {
            serde_json::Value::Null => SqlValue::Null,
            serde_json::Value::Bool(b) => SqlValue::Integer(*b as i64),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    SqlValue::Integer(i)
                } else {
                    SqlValue::Real(n.as_f64().unwrap_or(0.0))
                }
            }
            serde_json::Value::String(s) => SqlValue::Text(s.clone()),
            other => SqlValue::Text(other.to_string()),
        }
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlValue::Null => write!(f, "NULL"),
            SqlValue::Integer(v) => write!(f, "{}", v),
            SqlValue::Real(v) => write!(f, "{}", v),
            SqlValue::Text(v) => write!(f, "{}", v),
            SqlValue::Blob(v) => write!(f, "<blob {} bytes>", v.len()),
        }
    }
}

/// Build a row from a JSON object, e.g. a request body or a test fixture
pub fn row_from_json(value: &serde_json::Value) -> Result<RowValues> {
    let object = value.as_object().ok_or_else(|| {
        crate::Error::InvalidInput(format!("expected a JSON object for a row, got: {}", value))
    })?;

    Ok(object
        .iter()
        .map(|(column, v)| (column.clone(), SqlValue::from_json(v)))
        .collect())
}

/// Decode a fetched row into column name -> storage-class value
///
/// The storage class is taken from the value itself (SQLite columns are
/// dynamically typed), with declared-type names like BOOLEAN and DATETIME
/// folded onto the class they are stored as.
pub fn decode_row(row: &SqliteRow) -> Result<RowValues> {
    let mut values = RowValues::new();

    for column in row.columns() {
        let idx = column.ordinal();
        let raw = row.try_get_raw(idx)?;

        let value = if raw.is_null() {
            SqlValue::Null
        } else {
            match raw.type_info().name() {
                "INTEGER" | "BOOLEAN" => SqlValue::Integer(row.try_get::<i64, _>(idx)?),
                "REAL" => SqlValue::Real(row.try_get::<f64, _>(idx)?),
                "BLOB" => SqlValue::Blob(row.try_get::<Vec<u8>, _>(idx)?),
                _ => SqlValue::Text(row.try_get::<String, _>(idx)?),
            }
        };

        values.insert(column.name().to_string(), value);
    }

    Ok(values)
}

/// Bind a storage-class value onto a query's next `?` placeholder
pub fn bind_value<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    value: &SqlValue,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    match value {
        SqlValue::Null => query.bind(None::<String>),
        SqlValue::Integer(v) => query.bind(*v),
        SqlValue::Real(v) => query.bind(*v),
        SqlValue::Text(v) => query.bind(v.clone()),
        SqlValue::Blob(v) => query.bind(v.clone()),
    }
}
