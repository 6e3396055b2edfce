//! Row write path
//!
//! SQLite exposes no in-process trigger callbacks, so the write path is
//! where the synchronization hooks live: every row insert/update the site
//! performs goes through `RowWriter`, which runs the before-write (pull)
//! hook, persists the row, runs the after-write (push) hook, and commits,
//! all in one transaction.
//!
//! **[ARCH-WRITE-010]** One transaction per row mutation; hooks share it
//! **[ARCH-WRITE-020]** Any failure rolls the whole mutation back, so a
//! partially-denormalized row version is never visible
//!
//! Table and key-column names given to the writer come from the declared
//! schema (application code), never from request input; the writer rejects
//! undeclared table names outright.

use crate::db::registry::SyncRegistry;
use crate::db::table_schemas::is_declared_table;
use crate::db::values::{bind_value, decode_row, RowValues, SqlValue};
use crate::db::RowOp;
use crate::{Error, Result};
use sqlx::SqlitePool;
use tracing::debug;

/// Transactional row writer with synchronization hooks attached
#[derive(Debug)]
pub struct RowWriter {
    pool: SqlitePool,
    registry: SyncRegistry,
}

impl RowWriter {
    pub fn new(pool: SqlitePool, registry: SyncRegistry) -> Self {
        Self { pool, registry }
    }

    pub fn registry(&self) -> &SyncRegistry {
        &self.registry
    }

    /// Insert a row, running the before-write hook first.
    ///
    /// Returns the row as persisted (with any denormalized columns filled
    /// in by the pull direction).
    pub async fn insert(&self, table: &str, row: &RowValues) -> Result<RowValues> {
        check_declared(table)?;
        if row.is_empty() {
            return Err(Error::InvalidInput(format!("empty row for table '{}'", table)));
        }

        let mut tx = self.pool.begin().await?;

        let amended = self
            .registry
            .before_write(&mut tx, table, RowOp::Insert, None, row)
            .await?;

        let columns: Vec<&str> = amended.keys().map(String::as_str).collect();
        let placeholders = vec!["?"; columns.len()].join(", ");
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            table,
            columns.join(", "),
            placeholders
        );

        let mut query = sqlx::query(&sql);
        for column in &columns {
            query = bind_value(query, &amended[*column]);
        }
        query.execute(&mut *tx).await?;

        tx.commit().await?;
        debug!("Inserted row into {} ({} columns)", table, columns.len());

        Ok(amended)
    }

    /// Update one row identified by `key_column = key`, applying `changes`
    /// over its current values.
    ///
    /// The before-write hook sees the prior and merged row and may amend
    /// the latter; the after-write hook then pushes any source-column
    /// changes out to dependent tables. Returns the row as persisted.
    pub async fn update(
        &self,
        table: &str,
        key_column: &str,
        key: &SqlValue,
        changes: &RowValues,
    ) -> Result<RowValues> {
        check_declared(table)?;

        let mut tx = self.pool.begin().await?;

        let select = format!("SELECT * FROM {} WHERE {} = ?", table, key_column);
        let rows = bind_value(sqlx::query(&select), key).fetch_all(&mut *tx).await?;
        let prior = match rows.len() {
            0 => {
                return Err(Error::NotFound(format!(
                    "no row in {} with {} = {}",
                    table, key_column, key
                )))
            }
            1 => decode_row(&rows[0])?,
            n => {
                return Err(Error::InvalidInput(format!(
                    "{} rows in {} match {} = {}, refusing to update",
                    n, table, key_column, key
                )))
            }
        };

        let mut incoming = prior.clone();
        for (column, value) in changes {
            incoming.insert(column.clone(), value.clone());
        }

        let incoming = self
            .registry
            .before_write(&mut tx, table, RowOp::Update, Some(&prior), &incoming)
            .await?;

        let changed: Vec<&str> = incoming
            .iter()
            .filter(|(column, value)| prior.get(column.as_str()) != Some(value))
            .map(|(column, _)| column.as_str())
            .collect();

        if !changed.is_empty() {
            let assignments: Vec<String> = changed.iter().map(|c| format!("{} = ?", c)).collect();
            let sql = format!(
                "UPDATE {} SET {} WHERE {} = ?",
                table,
                assignments.join(", "),
                key_column
            );

            let mut query = sqlx::query(&sql);
            for column in &changed {
                query = bind_value(query, &incoming[*column]);
            }
            query = bind_value(query, key);
            query.execute(&mut *tx).await?;
        }

        let pushed = self
            .registry
            .after_write(&mut tx, table, &prior, &incoming)
            .await?;

        tx.commit().await?;
        debug!(
            "Updated {} ({} column(s) changed, {} dependent row(s) pushed)",
            table,
            changed.len(),
            pushed
        );

        Ok(incoming)
    }
}

fn check_declared(table: &str) -> Result<()> {
    if is_declared_table(table) {
        Ok(())
    } else {
        Err(Error::InvalidInput(format!("unknown table '{}'", table)))
    }
}
