//! Trigger Registry
//!
//! Explicit registry of which table's writes feed which denormalization
//! mappings. Registration is the only composition mechanism: the whole
//! data-flow graph of the site lives in one inspectable structure instead
//! of scattered trigger-attachment calls.
//!
//! **[ARCH-REG-010]** Explicit, inspectable registration of sync hooks
//! **[ARCH-REG-020]** Startup validation of every identifier against the
//! live schema (the other half of the statement builder's trust boundary)
//!
//! Dispatch stays faithful to the stateless engine: registration arguments
//! are stored as the flat string list the hooks are attached with, and are
//! re-parsed on every invocation. `validate` parses them eagerly once so a
//! malformed registration fails at startup, not mid-transaction.

use crate::db::denorm::{parse_mapping_args, pull_sync, push_sync, DanglingPolicy, RowOp};
use crate::db::values::RowValues;
use crate::{Error, Result};
use sqlx::{Row, SqliteConnection, SqlitePool};
use std::collections::HashSet;
use tracing::{info, warn};

/// Which write hook a registration is attached to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteHook {
    /// Pull direction: runs before a row of the attached table is persisted
    BeforeWrite,
    /// Push direction: runs after a row of the attached table is updated
    AfterWrite,
}

/// One hook attachment: a table, a direction, and the flat argument list
/// its mappings are encoded in
#[derive(Debug, Clone)]
pub struct TriggerRegistration {
    pub table: String,
    pub hook: WriteHook,
    pub args: Vec<String>,
}

/// The site's denormalization data-flow graph
#[derive(Debug)]
pub struct SyncRegistry {
    registrations: Vec<TriggerRegistration>,
    policy: DanglingPolicy,
}

impl SyncRegistry {
    pub fn new(policy: DanglingPolicy) -> Self {
        Self {
            registrations: Vec::new(),
            policy,
        }
    }

    /// Attach a hook to a table. Mappings are passed as the flat argument
    /// list: groups of `(table, linkColumn, sourceKeyColumn, fieldMapJSON)`.
    pub fn attach(&mut self, table: &str, hook: WriteHook, args: Vec<String>) {
        self.registrations.push(TriggerRegistration {
            table: table.to_string(),
            hook,
            args,
        });
    }

    /// All registrations, for inspection and diagnostics
    pub fn registrations(&self) -> &[TriggerRegistration] {
        &self.registrations
    }

    pub fn policy(&self) -> DanglingPolicy {
        self.policy
    }

    /// Parse every registration and check each referenced table and column
    /// against the live schema.
    ///
    /// **[ARCH-REG-020]** Must run at startup, before any traffic: mapping
    /// identifiers are interpolated into generated statements, so they are
    /// only trustworthy once checked against the schema they were written
    /// for.
    pub async fn validate(&self, pool: &SqlitePool) -> Result<()> {
        for registration in &self.registrations {
            let mappings = parse_mapping_args(&registration.args)?;
            let attached_columns = require_table_columns(pool, &registration.table).await?;

            for mapping in &mappings {
                let remote_columns = require_table_columns(pool, &mapping.remote_table).await?;

                // The linking column lives on the dependent side, the
                // source key on the source side; which side is which
                // depends on the direction the hook runs in.
                let (dependent, dependent_cols, source, source_cols) = match registration.hook {
                    WriteHook::BeforeWrite => (
                        registration.table.as_str(),
                        &attached_columns,
                        mapping.remote_table.as_str(),
                        &remote_columns,
                    ),
                    WriteHook::AfterWrite => (
                        mapping.remote_table.as_str(),
                        &remote_columns,
                        registration.table.as_str(),
                        &attached_columns,
                    ),
                };

                require_column(dependent, dependent_cols, &mapping.link_column)?;
                require_column(source, source_cols, &mapping.source_key_column)?;
                for (source_column, dest_column) in &mapping.field_map {
                    require_column(source, source_cols, source_column)?;
                    require_column(dependent, dependent_cols, dest_column)?;
                }
            }
        }

        info!(
            "Denorm registry validated: {} registration(s), policy {:?}",
            self.registrations.len(),
            self.policy
        );
        Ok(())
    }

    /// Before-write hook: apply every pull mapping registered for `table`.
    ///
    /// Returns the row to actually persist. Tables with no registrations
    /// pass the incoming row through unchanged.
    pub async fn before_write(
        &self,
        conn: &mut SqliteConnection,
        table: &str,
        op: RowOp,
        prior: Option<&RowValues>,
        incoming: &RowValues,
    ) -> Result<RowValues> {
        let mut amended = incoming.clone();

        for registration in self.hooks_for(table, WriteHook::BeforeWrite) {
            let mappings = parse_mapping_args(&registration.args)?;
            amended = pull_sync(&mut *conn, op, prior, &amended, &mappings, self.policy).await?;
        }

        Ok(amended)
    }

    /// After-write hook: apply every push mapping registered for `table`.
    ///
    /// Returns the total number of dependent rows rewritten.
    pub async fn after_write(
        &self,
        conn: &mut SqliteConnection,
        table: &str,
        prior: &RowValues,
        incoming: &RowValues,
    ) -> Result<u64> {
        let mut total = 0u64;

        for registration in self.hooks_for(table, WriteHook::AfterWrite) {
            let mappings = parse_mapping_args(&registration.args)?;
            total += push_sync(&mut *conn, prior, incoming, &mappings).await?;
        }

        Ok(total)
    }

    fn hooks_for<'a>(
        &'a self,
        table: &'a str,
        hook: WriteHook,
    ) -> impl Iterator<Item = &'a TriggerRegistration> {
        self.registrations
            .iter()
            .filter(move |r| r.hook == hook && r.table == table)
    }
}

/// Read the dangling-reference policy from the settings table
///
/// Unknown or missing values fall back to the default with a warning.
pub async fn load_dangling_policy(pool: &SqlitePool) -> Result<DanglingPolicy> {
    let value: Option<String> =
        sqlx::query_scalar("SELECT value FROM settings WHERE key = 'denorm_dangling_policy'")
            .fetch_optional(pool)
            .await?;

    match value {
        Some(raw) => match DanglingPolicy::parse(&raw) {
            Some(policy) => Ok(policy),
            None => {
                warn!(
                    "Unrecognized denorm_dangling_policy '{}', using {:?}",
                    raw,
                    DanglingPolicy::default()
                );
                Ok(DanglingPolicy::default())
            }
        },
        None => Ok(DanglingPolicy::default()),
    }
}

/// Read a table's column names via PRAGMA table_info, failing if the table
/// does not exist
async fn require_table_columns(pool: &SqlitePool, table: &str) -> Result<HashSet<String>> {
    let query = format!("PRAGMA table_info({})", table);
    let rows = sqlx::query(&query).fetch_all(pool).await?;

    if rows.is_empty() {
        return Err(Error::DenormConfig(format!(
            "mapping references table '{}' which does not exist",
            table
        )));
    }

    Ok(rows.iter().map(|row| row.get::<String, _>("name")).collect())
}

fn require_column(table: &str, columns: &HashSet<String>, column: &str) -> Result<()> {
    if columns.contains(column) {
        Ok(())
    } else {
        Err(Error::DenormConfig(format!(
            "mapping references column '{}.{}' which does not exist",
            table, column
        )))
    }
}
