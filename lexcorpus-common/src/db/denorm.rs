//! Denormalization Synchronization Engine
//!
//! Keeps denormalized (copied) columns on dependent tables consistent with
//! their source-of-truth columns, in both directions, driven by row writes.
//!
//! **[ARCH-DENORM-010]** Metadata-driven mappings (no per-table code)
//! **[ARCH-DENORM-020]** Pull: dependent row writes copy from the source row
//! **[ARCH-DENORM-030]** Push: source row updates fan out to all dependents
//! **[ARCH-DENORM-040]** All statements run inside the caller's transaction
//!
//! # Directions
//!
//! A mapping is registered per attached table and per direction:
//!
//! - **Pull** runs on the before-write hook of a table carrying denormalized
//!   columns. When the row's linking column changes, the current source row
//!   is fetched and the mapped values are copied onto the row before it is
//!   persisted, so the copy lands in the same row version as the triggering
//!   change.
//! - **Push** runs on the after-write hook of a source-of-truth table. When
//!   any mapped source column changes, a single bulk UPDATE rewrites the
//!   mapped columns of every dependent row linked to that source row.
//!
//! Both passes are single linear sweeps over the registered mappings. The
//! engine holds no state between invocations, adds no locking of its own,
//! and never issues a write outside the hosting transaction, so a rollback
//! of that transaction leaves nothing to reconcile.
//!
//! # Identifier trust boundary
//!
//! **[ARCH-DENORM-050]** Generated statements bind *values* through `?`
//! placeholders, but table and column *identifiers* are interpolated
//! verbatim from the mapping. Mappings are authored in code at registration
//! time and validated against the live schema on startup (see
//! `db::registry`); they must never be constructed from request-scoped
//! input. There is deliberately no API path that does so.

use crate::db::values::{bind_value, decode_row, RowValues, SqlValue};
use crate::{Error, Result};
use sqlx::SqliteConnection;
use tracing::{debug, warn};

/// Arguments per mapping in a flat registration argument list
pub const MAPPING_ARG_GROUP: usize = 4;

const NULL_VALUE: SqlValue = SqlValue::Null;

/// One denormalization relationship, decoded from a registration
///
/// The first argument of a group names the table on the *other* side of the
/// relationship from the row being processed:
///
/// - Pull: `remote_table` is the source table; `link_column` is on the row
///   being written; `source_key_column` is on `remote_table`.
/// - Push: `remote_table` is the dependent table; `link_column` is on
///   `remote_table`; `source_key_column` is on the row being written.
///
/// `field_map` always maps source column -> destination (denormalized)
/// column and is fixed for the lifetime of a registration.
#[derive(Debug, Clone, PartialEq)]
pub struct DenormMapping {
    pub remote_table: String,
    pub link_column: String,
    pub source_key_column: String,
    pub field_map: Vec<(String, String)>,
}

/// Which kind of row write is being processed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowOp {
    Insert,
    Update,
}

/// What to do when a non-null linking value matches zero rows (a dangling
/// reference, e.g. after an out-of-band delete) or several rows (a
/// non-unique source key).
///
/// `Skip` reproduces the historical behavior of leaving the denormalized
/// columns untouched with no trace. `Warn` (the default) also leaves them
/// untouched but logs the reference so referential rot is visible. `Error`
/// aborts the enclosing transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DanglingPolicy {
    Skip,
    #[default]
    Warn,
    Error,
}

impl DanglingPolicy {
    /// Parse a settings-table value; `None` for unrecognized input
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "skip" => Some(DanglingPolicy::Skip),
            "warn" => Some(DanglingPolicy::Warn),
            "error" => Some(DanglingPolicy::Error),
            _ => None,
        }
    }
}

/// Decode a flat registration argument list into mappings
///
/// Arguments are consumed in fixed groups of four:
/// `(table, linkColumn, sourceKeyColumn, fieldMapJSON)`, where the fourth
/// element is a JSON object of source column -> destination column.
///
/// **[ARCH-DENORM-010]** Registrations are re-parsed on every invocation;
/// the engine keeps no state between writes.
pub fn parse_mapping_args(args: &[String]) -> Result<Vec<DenormMapping>> {
    if args.len() % MAPPING_ARG_GROUP != 0 {
        return Err(Error::DenormConfig(format!(
            "mapping argument count must be a multiple of {}, got {}",
            MAPPING_ARG_GROUP,
            args.len()
        )));
    }

    let mut mappings = Vec::with_capacity(args.len() / MAPPING_ARG_GROUP);

    for group in args.chunks_exact(MAPPING_ARG_GROUP) {
        let field_map = parse_field_map(&group[0], &group[3])?;

        mappings.push(DenormMapping {
            remote_table: group[0].clone(),
            link_column: group[1].clone(),
            source_key_column: group[2].clone(),
            field_map,
        });
    }

    Ok(mappings)
}

fn parse_field_map(table: &str, raw: &str) -> Result<Vec<(String, String)>> {
    let value: serde_json::Value = serde_json::from_str(raw).map_err(|e| {
        Error::DenormConfig(format!("undecodable field map for table '{}': {}", table, e))
    })?;

    let object = value.as_object().ok_or_else(|| {
        Error::DenormConfig(format!(
            "field map for table '{}' must be a JSON object, got: {}",
            table, value
        ))
    })?;

    if object.is_empty() {
        return Err(Error::DenormConfig(format!(
            "field map for table '{}' is empty",
            table
        )));
    }

    let mut field_map = Vec::with_capacity(object.len());
    for (source_column, dest) in object {
        let dest_column = dest.as_str().ok_or_else(|| {
            Error::DenormConfig(format!(
                "field map for table '{}' maps '{}' to a non-string value",
                table, source_column
            ))
        })?;
        field_map.push((source_column.clone(), dest_column.to_string()));
    }

    Ok(field_map)
}

/// Builds the read/write statements shared by both synchronizers.
///
/// Values are always bound via `?`; identifiers come verbatim from the
/// mapping (see the module-level trust boundary note).
pub struct StatementBuilder;

impl StatementBuilder {
    /// `SELECT <source columns> FROM <source table> WHERE <key column> = ?`
    pub fn source_select(mapping: &DenormMapping) -> String {
        let columns: Vec<&str> = mapping.field_map.iter().map(|(src, _)| src.as_str()).collect();
        format!(
            "SELECT {} FROM {} WHERE {} = ?",
            columns.join(", "),
            mapping.remote_table,
            mapping.source_key_column
        )
    }

    /// `UPDATE <dependent table> SET <dest> = ?, ... WHERE <link column> = ?`
    ///
    /// `changed_sources` selects the subset of the field map to rewrite; the
    /// caller binds the new source values in the same order, then the key.
    pub fn dependent_update(mapping: &DenormMapping, changed_sources: &[&str]) -> String {
        let assignments: Vec<String> = mapping
            .field_map
            .iter()
            .filter(|(src, _)| changed_sources.contains(&src.as_str()))
            .map(|(_, dest)| format!("{} = ?", dest))
            .collect();

        format!(
            "UPDATE {} SET {} WHERE {} = ?",
            mapping.remote_table,
            assignments.join(", "),
            mapping.link_column
        )
    }
}

fn value_of<'a>(row: &'a RowValues, column: &str) -> &'a SqlValue {
    row.get(column).unwrap_or(&NULL_VALUE)
}

/// Pull Synchronizer: copy FROM the source row INTO the row being written.
///
/// **[ARCH-DENORM-020]** Runs on the before-write hook; returns an amended
/// copy of `incoming` for the caller to persist. The input snapshots are
/// never mutated.
///
/// Per mapping:
/// - linking column unchanged (UPDATE) or absent (INSERT): nothing to do
/// - linking column newly null: every destination column is nulled out
/// - otherwise the source row is fetched by its key and each mapped value
///   is copied; a missing or ambiguous source row falls to `policy`
pub async fn pull_sync(
    conn: &mut SqliteConnection,
    op: RowOp,
    prior: Option<&RowValues>,
    incoming: &RowValues,
    mappings: &[DenormMapping],
    policy: DanglingPolicy,
) -> Result<RowValues> {
    let mut amended = incoming.clone();

    for mapping in mappings {
        match op {
            RowOp::Insert => {
                if !incoming.contains_key(&mapping.link_column) {
                    // Link not supplied on insert: no denormalization work
                    continue;
                }
            }
            RowOp::Update => {
                let prior_link = prior.map_or(&NULL_VALUE, |p| value_of(p, &mapping.link_column));
                if prior_link == value_of(incoming, &mapping.link_column) {
                    // At-most-once-per-change: unchanged link means the
                    // denormalized columns are already current
                    continue;
                }
            }
        }

        let link = value_of(incoming, &mapping.link_column);

        if link.is_null() {
            // Unlinked: the denormalized copies are cleared with the link
            for (_, dest_column) in &mapping.field_map {
                amended.insert(dest_column.clone(), SqlValue::Null);
            }
            debug!(
                "Denorm pull: cleared {} columns from {} (link {} is null)",
                mapping.field_map.len(),
                mapping.remote_table,
                mapping.link_column
            );
            continue;
        }

        let sql = StatementBuilder::source_select(mapping);
        let rows = bind_value(sqlx::query(&sql), link).fetch_all(&mut *conn).await?;

        if rows.len() != 1 {
            handle_dangling(mapping, link, rows.len(), policy)?;
            continue;
        }

        let source_row = decode_row(&rows[0])?;
        for (source_column, dest_column) in &mapping.field_map {
            amended.insert(dest_column.clone(), value_of(&source_row, source_column).clone());
        }
        debug!(
            "Denorm pull: copied {} columns from {}.{} = {}",
            mapping.field_map.len(),
            mapping.remote_table,
            mapping.source_key_column,
            link
        );
    }

    Ok(amended)
}

fn handle_dangling(
    mapping: &DenormMapping,
    link: &SqlValue,
    matched: usize,
    policy: DanglingPolicy,
) -> Result<()> {
    let description = format!(
        "{} row(s) in {} match {} = {}; denormalized columns left unchanged",
        matched, mapping.remote_table, mapping.source_key_column, link
    );

    match policy {
        DanglingPolicy::Skip => {
            debug!("Denorm pull: {}", description);
            Ok(())
        }
        DanglingPolicy::Warn => {
            warn!("Denorm pull: {}", description);
            Ok(())
        }
        DanglingPolicy::Error => Err(Error::DanglingReference(description)),
    }
}

/// Push Synchronizer: copy FROM the row just written TO all dependent rows.
///
/// **[ARCH-DENORM-030]** Runs on the after-write hook of a source table's
/// UPDATE. For each mapping whose source columns actually changed, one bulk
/// UPDATE rewrites the mapped columns of every currently-linked dependent
/// row. Fan-out is unbounded; all writes share the caller's transaction.
///
/// Returns the total number of dependent rows rewritten.
pub async fn push_sync(
    conn: &mut SqliteConnection,
    prior: &RowValues,
    incoming: &RowValues,
    mappings: &[DenormMapping],
) -> Result<u64> {
    let mut total_updated = 0u64;

    for mapping in mappings {
        let changed_sources: Vec<&str> = mapping
            .field_map
            .iter()
            .filter(|(src, _)| value_of(incoming, src) != value_of(prior, src))
            .map(|(src, _)| src.as_str())
            .collect();

        if changed_sources.is_empty() {
            // No monitored column changed: no dependent writes at all
            continue;
        }

        let key = value_of(incoming, &mapping.source_key_column);
        if key.is_null() {
            debug!(
                "Denorm push: {} has no {} value, nothing can link to it",
                mapping.remote_table, mapping.source_key_column
            );
            continue;
        }

        let sql = StatementBuilder::dependent_update(mapping, &changed_sources);
        let mut query = sqlx::query(&sql);
        for source_column in &changed_sources {
            query = bind_value(query, value_of(incoming, source_column));
        }
        query = bind_value(query, key);

        let updated = query.execute(&mut *conn).await?.rows_affected();
        total_updated += updated;

        debug!(
            "Denorm push: {} dependent row(s) in {} updated for {} = {}",
            updated, mapping.remote_table, mapping.link_column, key
        );
    }

    Ok(total_updated)
}
