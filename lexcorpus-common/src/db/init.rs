//! Database initialization
//!
//! **[ARCH-INIT-010]** Startup sequence: open/create the database, apply
//! connection PRAGMAs, create declared tables, seed default settings, then
//! build and validate the denormalization registry before any traffic.

use crate::db::registry::{load_dangling_policy, SyncRegistry};
use crate::db::table_schemas::{create_declared_tables, default_sync_registry};
use crate::db::writer::RowWriter;
use crate::Result;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::info;

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    // Create parent directory if it doesn't exist
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    // Enable foreign keys
    sqlx::query("PRAGMA foreign_keys = ON").execute(&pool).await?;

    // WAL allows concurrent readers with one writer, which the editor and
    // search services rely on
    sqlx::query("PRAGMA journal_mode = WAL").execute(&pool).await?;

    sqlx::query("PRAGMA busy_timeout = 5000").execute(&pool).await?;

    create_declared_tables(&pool).await?;
    init_default_settings(&pool).await?;

    // Apply the configurable busy timeout now that settings exist
    let timeout_ms: i64 = sqlx::query_scalar(
        "SELECT CAST(value AS INTEGER) FROM settings WHERE key = 'db_busy_timeout_ms'",
    )
    .fetch_optional(&pool)
    .await?
    .unwrap_or(5000);

    let pragma_sql = format!("PRAGMA busy_timeout = {}", timeout_ms);
    sqlx::query(&pragma_sql).execute(&pool).await?;

    info!("Database busy timeout set to {} ms", timeout_ms);

    Ok(pool)
}

/// Seed default settings (idempotent; existing values win)
async fn init_default_settings(pool: &SqlitePool) -> Result<()> {
    let defaults = [
        // What to do when a linking column points at a missing source row:
        // skip | warn | error
        ("denorm_dangling_policy", "warn"),
        ("db_busy_timeout_ms", "5000"),
    ];

    for (key, value) in defaults {
        sqlx::query("INSERT OR IGNORE INTO settings (key, value) VALUES (?, ?)")
            .bind(key)
            .bind(value)
            .execute(pool)
            .await?;
    }

    Ok(())
}

/// Build the site's denormalization registry and validate it against the
/// live schema.
///
/// **[ARCH-INIT-020]** Validation happens here, once, at startup; a
/// misconfigured mapping fails the service before any row is written.
pub async fn init_sync_registry(pool: &SqlitePool) -> Result<SyncRegistry> {
    let policy = load_dangling_policy(pool).await?;
    let registry = default_sync_registry(policy);
    registry.validate(pool).await?;
    Ok(registry)
}

/// Convenience: initialized writer over the validated default registry
pub async fn init_row_writer(pool: &SqlitePool) -> Result<RowWriter> {
    let registry = init_sync_registry(pool).await?;
    Ok(RowWriter::new(pool.clone(), registry))
}
