//! Table Schema Definitions
//!
//! Single source of truth for the caselaw database tables and for the
//! denormalization graph between them. Each struct declares the expected
//! schema for one table; `default_sync_registry` declares which writes
//! feed which denormalized columns.
//!
//! **[ARCH-SCHEMA-010]** Declarative table definitions drive DDL
//! **[ARCH-SCHEMA-020]** The denormalization graph is declared here, next
//! to the columns it copies, and validated against these tables at startup

use crate::db::denorm::DanglingPolicy;
use crate::db::registry::{SyncRegistry, WriteHook};
use crate::Result;
use serde_json::json;
use sqlx::SqlitePool;
use tracing::info;

/// Column definition with SQL constraints
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDefinition {
    pub name: String,
    /// SQL type (e.g., "TEXT", "INTEGER", "REAL", "TIMESTAMP")
    pub sql_type: String,
    pub not_null: bool,
    pub primary_key: bool,
    pub unique: bool,
    pub default_value: Option<String>,
}

impl ColumnDefinition {
    pub fn new(name: impl Into<String>, sql_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sql_type: sql_type.into(),
            not_null: false,
            primary_key: false,
            unique: false,
            default_value: None,
        }
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn default(mut self, value: impl Into<String>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    fn to_sql(&self) -> String {
        let mut sql = format!("{} {}", self.name, self.sql_type);
        if self.primary_key {
            sql.push_str(" PRIMARY KEY");
        }
        if self.not_null {
            sql.push_str(" NOT NULL");
        }
        if self.unique {
            sql.push_str(" UNIQUE");
        }
        if let Some(default) = &self.default_value {
            sql.push_str(&format!(" DEFAULT {}", default));
        }
        sql
    }
}

/// Defines the expected schema for one database table
pub trait TableSchema {
    fn table_name() -> &'static str;

    /// Column definitions in table order
    fn expected_columns() -> Vec<ColumnDefinition>;
}

/// Generate `CREATE TABLE IF NOT EXISTS` for a declared table
pub fn create_table_sql<T: TableSchema>() -> String {
    let columns: Vec<String> = T::expected_columns().iter().map(ColumnDefinition::to_sql).collect();
    format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        T::table_name(),
        columns.join(", ")
    )
}

async fn create_table<T: TableSchema>(pool: &SqlitePool) -> Result<()> {
    sqlx::query(&create_table_sql::<T>()).execute(pool).await?;
    Ok(())
}

/// Tables the write path accepts; everything else is rejected before any
/// statement is built
pub const DECLARED_TABLES: [&str; 4] = ["jurisdictions", "courts", "cases", "settings"];

pub fn is_declared_table(table: &str) -> bool {
    DECLARED_TABLES.contains(&table)
}

/// Jurisdictions: one row per jurisdiction the corpus covers
pub struct JurisdictionsTableSchema;

impl TableSchema for JurisdictionsTableSchema {
    fn table_name() -> &'static str {
        "jurisdictions"
    }

    fn expected_columns() -> Vec<ColumnDefinition> {
        vec![
            ColumnDefinition::new("id", "INTEGER").primary_key(),
            ColumnDefinition::new("slug", "TEXT").not_null().unique(),
            ColumnDefinition::new("name", "TEXT").not_null(),
            ColumnDefinition::new("name_long", "TEXT"),
        ]
    }
}

/// Courts, each belonging to a jurisdiction
///
/// `jurisdiction_slug` is denormalized from jurisdictions for URL building
/// without a join.
pub struct CourtsTableSchema;

impl TableSchema for CourtsTableSchema {
    fn table_name() -> &'static str {
        "courts"
    }

    fn expected_columns() -> Vec<ColumnDefinition> {
        vec![
            ColumnDefinition::new("id", "INTEGER").primary_key(),
            ColumnDefinition::new("slug", "TEXT").not_null().unique(),
            ColumnDefinition::new("name", "TEXT").not_null(),
            ColumnDefinition::new("name_abbreviation", "TEXT"),
            ColumnDefinition::new("jurisdiction_id", "INTEGER"),
            // Denormalized from jurisdictions
            ColumnDefinition::new("jurisdiction_slug", "TEXT"),
        ]
    }
}

/// Case metadata: the search and listing surface of the corpus
///
/// The jurisdiction_* and court_* columns are denormalized copies; the
/// case body itself lives in external storage and is out of scope here.
pub struct CasesTableSchema;

impl TableSchema for CasesTableSchema {
    fn table_name() -> &'static str {
        "cases"
    }

    fn expected_columns() -> Vec<ColumnDefinition> {
        vec![
            ColumnDefinition::new("id", "INTEGER").primary_key(),
            ColumnDefinition::new("name_abbreviation", "TEXT").not_null(),
            ColumnDefinition::new("decision_date", "TEXT"),
            ColumnDefinition::new("jurisdiction_id", "INTEGER"),
            // Denormalized from jurisdictions
            ColumnDefinition::new("jurisdiction_slug", "TEXT"),
            ColumnDefinition::new("jurisdiction_name", "TEXT"),
            ColumnDefinition::new("court_id", "INTEGER"),
            // Denormalized from courts
            ColumnDefinition::new("court_slug", "TEXT"),
            ColumnDefinition::new("court_name", "TEXT"),
            ColumnDefinition::new("created_at", "TIMESTAMP")
                .not_null()
                .default("CURRENT_TIMESTAMP"),
            ColumnDefinition::new("updated_at", "TIMESTAMP")
                .not_null()
                .default("CURRENT_TIMESTAMP"),
        ]
    }
}

/// Key/value settings, seeded at init
pub struct SettingsTableSchema;

impl TableSchema for SettingsTableSchema {
    fn table_name() -> &'static str {
        "settings"
    }

    fn expected_columns() -> Vec<ColumnDefinition> {
        vec![
            ColumnDefinition::new("key", "TEXT").primary_key(),
            ColumnDefinition::new("value", "TEXT").not_null(),
        ]
    }
}

/// Create every declared table (idempotent)
pub async fn create_declared_tables(pool: &SqlitePool) -> Result<()> {
    create_table::<SettingsTableSchema>(pool).await?;
    create_table::<JurisdictionsTableSchema>(pool).await?;
    create_table::<CourtsTableSchema>(pool).await?;
    create_table::<CasesTableSchema>(pool).await?;

    info!("Declared tables created ({} tables)", DECLARED_TABLES.len());
    Ok(())
}

fn mapping_args(table: &str, link: &str, key: &str, field_map: serde_json::Value) -> Vec<String> {
    vec![
        table.to_string(),
        link.to_string(),
        key.to_string(),
        field_map.to_string(),
    ]
}

/// The site's denormalization graph
///
/// **[ARCH-SCHEMA-020]** Every denormalized column above appears here
/// exactly once per direction:
///
/// - cases pull from jurisdictions and courts on before-write
/// - courts pull from jurisdictions on before-write
/// - jurisdictions push to cases and courts on after-write
/// - courts push to cases on after-write
pub fn default_sync_registry(policy: DanglingPolicy) -> SyncRegistry {
    let mut registry = SyncRegistry::new(policy);

    let jurisdiction_fields = json!({"slug": "jurisdiction_slug", "name": "jurisdiction_name"});
    let court_fields = json!({"slug": "court_slug", "name": "court_name"});
    let court_jurisdiction_fields = json!({"slug": "jurisdiction_slug"});

    registry.attach(
        "cases",
        WriteHook::BeforeWrite,
        [
            mapping_args("jurisdictions", "jurisdiction_id", "id", jurisdiction_fields.clone()),
            mapping_args("courts", "court_id", "id", court_fields.clone()),
        ]
        .concat(),
    );
    registry.attach(
        "courts",
        WriteHook::BeforeWrite,
        mapping_args("jurisdictions", "jurisdiction_id", "id", court_jurisdiction_fields.clone()),
    );

    registry.attach(
        "jurisdictions",
        WriteHook::AfterWrite,
        [
            mapping_args("cases", "jurisdiction_id", "id", jurisdiction_fields),
            mapping_args("courts", "jurisdiction_id", "id", court_jurisdiction_fields),
        ]
        .concat(),
    );
    registry.attach(
        "courts",
        WriteHook::AfterWrite,
        mapping_args("cases", "court_id", "id", court_fields),
    );

    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn setup_test_db() -> SqlitePool {
        SqlitePoolOptions::new()
            .connect("sqlite::memory:")
            .await
            .unwrap()
    }

    #[test]
    fn test_create_table_sql() {
        assert_eq!(
            create_table_sql::<SettingsTableSchema>(),
            "CREATE TABLE IF NOT EXISTS settings (key TEXT PRIMARY KEY, value TEXT NOT NULL)"
        );

        let cases_sql = create_table_sql::<CasesTableSchema>();
        assert!(cases_sql.starts_with("CREATE TABLE IF NOT EXISTS cases (id INTEGER PRIMARY KEY"));
        assert!(cases_sql.contains("created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP"));
    }

    #[test]
    fn test_declared_tables() {
        assert!(is_declared_table("cases"));
        assert!(is_declared_table("settings"));
        assert!(!is_declared_table("sqlite_master"));
    }

    #[tokio::test]
    async fn test_create_declared_tables_is_idempotent() {
        let pool = setup_test_db().await;

        create_declared_tables(&pool).await.unwrap();
        create_declared_tables(&pool).await.unwrap();

        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN \
             ('jurisdictions', 'courts', 'cases', 'settings')",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(count, 4);
    }

    #[tokio::test]
    async fn test_default_registry_validates_against_declared_schema() {
        let pool = setup_test_db().await;
        create_declared_tables(&pool).await.unwrap();

        let registry = default_sync_registry(DanglingPolicy::Warn);
        registry.validate(&pool).await.unwrap();

        // Every denormalization direction is registered
        assert_eq!(registry.registrations().len(), 4);
    }
}
