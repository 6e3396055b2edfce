//! End-to-end tests for the denormalization synchronization engine
//!
//! Runs the real startup sequence (init_database + validated registry) and
//! drives writes through the row write path, verifying:
//! - pull correctness and null propagation on the dependent side
//! - push fan-out correctness and the no-op guarantee on the source side
//! - transaction-level abort on misconfiguration (no partial writes)
//! - the configurable dangling-reference policy

use lexcorpus_common::db::denorm::DanglingPolicy;
use lexcorpus_common::db::registry::{SyncRegistry, WriteHook};
use lexcorpus_common::db::values::{row_from_json, SqlValue};
use lexcorpus_common::db::writer::RowWriter;
use lexcorpus_common::db::{init_database, init_row_writer, init_sync_registry, CaseMetadata};
use lexcorpus_common::Error;
use serde_json::json;
use sqlx::SqlitePool;
use tempfile::TempDir;

async fn setup() -> (TempDir, SqlitePool, RowWriter) {
    let dir = TempDir::new().unwrap();
    let db_path = lexcorpus_common::config::database_path(dir.path());
    let pool = init_database(&db_path).await.unwrap();
    let writer = init_row_writer(&pool).await.unwrap();
    (dir, pool, writer)
}

async fn seed_jurisdictions(writer: &RowWriter) {
    writer
        .insert(
            "jurisdictions",
            &row_from_json(&json!({"id": 7, "slug": "ca", "name": "California"})).unwrap(),
        )
        .await
        .unwrap();
    writer
        .insert(
            "jurisdictions",
            &row_from_json(&json!({"id": 9, "slug": "ny", "name": "New York"})).unwrap(),
        )
        .await
        .unwrap();
}

async fn fetch_case(pool: &SqlitePool, id: i64) -> CaseMetadata {
    sqlx::query_as("SELECT * FROM cases WHERE id = ?")
        .bind(id)
        .fetch_one(pool)
        .await
        .unwrap()
}

#[tokio::test]
async fn test_init_creates_schema_and_default_settings() {
    let (_dir, pool, writer) = setup().await;

    let tables: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN \
         ('jurisdictions', 'courts', 'cases', 'settings')",
    )
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(tables, 4);

    let policy: String =
        sqlx::query_scalar("SELECT value FROM settings WHERE key = 'denorm_dangling_policy'")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(policy, "warn");

    // The registered data-flow graph is inspectable
    assert_eq!(writer.registry().registrations().len(), 4);
}

#[tokio::test]
async fn test_insert_pulls_source_values() {
    // Scenario A: dependent inserted with a link copies the source values
    let (_dir, pool, writer) = setup().await;
    seed_jurisdictions(&writer).await;

    writer
        .insert(
            "cases",
            &row_from_json(&json!({
                "id": 1,
                "name_abbreviation": "Smith v. Jones",
                "decision_date": "1998-05-04",
                "jurisdiction_id": 7,
            }))
            .unwrap(),
        )
        .await
        .unwrap();

    let case = fetch_case(&pool, 1).await;
    assert_eq!(case.jurisdiction_slug.as_deref(), Some("ca"));
    assert_eq!(case.jurisdiction_name.as_deref(), Some("California"));
    assert_eq!(case.decision_date.unwrap().to_string(), "1998-05-04");
}

#[tokio::test]
async fn test_unlink_nulls_denormalized_columns() {
    // Scenario B: clearing the link clears the copies in the same write
    let (_dir, pool, writer) = setup().await;
    seed_jurisdictions(&writer).await;

    writer
        .insert(
            "cases",
            &row_from_json(
                &json!({"id": 1, "name_abbreviation": "Smith v. Jones", "jurisdiction_id": 7}),
            )
            .unwrap(),
        )
        .await
        .unwrap();

    writer
        .update(
            "cases",
            "id",
            &SqlValue::Integer(1),
            &row_from_json(&json!({"jurisdiction_id": null})).unwrap(),
        )
        .await
        .unwrap();

    let case = fetch_case(&pool, 1).await;
    assert_eq!(case.jurisdiction_id, None);
    assert_eq!(case.jurisdiction_slug, None);
    assert_eq!(case.jurisdiction_name, None);
}

#[tokio::test]
async fn test_relink_refetches_from_new_source() {
    let (_dir, pool, writer) = setup().await;
    seed_jurisdictions(&writer).await;

    writer
        .insert(
            "cases",
            &row_from_json(
                &json!({"id": 1, "name_abbreviation": "Smith v. Jones", "jurisdiction_id": 7}),
            )
            .unwrap(),
        )
        .await
        .unwrap();

    writer
        .update(
            "cases",
            "id",
            &SqlValue::Integer(1),
            &row_from_json(&json!({"jurisdiction_id": 9})).unwrap(),
        )
        .await
        .unwrap();

    let case = fetch_case(&pool, 1).await;
    assert_eq!(case.jurisdiction_slug.as_deref(), Some("ny"));
    assert_eq!(case.jurisdiction_name.as_deref(), Some("New York"));
}

#[tokio::test]
async fn test_unchanged_link_performs_no_source_fetch() {
    // Pull idempotence: an update that leaves the link unchanged must not
    // re-fetch the source row. Proven by deleting the source out-of-band
    // and planting a sentinel copy: a re-fetch would disturb the sentinel
    // (or trip over the missing row), so surviving intact means no fetch.
    let (_dir, pool, writer) = setup().await;
    seed_jurisdictions(&writer).await;

    writer
        .insert(
            "cases",
            &row_from_json(
                &json!({"id": 1, "name_abbreviation": "Smith v. Jones", "jurisdiction_id": 7}),
            )
            .unwrap(),
        )
        .await
        .unwrap();

    sqlx::query("DELETE FROM jurisdictions WHERE id = 7")
        .execute(&pool)
        .await
        .unwrap();
    sqlx::query("UPDATE cases SET jurisdiction_slug = 'sentinel' WHERE id = 1")
        .execute(&pool)
        .await
        .unwrap();

    writer
        .update(
            "cases",
            "id",
            &SqlValue::Integer(1),
            &row_from_json(&json!({"name_abbreviation": "Smith v. Jones et al."})).unwrap(),
        )
        .await
        .unwrap();

    let case = fetch_case(&pool, 1).await;
    assert_eq!(case.name_abbreviation, "Smith v. Jones et al.");
    assert_eq!(case.jurisdiction_slug.as_deref(), Some("sentinel"));
}

#[tokio::test]
async fn test_source_update_fans_out_to_linked_dependents() {
    // Scenario C: jurisdiction slug ca -> cal propagates to every linked
    // case and court; rows linked elsewhere are untouched
    let (_dir, pool, writer) = setup().await;
    seed_jurisdictions(&writer).await;

    writer
        .insert(
            "courts",
            &row_from_json(
                &json!({"id": 20, "slug": "cal-sup", "name": "Supreme Court of California", "jurisdiction_id": 7}),
            )
            .unwrap(),
        )
        .await
        .unwrap();
    for (id, jurisdiction_id) in [(1, 7), (2, 7), (3, 9)] {
        writer
            .insert(
                "cases",
                &row_from_json(&json!({
                    "id": id,
                    "name_abbreviation": format!("Case {}", id),
                    "jurisdiction_id": jurisdiction_id,
                }))
                .unwrap(),
            )
            .await
            .unwrap();
    }

    writer
        .update(
            "jurisdictions",
            "id",
            &SqlValue::Integer(7),
            &row_from_json(&json!({"slug": "cal"})).unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(fetch_case(&pool, 1).await.jurisdiction_slug.as_deref(), Some("cal"));
    assert_eq!(fetch_case(&pool, 2).await.jurisdiction_slug.as_deref(), Some("cal"));
    // Name did not change, so the copied name is untouched
    assert_eq!(
        fetch_case(&pool, 1).await.jurisdiction_name.as_deref(),
        Some("California")
    );
    // Linked to a different jurisdiction: unaffected
    assert_eq!(fetch_case(&pool, 3).await.jurisdiction_slug.as_deref(), Some("ny"));

    // The push also covers the courts table
    let court_slug: Option<String> =
        sqlx::query_scalar("SELECT jurisdiction_slug FROM courts WHERE id = 20")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(court_slug.as_deref(), Some("cal"));
}

#[tokio::test]
async fn test_source_update_of_unmapped_column_writes_nothing() {
    // Push no-op: changing a column outside the field map must not touch
    // dependents. Proven with a sentinel planted in the copy.
    let (_dir, pool, writer) = setup().await;
    seed_jurisdictions(&writer).await;

    writer
        .insert(
            "cases",
            &row_from_json(&json!({"id": 1, "name_abbreviation": "Case 1", "jurisdiction_id": 7}))
                .unwrap(),
        )
        .await
        .unwrap();
    sqlx::query("UPDATE cases SET jurisdiction_slug = 'sentinel' WHERE id = 1")
        .execute(&pool)
        .await
        .unwrap();

    writer
        .update(
            "jurisdictions",
            "id",
            &SqlValue::Integer(7),
            &row_from_json(&json!({"name_long": "State of California"})).unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(fetch_case(&pool, 1).await.jurisdiction_slug.as_deref(), Some("sentinel"));
}

#[tokio::test]
async fn test_court_pull_then_case_chain() {
    let (_dir, pool, writer) = setup().await;
    seed_jurisdictions(&writer).await;

    // Courts denormalize the jurisdiction slug on insert
    writer
        .insert(
            "courts",
            &row_from_json(
                &json!({"id": 20, "slug": "cal-sup", "name": "Supreme Court of California", "jurisdiction_id": 7}),
            )
            .unwrap(),
        )
        .await
        .unwrap();
    let slug: Option<String> =
        sqlx::query_scalar("SELECT jurisdiction_slug FROM courts WHERE id = 20")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(slug.as_deref(), Some("ca"));

    // Cases pull court columns through the second mapping of the same hook
    writer
        .insert(
            "cases",
            &row_from_json(&json!({
                "id": 1,
                "name_abbreviation": "Case 1",
                "jurisdiction_id": 7,
                "court_id": 20,
            }))
            .unwrap(),
        )
        .await
        .unwrap();

    let case = fetch_case(&pool, 1).await;
    assert_eq!(case.court_slug.as_deref(), Some("cal-sup"));
    assert_eq!(case.court_name.as_deref(), Some("Supreme Court of California"));
    assert_eq!(case.jurisdiction_slug.as_deref(), Some("ca"));

    // Renaming the court pushes to its cases
    writer
        .update(
            "courts",
            "id",
            &SqlValue::Integer(20),
            &row_from_json(&json!({"name": "California Supreme Court"})).unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(
        fetch_case(&pool, 1).await.court_name.as_deref(),
        Some("California Supreme Court")
    );
}

#[tokio::test]
async fn test_malformed_registration_aborts_whole_write() {
    // Scenario D: an argument list that is not a multiple of four aborts
    // the transaction; the triggering row itself is rolled back
    let (_dir, pool, writer) = setup().await;
    seed_jurisdictions(&writer).await;

    let mut broken = SyncRegistry::new(DanglingPolicy::Warn);
    broken.attach(
        "cases",
        WriteHook::BeforeWrite,
        vec!["jurisdictions".to_string(), "jurisdiction_id".to_string()],
    );
    let broken_writer = RowWriter::new(pool.clone(), broken);

    let err = broken_writer
        .insert(
            "cases",
            &row_from_json(&json!({"id": 1, "name_abbreviation": "Case 1", "jurisdiction_id": 7}))
                .unwrap(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::DenormConfig(_)), "got: {:?}", err);

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM cases")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 0, "no partial write may be visible");
}

#[tokio::test]
async fn test_strict_dangling_policy_aborts_write() {
    let (_dir, pool, _writer) = setup().await;

    sqlx::query("UPDATE settings SET value = 'error' WHERE key = 'denorm_dangling_policy'")
        .execute(&pool)
        .await
        .unwrap();
    let strict_writer = init_row_writer(&pool).await.unwrap();
    assert_eq!(strict_writer.registry().policy(), DanglingPolicy::Error);

    // jurisdiction 404 does not exist
    let err = strict_writer
        .insert(
            "cases",
            &row_from_json(
                &json!({"id": 1, "name_abbreviation": "Case 1", "jurisdiction_id": 404}),
            )
            .unwrap(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::DanglingReference(_)), "got: {:?}", err);

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM cases")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 0);
}

#[tokio::test]
async fn test_tolerant_dangling_policy_keeps_write() {
    // Default policy: the dangling reference is logged and skipped, the
    // triggering write itself goes through with the copies left alone
    let (_dir, pool, writer) = setup().await;

    writer
        .insert(
            "cases",
            &row_from_json(
                &json!({"id": 1, "name_abbreviation": "Case 1", "jurisdiction_id": 404}),
            )
            .unwrap(),
        )
        .await
        .unwrap();

    let case = fetch_case(&pool, 1).await;
    assert_eq!(case.jurisdiction_id, Some(404));
    assert_eq!(case.jurisdiction_slug, None);
}

#[tokio::test]
async fn test_registry_validation_fails_on_schema_mismatch() {
    // A registry referencing a column the schema does not have must fail
    // startup validation, before any traffic
    let (_dir, pool, _writer) = setup().await;

    let mut registry = init_sync_registry(&pool).await.unwrap();
    registry.attach(
        "cases",
        WriteHook::BeforeWrite,
        vec![
            "jurisdictions".to_string(),
            "jurisdiction_id".to_string(),
            "id".to_string(),
            r#"{"slug": "no_such_column"}"#.to_string(),
        ],
    );

    let err = registry.validate(&pool).await.unwrap_err();
    assert!(matches!(err, Error::DenormConfig(_)), "got: {:?}", err);
}
