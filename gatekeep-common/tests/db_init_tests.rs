//! Database initialization tests
//!
//! Covers first-run creation of the database file and idempotent reopen.

use gatekeep_common::db::init_database;
use tempfile::TempDir;

async fn table_names(pool: &sqlx::SqlitePool) -> Vec<String> {
    sqlx::query_scalar("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
        .fetch_all(pool)
        .await
        .unwrap()
}

#[tokio::test]
async fn test_init_creates_file_and_schema() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("nested").join("gatekeep.db");

    let pool = init_database(&db_path).await.unwrap();

    assert!(db_path.exists());
    let tables = table_names(&pool).await;
    for expected in ["checkins", "gate_bindings", "gates", "settings"] {
        assert!(tables.iter().any(|t| t == expected), "missing table {}", expected);
    }
}

#[tokio::test]
async fn test_init_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("gatekeep.db");

    let pool = init_database(&db_path).await.unwrap();
    sqlx::query(
        "INSERT INTO gates (guid, event_id, name, latitude, longitude, created_at, updated_at)
         VALUES ('g1', 'evt', 'Gate 1', 51.5, -0.1, '2026-01-01T00:00:00+00:00', '2026-01-01T00:00:00+00:00')",
    )
    .execute(&pool)
    .await
    .unwrap();
    pool.close().await;

    let pool = init_database(&db_path).await.unwrap();
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM gates")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 1);
}

#[tokio::test]
async fn test_binding_rejects_negative_sample_count() {
    let dir = TempDir::new().unwrap();
    let pool = init_database(&dir.path().join("gatekeep.db")).await.unwrap();

    sqlx::query(
        "INSERT INTO gates (guid, event_id, name, latitude, longitude, created_at, updated_at)
         VALUES ('g1', 'evt', 'Gate 1', 51.5, -0.1, '2026-01-01T00:00:00+00:00', '2026-01-01T00:00:00+00:00')",
    )
    .execute(&pool)
    .await
    .unwrap();

    let result = sqlx::query(
        "INSERT INTO gate_bindings (gate_id, status, sample_count, confidence, spread_m, last_updated)
         VALUES ('g1', 'unbound', -1, 0.5, 0, '2026-01-01T00:00:00+00:00')",
    )
    .execute(&pool)
    .await;
    assert!(result.is_err());
}
