//! Database initialization
//!
//! Creates the database file on first run and the gate schema idempotently,
//! so every startup is safe against both a fresh and an existing database.

use crate::Result;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::info;

/// Open (creating if needed) the database at `db_path` and ensure the schema exists
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    sqlx::query("PRAGMA foreign_keys = ON").execute(&pool).await?;

    // WAL lets the presentation layer read while a cycle writes
    sqlx::query("PRAGMA journal_mode = WAL").execute(&pool).await?;
    sqlx::query("PRAGMA busy_timeout = 5000").execute(&pool).await?;

    create_schema(&pool).await?;

    Ok(pool)
}

/// Create all gatekeep tables and indexes (idempotent)
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    create_settings_table(pool).await?;
    create_gates_table(pool).await?;
    create_gate_bindings_table(pool).await?;
    create_checkins_table(pool).await?;
    Ok(())
}

/// Key-value runtime settings
async fn create_settings_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_gates_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS gates (
            guid TEXT PRIMARY KEY,
            event_id TEXT NOT NULL,
            name TEXT NOT NULL,
            latitude REAL NOT NULL,
            longitude REAL NOT NULL,
            merged_into TEXT REFERENCES gates(guid),
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_gates_event ON gates(event_id)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_gate_bindings_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS gate_bindings (
            gate_id TEXT PRIMARY KEY REFERENCES gates(guid) ON DELETE CASCADE,
            status TEXT NOT NULL DEFAULT 'unbound'
                CHECK (status IN ('unbound', 'probation', 'enforced', 'removed')),
            sample_count INTEGER NOT NULL DEFAULT 0 CHECK (sample_count >= 0),
            confidence REAL NOT NULL DEFAULT 0 CHECK (confidence >= 0 AND confidence <= 1),
            mean_accuracy_m REAL,
            spread_m REAL NOT NULL DEFAULT 0,
            last_updated TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Raw scan / check-in log, written by the capture side
async fn create_checkins_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS checkins (
            guid TEXT PRIMARY KEY,
            event_id TEXT NOT NULL,
            gate_id TEXT REFERENCES gates(guid),
            latitude REAL NOT NULL,
            longitude REAL NOT NULL,
            accuracy_m REAL,
            scanned_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_checkins_event_time ON checkins(event_id, scanned_at)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_checkins_gate ON checkins(gate_id)")
        .execute(pool)
        .await?;

    Ok(())
}
