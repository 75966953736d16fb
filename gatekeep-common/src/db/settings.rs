//! Runtime settings stored in the `settings` table

use crate::Result;
use sqlx::SqlitePool;
use std::str::FromStr;
use tracing::warn;

/// Read and parse a setting; `None` when absent, NULL or unparsable
pub async fn get_setting<T: FromStr>(pool: &SqlitePool, key: &str) -> Result<Option<T>> {
    let value: Option<Option<String>> = sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_optional(pool)
        .await?;

    match value.flatten() {
        Some(raw) => match raw.trim().parse::<T>() {
            Ok(parsed) => Ok(Some(parsed)),
            Err(_) => {
                warn!("Ignoring unparsable setting '{}' = '{}'", key, raw);
                Ok(None)
            }
        },
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_schema;

    async fn setup_test_db() -> SqlitePool {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        create_schema(&pool).await.unwrap();
        pool
    }

    async fn store(pool: &SqlitePool, key: &str, value: &str) {
        sqlx::query("INSERT OR REPLACE INTO settings (key, value) VALUES (?, ?)")
            .bind(key)
            .bind(value)
            .execute(pool)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_missing_setting_is_none() {
        let pool = setup_test_db().await;
        let value: Option<u64> = get_setting(&pool, "reconcile_interval_secs").await.unwrap();
        assert!(value.is_none());
    }

    #[tokio::test]
    async fn test_stored_value_parses() {
        let pool = setup_test_db().await;
        store(&pool, "reconcile_interval_secs", "45").await;
        let value: Option<u64> = get_setting(&pool, "reconcile_interval_secs").await.unwrap();
        assert_eq!(value, Some(45));

        store(&pool, "reconcile_interval_secs", "60").await;
        let value: Option<u64> = get_setting(&pool, "reconcile_interval_secs").await.unwrap();
        assert_eq!(value, Some(60));
    }

    #[tokio::test]
    async fn test_unparsable_setting_is_none() {
        let pool = setup_test_db().await;
        store(&pool, "reconcile_enabled", "sometimes").await;
        let value: Option<bool> = get_setting(&pool, "reconcile_enabled").await.unwrap();
        assert!(value.is_none());
    }
}
