//! SQLite-backed gate store
//!
//! Uuids are stored as TEXT, timestamps as RFC 3339 TEXT. Multi-row writes
//! (`create_gate`, `commit_snapshot`, `attribute_checkins`, `commit_merge`) run
//! inside a transaction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gatekeep_common::geo::Coordinate;
use gatekeep_common::models::{BindingStatus, Gate, GateBinding, ScanObservation};
use gatekeep_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use uuid::Uuid;

use super::{BindingFilter, GateFilter, GateStore};
use crate::engine::merge::MergeCommit;

const GATE_COLUMNS: &str =
    "g.guid, g.event_id, g.name, g.latitude, g.longitude, g.merged_into, g.created_at, g.updated_at";

const BINDING_COLUMNS: &str =
    "b.gate_id, b.status, b.sample_count, b.confidence, b.mean_accuracy_m, b.spread_m, b.last_updated";

/// Gate store over a sqlx SQLite pool
#[derive(Clone)]
pub struct SqliteGateStore {
    pool: SqlitePool,
}

impl SqliteGateStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Append a raw check-in (the capture side's write path)
    pub async fn record_checkin(&self, checkin: &ScanObservation) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO checkins (guid, event_id, gate_id, latitude, longitude, accuracy_m, scanned_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(checkin.id.to_string())
        .bind(&checkin.event_id)
        .bind(checkin.gate_id.map(|id| id.to_string()))
        .bind(checkin.location.latitude)
        .bind(checkin.location.longitude)
        .bind(checkin.accuracy_m)
        .bind(checkin.scanned_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn gate_exists(&self, gate_id: Uuid) -> Result<bool> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM gates WHERE guid = ?")
            .bind(gate_id.to_string())
            .fetch_one(&self.pool)
            .await?;
        Ok(count > 0)
    }
}

fn parse_uuid(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).map_err(|e| Error::InvalidInput(format!("bad uuid '{}': {}", raw, e)))
}

fn gate_from_row(row: &SqliteRow) -> Result<Gate> {
    let merged_into: Option<String> = row.try_get("merged_into")?;
    Ok(Gate {
        id: parse_uuid(&row.try_get::<String, _>("guid")?)?,
        name: row.try_get("name")?,
        location: Coordinate::new(row.try_get("latitude")?, row.try_get("longitude")?),
        event_id: row.try_get("event_id")?,
        merged_into: merged_into.as_deref().map(parse_uuid).transpose()?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn binding_from_row(row: &SqliteRow) -> Result<GateBinding> {
    let status: String = row.try_get("status")?;
    let sample_count: i64 = row.try_get("sample_count")?;
    Ok(GateBinding {
        gate_id: parse_uuid(&row.try_get::<String, _>("gate_id")?)?,
        status: status.parse()?,
        sample_count: u32::try_from(sample_count)
            .map_err(|_| Error::InvalidInput(format!("sample_count out of range: {}", sample_count)))?,
        confidence: row.try_get("confidence")?,
        mean_accuracy_m: row.try_get("mean_accuracy_m")?,
        spread_m: row.try_get("spread_m")?,
        last_updated: row.try_get("last_updated")?,
    })
}

fn checkin_from_row(row: &SqliteRow) -> Result<ScanObservation> {
    let gate_id: Option<String> = row.try_get("gate_id")?;
    Ok(ScanObservation {
        id: parse_uuid(&row.try_get::<String, _>("guid")?)?,
        event_id: row.try_get("event_id")?,
        location: Coordinate::new(row.try_get("latitude")?, row.try_get("longitude")?),
        accuracy_m: row.try_get("accuracy_m")?,
        scanned_at: row.try_get("scanned_at")?,
        gate_id: gate_id.as_deref().map(parse_uuid).transpose()?,
    })
}

async fn write_gate<'e, E>(executor: E, gate: &Gate) -> Result<()>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO gates (guid, event_id, name, latitude, longitude, merged_into, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(guid) DO UPDATE SET
            name = excluded.name,
            latitude = excluded.latitude,
            longitude = excluded.longitude,
            merged_into = excluded.merged_into,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(gate.id.to_string())
    .bind(&gate.event_id)
    .bind(&gate.name)
    .bind(gate.location.latitude)
    .bind(gate.location.longitude)
    .bind(gate.merged_into.map(|id| id.to_string()))
    .bind(gate.created_at)
    .bind(gate.updated_at)
    .execute(executor)
    .await?;

    Ok(())
}

async fn write_binding<'e, E>(executor: E, binding: &GateBinding) -> Result<()>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO gate_bindings
            (gate_id, status, sample_count, confidence, mean_accuracy_m, spread_m, last_updated)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(gate_id) DO UPDATE SET
            status = excluded.status,
            sample_count = excluded.sample_count,
            confidence = excluded.confidence,
            mean_accuracy_m = excluded.mean_accuracy_m,
            spread_m = excluded.spread_m,
            last_updated = excluded.last_updated
        "#,
    )
    .bind(binding.gate_id.to_string())
    .bind(binding.status.as_str())
    .bind(binding.sample_count as i64)
    .bind(binding.confidence)
    .bind(binding.mean_accuracy_m)
    .bind(binding.spread_m)
    .bind(binding.last_updated)
    .execute(executor)
    .await?;

    Ok(())
}

#[async_trait]
impl GateStore for SqliteGateStore {
    async fn list_event_ids(&self) -> Result<Vec<String>> {
        let ids: Vec<String> = sqlx::query_scalar(
            "SELECT event_id FROM gates UNION SELECT event_id FROM checkins ORDER BY 1",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn list_gates(&self, event_id: &str, filter: GateFilter) -> Result<Vec<Gate>> {
        let sql = match filter {
            GateFilter::All => format!(
                "SELECT {} FROM gates g WHERE g.event_id = ? ORDER BY g.guid",
                GATE_COLUMNS
            ),
            GateFilter::WithScans => format!(
                r#"
                SELECT {} FROM gates g
                WHERE g.event_id = ?
                  AND g.merged_into IS NULL
                  AND (EXISTS (SELECT 1 FROM checkins c WHERE c.gate_id = g.guid)
                       OR EXISTS (SELECT 1 FROM gate_bindings b
                                  WHERE b.gate_id = g.guid AND b.sample_count > 0))
                ORDER BY g.guid
                "#,
                GATE_COLUMNS
            ),
        };

        let rows = sqlx::query(&sql).bind(event_id).fetch_all(&self.pool).await?;
        rows.iter().map(gate_from_row).collect()
    }

    async fn list_bindings(&self, filter: &BindingFilter) -> Result<Vec<GateBinding>> {
        let rows = match filter {
            BindingFilter::Event(event_id) => {
                let sql = format!(
                    "SELECT {} FROM gate_bindings b JOIN gates g ON g.guid = b.gate_id \
                     WHERE g.event_id = ? ORDER BY b.gate_id",
                    BINDING_COLUMNS
                );
                sqlx::query(&sql).bind(event_id).fetch_all(&self.pool).await?
            }
        };
        rows.iter().map(binding_from_row).collect()
    }

    async fn list_recent_checkins(
        &self,
        event_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<ScanObservation>> {
        let rows = sqlx::query(
            r#"
            SELECT guid, event_id, gate_id, latitude, longitude, accuracy_m, scanned_at
            FROM checkins
            WHERE event_id = ? AND scanned_at >= ?
            ORDER BY scanned_at, guid
            "#,
        )
        .bind(event_id)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(checkin_from_row).collect()
    }

    async fn list_gate_checkins(&self, gate_ids: &[Uuid]) -> Result<Vec<ScanObservation>> {
        if gate_ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT guid, event_id, gate_id, latitude, longitude, accuracy_m, scanned_at \
             FROM checkins WHERE gate_id IN (",
        );
        let mut separated = builder.separated(", ");
        for id in gate_ids {
            separated.push_bind(id.to_string());
        }
        separated.push_unseparated(") ORDER BY scanned_at, guid");

        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.iter().map(checkin_from_row).collect()
    }

    async fn upsert_gate(&self, gate: Gate) -> Result<Gate> {
        write_gate(&self.pool, &gate).await?;
        Ok(gate)
    }

    async fn upsert_binding(&self, binding: GateBinding) -> Result<GateBinding> {
        if !self.gate_exists(binding.gate_id).await? {
            return Err(Error::NotFound(format!("gate {}", binding.gate_id)));
        }
        write_binding(&self.pool, &binding).await?;
        Ok(binding)
    }

    async fn create_gate(&self, gate: Gate) -> Result<Gate> {
        let mut binding = GateBinding::unbound(gate.id);
        binding.last_updated = gate.created_at;

        let mut tx = self.pool.begin().await?;
        write_gate(&mut *tx, &gate).await?;
        write_binding(&mut *tx, &binding).await?;
        tx.commit().await?;
        Ok(gate)
    }

    async fn commit_snapshot(&self, gate: &Gate, binding: &GateBinding) -> Result<()> {
        if gate.id != binding.gate_id {
            return Err(Error::InvalidInput(format!(
                "binding of gate {} does not belong to gate {}",
                binding.gate_id, gate.id
            )));
        }
        let mut tx = self.pool.begin().await?;
        write_gate(&mut *tx, gate).await?;
        write_binding(&mut *tx, binding).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn delete_gate(&self, gate_id: Uuid) -> Result<()> {
        if !self.gate_exists(gate_id).await? {
            return Err(Error::NotFound(format!("gate {}", gate_id)));
        }
        sqlx::query(
            r#"
            INSERT INTO gate_bindings (gate_id, status, last_updated) VALUES (?, ?, ?)
            ON CONFLICT(gate_id) DO UPDATE SET
                status = excluded.status,
                last_updated = excluded.last_updated
            "#,
        )
        .bind(gate_id.to_string())
        .bind(BindingStatus::Removed.as_str())
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn attribute_checkins(&self, gate_id: Uuid, checkin_ids: &[Uuid]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for id in checkin_ids {
            sqlx::query("UPDATE checkins SET gate_id = ? WHERE guid = ?")
                .bind(gate_id.to_string())
                .bind(id.to_string())
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn commit_merge(&self, commit: &MergeCommit) -> Result<()> {
        let primary_id = commit.primary.id.to_string();
        let mut tx = self.pool.begin().await?;

        for &duplicate in &commit.duplicate_ids {
            let duplicate_id = duplicate.to_string();

            sqlx::query("UPDATE checkins SET gate_id = ? WHERE gate_id = ?")
                .bind(&primary_id)
                .bind(&duplicate_id)
                .execute(&mut *tx)
                .await?;

            let updated = sqlx::query("UPDATE gates SET merged_into = ?, updated_at = ? WHERE guid = ?")
                .bind(&primary_id)
                .bind(commit.merged_at)
                .bind(&duplicate_id)
                .execute(&mut *tx)
                .await?;
            if updated.rows_affected() == 0 {
                // Dropping the transaction rolls everything back
                return Err(Error::NotFound(format!("gate {}", duplicate_id)));
            }

            let mut removed = GateBinding::unbound(duplicate);
            removed.status = BindingStatus::Removed;
            removed.last_updated = commit.merged_at;
            write_binding(&mut *tx, &removed).await?;
        }

        write_gate(&mut *tx, &commit.primary).await?;
        write_binding(&mut *tx, &commit.binding).await?;

        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatekeep_common::db::create_schema;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn setup_store() -> SqliteGateStore {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        create_schema(&pool).await.unwrap();
        SqliteGateStore::new(pool)
    }

    #[tokio::test]
    async fn test_gate_and_binding_round_trip() {
        let store = setup_store().await;
        let gate = Gate::new("Gate 1", Coordinate::new(51.5, -0.12), "evt");
        store.upsert_gate(gate.clone()).await.unwrap();

        let mut binding = GateBinding::unbound(gate.id);
        binding.status = BindingStatus::Probation;
        binding.sample_count = 7;
        binding.confidence = 0.64;
        binding.mean_accuracy_m = Some(6.5);
        binding.spread_m = 3.25;
        store.upsert_binding(binding.clone()).await.unwrap();

        let gates = store.list_gates("evt", GateFilter::All).await.unwrap();
        assert_eq!(gates.len(), 1);
        assert_eq!(gates[0].id, gate.id);
        assert_eq!(gates[0].name, "Gate 1");
        assert_eq!(gates[0].location, gate.location);

        let bindings = store
            .list_bindings(&BindingFilter::Event("evt".to_string()))
            .await
            .unwrap();
        assert_eq!(bindings.len(), 1);
        assert_eq!(bindings[0].status, BindingStatus::Probation);
        assert_eq!(bindings[0].sample_count, 7);
        assert_eq!(bindings[0].mean_accuracy_m, Some(6.5));
    }

    #[tokio::test]
    async fn test_binding_for_unknown_gate_rejected() {
        let store = setup_store().await;
        let result = store.upsert_binding(GateBinding::unbound(Uuid::new_v4())).await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_delete_gate_keeps_row() {
        let store = setup_store().await;
        let gate = Gate::new("Gate 1", Coordinate::new(51.5, -0.12), "evt");
        store.upsert_gate(gate.clone()).await.unwrap();
        store.delete_gate(gate.id).await.unwrap();

        assert_eq!(store.list_gates("evt", GateFilter::All).await.unwrap().len(), 1);
        let bindings = store
            .list_bindings(&BindingFilter::Event("evt".to_string()))
            .await
            .unwrap();
        assert_eq!(bindings[0].status, BindingStatus::Removed);
    }

    #[tokio::test]
    async fn test_create_gate_writes_unbound_binding() {
        let store = setup_store().await;
        let gate = store
            .create_gate(Gate::new("Gate 1", Coordinate::new(51.5, -0.12), "evt"))
            .await
            .unwrap();

        let bindings = store
            .list_bindings(&BindingFilter::Event("evt".to_string()))
            .await
            .unwrap();
        assert_eq!(bindings.len(), 1);
        assert_eq!(bindings[0].gate_id, gate.id);
        assert_eq!(bindings[0].status, BindingStatus::Unbound);
        assert_eq!(bindings[0].sample_count, 0);
    }

    #[tokio::test]
    async fn test_gate_checkins_ignore_age_and_other_gates() {
        let store = setup_store().await;
        let gate = Gate::new("Gate 1", Coordinate::new(51.5, -0.12), "evt");
        let other = Gate::new("Gate 2", Coordinate::new(51.6, -0.12), "evt");
        store.upsert_gate(gate.clone()).await.unwrap();
        store.upsert_gate(other.clone()).await.unwrap();

        let mut old = ScanObservation::new("evt", gate.location, Some(4.0));
        old.gate_id = Some(gate.id);
        old.scanned_at = Utc::now() - chrono::Duration::days(30);
        let mut fresh = ScanObservation::new("evt", gate.location, Some(4.0));
        fresh.gate_id = Some(gate.id);
        let mut elsewhere = ScanObservation::new("evt", other.location, None);
        elsewhere.gate_id = Some(other.id);
        let orphan = ScanObservation::new("evt", gate.location, None);
        for checkin in [&old, &fresh, &elsewhere, &orphan] {
            store.record_checkin(checkin).await.unwrap();
        }

        let found = store.list_gate_checkins(&[gate.id]).await.unwrap();
        let ids: Vec<Uuid> = found.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![old.id, fresh.id]);
        assert!(store.list_gate_checkins(&[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_commit_snapshot_rejects_mismatched_binding() {
        let store = setup_store().await;
        let gate = Gate::new("Gate 1", Coordinate::new(51.5, -0.12), "evt");
        store.create_gate(gate.clone()).await.unwrap();

        let mut moved = gate.clone();
        moved.location = Coordinate::new(51.6, -0.12);
        let stray = GateBinding::unbound(Uuid::new_v4());
        assert!(store.commit_snapshot(&moved, &stray).await.is_err());

        let stored = store.list_gates("evt", GateFilter::All).await.unwrap();
        assert_eq!(stored[0].location, gate.location);

        let mut binding = GateBinding::unbound(gate.id);
        binding.sample_count = 4;
        store.commit_snapshot(&moved, &binding).await.unwrap();
        let stored = store.list_gates("evt", GateFilter::All).await.unwrap();
        assert_eq!(stored[0].location, moved.location);
    }
}
