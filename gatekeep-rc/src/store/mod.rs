//! Storage collaborator interface
//!
//! The engine never talks to a database directly. Everything it reads or writes
//! goes through [`GateStore`], so the same cycle runs against SQLite in production
//! and against [`MemoryGateStore`] in tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gatekeep_common::models::{Gate, GateBinding, ScanObservation};
use gatekeep_common::Result;
use uuid::Uuid;

pub mod memory;
pub mod sqlite;

pub use memory::MemoryGateStore;
pub use sqlite::SqliteGateStore;

use crate::engine::merge::MergeCommit;

/// Which gates `list_gates` returns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GateFilter {
    /// Unmerged gates that have at least one attributed scan or a non-zero binding count
    WithScans,
    /// Every gate of the event, merged and removed ones included
    All,
}

/// Which bindings `list_bindings` returns
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindingFilter {
    /// Bindings of every gate belonging to an event
    Event(String),
}

/// Data-access operations the reconciliation engine depends on
#[async_trait]
pub trait GateStore: Send + Sync {
    /// Event ids that have at least one gate or check-in
    async fn list_event_ids(&self) -> Result<Vec<String>>;

    async fn list_gates(&self, event_id: &str, filter: GateFilter) -> Result<Vec<Gate>>;

    async fn list_bindings(&self, filter: &BindingFilter) -> Result<Vec<GateBinding>>;

    /// Check-ins of an event scanned at or after `since`
    async fn list_recent_checkins(
        &self,
        event_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<ScanObservation>>;

    /// Every check-in attributed to one of `gate_ids`, whatever its age
    async fn list_gate_checkins(&self, gate_ids: &[Uuid]) -> Result<Vec<ScanObservation>>;

    async fn upsert_gate(&self, gate: Gate) -> Result<Gate>;

    async fn upsert_binding(&self, binding: GateBinding) -> Result<GateBinding>;

    /// Insert a new gate together with its `unbound` binding, or neither
    async fn create_gate(&self, gate: Gate) -> Result<Gate>;

    /// Write a gate row and its binding as one unit
    async fn commit_snapshot(&self, gate: &Gate, binding: &GateBinding) -> Result<()>;

    /// Soft delete: the gate row stays for audit, its binding becomes `removed`
    async fn delete_gate(&self, gate_id: Uuid) -> Result<()>;

    /// Point the given check-ins at `gate_id`
    async fn attribute_checkins(&self, gate_id: Uuid, checkin_ids: &[Uuid]) -> Result<()>;

    /// Apply an auto-merge as one unit: all of it or none of it
    ///
    /// Re-points the duplicates' check-ins to the primary, writes the primary gate
    /// and binding, and soft-deletes the duplicates (`merged_into` set, binding
    /// `removed` with zero samples).
    async fn commit_merge(&self, commit: &MergeCommit) -> Result<()>;
}
