//! In-process gate store
//!
//! Backs tests and local experiments. With the `test-util` feature (always on
//! for this crate's own tests) it can also inject failures into specific
//! operations and slow down reads.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gatekeep_common::models::{BindingStatus, Gate, GateBinding, ScanObservation};
use gatekeep_common::{Error, Result};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use uuid::Uuid;

use super::{BindingFilter, GateFilter, GateStore};
use crate::engine::merge::MergeCommit;

#[derive(Default)]
struct Inner {
    gates: BTreeMap<Uuid, Gate>,
    bindings: BTreeMap<Uuid, GateBinding>,
    checkins: BTreeMap<Uuid, ScanObservation>,
    failing_gate_queries: HashSet<GateFilter>,
    failing_merges: HashSet<Uuid>,
    failing_binding_writes: HashSet<Uuid>,
    fail_event_listing: bool,
    fail_gate_creation: bool,
    gate_queries: Vec<(String, GateFilter)>,
    read_delay: Option<Duration>,
}

/// Gate store held entirely in memory
#[derive(Default)]
pub struct MemoryGateStore {
    inner: Mutex<Inner>,
    reads_in_flight: AtomicUsize,
    max_reads_in_flight: AtomicUsize,
}

impl MemoryGateStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| Error::Internal("memory store lock poisoned".to_string()))
    }

    // Seeding and inspection

    pub fn insert_gate(&self, gate: Gate) -> Result<()> {
        self.lock()?.gates.insert(gate.id, gate);
        Ok(())
    }

    pub fn insert_binding(&self, binding: GateBinding) -> Result<()> {
        self.lock()?.bindings.insert(binding.gate_id, binding);
        Ok(())
    }

    pub fn insert_checkin(&self, checkin: ScanObservation) -> Result<()> {
        self.lock()?.checkins.insert(checkin.id, checkin);
        Ok(())
    }

    pub fn gate(&self, id: Uuid) -> Option<Gate> {
        self.lock().ok()?.gates.get(&id).cloned()
    }

    pub fn binding(&self, gate_id: Uuid) -> Option<GateBinding> {
        self.lock().ok()?.bindings.get(&gate_id).cloned()
    }

    /// Every gate of an event, merged and removed ones included
    pub fn gates_for_event(&self, event_id: &str) -> Vec<Gate> {
        self.lock()
            .map(|inner| {
                inner
                    .gates
                    .values()
                    .filter(|g| g.event_id == event_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn checkin(&self, id: Uuid) -> Option<ScanObservation> {
        self.lock().ok()?.checkins.get(&id).cloned()
    }

    // Fault injection

    #[cfg(any(test, feature = "test-util"))]
    /// Make `list_gates` fail for the given filter
    pub fn fail_gate_query(&self, filter: GateFilter) {
        if let Ok(mut inner) = self.lock() {
            inner.failing_gate_queries.insert(filter);
        }
    }

    #[cfg(any(test, feature = "test-util"))]
    /// Make `commit_merge` fail for merges into this primary
    pub fn fail_merge_into(&self, primary_id: Uuid) {
        if let Ok(mut inner) = self.lock() {
            inner.failing_merges.insert(primary_id);
        }
    }

    #[cfg(any(test, feature = "test-util"))]
    /// Make `upsert_binding`, `commit_snapshot` and `delete_gate` fail for this gate
    pub fn fail_binding_write(&self, gate_id: Uuid) {
        if let Ok(mut inner) = self.lock() {
            inner.failing_binding_writes.insert(gate_id);
        }
    }

    #[cfg(any(test, feature = "test-util"))]
    pub fn fail_event_listing(&self, fail: bool) {
        if let Ok(mut inner) = self.lock() {
            inner.fail_event_listing = fail;
        }
    }

    /// Make `create_gate` fail
    #[cfg(any(test, feature = "test-util"))]
    pub fn fail_gate_creation(&self, fail: bool) {
        if let Ok(mut inner) = self.lock() {
            inner.fail_gate_creation = fail;
        }
    }

    #[cfg(any(test, feature = "test-util"))]
    /// Remove every injected failure
    pub fn clear_failures(&self) {
        if let Ok(mut inner) = self.lock() {
            inner.failing_gate_queries.clear();
            inner.failing_merges.clear();
            inner.failing_binding_writes.clear();
            inner.fail_event_listing = false;
            inner.fail_gate_creation = false;
        }
    }

    #[cfg(any(test, feature = "test-util"))]
    /// Delay every `list_gates` call
    pub fn set_read_delay(&self, delay: Duration) {
        if let Ok(mut inner) = self.lock() {
            inner.read_delay = Some(delay);
        }
    }

    #[cfg(any(test, feature = "test-util"))]
    /// `list_gates` calls seen so far, in order
    pub fn gate_queries(&self) -> Vec<(String, GateFilter)> {
        self.lock()
            .map(|inner| inner.gate_queries.clone())
            .unwrap_or_default()
    }

    #[cfg(any(test, feature = "test-util"))]
    /// Highest number of `list_gates` calls that were ever running at once
    pub fn max_concurrent_reads(&self) -> usize {
        self.max_reads_in_flight.load(Ordering::SeqCst)
    }

    fn has_evidence(inner: &Inner, gate: &Gate) -> bool {
        let has_scan = inner.checkins.values().any(|c| c.gate_id == Some(gate.id));
        let has_count = inner
            .bindings
            .get(&gate.id)
            .map(|b| b.sample_count > 0)
            .unwrap_or(false);
        has_scan || has_count
    }

    fn check_binding_write(inner: &Inner, gate_id: Uuid) -> Result<()> {
        if inner.failing_binding_writes.contains(&gate_id) {
            return Err(Error::Internal(format!("injected binding write failure for {}", gate_id)));
        }
        Ok(())
    }
}

#[async_trait]
impl GateStore for MemoryGateStore {
    async fn list_event_ids(&self) -> Result<Vec<String>> {
        let inner = self.lock()?;
        if inner.fail_event_listing {
            return Err(Error::Internal("injected event listing failure".to_string()));
        }
        let ids: BTreeSet<String> = inner
            .gates
            .values()
            .map(|g| g.event_id.clone())
            .chain(inner.checkins.values().map(|c| c.event_id.clone()))
            .collect();
        Ok(ids.into_iter().collect())
    }

    async fn list_gates(&self, event_id: &str, filter: GateFilter) -> Result<Vec<Gate>> {
        let in_flight = self.reads_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_reads_in_flight.fetch_max(in_flight, Ordering::SeqCst);

        let delay = {
            let mut inner = self.lock()?;
            inner.gate_queries.push((event_id.to_string(), filter));
            inner.read_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let result = self.lock().and_then(|inner| {
            if inner.failing_gate_queries.contains(&filter) {
                return Err(Error::Internal(format!("injected {:?} gate query failure", filter)));
            }
            Ok(inner
                .gates
                .values()
                .filter(|g| g.event_id == event_id)
                .filter(|g| match filter {
                    GateFilter::All => true,
                    GateFilter::WithScans => g.merged_into.is_none() && Self::has_evidence(&inner, g),
                })
                .cloned()
                .collect())
        });

        self.reads_in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn list_bindings(&self, filter: &BindingFilter) -> Result<Vec<GateBinding>> {
        let inner = self.lock()?;
        let bindings = match filter {
            BindingFilter::Event(event_id) => inner
                .bindings
                .values()
                .filter(|b| {
                    inner
                        .gates
                        .get(&b.gate_id)
                        .map(|g| &g.event_id == event_id)
                        .unwrap_or(false)
                })
                .cloned()
                .collect(),
        };
        Ok(bindings)
    }

    async fn list_recent_checkins(
        &self,
        event_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<ScanObservation>> {
        let inner = self.lock()?;
        let mut checkins: Vec<ScanObservation> = inner
            .checkins
            .values()
            .filter(|c| c.event_id == event_id && c.scanned_at >= since)
            .cloned()
            .collect();
        checkins.sort_by(|a, b| a.scanned_at.cmp(&b.scanned_at).then_with(|| a.id.cmp(&b.id)));
        Ok(checkins)
    }

    async fn list_gate_checkins(&self, gate_ids: &[Uuid]) -> Result<Vec<ScanObservation>> {
        let wanted: HashSet<&Uuid> = gate_ids.iter().collect();
        let inner = self.lock()?;
        let mut checkins: Vec<ScanObservation> = inner
            .checkins
            .values()
            .filter(|c| c.gate_id.as_ref().map_or(false, |g| wanted.contains(g)))
            .cloned()
            .collect();
        checkins.sort_by(|a, b| a.scanned_at.cmp(&b.scanned_at).then_with(|| a.id.cmp(&b.id)));
        Ok(checkins)
    }

    async fn upsert_gate(&self, gate: Gate) -> Result<Gate> {
        self.lock()?.gates.insert(gate.id, gate.clone());
        Ok(gate)
    }

    async fn upsert_binding(&self, binding: GateBinding) -> Result<GateBinding> {
        let mut inner = self.lock()?;
        Self::check_binding_write(&inner, binding.gate_id)?;
        if !inner.gates.contains_key(&binding.gate_id) {
            return Err(Error::NotFound(format!("gate {}", binding.gate_id)));
        }
        inner.bindings.insert(binding.gate_id, binding.clone());
        Ok(binding)
    }

    async fn create_gate(&self, gate: Gate) -> Result<Gate> {
        let mut inner = self.lock()?;
        if inner.fail_gate_creation {
            return Err(Error::Internal(format!("injected gate creation failure for {}", gate.id)));
        }
        let mut binding = GateBinding::unbound(gate.id);
        binding.last_updated = gate.created_at;
        inner.bindings.insert(gate.id, binding);
        inner.gates.insert(gate.id, gate.clone());
        Ok(gate)
    }

    async fn commit_snapshot(&self, gate: &Gate, binding: &GateBinding) -> Result<()> {
        let mut inner = self.lock()?;
        Self::check_binding_write(&inner, gate.id)?;
        if gate.id != binding.gate_id {
            return Err(Error::InvalidInput(format!(
                "binding of gate {} does not belong to gate {}",
                binding.gate_id, gate.id
            )));
        }
        if !inner.gates.contains_key(&gate.id) {
            return Err(Error::NotFound(format!("gate {}", gate.id)));
        }
        inner.gates.insert(gate.id, gate.clone());
        inner.bindings.insert(gate.id, binding.clone());
        Ok(())
    }

    async fn delete_gate(&self, gate_id: Uuid) -> Result<()> {
        let mut inner = self.lock()?;
        Self::check_binding_write(&inner, gate_id)?;
        if !inner.gates.contains_key(&gate_id) {
            return Err(Error::NotFound(format!("gate {}", gate_id)));
        }
        let binding = inner
            .bindings
            .entry(gate_id)
            .or_insert_with(|| GateBinding::unbound(gate_id));
        binding.status = BindingStatus::Removed;
        binding.last_updated = Utc::now();
        Ok(())
    }

    async fn attribute_checkins(&self, gate_id: Uuid, checkin_ids: &[Uuid]) -> Result<()> {
        let mut inner = self.lock()?;
        if !inner.gates.contains_key(&gate_id) {
            return Err(Error::NotFound(format!("gate {}", gate_id)));
        }
        for id in checkin_ids {
            if let Some(checkin) = inner.checkins.get_mut(id) {
                checkin.gate_id = Some(gate_id);
            }
        }
        Ok(())
    }

    async fn commit_merge(&self, commit: &MergeCommit) -> Result<()> {
        let mut inner = self.lock()?;
        let primary_id = commit.primary.id;
        if inner.failing_merges.contains(&primary_id) {
            return Err(Error::Internal(format!("injected merge failure for {}", primary_id)));
        }
        // Validate everything before touching anything
        for id in std::iter::once(&primary_id).chain(commit.duplicate_ids.iter()) {
            if !inner.gates.contains_key(id) {
                return Err(Error::NotFound(format!("gate {}", id)));
            }
        }

        let duplicates: HashSet<Uuid> = commit.duplicate_ids.iter().copied().collect();
        for checkin in inner.checkins.values_mut() {
            if checkin.gate_id.map(|g| duplicates.contains(&g)).unwrap_or(false) {
                checkin.gate_id = Some(primary_id);
            }
        }

        inner.gates.insert(primary_id, commit.primary.clone());
        inner.bindings.insert(primary_id, commit.binding.clone());

        for id in &commit.duplicate_ids {
            if let Some(gate) = inner.gates.get_mut(id) {
                gate.merged_into = Some(primary_id);
                gate.updated_at = commit.merged_at;
            }
            let binding = inner
                .bindings
                .entry(*id)
                .or_insert_with(|| GateBinding::unbound(*id));
            binding.status = BindingStatus::Removed;
            binding.sample_count = 0;
            binding.confidence = 0.0;
            binding.last_updated = commit.merged_at;
        }
        Ok(())
    }
}
