//! Shared fixtures for gatekeep-rc integration tests

#![allow(dead_code)]

use chrono::{Duration, Utc};
use gatekeep_common::events::{EventBus, GateEvent};
use gatekeep_common::geo::Coordinate;
use gatekeep_common::models::{BindingStatus, Gate, GateBinding, ScanObservation};
use gatekeep_rc::reconcile::{ReconcileSettings, Reconciler};
use gatekeep_rc::store::MemoryGateStore;
use std::sync::Arc;
use tokio::sync::broadcast;

pub const EVENT: &str = "festival-2026";

/// Degrees of latitude per meter on the haversine sphere
pub const DEG_PER_M: f64 = 1.0 / 111_194.93;

/// Point `north_m` meters north of the venue origin
pub fn point(north_m: f64) -> Coordinate {
    Coordinate::new(48.137 + north_m * DEG_PER_M, 11.575)
}

/// Store a gate created an hour ago with a binding carrying the given evidence
pub fn seed_gate(
    store: &MemoryGateStore,
    name: &str,
    north_m: f64,
    status: BindingStatus,
    samples: u32,
    confidence: f64,
) -> Gate {
    seed_gate_aged(store, name, north_m, status, samples, confidence, Duration::hours(1))
}

pub fn seed_gate_aged(
    store: &MemoryGateStore,
    name: &str,
    north_m: f64,
    status: BindingStatus,
    samples: u32,
    confidence: f64,
    age: Duration,
) -> Gate {
    let mut gate = Gate::new(name, point(north_m), EVENT);
    gate.created_at = Utc::now() - age;
    gate.updated_at = gate.created_at;
    store.insert_gate(gate.clone()).unwrap();

    let mut binding = GateBinding::unbound(gate.id);
    binding.status = status;
    binding.sample_count = samples;
    binding.confidence = confidence;
    binding.mean_accuracy_m = Some(5.0);
    binding.spread_m = 2.0;
    store.insert_binding(binding).unwrap();

    gate
}

/// Store an unattributed check-in scanned just now
pub fn seed_orphan_scan(store: &MemoryGateStore, north_m: f64, accuracy_m: Option<f64>) -> ScanObservation {
    let scan = ScanObservation::new(EVENT, point(north_m), accuracy_m);
    store.insert_checkin(scan.clone()).unwrap();
    scan
}

/// Store a check-in attributed to `gate`, scanned `age` ago
pub fn seed_scan(store: &MemoryGateStore, gate: &Gate, north_m: f64, age: Duration) -> ScanObservation {
    let mut scan = ScanObservation::new(EVENT, point(north_m), Some(5.0));
    scan.scanned_at = Utc::now() - age;
    scan.gate_id = Some(gate.id);
    store.insert_checkin(scan.clone()).unwrap();
    scan
}

pub fn settings() -> ReconcileSettings {
    ReconcileSettings {
        event_ids: vec![EVENT.to_string()],
        ..ReconcileSettings::default()
    }
}

/// Reconciler over `store` plus a subscriber that sees every emitted event
pub fn reconciler(store: Arc<MemoryGateStore>) -> (Arc<Reconciler>, broadcast::Receiver<GateEvent>) {
    let bus = EventBus::new(1024);
    let rx = bus.subscribe();
    (Arc::new(Reconciler::new(store, bus, settings())), rx)
}

/// Everything received so far, without waiting
pub fn drain(rx: &mut broadcast::Receiver<GateEvent>) -> Vec<GateEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

pub fn status_of(store: &MemoryGateStore, gate: &Gate) -> BindingStatus {
    store.binding(gate.id).unwrap().status
}

/// Gates of the test event that are neither merged nor removed
pub fn live_gates(store: &MemoryGateStore) -> Vec<Gate> {
    store
        .gates_for_event(EVENT)
        .into_iter()
        .filter(|g| g.merged_into.is_none())
        .filter(|g| store.binding(g.id).map(|b| b.status.is_live()).unwrap_or(true))
        .collect()
}
