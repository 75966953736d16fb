//! Observation reducer
//!
//! Rebuilds every gate's aggregates from the observation set at the start of a
//! cycle. Nothing is patched incrementally: a gate's location, sample count,
//! accuracy, spread and confidence are a pure function of the scans attributed to it.
//! Gates with no attributed scans keep the aggregates stored on their binding.

use chrono::{DateTime, Utc};
use gatekeep_common::geo::Coordinate;
use gatekeep_common::models::{Gate, GateBinding, ScanObservation};
use std::collections::HashMap;
use uuid::Uuid;

use super::scoring::{ConfidenceScorer, EvidenceStats};

/// One gate as seen by the current cycle
#[derive(Debug, Clone, PartialEq)]
pub struct GateSnapshot {
    /// Gate with its recomputed centroid
    pub gate: Gate,
    /// Binding with recomputed aggregates (status untouched)
    pub binding: GateBinding,
    pub stats: EvidenceStats,
    /// Binding as stored before this cycle; `None` when the gate had no binding row
    pub previous: Option<GateBinding>,
    /// Gate location as stored before this cycle
    pub previous_location: Coordinate,
    /// Scans attributed to this gate that arrived after the previous cycle
    pub new_scans: u32,
}

impl GateSnapshot {
    pub fn id(&self) -> Uuid {
        self.gate.id
    }

    pub fn sample_count(&self) -> u32 {
        self.binding.sample_count
    }

    pub fn confidence(&self) -> f64 {
        self.binding.confidence
    }

    /// True when the gate row needs writing back
    pub fn location_changed(&self) -> bool {
        self.gate.location != self.previous_location
    }

    /// True when the binding row differs from what is stored
    pub fn binding_changed(&self) -> bool {
        match &self.previous {
            None => true,
            Some(prev) => {
                prev.status != self.binding.status
                    || prev.sample_count != self.binding.sample_count
                    || prev.confidence != self.binding.confidence
                    || prev.mean_accuracy_m != self.binding.mean_accuracy_m
                    || prev.spread_m != self.binding.spread_m
            }
        }
    }
}

/// Reduce gates, bindings and scans into per-gate snapshots, ordered by gate id
///
/// `watermark` is the end of the previous cycle; scans after it count as new.
pub fn reduce(
    gates: Vec<Gate>,
    bindings: Vec<GateBinding>,
    observations: &[ScanObservation],
    watermark: DateTime<Utc>,
    scorer: &ConfidenceScorer,
) -> Vec<GateSnapshot> {
    let mut bindings: HashMap<Uuid, GateBinding> =
        bindings.into_iter().map(|b| (b.gate_id, b)).collect();

    let mut by_gate: HashMap<Uuid, Vec<&ScanObservation>> = HashMap::new();
    for observation in observations {
        if let Some(gate_id) = observation.gate_id {
            by_gate.entry(gate_id).or_default().push(observation);
        }
    }

    let mut snapshots: Vec<GateSnapshot> = gates
        .into_iter()
        .map(|gate| {
            let previous = bindings.remove(&gate.id);
            let scans = by_gate.get(&gate.id).map(Vec::as_slice).unwrap_or(&[]);
            snapshot_gate(gate, previous, scans, watermark, scorer)
        })
        .collect();

    snapshots.sort_by(|a, b| a.gate.id.cmp(&b.gate.id));
    snapshots
}

fn snapshot_gate(
    mut gate: Gate,
    previous: Option<GateBinding>,
    scans: &[&ScanObservation],
    watermark: DateTime<Utc>,
    scorer: &ConfidenceScorer,
) -> GateSnapshot {
    let previous_location = gate.location;
    let mut binding = previous
        .clone()
        .unwrap_or_else(|| GateBinding::unbound(gate.id));

    let stats = match EvidenceStats::from_observations(scans) {
        Some((stats, center)) => {
            gate.location = center;
            binding.sample_count = stats.sample_count;
            binding.mean_accuracy_m = stats.mean_accuracy_m;
            binding.spread_m = stats.spread_m;
            binding.confidence = scorer.score(&stats);
            stats
        }
        None => EvidenceStats::from_binding(&binding),
    };

    let new_scans = scans.iter().filter(|s| s.scanned_at > watermark).count();

    GateSnapshot {
        gate,
        binding,
        stats,
        previous,
        previous_location,
        new_scans: u32::try_from(new_scans).unwrap_or(u32::MAX),
    }
}
