//! Attribution of orphan scans to gates
//!
//! A check-in without a gate id is assigned to the nearest live gate within the
//! clustering radius. When none is in range it seeds a new candidate gate named
//! "Gate <n>". Later orphans in the same pass may join that new gate, whose
//! position follows the running centroid of its scans.

use chrono::{DateTime, Utc};
use gatekeep_common::geo::{self, Coordinate};
use gatekeep_common::models::{Gate, ScanObservation};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Scans assigned during one attribution pass
#[derive(Debug, Clone, Default)]
pub struct Attribution {
    /// Gates created for scans with no existing gate in range
    pub new_gates: Vec<Gate>,
    /// Check-in ids per gate (existing or new)
    pub assignments: BTreeMap<Uuid, Vec<Uuid>>,
}

impl Attribution {
    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }

    pub fn assigned_count(&self) -> usize {
        self.assignments.values().map(Vec::len).sum()
    }
}

struct Candidate {
    id: Uuid,
    location: Coordinate,
    /// Scans absorbed this pass (new gates only)
    absorbed: usize,
    is_new: bool,
}

/// Assign every orphan scan in `observations`
///
/// `gates` are the gates fetched for the event; removed or merged ones must already
/// be filtered out by the caller. `taken_names` holds every other gate name the
/// event has used, so new gates never reuse a number. Processing order is
/// (scanned_at, id), so the outcome does not depend on fetch order.
pub fn attribute(
    event_id: &str,
    gates: &[Gate],
    taken_names: &[String],
    observations: &[ScanObservation],
    radius_m: f64,
    now: DateTime<Utc>,
) -> Attribution {
    let mut orphans: Vec<&ScanObservation> =
        observations.iter().filter(|o| o.gate_id.is_none()).collect();
    if orphans.is_empty() {
        return Attribution::default();
    }
    orphans.sort_by(|a, b| a.scanned_at.cmp(&b.scanned_at).then_with(|| a.id.cmp(&b.id)));

    let mut candidates: Vec<Candidate> = gates
        .iter()
        .map(|g| Candidate {
            id: g.id,
            location: g.location,
            absorbed: 0,
            is_new: false,
        })
        .collect();

    let names = gates
        .iter()
        .map(|g| g.name.as_str())
        .chain(taken_names.iter().map(String::as_str));
    let mut next_number = next_gate_number(names);
    let mut result = Attribution::default();

    for scan in orphans {
        let nearest = candidates
            .iter()
            .enumerate()
            .map(|(i, c)| (geo::distance_meters(c.location, scan.location), i))
            .filter(|(d, _)| *d <= radius_m)
            .min_by(|(da, a), (db, b)| {
                da.total_cmp(db)
                    .then_with(|| candidates[*a].id.cmp(&candidates[*b].id))
            })
            .map(|(_, i)| i);

        let gate_id = match nearest {
            Some(index) => {
                let candidate = &mut candidates[index];
                if candidate.is_new {
                    // Running mean keeps the new gate centred on its scans
                    let k = candidate.absorbed as f64;
                    candidate.location = Coordinate::new(
                        (candidate.location.latitude * k + scan.location.latitude) / (k + 1.0),
                        (candidate.location.longitude * k + scan.location.longitude) / (k + 1.0),
                    );
                }
                candidate.absorbed += 1;
                candidate.id
            }
            None => {
                let mut gate = Gate::new(format!("Gate {}", next_number), scan.location, event_id);
                gate.created_at = now;
                gate.updated_at = now;
                next_number += 1;

                candidates.push(Candidate {
                    id: gate.id,
                    location: gate.location,
                    absorbed: 1,
                    is_new: true,
                });
                let id = gate.id;
                result.new_gates.push(gate);
                id
            }
        };

        result.assignments.entry(gate_id).or_default().push(scan.id);
    }

    // Settle new gates on the centroid of what they absorbed
    for gate in &mut result.new_gates {
        if let Some(c) = candidates.iter().find(|c| c.id == gate.id) {
            gate.location = c.location;
        }
    }

    result
}

/// One past the highest "Gate <n>" number in use
fn next_gate_number<'a>(names: impl IntoIterator<Item = &'a str>) -> u32 {
    names
        .into_iter()
        .filter_map(|name| name.strip_prefix("Gate ")?.trim().parse::<u32>().ok())
        .max()
        .map_or(1, |n| n.saturating_add(1))
}

/// Apply an attribution to the scan list in place
pub fn apply(observations: &mut [ScanObservation], attribution: &Attribution) {
    let by_scan: BTreeMap<Uuid, Uuid> = attribution
        .assignments
        .iter()
        .flat_map(|(gate, scans)| scans.iter().map(move |s| (*s, *gate)))
        .collect();
    for observation in observations.iter_mut() {
        if observation.gate_id.is_none() {
            if let Some(gate) = by_scan.get(&observation.id) {
                observation.gate_id = Some(*gate);
            }
        }
    }
}
