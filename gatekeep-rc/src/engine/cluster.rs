//! Greedy proximity clustering of candidate gates
//!
//! Gates are visited in order of sample count (descending, gate id breaks ties).
//! Each unvisited gate seeds a cluster and absorbs every other unvisited gate within
//! the radius of the seed. The result depends only on the input set, never on the
//! order it was fetched in.

use gatekeep_common::geo::{self, Coordinate};
use gatekeep_common::models::BindingStatus;
use tracing::debug;

use super::snapshot::GateSnapshot;

/// Transient group of gates that probably describe the same physical entry point
#[derive(Debug, Clone)]
pub struct GateCluster {
    /// Seed gate: largest sample count in the cluster
    pub primary: GateSnapshot,
    /// Members absorbed by the seed, in visit order
    pub duplicates: Vec<GateSnapshot>,
    /// Sample-weighted centroid of all members
    pub average_location: Coordinate,
    pub total_sample_count: u32,
    pub highest_confidence: f64,
}

impl GateCluster {
    fn new(primary: GateSnapshot, duplicates: Vec<GateSnapshot>) -> Self {
        let members = || std::iter::once(&primary).chain(duplicates.iter());

        let average_location = geo::weighted_centroid(
            members().map(|s| (s.gate.location, s.sample_count() as f64)),
        )
        .unwrap_or(primary.gate.location);

        let total_sample_count = members().fold(0u32, |acc, s| acc.saturating_add(s.sample_count()));
        let highest_confidence = members().map(|s| s.confidence()).fold(0.0, f64::max);

        Self {
            primary,
            duplicates,
            average_location,
            total_sample_count,
            highest_confidence,
        }
    }

    pub fn size(&self) -> usize {
        1 + self.duplicates.len()
    }

    /// Primary first, then duplicates
    pub fn members(&self) -> impl Iterator<Item = &GateSnapshot> {
        std::iter::once(&self.primary).chain(self.duplicates.iter())
    }
}

/// Result of one clustering pass
#[derive(Debug, Clone, Default)]
pub struct Clustering {
    /// Clusters with two or more members, in seed order
    pub clusters: Vec<GateCluster>,
    /// Gates with no neighbor in range; these go straight to promotion
    pub singletons: Vec<GateSnapshot>,
}

/// Single-link clusterer with a fixed radius
#[derive(Debug, Clone)]
pub struct ClusterBuilder {
    radius_m: f64,
}

impl ClusterBuilder {
    pub fn new(radius_m: f64) -> Self {
        Self { radius_m }
    }

    pub fn radius_m(&self) -> f64 {
        self.radius_m
    }

    /// Partition live gates into duplicate clusters and singletons
    ///
    /// Removed and merged gates are skipped entirely.
    pub fn build(&self, snapshots: Vec<GateSnapshot>) -> Clustering {
        let mut live: Vec<GateSnapshot> = snapshots.into_iter().filter(is_clusterable).collect();
        live.sort_by(|a, b| {
            b.sample_count()
                .cmp(&a.sample_count())
                .then_with(|| a.id().cmp(&b.id()))
        });

        let mut slots: Vec<Option<GateSnapshot>> = live.into_iter().map(Some).collect();
        let mut result = Clustering::default();

        for i in 0..slots.len() {
            let Some(seed) = slots[i].take() else {
                continue;
            };

            let mut duplicates = Vec::new();
            for slot in slots.iter_mut().skip(i + 1) {
                let within = slot
                    .as_ref()
                    .map(|candidate| geo::distance_meters(seed.gate.location, candidate.gate.location) <= self.radius_m)
                    .unwrap_or(false);
                if within {
                    if let Some(candidate) = slot.take() {
                        duplicates.push(candidate);
                    }
                }
            }

            if duplicates.is_empty() {
                result.singletons.push(seed);
            } else {
                debug!(
                    primary = %seed.gate.name,
                    duplicates = duplicates.len(),
                    "Duplicate cluster formed"
                );
                result.clusters.push(GateCluster::new(seed, duplicates));
            }
        }

        result
    }
}

fn is_clusterable(snapshot: &GateSnapshot) -> bool {
    snapshot.binding.status != BindingStatus::Removed && snapshot.gate.merged_into.is_none()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::scoring::EvidenceStats;
    use gatekeep_common::models::{Gate, GateBinding};

    /// ~0.000009 degrees of latitude per meter
    const DEG_PER_M: f64 = 1.0 / 111_195.0;

    fn snap(name: &str, north_m: f64, n: u32, c: f64) -> GateSnapshot {
        let location = Coordinate::new(45.0 + north_m * DEG_PER_M, 7.0);
        let gate = Gate::new(name, location, "evt");
        let mut binding = GateBinding::unbound(gate.id);
        binding.sample_count = n;
        binding.confidence = c;
        GateSnapshot {
            stats: EvidenceStats::from_binding(&binding),
            previous: Some(binding.clone()),
            previous_location: location,
            new_scans: 0,
            gate,
            binding,
        }
    }

    fn names(cluster: &GateCluster) -> Vec<String> {
        cluster.members().map(|s| s.gate.name.clone()).collect()
    }

    #[test]
    fn test_close_gates_cluster_with_largest_as_primary() {
        let builder = ClusterBuilder::new(50.0);
        let result = builder.build(vec![snap("A", 0.0, 10, 0.5), snap("B", 30.0, 20, 0.9)]);

        assert_eq!(result.clusters.len(), 1);
        assert!(result.singletons.is_empty());
        let cluster = &result.clusters[0];
        assert_eq!(cluster.primary.gate.name, "B");
        assert_eq!(cluster.total_sample_count, 30);
        assert_eq!(cluster.highest_confidence, 0.9);

        // Weighted two thirds of the way toward B
        let expected = 45.0 + 20.0 * DEG_PER_M;
        assert!((cluster.average_location.latitude - expected).abs() < 1e-9);
    }

    #[test]
    fn test_distant_gates_stay_apart() {
        let builder = ClusterBuilder::new(50.0);
        let result = builder.build(vec![snap("A", 0.0, 10, 0.5), snap("B", 200.0, 20, 0.9)]);
        assert!(result.clusters.is_empty());
        assert_eq!(result.singletons.len(), 2);
    }

    #[test]
    fn test_membership_measured_from_seed_only() {
        // A-B and B-C are in range, A-C is not; A seeds and takes only B
        let builder = ClusterBuilder::new(50.0);
        let result = builder.build(vec![
            snap("A", 0.0, 30, 0.9),
            snap("B", 40.0, 20, 0.9),
            snap("C", 80.0, 10, 0.9),
        ]);
        assert_eq!(result.clusters.len(), 1);
        assert_eq!(names(&result.clusters[0]), vec!["A", "B"]);
        assert_eq!(result.singletons.len(), 1);
        assert_eq!(result.singletons[0].gate.name, "C");
    }

    #[test]
    fn test_removed_and_merged_gates_excluded() {
        let builder = ClusterBuilder::new(50.0);
        let mut removed = snap("R", 5.0, 50, 0.9);
        removed.binding.status = BindingStatus::Removed;
        let mut merged = snap("M", 10.0, 50, 0.9);
        merged.gate.merged_into = Some(uuid::Uuid::new_v4());

        let result = builder.build(vec![snap("A", 0.0, 10, 0.5), removed, merged]);
        assert!(result.clusters.is_empty());
        assert_eq!(result.singletons.len(), 1);
    }

    #[test]
    fn test_deterministic_under_input_order() {
        let builder = ClusterBuilder::new(50.0);
        let gates = vec![
            snap("A", 0.0, 10, 0.5),
            snap("B", 20.0, 10, 0.6),
            snap("C", 45.0, 12, 0.7),
            snap("D", 300.0, 3, 0.2),
            snap("E", 320.0, 3, 0.3),
        ];
        let forward = builder.build(gates.clone());
        let mut reversed_input = gates;
        reversed_input.reverse();
        let backward = builder.build(reversed_input);

        let forward_names: Vec<_> = forward.clusters.iter().map(names).collect();
        let backward_names: Vec<_> = backward.clusters.iter().map(names).collect();
        assert_eq!(forward_names, backward_names);
    }

    #[test]
    fn test_idempotent_on_merged_output() {
        let builder = ClusterBuilder::new(50.0);
        let result = builder.build(vec![
            snap("A", 0.0, 10, 0.5),
            snap("B", 30.0, 20, 0.9),
            snap("C", 500.0, 5, 0.7),
        ]);

        // Collapse each cluster into its primary at the averaged location
        let mut survivors: Vec<GateSnapshot> = result
            .clusters
            .into_iter()
            .map(|c| {
                let mut primary = c.primary;
                primary.gate.location = c.average_location;
                primary.binding.sample_count = c.total_sample_count;
                primary
            })
            .collect();
        survivors.extend(result.singletons);

        let again = builder.build(survivors);
        assert!(again.clusters.is_empty());
        assert_eq!(again.singletons.len(), 2);
    }

    #[test]
    fn test_zero_sample_cluster_falls_back_to_primary_location() {
        let builder = ClusterBuilder::new(50.0);
        let result = builder.build(vec![snap("A", 0.0, 0, 0.0), snap("B", 10.0, 0, 0.0)]);
        let cluster = &result.clusters[0];
        assert_eq!(cluster.total_sample_count, 0);
        assert_eq!(cluster.average_location, cluster.primary.gate.location);
    }
}
