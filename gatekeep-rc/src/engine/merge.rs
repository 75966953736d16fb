//! Duplicate resolution for gate clusters
//!
//! A cluster's highest member confidence picks the action:
//! - above `auto_merge_above`: fold duplicates into the primary
//! - from `review_at_or_above` through `auto_merge_above`: ask an operator
//! - below: leave the gates alone

use chrono::{DateTime, Utc};
use gatekeep_common::config::MergeConfig;
use gatekeep_common::models::{BindingStatus, Gate, GateBinding};
use serde::Serialize;
use uuid::Uuid;

use super::cluster::GateCluster;
use super::scoring::{ConfidenceScorer, EvidenceStats};
use super::snapshot::GateSnapshot;

/// Action for one cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeDecision {
    AutoMerge,
    Review,
    Ignore,
}

/// Confidence cutoffs for duplicate handling
#[derive(Debug, Clone)]
pub struct MergePolicy {
    config: MergeConfig,
}

impl MergePolicy {
    pub fn new(config: MergeConfig) -> Self {
        Self { config }
    }

    /// First matching rule wins; the auto-merge cutoff is strict
    pub fn decide(&self, highest_confidence: f64) -> MergeDecision {
        if highest_confidence > self.config.auto_merge_above {
            MergeDecision::AutoMerge
        } else if highest_confidence >= self.config.review_at_or_above {
            MergeDecision::Review
        } else {
            MergeDecision::Ignore
        }
    }
}

impl Default for MergePolicy {
    fn default() -> Self {
        Self::new(MergeConfig::default())
    }
}

/// Everything an auto-merge writes, applied by the store as one unit
#[derive(Debug, Clone, PartialEq)]
pub struct MergeCommit {
    /// Primary gate at the merged centroid
    pub primary: Gate,
    /// Primary binding carrying the union of all members' evidence
    pub binding: GateBinding,
    pub duplicate_ids: Vec<Uuid>,
    /// Names of the duplicates, parallel to `duplicate_ids`
    pub duplicate_names: Vec<String>,
    pub merged_at: DateTime<Utc>,
}

impl MergeCommit {
    /// Build the write set for collapsing `cluster` into its primary
    ///
    /// Sample counts are summed and confidence is rescored from the pooled
    /// evidence. The merged binding takes the most trusted status among the
    /// members so a merge never demotes a gate.
    pub fn plan(cluster: &GateCluster, scorer: &ConfidenceScorer, now: DateTime<Utc>) -> Self {
        let members: Vec<(EvidenceStats, _)> = cluster
            .members()
            .map(|s| (s.stats, s.gate.location))
            .collect();
        let stats = EvidenceStats::pooled(&members, cluster.average_location);

        let status = cluster
            .members()
            .map(|s| s.binding.status)
            .filter(|s| s.is_live())
            .max_by_key(|s| s.tier())
            .unwrap_or(BindingStatus::Unbound);

        let mut primary = cluster.primary.gate.clone();
        primary.location = cluster.average_location;
        primary.updated_at = now;

        let binding = GateBinding {
            gate_id: primary.id,
            status,
            sample_count: cluster.total_sample_count,
            confidence: scorer.score(&stats),
            mean_accuracy_m: stats.mean_accuracy_m,
            spread_m: stats.spread_m,
            last_updated: now,
        };

        Self {
            primary,
            binding,
            duplicate_ids: cluster.duplicates.iter().map(|d| d.id()).collect(),
            duplicate_names: cluster.duplicates.iter().map(|d| d.gate.name.clone()).collect(),
            merged_at: now,
        }
    }

    /// Post-merge view of the primary, used for this cycle's promotion pass
    pub fn into_snapshot(self, cluster: &GateCluster) -> GateSnapshot {
        let new_scans = cluster
            .members()
            .fold(0u32, |acc, s| acc.saturating_add(s.new_scans));
        GateSnapshot {
            stats: EvidenceStats::from_binding(&self.binding),
            previous: cluster.primary.previous.clone(),
            previous_location: cluster.primary.previous_location,
            new_scans,
            gate: self.primary,
            binding: self.binding,
        }
    }
}
