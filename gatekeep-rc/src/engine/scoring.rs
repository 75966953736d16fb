//! Confidence scoring for gate bindings
//!
//! confidence = clamp(w_s * sample + w_a * accuracy + w_c * consistency, 0, 1)
//!
//! - sample factor `1 - e^(-n / sample_scale)`: rises fast, flattens past ~30 scans
//! - accuracy factor `1 / (1 + r / accuracy_scale_m)`: falls as reported radius grows
//! - consistency factor `1 / (1 + s / spread_scale_m)`: falls as scans scatter
//!
//! Each factor is in [0, 1] and the weights sum to 1, so the sum is bounded too.

use gatekeep_common::config::ScoringConfig;
use gatekeep_common::geo::{self, Coordinate};
use gatekeep_common::models::{GateBinding, ScanObservation};

/// Aggregate evidence behind a binding
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvidenceStats {
    pub sample_count: u32,
    /// Mean reported accuracy radius (meters); `None` when no scan reported one
    pub mean_accuracy_m: Option<f64>,
    /// RMS distance of scans from their centroid (meters)
    pub spread_m: f64,
}

impl EvidenceStats {
    pub fn empty() -> Self {
        Self {
            sample_count: 0,
            mean_accuracy_m: None,
            spread_m: 0.0,
        }
    }

    /// Stats recorded on a stored binding
    pub fn from_binding(binding: &GateBinding) -> Self {
        Self {
            sample_count: binding.sample_count,
            mean_accuracy_m: binding.mean_accuracy_m,
            spread_m: binding.spread_m,
        }
    }

    /// Stats and centroid of a scan set; `None` for an empty set
    pub fn from_observations(observations: &[&ScanObservation]) -> Option<(Self, Coordinate)> {
        let points: Vec<Coordinate> = observations.iter().map(|o| o.location).collect();
        let center = geo::centroid(&points)?;

        let accuracies: Vec<f64> = observations.iter().filter_map(|o| o.accuracy_m).collect();
        let mean_accuracy_m = if accuracies.is_empty() {
            None
        } else {
            Some(accuracies.iter().sum::<f64>() / accuracies.len() as f64)
        };

        let stats = Self {
            sample_count: u32::try_from(points.len()).unwrap_or(u32::MAX),
            mean_accuracy_m,
            spread_m: geo::rms_spread(&points, center),
        };
        Some((stats, center))
    }

    /// Combine the stats of several gates into the stats of their union
    ///
    /// Accuracy is the sample-weighted mean over members that reported one. Spread
    /// is pooled around `merged_center`: each member contributes its own spread plus
    /// the offset of its centroid from the merged centroid.
    pub fn pooled(members: &[(EvidenceStats, Coordinate)], merged_center: Coordinate) -> Self {
        let total: u64 = members.iter().map(|(s, _)| s.sample_count as u64).sum();
        if total == 0 {
            return Self::empty();
        }

        let mut accuracy_weight = 0.0;
        let mut accuracy_sum = 0.0;
        let mut sum_sq = 0.0;
        for (stats, center) in members {
            let n = stats.sample_count as f64;
            if let Some(accuracy) = stats.mean_accuracy_m {
                accuracy_weight += n;
                accuracy_sum += accuracy * n;
            }
            let offset = geo::distance_meters(*center, merged_center);
            sum_sq += n * (stats.spread_m.powi(2) + offset.powi(2));
        }

        Self {
            sample_count: u32::try_from(total).unwrap_or(u32::MAX),
            mean_accuracy_m: (accuracy_weight > 0.0).then(|| accuracy_sum / accuracy_weight),
            spread_m: (sum_sq / total as f64).sqrt(),
        }
    }
}

/// Scores evidence into a confidence in [0, 1]
#[derive(Debug, Clone)]
pub struct ConfidenceScorer {
    config: ScoringConfig,
}

impl ConfidenceScorer {
    pub fn new(config: ScoringConfig) -> Self {
        Self { config }
    }

    pub fn score(&self, stats: &EvidenceStats) -> f64 {
        if stats.sample_count == 0 {
            return 0.0;
        }
        let c = &self.config;
        let accuracy = stats.mean_accuracy_m.unwrap_or(c.default_accuracy_m);

        let raw = c.sample_weight * self.sample_factor(stats.sample_count)
            + c.accuracy_weight * self.accuracy_factor(accuracy)
            + c.consistency_weight * self.consistency_factor(stats.spread_m);

        if raw.is_nan() {
            0.0
        } else {
            raw.clamp(0.0, 1.0)
        }
    }

    pub fn sample_factor(&self, sample_count: u32) -> f64 {
        let n = sample_count as f64;
        (1.0 - (-n / self.config.sample_scale).exp()).clamp(0.0, 1.0)
    }

    pub fn accuracy_factor(&self, accuracy_m: f64) -> f64 {
        (1.0 / (1.0 + accuracy_m.max(0.0) / self.config.accuracy_scale_m)).clamp(0.0, 1.0)
    }

    pub fn consistency_factor(&self, spread_m: f64) -> f64 {
        (1.0 / (1.0 + spread_m.max(0.0) / self.config.spread_scale_m)).clamp(0.0, 1.0)
    }
}

impl Default for ConfidenceScorer {
    fn default() -> Self {
        Self::new(ScoringConfig::default())
    }
}
