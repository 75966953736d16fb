//! Promotion state machine
//!
//! ```text
//! unbound ──(n≥5, c≥0.60)──▶ probation ──(n≥15, c≥0.75)──▶ enforced
//!    │                                                        ▲
//!    └────────────(n≥30, c≥0.65: high-volume shortcut)────────┘
//!
//! unbound | probation ──(n<5, older than 24h)──▶ removed
//! ```
//!
//! At most one step per evaluation, except the shortcut which may jump straight
//! from unbound to enforced. Enforced never moves; removed is terminal.

use chrono::{DateTime, Duration, Utc};
use gatekeep_common::config::PromotionConfig;
use gatekeep_common::models::{BindingStatus, GateBinding};

/// Outcome of evaluating one binding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Stay,
    Promote {
        from: BindingStatus,
        to: BindingStatus,
    },
    Remove {
        from: BindingStatus,
    },
}

impl Transition {
    /// Status after applying this transition to `current`
    pub fn apply(&self, current: BindingStatus) -> BindingStatus {
        match self {
            Transition::Stay => current,
            Transition::Promote { to, .. } => *to,
            Transition::Remove { .. } => BindingStatus::Removed,
        }
    }
}

/// Threshold set driving the state machine
#[derive(Debug, Clone)]
pub struct PromotionPolicy {
    config: PromotionConfig,
}

impl PromotionPolicy {
    pub fn new(config: PromotionConfig) -> Self {
        Self { config }
    }

    /// Decide the next step for a binding
    ///
    /// `created_at` is the owning gate's creation time; `now` is the cycle clock.
    pub fn evaluate(
        &self,
        binding: &GateBinding,
        created_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Transition {
        let from = binding.status;
        match from {
            BindingStatus::Removed | BindingStatus::Enforced => return Transition::Stay,
            BindingStatus::Unbound | BindingStatus::Probation => {}
        }

        if self.is_stale(binding, created_at, now) {
            return Transition::Remove { from };
        }

        let n = binding.sample_count;
        let c = binding.confidence;

        if self.meets_high_volume(n, c) {
            return Transition::Promote {
                from,
                to: BindingStatus::Enforced,
            };
        }

        let cfg = &self.config;
        let to = match from {
            BindingStatus::Unbound
                if n >= cfg.probation_min_samples && c >= cfg.probation_min_confidence =>
            {
                BindingStatus::Probation
            }
            BindingStatus::Probation
                if n >= cfg.enforced_min_samples && c >= cfg.enforced_min_confidence =>
            {
                BindingStatus::Enforced
            }
            _ => return Transition::Stay,
        };
        Transition::Promote { from, to }
    }

    fn meets_high_volume(&self, n: u32, c: f64) -> bool {
        n >= self.config.high_volume_min_samples && c >= self.config.high_volume_min_confidence
    }

    fn is_stale(&self, binding: &GateBinding, created_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        binding.sample_count < self.config.removal_below_samples
            && now - created_at > Duration::hours(self.config.removal_age_hours)
    }
}

impl Default for PromotionPolicy {
    fn default() -> Self {
        Self::new(PromotionConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn binding(status: BindingStatus, n: u32, c: f64) -> GateBinding {
        let mut b = GateBinding::unbound(Uuid::new_v4());
        b.status = status;
        b.sample_count = n;
        b.confidence = c;
        b
    }

    fn fresh(policy: &PromotionPolicy, b: &GateBinding) -> Transition {
        let now = Utc::now();
        policy.evaluate(b, now - Duration::hours(1), now)
    }

    #[test]
    fn test_low_evidence_stays_unbound() {
        let policy = PromotionPolicy::default();
        assert_eq!(fresh(&policy, &binding(BindingStatus::Unbound, 3, 0.40)), Transition::Stay);
    }

    #[test]
    fn test_unbound_to_probation() {
        let policy = PromotionPolicy::default();
        assert_eq!(
            fresh(&policy, &binding(BindingStatus::Unbound, 8, 0.60)),
            Transition::Promote {
                from: BindingStatus::Unbound,
                to: BindingStatus::Probation
            }
        );
    }

    #[test]
    fn test_unbound_needs_both_thresholds() {
        let policy = PromotionPolicy::default();
        assert_eq!(fresh(&policy, &binding(BindingStatus::Unbound, 4, 0.95)), Transition::Stay);
        assert_eq!(fresh(&policy, &binding(BindingStatus::Unbound, 25, 0.59)), Transition::Stay);
    }

    #[test]
    fn test_probation_to_enforced() {
        let policy = PromotionPolicy::default();
        assert_eq!(
            fresh(&policy, &binding(BindingStatus::Probation, 20, 0.85)),
            Transition::Promote {
                from: BindingStatus::Probation,
                to: BindingStatus::Enforced
            }
        );
    }

    #[test]
    fn test_strong_unbound_moves_one_step_only() {
        let policy = PromotionPolicy::default();
        let b = binding(BindingStatus::Unbound, 20, 0.85);
        let first = fresh(&policy, &b);
        assert_eq!(
            first,
            Transition::Promote {
                from: BindingStatus::Unbound,
                to: BindingStatus::Probation
            }
        );

        let next = binding(first.apply(b.status), 20, 0.85);
        assert_eq!(
            fresh(&policy, &next),
            Transition::Promote {
                from: BindingStatus::Probation,
                to: BindingStatus::Enforced
            }
        );
    }

    #[test]
    fn test_high_volume_shortcut() {
        let policy = PromotionPolicy::default();
        for status in [BindingStatus::Unbound, BindingStatus::Probation] {
            assert_eq!(
                fresh(&policy, &binding(status, 60, 0.65)),
                Transition::Promote {
                    from: status,
                    to: BindingStatus::Enforced
                }
            );
        }
        // Below the shortcut's confidence floor a probation gate stays put
        assert_eq!(fresh(&policy, &binding(BindingStatus::Probation, 60, 0.64)), Transition::Stay);
    }

    #[test]
    fn test_enforced_never_demoted_or_removed() {
        let policy = PromotionPolicy::default();
        let now = Utc::now();
        let b = binding(BindingStatus::Enforced, 0, 0.0);
        assert_eq!(policy.evaluate(&b, now - Duration::days(30), now), Transition::Stay);
    }

    #[test]
    fn test_removed_is_terminal() {
        let policy = PromotionPolicy::default();
        assert_eq!(fresh(&policy, &binding(BindingStatus::Removed, 90, 0.99)), Transition::Stay);
    }

    #[test]
    fn test_stale_low_evidence_removed() {
        let policy = PromotionPolicy::default();
        let now = Utc::now();
        for status in [BindingStatus::Unbound, BindingStatus::Probation] {
            let b = binding(status, 4, 0.9);
            assert_eq!(
                policy.evaluate(&b, now - Duration::hours(25), now),
                Transition::Remove { from: status }
            );
            assert_eq!(policy.evaluate(&b, now - Duration::hours(23), now), Transition::Stay);
        }
    }

    #[test]
    fn test_promotion_never_moves_backward() {
        let policy = PromotionPolicy::default();
        let now = Utc::now();
        let created = now - Duration::hours(2);
        for status in [BindingStatus::Unbound, BindingStatus::Probation, BindingStatus::Enforced] {
            for n in [0, 4, 5, 15, 30, 100] {
                for c in [0.0, 0.6, 0.65, 0.75, 1.0] {
                    let b = binding(status, n, c);
                    let next = policy.evaluate(&b, created, now).apply(status);
                    assert!(next.tier() >= status.tier(), "{} -> {}", status, next);
                }
            }
        }
    }

    #[test]
    fn test_custom_thresholds() {
        let policy = PromotionPolicy::new(PromotionConfig {
            probation_min_samples: 2,
            probation_min_confidence: 0.3,
            ..PromotionConfig::default()
        });
        assert_eq!(
            fresh(&policy, &binding(BindingStatus::Unbound, 2, 0.3)),
            Transition::Promote {
                from: BindingStatus::Unbound,
                to: BindingStatus::Probation
            }
        );
    }
}
