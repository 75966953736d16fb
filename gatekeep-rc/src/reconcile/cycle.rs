//! One reconciliation cycle
//!
//! Per event id: fetch → attribute orphan scans → reduce → cluster → merge →
//! promote → persist → emit. Failures are contained: a failed fetch costs the
//! event this cycle, a failed write costs only the cluster or binding it touched.

use chrono::{DateTime, Duration, Utc};
use gatekeep_common::config::{TomlConfig, MAX_LOOKBACK_HOURS};
use gatekeep_common::events::{EventBus, GateEvent};
use gatekeep_common::models::{BindingStatus, Gate, GateBinding, ScanObservation};
use gatekeep_common::time;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::engine::attribution::{self, Attribution};
use crate::engine::{
    snapshot, ClusterBuilder, ConfidenceScorer, GateSnapshot, MergeCommit, MergeDecision,
    MergePolicy, PromotionPolicy, Transition,
};
use crate::error::{ReconcileError, Result};
use crate::store::{BindingFilter, GateFilter, GateStore};

/// What started a cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleSource {
    Timer,
    Manual,
}

/// Summary of one cycle, kept in the scheduler history
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    /// Sequence number, starting at 1
    pub cycle: u64,
    pub source: CycleSource,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub event_ids: Vec<String>,
    pub gates_created: usize,
    pub scans_attributed: usize,
    /// Duplicates folded into a primary
    pub merged: usize,
    pub flagged_for_review: usize,
    pub promoted: usize,
    pub removed: usize,
    /// Malformed check-ins skipped
    pub skipped_records: usize,
    pub failures: Vec<String>,
    /// Human readable status messages, in emission order
    pub messages: Vec<String>,
}

impl CycleReport {
    fn new(cycle: u64, source: CycleSource, started_at: DateTime<Utc>) -> Self {
        Self {
            cycle,
            source,
            started_at,
            finished_at: None,
            event_ids: Vec::new(),
            gates_created: 0,
            scans_attributed: 0,
            merged: 0,
            flagged_for_review: 0,
            promoted: 0,
            removed: 0,
            skipped_records: 0,
            failures: Vec::new(),
            messages: Vec::new(),
        }
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Engine parameters taken from configuration
#[derive(Debug, Clone)]
pub struct ReconcileSettings {
    pub scorer: ConfidenceScorer,
    pub clusters: ClusterBuilder,
    pub merge: MergePolicy,
    pub promotion: PromotionPolicy,
    /// Fixed event ids; empty means ask the store
    pub event_ids: Vec<String>,
    /// How far back to look for unattributed check-ins
    pub lookback: Duration,
}

impl ReconcileSettings {
    pub fn from_config(config: &TomlConfig) -> Self {
        Self {
            scorer: ConfidenceScorer::new(config.scoring.clone()),
            clusters: ClusterBuilder::new(config.clustering.radius_m),
            merge: MergePolicy::new(config.merge.clone()),
            promotion: PromotionPolicy::new(config.promotion.clone()),
            event_ids: config.scheduler.event_ids.clone(),
            lookback: Duration::hours(
                config.scheduler.lookback_hours.clamp(1, MAX_LOOKBACK_HOURS),
            ),
        }
    }
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self::from_config(&TomlConfig::default())
    }
}

/// State carried from one cycle to the next
struct CycleState {
    cycles_run: u64,
    /// Latest scan time seen per event; later scans count as new
    watermarks: HashMap<String, DateTime<Utc>>,
    /// Watermark for events not seen before
    initial_watermark: DateTime<Utc>,
}

/// Executes reconciliation cycles against a store
///
/// Cycles are serialized by an internal mutex, so concurrent callers queue up
/// instead of interleaving.
pub struct Reconciler {
    store: Arc<dyn GateStore>,
    events: EventBus,
    settings: ReconcileSettings,
    state: Mutex<CycleState>,
}

impl Reconciler {
    pub fn new(store: Arc<dyn GateStore>, events: EventBus, settings: ReconcileSettings) -> Self {
        Self {
            store,
            events,
            settings,
            state: Mutex::new(CycleState {
                cycles_run: 0,
                watermarks: HashMap::new(),
                initial_watermark: time::now(),
            }),
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn settings(&self) -> &ReconcileSettings {
        &self.settings
    }

    /// Run one full cycle over every configured or known event
    pub async fn run_cycle(&self, source: CycleSource) -> CycleReport {
        let mut state = self.state.lock().await;
        state.cycles_run += 1;

        let now = time::now();
        let mut report = CycleReport::new(state.cycles_run, source, now);

        let event_ids = match self.resolve_event_ids().await {
            Ok(ids) => ids,
            Err(e) => {
                error!(error = %e, "Reconciliation aborted: could not list events");
                report.failures.push(e.to_string());
                self.emit(
                    &mut report,
                    GateEvent::CycleFailed {
                        event_id: "*".to_string(),
                        reason: e.to_string(),
                        timestamp: time::now(),
                    },
                );
                return self.finish(report);
            }
        };
        report.event_ids = event_ids.clone();

        self.emit(
            &mut report,
            GateEvent::ProcessingStarted {
                event_ids: event_ids.clone(),
                timestamp: now,
            },
        );

        for event_id in &event_ids {
            let watermark = state
                .watermarks
                .get(event_id)
                .copied()
                .unwrap_or(state.initial_watermark);

            match self.reconcile_event(event_id, watermark, now, &mut report).await {
                Ok(latest) => {
                    state.watermarks.insert(event_id.clone(), latest);
                }
                Err(e) => {
                    error!(event_id = %event_id, error = %e, "Event reconciliation aborted, no changes this cycle");
                    report.failures.push(format!("{}: {}", event_id, e));
                    self.emit(
                        &mut report,
                        GateEvent::CycleFailed {
                            event_id: event_id.clone(),
                            reason: e.to_string(),
                            timestamp: time::now(),
                        },
                    );
                }
            }
        }

        self.finish(report)
    }

    fn finish(&self, mut report: CycleReport) -> CycleReport {
        let finished_at = time::now();
        report.finished_at = Some(finished_at);
        let completed = GateEvent::ProcessingCompleted {
            merged: report.merged,
            promoted: report.promoted,
            failures: report.failures.len(),
            timestamp: finished_at,
        };
        self.emit(&mut report, completed);
        info!(
            cycle = report.cycle,
            events = report.event_ids.len(),
            created = report.gates_created,
            merged = report.merged,
            promoted = report.promoted,
            removed = report.removed,
            failures = report.failures.len(),
            "Reconciliation cycle complete"
        );
        report
    }

    /// Broadcast a status event and record it on the report
    fn emit(&self, report: &mut CycleReport, event: GateEvent) {
        report.messages.push(event.describe());
        self.events.emit_lossy(event);
    }

    async fn resolve_event_ids(&self) -> Result<Vec<String>> {
        if !self.settings.event_ids.is_empty() {
            return Ok(self.settings.event_ids.clone());
        }
        self.store.list_event_ids().await.map_err(ReconcileError::fetch)
    }

    /// Primary filtered query, then one unfiltered retry
    ///
    /// Returns the gates and whether the fallback was used (in which case the
    /// caller still has to drop gates without evidence).
    async fn fetch_gates(&self, event_id: &str) -> Result<(Vec<Gate>, bool)> {
        match self.store.list_gates(event_id, GateFilter::WithScans).await {
            Ok(gates) => Ok((gates, false)),
            Err(primary) => {
                warn!(event_id = %event_id, error = %primary, "Filtered gate query failed, retrying unfiltered");
                let gates = self
                    .store
                    .list_gates(event_id, GateFilter::All)
                    .await
                    .map_err(|e| ReconcileError::fetch(format!("gate query failed twice: {}", e)))?;
                Ok((gates, true))
            }
        }
    }

    /// Reconcile one event; returns the new scan watermark
    ///
    /// Live gates are rebuilt from every check-in ever attributed to them. The
    /// lookback window only bounds the search for unattributed check-ins.
    async fn reconcile_event(
        &self,
        event_id: &str,
        watermark: DateTime<Utc>,
        now: DateTime<Utc>,
        report: &mut CycleReport,
    ) -> Result<DateTime<Utc>> {
        let (gates, fell_back) = self.fetch_gates(event_id).await?;
        let bindings = self
            .store
            .list_bindings(&BindingFilter::Event(event_id.to_string()))
            .await
            .map_err(ReconcileError::fetch)?;

        let removed: HashSet<Uuid> = bindings
            .iter()
            .filter(|b| b.status == BindingStatus::Removed)
            .map(|b| b.gate_id)
            .collect();
        let mut live: Vec<Gate> = gates
            .iter()
            .filter(|g| g.merged_into.is_none() && !removed.contains(&g.id))
            .cloned()
            .collect();
        let live_ids: Vec<Uuid> = live.iter().map(|g| g.id).collect();

        let attributed = self
            .store
            .list_gate_checkins(&live_ids)
            .await
            .map_err(ReconcileError::fetch)?;
        let orphans: Vec<ScanObservation> = self
            .store
            .list_recent_checkins(event_id, now - self.settings.lookback)
            .await
            .map_err(ReconcileError::fetch)?
            .into_iter()
            .filter(|c| c.gate_id.is_none())
            .collect();

        let has_orphans = !orphans.is_empty();
        let mut observations = validate_checkins(attributed.into_iter().chain(orphans).collect(), report);
        let latest_scan = observations
            .iter()
            .map(|o| o.scanned_at)
            .max()
            .map_or(watermark, |t| t.max(watermark));

        if fell_back {
            retain_with_evidence(&mut live, &bindings, &observations);
        }

        // Names of merged and removed gates stay reserved
        let taken_names: Vec<String> = if !has_orphans {
            Vec::new()
        } else if fell_back {
            gates.into_iter().map(|g| g.name).collect()
        } else {
            self.store
                .list_gates(event_id, GateFilter::All)
                .await
                .map_err(ReconcileError::fetch)?
                .into_iter()
                .map(|g| g.name)
                .collect()
        };

        let attribution = attribution::attribute(
            event_id,
            &live,
            &taken_names,
            &observations,
            self.settings.clusters.radius_m(),
            now,
        );
        let (written, created) = self.persist_attribution(attribution, report).await;
        attribution::apply(&mut observations, &written);
        live.extend(created);

        let snapshots = snapshot::reduce(live, bindings, &observations, watermark, &self.settings.scorer);
        for snap in snapshots.iter().filter(|s| s.new_scans > 0) {
            self.emit(
                report,
                GateEvent::NewScanDetected {
                    gate_name: snap.gate.name.clone(),
                    new_scans: snap.new_scans,
                    timestamp: now,
                },
            );
        }

        let survivors = self.resolve_duplicates(snapshots, now, report).await;
        for snap in survivors {
            self.promote(snap, now, report).await;
        }

        Ok(latest_scan)
    }

    /// Write new gates and scan assignments
    ///
    /// Returns the part of the attribution that reached the store, plus the gates
    /// that were created.
    async fn persist_attribution(
        &self,
        attribution: Attribution,
        report: &mut CycleReport,
    ) -> (Attribution, Vec<Gate>) {
        let mut written = Attribution::default();
        let mut created = Vec::new();
        let mut failed_new: HashSet<Uuid> = HashSet::new();

        for gate in attribution.new_gates {
            let gate_id = gate.id;
            match self.store.create_gate(gate).await {
                Ok(gate) => {
                    info!(gate = %gate.name, event_id = %gate.event_id, "New candidate gate");
                    report.gates_created += 1;
                    created.push(gate.clone());
                    written.new_gates.push(gate);
                }
                Err(e) => {
                    let e = ReconcileError::write(e);
                    warn!(gate_id = %gate_id, error = %e, "Could not create candidate gate");
                    report.failures.push(e.to_string());
                    failed_new.insert(gate_id);
                }
            }
        }

        for (gate_id, checkin_ids) in attribution.assignments {
            if failed_new.contains(&gate_id) {
                continue;
            }
            match self.store.attribute_checkins(gate_id, &checkin_ids).await {
                Ok(()) => {
                    report.scans_attributed += checkin_ids.len();
                    written.assignments.insert(gate_id, checkin_ids);
                }
                Err(e) => {
                    let e = ReconcileError::write(e);
                    warn!(gate_id = %gate_id, error = %e, "Could not attribute scans");
                    report.failures.push(e.to_string());
                }
            }
        }

        (written, created)
    }

    /// Cluster, then merge or flag each cluster; returns what goes on to promotion
    async fn resolve_duplicates(
        &self,
        snapshots: Vec<GateSnapshot>,
        now: DateTime<Utc>,
        report: &mut CycleReport,
    ) -> Vec<GateSnapshot> {
        let clustering = self.settings.clusters.build(snapshots);
        let mut survivors = clustering.singletons;

        for cluster in clustering.clusters {
            let decision = self.settings.merge.decide(cluster.highest_confidence);
            debug!(
                primary = %cluster.primary.gate.name,
                size = cluster.size(),
                highest_confidence = cluster.highest_confidence,
                ?decision,
                "Evaluating duplicate cluster"
            );

            match decision {
                MergeDecision::AutoMerge => {
                    let commit = MergeCommit::plan(&cluster, &self.settings.scorer, now);
                    match self.store.commit_merge(&commit).await {
                        Ok(()) => {
                            info!(
                                primary = %commit.primary.name,
                                duplicates = commit.duplicate_ids.len(),
                                samples = commit.binding.sample_count,
                                "Merged duplicate gates"
                            );
                            report.merged += commit.duplicate_ids.len();
                            for duplicate_name in &commit.duplicate_names {
                                self.emit(
                                    report,
                                    GateEvent::GatesMerged {
                                        primary_name: commit.primary.name.clone(),
                                        duplicate_name: duplicate_name.clone(),
                                        timestamp: now,
                                    },
                                );
                            }
                            survivors.push(commit.into_snapshot(&cluster));
                        }
                        Err(e) => {
                            // Whole cluster sits this cycle out and is retried next time
                            let e = ReconcileError::write(e);
                            warn!(primary = %cluster.primary.gate.name, error = %e, "Merge failed, cluster left untouched");
                            report.failures.push(e.to_string());
                        }
                    }
                }
                MergeDecision::Review => {
                    report.flagged_for_review += cluster.duplicates.len();
                    for duplicate in &cluster.duplicates {
                        self.emit(
                            report,
                            GateEvent::DuplicateDetected {
                                primary_name: cluster.primary.gate.name.clone(),
                                duplicate_name: duplicate.gate.name.clone(),
                                timestamp: now,
                            },
                        );
                    }
                    survivors.push(cluster.primary);
                    survivors.extend(cluster.duplicates);
                }
                MergeDecision::Ignore => {
                    survivors.push(cluster.primary);
                    survivors.extend(cluster.duplicates);
                }
            }
        }

        survivors.sort_by(|a, b| a.id().cmp(&b.id()));
        survivors
    }

    /// Apply the state machine to one gate and persist its aggregates
    async fn promote(&self, mut snap: GateSnapshot, now: DateTime<Utc>, report: &mut CycleReport) {
        let transition = self
            .settings
            .promotion
            .evaluate(&snap.binding, snap.gate.created_at, now);

        if let Transition::Remove { from } = transition {
            match self.store.delete_gate(snap.id()).await {
                Ok(()) => {
                    info!(
                        gate = %snap.gate.name,
                        from = %from,
                        samples = snap.sample_count(),
                        age_hours = time::hours_between(snap.gate.created_at, now),
                        "Removed stale gate"
                    );
                    report.removed += 1;
                    self.emit(
                        report,
                        GateEvent::GateRemoved {
                            gate_name: snap.gate.name.clone(),
                            timestamp: now,
                        },
                    );
                }
                Err(e) => {
                    let e = ReconcileError::write(e);
                    warn!(gate = %snap.gate.name, error = %e, "Could not remove gate");
                    report.failures.push(e.to_string());
                }
            }
            return;
        }

        snap.binding.status = transition.apply(snap.binding.status);
        let promoted = matches!(transition, Transition::Promote { .. });

        let gate_dirty = snap.location_changed();
        let binding_dirty = promoted || snap.binding_changed();
        if gate_dirty {
            snap.gate.updated_at = now;
        }
        if binding_dirty {
            snap.binding.last_updated = now;
        }

        // Location and aggregates land together or not at all
        let written = match (gate_dirty, binding_dirty) {
            (true, true) => self.store.commit_snapshot(&snap.gate, &snap.binding).await,
            (true, false) => self.store.upsert_gate(snap.gate.clone()).await.map(|_| ()),
            (false, true) => self.store.upsert_binding(snap.binding.clone()).await.map(|_| ()),
            (false, false) => Ok(()),
        };
        if let Err(e) = written {
            let e = ReconcileError::write(e);
            warn!(gate = %snap.gate.name, error = %e, "Could not persist gate snapshot");
            report.failures.push(e.to_string());
            return;
        }

        if let Transition::Promote { from, to } = transition {
            info!(gate = %snap.gate.name, from = %from, to = %to, "Gate promoted");
            report.promoted += 1;
            self.emit(
                report,
                GateEvent::GatePromoted {
                    gate_name: snap.gate.name.clone(),
                    from_status: from,
                    to_status: to,
                    timestamp: now,
                },
            );
        }

        let before = snap.previous.as_ref().map_or(0, |b| b.confidence_percent());
        let after = snap.binding.confidence_percent();
        if after > before {
            self.emit(
                report,
                GateEvent::QualityImproved {
                    gate_name: snap.gate.name.clone(),
                    score_percent: after,
                    timestamp: now,
                },
            );
        }
    }
}

/// Drop malformed check-ins, counting them on the report
fn validate_checkins(raw: Vec<ScanObservation>, report: &mut CycleReport) -> Vec<ScanObservation> {
    raw.into_iter()
        .filter(|checkin| match checkin.validate() {
            Ok(()) => true,
            Err(e) => {
                let e = ReconcileError::Validation(e.to_string());
                warn!(checkin = %checkin.id, error = %e, "Skipping malformed check-in");
                report.skipped_records += 1;
                false
            }
        })
        .collect()
}

/// Client-side version of the `WithScans` filter
fn retain_with_evidence(gates: &mut Vec<Gate>, bindings: &[GateBinding], observations: &[ScanObservation]) {
    let scanned: HashSet<Uuid> = observations.iter().filter_map(|o| o.gate_id).collect();
    let counted: HashSet<Uuid> = bindings
        .iter()
        .filter(|b| b.sample_count > 0)
        .map(|b| b.gate_id)
        .collect();
    gates.retain(|g| scanned.contains(&g.id) || counted.contains(&g.id));
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatekeep_common::geo::Coordinate;

    #[test]
    fn test_validate_checkins_skips_bad_records() {
        let mut report = CycleReport::new(1, CycleSource::Manual, Utc::now());
        let raw = vec![
            ScanObservation::new("evt", Coordinate::new(10.0, 10.0), Some(4.0)),
            ScanObservation::new("evt", Coordinate::new(f64::NAN, 10.0), None),
            ScanObservation::new("evt", Coordinate::new(10.0, 10.0), Some(f64::INFINITY)),
        ];
        let kept = validate_checkins(raw, &mut report);
        assert_eq!(kept.len(), 1);
        assert_eq!(report.skipped_records, 2);
    }

    #[test]
    fn test_retain_with_evidence() {
        let scanned = Gate::new("Gate 1", Coordinate::new(1.0, 1.0), "evt");
        let counted = Gate::new("Gate 2", Coordinate::new(1.0, 1.0), "evt");
        let idle = Gate::new("Gate 3", Coordinate::new(1.0, 1.0), "evt");

        let mut scan = ScanObservation::new("evt", scanned.location, None);
        scan.gate_id = Some(scanned.id);
        let mut binding = GateBinding::unbound(counted.id);
        binding.sample_count = 2;

        let mut gates = vec![scanned.clone(), counted.clone(), idle];
        retain_with_evidence(&mut gates, &[binding], &[scan]);
        let ids: Vec<Uuid> = gates.iter().map(|g| g.id).collect();
        assert_eq!(ids, vec![scanned.id, counted.id]);
    }

    #[test]
    fn test_settings_follow_config() {
        let mut config = TomlConfig::default();
        config.clustering.radius_m = 80.0;
        config.scheduler.lookback_hours = 6;
        config.scheduler.event_ids = vec!["evt".to_string()];

        let settings = ReconcileSettings::from_config(&config);
        assert_eq!(settings.clusters.radius_m(), 80.0);
        assert_eq!(settings.lookback, Duration::hours(6));
        assert_eq!(settings.event_ids, vec!["evt".to_string()]);
    }

    #[test]
    fn test_out_of_range_lookback_is_clamped() {
        let mut config = TomlConfig::default();
        config.scheduler.lookback_hours = i64::MAX;
        assert_eq!(ReconcileSettings::from_config(&config).lookback, Duration::hours(MAX_LOOKBACK_HOURS));

        config.scheduler.lookback_hours = -3;
        assert_eq!(ReconcileSettings::from_config(&config).lookback, Duration::hours(1));
    }
}
