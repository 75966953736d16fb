//! Reconciliation scheduler
//!
//! Owns the only loop that runs cycles. Two triggers feed it: a fixed-interval
//! timer and manual requests. Manual requests travel through a capacity-1
//! channel, so a request made while a cycle runs queues exactly one follow-up
//! and any further requests are coalesced into it.
//!
//! Shutdown is observed between cycles only; a running cycle always finishes
//! its writes.

use gatekeep_common::config::SchedulerConfig;
use gatekeep_common::time;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::cycle::{CycleReport, CycleSource, Reconciler};

/// Result of a manual trigger request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerOutcome {
    /// A cycle will run for this request
    Queued,
    /// A run was already pending; this request folds into it
    Coalesced,
    /// The scheduler has shut down
    Stopped,
}

/// Cloneable control handle for a running scheduler
#[derive(Clone)]
pub struct SchedulerHandle {
    trigger_tx: mpsc::Sender<()>,
    cancel: CancellationToken,
    history: Arc<RwLock<VecDeque<CycleReport>>>,
}

impl SchedulerHandle {
    /// Request a cycle as soon as the current one (if any) finishes
    pub fn trigger(&self) -> TriggerOutcome {
        if self.cancel.is_cancelled() {
            return TriggerOutcome::Stopped;
        }
        match self.trigger_tx.try_send(()) {
            Ok(()) => TriggerOutcome::Queued,
            Err(TrySendError::Full(())) => TriggerOutcome::Coalesced,
            Err(TrySendError::Closed(())) => TriggerOutcome::Stopped,
        }
    }

    /// Stop scheduling new cycles; an in-flight cycle still completes
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Recent cycle reports, most recent first
    pub async fn history(&self) -> Vec<CycleReport> {
        self.history.read().await.iter().cloned().collect()
    }

    pub async fn latest(&self) -> Option<CycleReport> {
        self.history.read().await.front().cloned()
    }
}

/// Starts the scheduler loop
pub struct ReconciliationScheduler;

impl ReconciliationScheduler {
    /// Spawn the loop on the current runtime
    ///
    /// When the timer is enabled the first cycle runs immediately.
    pub fn start(reconciler: Arc<Reconciler>, config: SchedulerConfig) -> (SchedulerHandle, JoinHandle<()>) {
        let (trigger_tx, trigger_rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        let history = Arc::new(RwLock::new(VecDeque::with_capacity(config.history_size)));

        let handle = SchedulerHandle {
            trigger_tx,
            cancel: cancel.clone(),
            history: history.clone(),
        };

        let task = tokio::spawn(run_loop(reconciler, config, trigger_rx, cancel, history));
        (handle, task)
    }
}

async fn run_loop(
    reconciler: Arc<Reconciler>,
    config: SchedulerConfig,
    mut trigger_rx: mpsc::Receiver<()>,
    cancel: CancellationToken,
    history: Arc<RwLock<VecDeque<CycleReport>>>,
) {
    if config.enabled {
        info!(
            "Starting reconciliation scheduler (interval: {}s, history: {})",
            config.interval_secs, config.history_size
        );
    } else {
        info!("Reconciliation timer disabled by configuration, manual triggers only");
    }

    let mut timer = interval(time::secs_to_duration(config.interval_secs));
    timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut triggers_open = true;

    loop {
        if !config.enabled && !triggers_open {
            debug!("No trigger sources left");
            break;
        }

        let source = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = timer.tick(), if config.enabled => CycleSource::Timer,
            request = trigger_rx.recv(), if triggers_open => match request {
                Some(()) => CycleSource::Manual,
                None => {
                    triggers_open = false;
                    continue;
                }
            },
        };

        debug!(?source, "Reconciliation cycle starting");
        let report = reconciler.run_cycle(source).await;

        {
            let mut history = history.write().await;
            history.push_front(report);
            history.truncate(config.history_size);
        }

        // Next timer cycle is a full interval after this one ended
        timer.reset();
    }

    info!("Reconciliation scheduler stopped");
}
