//! Event types for the gatekeep event system
//!
//! Provides the status events emitted by the reconciliation engine and the
//! EventBus that fans them out to the presentation layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::models::BindingStatus;

/// Status events emitted by reconciliation cycles
///
/// Events are broadcast via EventBus and serialized for SSE transmission.
/// Delivery is fire-and-forget: the engine never waits on a consumer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum GateEvent {
    /// A reconciliation cycle started
    ProcessingStarted {
        /// Event ids the cycle will process
        event_ids: Vec<String>,
        timestamp: DateTime<Utc>,
    },

    /// A gate received scans since the previous cycle
    NewScanDetected {
        gate_name: String,
        /// Number of scans observed since the previous cycle
        new_scans: u32,
        timestamp: DateTime<Utc>,
    },

    /// Two gates sit close enough to be duplicates but confidence is too low
    /// to merge automatically; operator review requested
    DuplicateDetected {
        primary_name: String,
        duplicate_name: String,
        timestamp: DateTime<Utc>,
    },

    /// A duplicate gate was folded into its primary
    GatesMerged {
        primary_name: String,
        duplicate_name: String,
        timestamp: DateTime<Utc>,
    },

    /// A binding moved up the trust ladder
    GatePromoted {
        gate_name: String,
        from_status: BindingStatus,
        to_status: BindingStatus,
        timestamp: DateTime<Utc>,
    },

    /// A gate's confidence percentage went up
    QualityImproved {
        gate_name: String,
        /// New confidence as a whole percentage
        score_percent: u8,
        timestamp: DateTime<Utc>,
    },

    /// A stale low-evidence gate was soft-deleted
    GateRemoved {
        gate_name: String,
        timestamp: DateTime<Utc>,
    },

    /// Processing of one event id was aborted (no changes this cycle)
    CycleFailed {
        event_id: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// A reconciliation cycle finished
    ProcessingCompleted {
        merged: usize,
        promoted: usize,
        failures: usize,
        timestamp: DateTime<Utc>,
    },
}

impl GateEvent {
    /// Event type name, used as the SSE `event:` field
    pub fn event_type(&self) -> &'static str {
        match self {
            GateEvent::ProcessingStarted { .. } => "ProcessingStarted",
            GateEvent::NewScanDetected { .. } => "NewScanDetected",
            GateEvent::DuplicateDetected { .. } => "DuplicateDetected",
            GateEvent::GatesMerged { .. } => "GatesMerged",
            GateEvent::GatePromoted { .. } => "GatePromoted",
            GateEvent::QualityImproved { .. } => "QualityImproved",
            GateEvent::GateRemoved { .. } => "GateRemoved",
            GateEvent::CycleFailed { .. } => "CycleFailed",
            GateEvent::ProcessingCompleted { .. } => "ProcessingCompleted",
        }
    }

    /// One-line human readable status message
    pub fn describe(&self) -> String {
        match self {
            GateEvent::ProcessingStarted { event_ids, .. } => {
                format!("processing started for {} event(s)", event_ids.len())
            }
            GateEvent::NewScanDetected { gate_name, new_scans, .. } => {
                format!("{} new scan(s) at {}", new_scans, gate_name)
            }
            GateEvent::DuplicateDetected { primary_name, duplicate_name, .. } => {
                format!("possible duplicate: {} may be {}", duplicate_name, primary_name)
            }
            GateEvent::GatesMerged { primary_name, duplicate_name, .. } => {
                format!("merged {} into {}", duplicate_name, primary_name)
            }
            GateEvent::GatePromoted { gate_name, from_status, to_status, .. } => {
                format!("gate promoted: {} {} → {}", gate_name, from_status, to_status)
            }
            GateEvent::QualityImproved { gate_name, score_percent, .. } => {
                format!("{} quality improved to {}%", gate_name, score_percent)
            }
            GateEvent::GateRemoved { gate_name, .. } => format!("removed stale gate {}", gate_name),
            GateEvent::CycleFailed { event_id, reason, .. } => {
                format!("no changes for event {}: {}", event_id, reason)
            }
            GateEvent::ProcessingCompleted { merged, promoted, failures, .. } => format!(
                "processing completed: {} merged, {} promoted, {} failure(s)",
                merged, promoted, failures
            ),
        }
    }
}

/// Central event distribution for gate status events
///
/// Uses tokio::broadcast internally:
/// - Non-blocking publish (slow subscribers don't block the engine)
/// - Multiple concurrent subscribers
/// - Lagged message detection for slow subscribers
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<GateEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<GateEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists.
    #[allow(clippy::result_large_err)]
    pub fn emit(&self, event: GateEvent) -> Result<usize, broadcast::error::SendError<GateEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: GateEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
