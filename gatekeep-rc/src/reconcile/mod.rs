//! Periodic batch reconciliation
//!
//! [`Reconciler`] runs one cycle; [`ReconciliationScheduler`] decides when.

pub mod cycle;
pub mod scheduler;

pub use cycle::{CycleReport, CycleSource, ReconcileSettings, Reconciler};
pub use scheduler::{ReconciliationScheduler, SchedulerHandle, TriggerOutcome};
