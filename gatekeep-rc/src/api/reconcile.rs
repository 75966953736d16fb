//! Manual trigger and cycle history

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use tracing::info;

use crate::reconcile::{CycleReport, TriggerOutcome};
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct TriggerResponse {
    pub outcome: TriggerOutcome,
}

/// POST /api/reconcile
///
/// 202 when a cycle was queued or coalesced, 503 once the scheduler has stopped.
pub async fn trigger_reconcile(State(state): State<AppState>) -> (StatusCode, Json<TriggerResponse>) {
    let outcome = state.scheduler.trigger();
    info!(?outcome, "Manual reconciliation requested");

    let status = match outcome {
        TriggerOutcome::Queued | TriggerOutcome::Coalesced => StatusCode::ACCEPTED,
        TriggerOutcome::Stopped => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status, Json(TriggerResponse { outcome }))
}

/// GET /api/cycles
///
/// Most recent first.
pub async fn list_cycles(State(state): State<AppState>) -> Json<Vec<CycleReport>> {
    Json(state.scheduler.history().await)
}
