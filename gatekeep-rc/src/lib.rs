//! gatekeep-rc library - gate reconciliation service
//!
//! Infers physical entry gates from geolocated check-ins, folds duplicate gates
//! together and promotes trusted gates toward enforcement, one periodic batch
//! cycle at a time.

use axum::Router;
use gatekeep_common::events::EventBus;
use tower_http::trace::TraceLayer;

pub mod api;
pub mod engine;
pub mod error;
pub mod reconcile;
pub mod store;

pub use error::{ReconcileError, Result};

use reconcile::SchedulerHandle;

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// Control handle of the running scheduler
    pub scheduler: SchedulerHandle,
    /// Status event bus (SSE source)
    pub events: EventBus,
}

impl AppState {
    pub fn new(scheduler: SchedulerHandle, events: EventBus) -> Self {
        Self { scheduler, events }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::{get, post};

    Router::new()
        .route("/api/reconcile", post(api::trigger_reconcile))
        .route("/api/cycles", get(api::list_cycles))
        .route("/api/events", get(api::event_stream))
        .merge(api::health_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
