//! HTTP control surface
//!
//! - `GET /health`
//! - `POST /api/reconcile`: request a cycle
//! - `GET /api/cycles`: recent cycle reports
//! - `GET /api/events`: SSE stream of gate status events

pub mod health;
pub mod reconcile;
pub mod sse;

pub use health::{health_check, health_routes};
pub use reconcile::{list_cycles, trigger_reconcile};
pub use sse::event_stream;
