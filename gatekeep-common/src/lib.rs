//! # Gatekeep Common Library
//!
//! Shared code for the gatekeep services:
//! - Gate, binding and check-in models
//! - Great-circle geometry helpers
//! - Event types (GateEvent enum) and the EventBus
//! - TOML configuration loading
//! - SQLite schema initialization and settings access
//! - SSE streaming of gate events

pub mod config;
#[cfg(feature = "sqlx")]
pub mod db;
pub mod error;
pub mod events;
pub mod geo;
pub mod models;
pub mod sse;
pub mod time;

pub use error::{Error, Result};
pub use geo::Coordinate;
