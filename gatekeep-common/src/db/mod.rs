//! Database schema and settings access

pub mod init;
pub mod settings;

pub use init::{create_schema, init_database};
