//! Gate deduplication and promotion engine
//!
//! Pure, synchronous building blocks. A reconciliation cycle feeds them snapshots
//! fetched from the store and writes back whatever they decide.
//!
//! **Pipeline:** attribute orphan scans → reduce → cluster → merge → promote

pub mod attribution;
pub mod cluster;
pub mod merge;
pub mod promotion;
pub mod scoring;
pub mod snapshot;

pub use cluster::{ClusterBuilder, Clustering, GateCluster};
pub use merge::{MergeCommit, MergeDecision, MergePolicy};
pub use promotion::{PromotionPolicy, Transition};
pub use scoring::{ConfidenceScorer, EvidenceStats};
pub use snapshot::GateSnapshot;
