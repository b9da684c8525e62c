//! Archive orchestration engine for tablevault.
//!
//! Walks the registry of archivable tables, plans a timestamp window per
//! table, dumps matching rows into artifacts, optionally deletes them from
//! the source and restores them into a destination, advances checkpoints,
//! and finally ships the artifact tree to object storage.

pub mod checkpoint;
pub mod config;
pub mod dump;
pub mod errors;
pub mod mutation;
pub mod orchestrator;
pub mod planner;
pub mod registry;
pub mod resolve;
pub mod result;
pub mod transfer;

// Re-export public API for convenience
pub use errors::ArchiveError;
pub use orchestrator::{
    plan_archive, run_archive, ArchiveContext, ArchivePlan, ExecutionOptions, PlannedObject,
};
pub use result::{ObjectOutcome, ObjectState, RunReport, RunSummary};
pub use tokio_util::sync::CancellationToken;
