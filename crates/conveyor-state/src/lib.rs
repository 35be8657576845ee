//! Conveyor-State: persistence for the Conveyor pipeline orchestrator
//!
//! ## Layer 0 - Data/Persistence
//!
//! Focus: durable handoff between stages and an auditable record of runs.
//!
//! ## Key Components
//!
//! - `BlobStore`: content-addressed bytes backing artifact files
//! - `TagRegistry`: key → image tag store read by Deploy, written by Build
//! - `RunLedger`: run records and their ordered stage events
//! - `SurrealHandle`: SurrealDB connection handing out the durable backends

mod error;
pub mod fakes;
pub mod fs_blob;
mod handle;
mod migrations;
mod schema;
pub mod storage_traits;
pub mod surreal_ledger;
pub mod surreal_tags;

pub use error::{StateError, StorageError};
pub use fs_blob::FsBlobStore;
pub use handle::{Endpoint, SurrealHandle, DEFAULT_LOCAL_DB_PATH};
pub use storage_traits::{
    BlobStore, ContentDigest, RunEvent, RunId, RunLedger, RunMetadata, RunRecord, RunStatus,
    RunSummary, StorageResult, TagRecord, TagRegistry,
};
pub use surreal_ledger::SurrealRunLedger;
pub use surreal_tags::SurrealTagRegistry;

/// Result type for conveyor-state connection and schema operations
pub type Result<T> = std::result::Result<T, StateError>;
