//! Conveyor CI - stage execution and pipeline orchestration
//!
//! Provides a delivery pipeline orchestrator that:
//! - Runs test, build and deploy stages in isolated workspaces
//! - Hands the built image tag from Build to Deploy through the tag registry
//! - Records every run in the run ledger and notifies stage outcomes
//! - Audits recorded runs for protocol consistency

pub mod audit;
pub mod config;
pub mod pipeline;
pub mod runner;
pub mod source;
pub mod spec;
pub mod stage;

// Re-export key types
pub use audit::{AuditVerdict, RunAudit};
pub use config::{ConveyorConfig, DEFAULT_CONFIG_FILE, DEFAULT_CONFIG_TOML};
pub use pipeline::{
    Clock, Pipeline, PipelineBuilder, PipelineResult, PipelineSettings, RunOutcome, StageReport,
};
pub use runner::{
    CommandResult, FailureKind, Isolation, SandboxExecutor, StageExecution, StageExecutor,
    StageRequest, StageStatus,
};
pub use source::{DirectorySource, GitSource, SourceCheckout, SourceProvider};
pub use spec::RunSpec;
pub use stage::{BuiltinStage, StageConfig, TagHandoffRole};
