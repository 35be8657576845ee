//! Conveyor Core Library
//!
//! Domain logic shared by the stage executor and the orchestrator:
//! artifacts and the artifact channel, the image tag handoff, stage
//! notifications, the per-stage permission boundary and manifest rendering.

pub mod artifact;
pub mod domain;
pub mod git;
pub mod manifest;
pub mod notify;
pub mod obs;
pub mod policy;
pub mod tag;
pub mod telemetry;

pub use artifact::{Artifact, ArtifactChannel, FileManifest, OutputPattern};
pub use domain::{ConveyorError, Result, StageRole};
pub use git::capture_head_sha;
pub use notify::{
    ChannelRecipient, DispatchReport, LogRecipient, NotificationEvent, NotificationRouter,
    Outcome, Recipient, WebhookRecipient,
};
pub use obs::{
    emit_run_finalize_error, emit_run_finished, emit_run_started, emit_stage_finished,
    emit_stage_started, RunSpan,
};
pub use policy::{
    Capability, CredentialIssuer, PolicyRule, PolicySet, PolicyVerdict, ScopedCredential,
};
pub use tag::{
    ImageRef, ImageTag, ResolvedTag, TagExchange, TagGenerator, TagHandoff, TagKey, TagScope,
};
pub use telemetry::init_tracing;

pub use conveyor_state::{RunId, SurrealHandle};

/// Conveyor version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
