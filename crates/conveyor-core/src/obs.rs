//! Structured observability hooks for the pipeline run lifecycle.
//!
//! This module provides:
//! - Run-scoped tracing spans via `RunSpan` RAII guard
//! - Emission functions for run, stage, tag handoff and notification events
//!
//! Events are emitted at `info!` (failures at `warn!`) and filtered through
//! `RUST_LOG`; pass `--json` to the CLI for machine-readable output.

use tracing::{info, warn};

/// RAII guard that enters a run-scoped tracing span for the duration of a run.
///
/// Only use this in synchronous code; across `.await` points instrument the
/// future with [`run_span`] instead.
pub struct RunSpan {
    _span: tracing::span::EnteredSpan,
}

impl RunSpan {
    /// Create and enter a span tagged with the run_id.
    pub fn enter(run_id: &str) -> Self {
        Self {
            _span: run_span(run_id).entered(),
        }
    }
}

/// The span every run's events are recorded under.
pub fn run_span(run_id: &str) -> tracing::Span {
    tracing::info_span!("conveyor.run", run_id = %run_id)
}

/// Emit event: run started.
///
/// ```ignore
/// emit_run_started("run-123", "sample-cluster-app", 3);
/// // logs: event=run.started run_id=run-123 repository=sample-cluster-app stages=3
/// ```
pub fn emit_run_started(run_id: &str, repository: &str, stages: usize) {
    info!(event = "run.started", run_id = %run_id, repository = %repository, stages = stages);
}

/// Emit event: run finished.
pub fn emit_run_finished(run_id: &str, duration_ms: u64, stages_run: usize, success: bool) {
    info!(
        event = "run.finished",
        run_id = %run_id,
        duration_ms = duration_ms,
        stages_run = stages_run,
        success = success,
    );
}

pub fn emit_stage_started(run_id: &str, stage: &str, ordinal: usize) {
    info!(event = "stage.started", run_id = %run_id, stage = %stage, ordinal = ordinal);
}

pub fn emit_stage_finished(run_id: &str, stage: &str, outcome: &str, duration_ms: u64) {
    info!(
        event = "stage.finished",
        run_id = %run_id,
        stage = %stage,
        outcome = %outcome,
        duration_ms = duration_ms,
    );
}

pub fn emit_tag_published(run_id: &str, key: &str, tag: &str) {
    info!(event = "tag.published", run_id = %run_id, key = %key, tag = %tag);
}

pub fn emit_tag_resolved(run_id: &str, key: &str, tag: &str) {
    info!(event = "tag.resolved", run_id = %run_id, key = %key, tag = %tag);
}

/// Emit event: a recipient could not be reached (warning level).
pub fn emit_notification_failed(
    run_id: &str,
    stage: &str,
    recipient: &str,
    error: &dyn std::fmt::Display,
) {
    warn!(
        event = "notification.failed",
        run_id = %run_id,
        stage = %stage,
        recipient = %recipient,
        error = %error,
    );
}

/// Emit event: the ledger could not be finalised (warning level).
pub fn emit_run_finalize_error(run_id: &str, error: &dyn std::fmt::Display) {
    warn!(event = "run.finalize_error", run_id = %run_id, error = %error);
}
