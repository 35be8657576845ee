//! Audit of a recorded run's event stream.

use std::collections::BTreeMap;

use conveyor_state::RunEvent;
use serde::{Deserialize, Serialize};

/// Ledger event kinds written by the orchestrator.
pub const STAGE_STARTED: &str = "stage_started";
pub const STAGE_SUCCEEDED: &str = "stage_succeeded";
pub const STAGE_FAILED: &str = "stage_failed";

/// Audit verdict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditVerdict {
    /// Whether the event stream is consistent.
    pub passed: bool,

    /// Violations found (empty if passed).
    pub violations: Vec<String>,

    /// Summary message.
    pub message: String,
}

/// Consistency rules for a recorded run.
pub struct RunAudit;

impl RunAudit {
    /// Check that `events` describe a well-formed run.
    ///
    /// Rules:
    /// - `seq` is strictly increasing
    /// - stage ordinals start at 0 and are contiguous
    /// - every `stage_started` is followed by exactly one terminal event for
    ///   the same stage before the next stage starts
    /// - nothing follows a `stage_failed`
    pub fn evaluate(events: &[RunEvent]) -> AuditVerdict {
        let mut violations = Vec::new();

        let mut last_seq: Option<u64> = None;
        let mut open: Option<String> = None;
        let mut next_ordinal = 0u64;
        let mut failed_at: Option<String> = None;
        let mut terminals: BTreeMap<String, usize> = BTreeMap::new();

        for event in events {
            if let Some(prev) = last_seq {
                if event.seq <= prev {
                    violations.push(format!(
                        "event seq {} does not follow {}",
                        event.seq, prev
                    ));
                }
            }
            last_seq = Some(event.seq);

            let stage = event.payload["stage"]
                .as_str()
                .unwrap_or("unknown")
                .to_string();

            if let Some(failed) = &failed_at {
                violations.push(format!(
                    "event '{}' for stage '{}' recorded after stage '{}' failed",
                    event.kind, stage, failed
                ));
                continue;
            }

            match event.kind.as_str() {
                STAGE_STARTED => {
                    if let Some(prev) = open.take() {
                        violations.push(format!("stage '{}' never reached a terminal status", prev));
                    }
                    let ordinal = event.payload["ordinal"].as_u64();
                    if ordinal != Some(next_ordinal) {
                        violations.push(format!(
                            "stage '{}' has ordinal {:?}, expected {}",
                            stage, ordinal, next_ordinal
                        ));
                    }
                    next_ordinal += 1;
                    open = Some(stage);
                }
                STAGE_SUCCEEDED | STAGE_FAILED => {
                    match open.take() {
                        Some(started) if started == stage => {}
                        Some(started) => violations.push(format!(
                            "stage '{}' finished while '{}' was running",
                            stage, started
                        )),
                        None => violations.push(format!(
                            "stage '{}' finished without starting",
                            stage
                        )),
                    }
                    let count = terminals.entry(stage.clone()).or_default();
                    *count += 1;
                    if *count > 1 {
                        violations.push(format!("stage '{}' reported more than once", stage));
                    }
                    if event.kind == STAGE_FAILED {
                        failed_at = Some(stage);
                    }
                }
                other => violations.push(format!("unknown event kind '{}'", other)),
            }
        }

        if let Some(stage) = open {
            violations.push(format!("stage '{}' never reached a terminal status", stage));
        }

        let passed = violations.is_empty();
        let message = if passed {
            "Run events are consistent".to_string()
        } else {
            format!("Audit failed with {} violation(s)", violations.len())
        };

        AuditVerdict {
            passed,
            violations,
            message,
        }
    }
}
