//! Notification event payload.

use chrono::{DateTime, Utc};
use conveyor_state::RunId;
use serde::{Deserialize, Serialize};

/// Terminal outcome of a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Succeeded,
    Failed,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Succeeded => "succeeded",
            Outcome::Failed => "failed",
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One stage reaching a terminal status. Serializes to the webhook payload
/// `{"run_id", "stage", "outcome", "timestamp", "reason"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationEvent {
    pub run_id: RunId,
    pub stage: String,
    pub outcome: Outcome,
    pub timestamp: DateTime<Utc>,
    /// Short failure reason; `None` on success.
    pub reason: Option<String>,
}

impl NotificationEvent {
    pub fn succeeded(run_id: &RunId, stage: &str) -> Self {
        Self {
            run_id: run_id.clone(),
            stage: stage.to_string(),
            outcome: Outcome::Succeeded,
            timestamp: Utc::now(),
            reason: None,
        }
    }

    pub fn failed(run_id: &RunId, stage: &str, reason: impl Into<String>) -> Self {
        Self {
            run_id: run_id.clone(),
            stage: stage.to_string(),
            outcome: Outcome::Failed,
            timestamp: Utc::now(),
            reason: Some(reason.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_webhook_payload_shape() {
        let run = RunId("run-1".to_string());
        let ev = NotificationEvent::failed(&run, "test", "exit code 1");
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["run_id"], "run-1");
        assert_eq!(json["stage"], "test");
        assert_eq!(json["outcome"], "failed");
        assert_eq!(json["reason"], "exit code 1");
        assert!(json["timestamp"].is_string());

        let ok = serde_json::to_value(NotificationEvent::succeeded(&run, "build")).unwrap();
        assert_eq!(ok["outcome"], "succeeded");
        assert!(ok["reason"].is_null());
    }
}
