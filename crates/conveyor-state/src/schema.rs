//! Database row types for the SurrealDB backends.
//!
//! Rows are converted to/from `storage_traits` types at the boundary so the
//! trait types never carry SurrealDB-specific representations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Module for serializing chrono DateTime to SurrealDB datetime format
mod surreal_datetime {
    use chrono::{DateTime, Utc};
    use serde::{self, Deserialize, Deserializer, Serializer};
    use surrealdb::sql::Datetime as SurrealDatetime;

    pub fn serialize<S>(date: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let sd = SurrealDatetime::from(*date);
        serde::Serialize::serialize(&sd, serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let sd = SurrealDatetime::deserialize(deserializer)?;
        Ok(DateTime::from(sd))
    }
}

/// Module for serializing optional chrono DateTime to SurrealDB datetime format
mod surreal_datetime_opt {
    use chrono::{DateTime, Utc};
    use serde::{self, Deserialize, Deserializer, Serializer};
    use surrealdb::sql::Datetime as SurrealDatetime;

    pub fn serialize<S>(date: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match date {
            Some(d) => {
                let sd = SurrealDatetime::from(*d);
                serde::Serialize::serialize(&Some(sd), serializer)
            }
            None => serde::Serialize::serialize(&None::<SurrealDatetime>, serializer),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let sd = Option::<SurrealDatetime>::deserialize(deserializer)?;
        Ok(sd.map(DateTime::from))
    }
}

/// Row in the `tags` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagRow {
    pub key: String,
    pub value: String,
    #[serde(with = "surreal_datetime")]
    pub updated_at: DateTime<Utc>,
}

/// Row in the `runs` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRow {
    pub run_id: String,
    pub spec_digest: String,
    pub repository: String,
    pub commit_sha: Option<String>,
    pub tags: serde_json::Value,
    /// "running" | "completed" | "failed"
    pub status: String,
    pub total_events: u64,
    pub duration_ms: u64,
    pub success: bool,
    pub failed_stage: Option<String>,
    #[serde(with = "surreal_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(default, with = "surreal_datetime_opt")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl RunRow {
    /// New row in "running" state.
    pub fn new(
        run_id: String,
        spec_digest: String,
        repository: String,
        commit_sha: Option<String>,
        tags: serde_json::Value,
    ) -> Self {
        Self {
            run_id,
            spec_digest,
            repository,
            commit_sha,
            tags,
            status: "running".to_string(),
            total_events: 0,
            duration_ms: 0,
            success: false,
            failed_stage: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Transition to a terminal status.
    pub fn finish(
        mut self,
        status: &str,
        total_events: u64,
        duration_ms: u64,
        failed_stage: Option<String>,
    ) -> Self {
        self.status = status.to_string();
        self.total_events = total_events;
        self.duration_ms = duration_ms;
        self.success = status == "completed";
        self.failed_stage = failed_stage;
        self.completed_at = Some(Utc::now());
        self
    }
}

/// Row in the `run_events` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunEventRow {
    pub run_id: String,
    pub seq: u64,
    pub kind: String,
    pub payload: serde_json::Value,
    #[serde(with = "surreal_datetime")]
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_row_finish_sets_terminal_fields() {
        let row = RunRow::new(
            "r1".to_string(),
            "d".repeat(64),
            "myrepo".to_string(),
            None,
            serde_json::json!({}),
        );
        assert_eq!(row.status, "running");

        let done = row.finish("failed", 4, 1200, Some("test".to_string()));
        assert_eq!(done.status, "failed");
        assert!(!done.success);
        assert_eq!(done.failed_stage.as_deref(), Some("test"));
        assert!(done.completed_at.is_some());
    }
}
