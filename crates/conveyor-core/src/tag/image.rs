//! Timestamp image tags.

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::error::{ConveyorError, Result};

/// `YYYYMMDDHHMMSS`, UTC.
pub const TAG_FORMAT: &str = "%Y%m%d%H%M%S";

/// A second-granularity build timestamp used as the image tag.
///
/// Fixed width, so lexicographic order is chronological order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ImageTag(String);

impl ImageTag {
    pub fn parse(s: &str) -> Result<Self> {
        if s.len() != 14 || !s.chars().all(|c| c.is_ascii_digit()) {
            return Err(ConveyorError::InvalidTag(format!(
                "expected YYYYMMDDHHMMSS, got {s:?}"
            )));
        }
        NaiveDateTime::parse_from_str(s, TAG_FORMAT)
            .map_err(|e| ConveyorError::InvalidTag(format!("{s}: {e}")))?;
        Ok(ImageTag(s.to_string()))
    }

    pub fn from_datetime(at: DateTime<Utc>) -> Self {
        ImageTag(at.format(TAG_FORMAT).to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn built_at(&self) -> Result<DateTime<Utc>> {
        NaiveDateTime::parse_from_str(&self.0, TAG_FORMAT)
            .map(|n| n.and_utc())
            .map_err(|e| ConveyorError::InvalidTag(e.to_string()))
    }
}

impl TryFrom<String> for ImageTag {
    type Error = ConveyorError;

    fn try_from(s: String) -> Result<Self> {
        ImageTag::parse(&s)
    }
}

impl From<ImageTag> for String {
    fn from(t: ImageTag) -> Self {
        t.0
    }
}

impl std::fmt::Display for ImageTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Issues strictly increasing tags within a process.
///
/// If the clock has not moved past the previous tag's second (two builds in
/// the same second, or the clock stepping backwards) the next second after
/// the previous tag is used instead.
#[derive(Debug)]
pub struct TagGenerator {
    last_issued: AtomicI64,
}

impl Default for TagGenerator {
    fn default() -> Self {
        Self {
            last_issued: AtomicI64::new(i64::MIN),
        }
    }
}

impl TagGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self) -> Result<ImageTag> {
        self.next_at(Utc::now())
    }

    pub fn next_at(&self, now: DateTime<Utc>) -> Result<ImageTag> {
        let now_secs = now.timestamp();
        let step = |last: i64| if now_secs > last { now_secs } else { last + 1 };
        let prev = self
            .last_issued
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| Some(step(last)))
            .unwrap_or_else(|last| last);
        let issued = step(prev);

        let at = DateTime::<Utc>::from_timestamp(issued, 0)
            .ok_or_else(|| ConveyorError::InvalidTag(format!("timestamp out of range: {issued}")))?;
        Ok(ImageTag::from_datetime(at))
    }
}

/// Fully qualified image reference `{registry_host}/{repository}:{tag}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    /// Empty for images addressed without a registry host.
    pub registry_host: String,
    pub repository: String,
    pub tag: ImageTag,
}

impl ImageRef {
    pub fn new(registry_host: &str, repository: &str, tag: ImageTag) -> Self {
        Self {
            registry_host: registry_host.trim_end_matches('/').to_string(),
            repository: repository.to_string(),
            tag,
        }
    }
}

impl std::fmt::Display for ImageRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.registry_host.is_empty() {
            write!(f, "{}:{}", self.repository, self.tag)
        } else {
            write!(f, "{}/{}:{}", self.registry_host, self.repository, self.tag)
        }
    }
}
