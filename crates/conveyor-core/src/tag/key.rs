//! Registry key derivation.

use conveyor_state::RunId;
use serde::{Deserialize, Serialize};

use crate::domain::error::{ConveyorError, Result};

/// How widely a published tag is shared between runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TagScope {
    /// One key per repository; the latest Build wins.
    #[default]
    Shared,
    /// One key per run; Deploy only ever sees its own run's Build.
    Run,
}

/// Key under which an image tag is stored in the tag registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TagKey(String);

impl TagKey {
    /// `{repo}-image-latest-tag` for [`TagScope::Shared`],
    /// `{repo}-{run_id}-image-latest-tag` for [`TagScope::Run`].
    pub fn derive(repository: &str, scope: TagScope, run_id: &RunId) -> Result<Self> {
        let repository = repository.trim();
        if repository.is_empty() {
            return Err(ConveyorError::InvalidTag(
                "repository name must not be empty".to_string(),
            ));
        }
        let key = match scope {
            TagScope::Shared => format!("{repository}-image-latest-tag"),
            TagScope::Run => format!("{repository}-{run_id}-image-latest-tag"),
        };
        Ok(TagKey(key))
    }

    /// Shared-scope key, for operator tooling that has no run in hand.
    pub fn shared(repository: &str) -> Result<Self> {
        Self::derive(repository, TagScope::Shared, &RunId(String::new()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TagKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_key_format() {
        let run = RunId::new();
        let key = TagKey::derive("myrepo", TagScope::Shared, &run).unwrap();
        assert_eq!(key.as_str(), "myrepo-image-latest-tag");
        assert_eq!(TagKey::shared("myrepo").unwrap(), key);
    }

    #[test]
    fn test_run_key_binds_run_id() {
        let run = RunId("r-42".to_string());
        let key = TagKey::derive("myrepo", TagScope::Run, &run).unwrap();
        assert_eq!(key.as_str(), "myrepo-r-42-image-latest-tag");
    }

    #[test]
    fn test_empty_repository_rejected() {
        assert!(TagKey::derive("  ", TagScope::Shared, &RunId::new()).is_err());
    }

    #[test]
    fn test_scope_defaults_to_shared() {
        assert_eq!(TagScope::default(), TagScope::Shared);
        let s: TagScope = serde_json::from_str("\"run\"").unwrap();
        assert_eq!(s, TagScope::Run);
    }
}
