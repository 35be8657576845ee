//! Stage roles.

use serde::{Deserialize, Serialize};

/// What a stage is for. Roles drive the default permission grants and the
/// tag handoff a stage participates in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageRole {
    /// Runs the test suite against the source.
    Test,
    /// Builds and pushes the container image, publishes its tag.
    Build,
    /// Resolves the published tag and applies it to the cluster.
    Deploy,
    /// Anything else; participates in no tag handoff.
    Custom,
}

impl StageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageRole::Test => "test",
            StageRole::Build => "build",
            StageRole::Deploy => "deploy",
            StageRole::Custom => "custom",
        }
    }
}

impl std::fmt::Display for StageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for StageRole {
    type Err = crate::domain::error::ConveyorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "test" => Ok(StageRole::Test),
            "build" => Ok(StageRole::Build),
            "deploy" => Ok(StageRole::Deploy),
            "custom" => Ok(StageRole::Custom),
            other => Err(crate::domain::error::ConveyorError::InvalidStage(format!(
                "unknown stage role: {other}"
            ))),
        }
    }
}
