//! Run identity: a stable digest over the pipeline definition.

use conveyor_state::ContentDigest;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::pipeline::PipelineSettings;
use crate::stage::StageConfig;

/// Pipeline definition a run executes.
///
/// Runs of the same definition share a digest, which is how the ledger
/// groups them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunSpec {
    pub settings: PipelineSettings,
    pub stages: Vec<StageConfig>,

    /// SHA-256 digest of ordered stage names (deterministic).
    pub stages_digest: String,
}

impl RunSpec {
    pub fn new(settings: PipelineSettings, stages: Vec<StageConfig>) -> Self {
        let names: Vec<&str> = stages.iter().map(|s| s.name.as_str()).collect();
        let stages_digest = compute_stages_digest(&names);
        Self {
            settings,
            stages,
            stages_digest,
        }
    }

    /// Digest of the canonical JSON of the whole definition.
    pub fn digest(&self) -> serde_json::Result<ContentDigest> {
        let canonical = serde_json::to_vec(self)?;
        Ok(ContentDigest::from_bytes(&canonical))
    }
}

/// Compute deterministic digest of ordered stage names.
fn compute_stages_digest(stages: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for stage in stages {
        hasher.update(stage.as_bytes());
        hasher.update(b"\0");
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use conveyor_core::StageRole;

    fn settings() -> PipelineSettings {
        PipelineSettings::new("myrepo", "123.dkr.ecr.us-east-1.amazonaws.com", "myrepo")
    }

    #[test]
    fn test_stages_digest_order_sensitive() {
        assert_eq!(
            compute_stages_digest(&["test", "build"]),
            compute_stages_digest(&["test", "build"])
        );
        assert_ne!(
            compute_stages_digest(&["test", "build"]),
            compute_stages_digest(&["build", "test"])
        );
    }

    #[test]
    fn test_digest_stable_for_same_definition() {
        let a = RunSpec::new(settings(), StageConfig::standard_pipeline());
        let b = RunSpec::new(settings(), StageConfig::standard_pipeline());
        assert_eq!(a.digest().unwrap(), b.digest().unwrap());
    }

    #[test]
    fn test_digest_changes_with_commands() {
        let a = RunSpec::new(settings(), StageConfig::standard_pipeline());
        let mut stages = StageConfig::standard_pipeline();
        stages[0] = StageConfig::custom("test", StageRole::Test, vec!["cargo test".into()]);
        let b = RunSpec::new(settings(), stages);
        assert_eq!(a.stages_digest, b.stages_digest);
        assert_ne!(a.digest().unwrap(), b.digest().unwrap());
    }
}
