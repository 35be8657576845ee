//! Stage definitions and configuration.

use std::collections::BTreeMap;
use std::path::PathBuf;

use conveyor_core::{ConveyorError, OutputPattern, Result, StageRole};
use serde::{Deserialize, Serialize};

/// Default output captured from Build stages.
pub const IMAGE_DETAIL_FILE: &str = "imageDetail.json";

/// Default deployment manifest template.
pub const DEFAULT_MANIFEST: &str = "sample-cluster-app-deployment.yml";

/// Test reports collected from the standard Test stage.
pub const DEFAULT_TEST_REPORTS: &str = "test-results/**";

/// The three stages of the standard container delivery pipeline.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BuiltinStage {
    /// npm install && npm test
    Test,

    /// docker build, registry login, docker push
    Build,

    /// kubeconfig update, kubectl apply of the rendered manifest
    Deploy,
}

impl BuiltinStage {
    pub const ALL: [BuiltinStage; 3] = [BuiltinStage::Test, BuiltinStage::Build, BuiltinStage::Deploy];

    pub fn name(&self) -> &'static str {
        match self {
            BuiltinStage::Test => "test",
            BuiltinStage::Build => "build",
            BuiltinStage::Deploy => "deploy",
        }
    }

    pub fn role(&self) -> StageRole {
        match self {
            BuiltinStage::Test => StageRole::Test,
            BuiltinStage::Build => StageRole::Build,
            BuiltinStage::Deploy => StageRole::Deploy,
        }
    }

    /// Shell commands, run in order with `sh -c`.
    pub fn commands(&self) -> Vec<String> {
        let cmds: &[&str] = match self {
            BuiltinStage::Test => &["npm install", "npm test"],
            BuiltinStage::Build => &[
                r#"docker build -t "$IMAGE_REF" ."#,
                r#"aws ecr get-login-password --region "$CLUSTER_REGION" | docker login --username AWS --password-stdin "$REGISTRY_HOST""#,
                r#"docker push "$IMAGE_REF""#,
            ],
            BuiltinStage::Deploy => &[
                r#"aws eks update-kubeconfig --name "$CLUSTER_NAME" --region "$CLUSTER_REGION""#,
                r#"kubectl apply -f "$RENDERED_MANIFEST""#,
            ],
        };
        cmds.iter().map(|c| c.to_string()).collect()
    }

    pub fn privileged(&self) -> bool {
        matches!(self, BuiltinStage::Test | BuiltinStage::Build)
    }

    /// Build forwards the manifest template too: Deploy's workspace holds
    /// only the artifact Build hands it.
    pub fn outputs(&self) -> Vec<String> {
        match self {
            BuiltinStage::Build => vec![IMAGE_DETAIL_FILE.to_string(), DEFAULT_MANIFEST.to_string()],
            _ => Vec::new(),
        }
    }

    pub fn reports(&self) -> Vec<String> {
        match self {
            BuiltinStage::Test => vec![DEFAULT_TEST_REPORTS.to_string()],
            _ => Vec::new(),
        }
    }

    pub fn manifest(&self) -> Option<PathBuf> {
        match self {
            BuiltinStage::Deploy => Some(PathBuf::from(DEFAULT_MANIFEST)),
            _ => None,
        }
    }
}

/// Which side of the image tag handoff a stage is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagHandoffRole {
    None,
    /// Generates the tag before its commands and publishes it after them.
    Publish,
    /// Resolves the published tag before its commands.
    Resolve,
}

/// Configuration for one pipeline stage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StageConfig {
    /// Unique stage name within the pipeline.
    pub name: String,

    pub role: StageRole,

    /// Shell commands, run in order; the first non-zero exit fails the stage.
    pub commands: Vec<String>,

    /// Run with elevated container privileges (container isolation only).
    #[serde(default)]
    pub privileged: bool,

    /// Glob patterns captured from the workspace as the stage's artifact.
    #[serde(default)]
    pub outputs: Vec<String>,

    /// Glob patterns collected as reports (test results, coverage). Recorded
    /// with the stage, never handed to the next stage; patterns that match
    /// nothing are skipped.
    #[serde(default)]
    pub reports: Vec<String>,

    /// Manifest template rendered before the commands run.
    #[serde(default)]
    pub manifest: Option<PathBuf>,

    /// Extra environment for the stage's commands.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl StageConfig {
    pub fn from_builtin(stage: BuiltinStage) -> Self {
        Self {
            name: stage.name().to_string(),
            role: stage.role(),
            commands: stage.commands(),
            privileged: stage.privileged(),
            outputs: stage.outputs(),
            reports: stage.reports(),
            manifest: stage.manifest(),
            env: BTreeMap::new(),
        }
    }

    /// The standard test → build → deploy sequence.
    pub fn standard_pipeline() -> Vec<Self> {
        BuiltinStage::ALL.iter().map(|s| Self::from_builtin(*s)).collect()
    }

    pub fn custom(name: impl Into<String>, role: StageRole, commands: Vec<String>) -> Self {
        Self {
            name: name.into(),
            role,
            commands,
            privileged: false,
            outputs: Vec::new(),
            reports: Vec::new(),
            manifest: None,
            env: BTreeMap::new(),
        }
    }

    pub fn with_outputs<I, S>(mut self, outputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.outputs = outputs.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_reports<I, S>(mut self, reports: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.reports = reports.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_manifest(mut self, manifest: impl Into<PathBuf>) -> Self {
        self.manifest = Some(manifest.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn privileged(mut self) -> Self {
        self.privileged = true;
        self
    }

    pub fn tag_handoff(&self) -> TagHandoffRole {
        match self.role {
            StageRole::Build => TagHandoffRole::Publish,
            StageRole::Deploy => TagHandoffRole::Resolve,
            StageRole::Test | StageRole::Custom => TagHandoffRole::None,
        }
    }

    pub fn output_patterns(&self) -> Result<Vec<OutputPattern>> {
        self.outputs.iter().map(|o| OutputPattern::parse(o)).collect()
    }

    pub fn report_patterns(&self) -> Result<Vec<OutputPattern>> {
        self.reports.iter().map(|r| OutputPattern::parse(r)).collect()
    }

    /// Reject definitions that cannot run.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty()
            || !self
                .name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(ConveyorError::InvalidStage(format!(
                "stage name must be non-empty [A-Za-z0-9_-]: {:?}",
                self.name
            )));
        }
        if self.commands.is_empty() || self.commands.iter().any(|c| c.trim().is_empty()) {
            return Err(ConveyorError::InvalidStage(format!(
                "stage {} needs at least one non-empty command",
                self.name
            )));
        }
        if let Some(manifest) = &self.manifest {
            if manifest.is_absolute()
                || manifest
                    .components()
                    .any(|c| matches!(c, std::path::Component::ParentDir))
            {
                return Err(ConveyorError::InvalidStage(format!(
                    "stage {} manifest must be relative to the workspace: {}",
                    self.name,
                    manifest.display()
                )));
            }
        }
        self.output_patterns()?;
        self.report_patterns()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_stage_names_and_roles() {
        assert_eq!(BuiltinStage::Test.name(), "test");
        assert_eq!(BuiltinStage::Build.role(), StageRole::Build);
        assert_eq!(BuiltinStage::Deploy.role(), StageRole::Deploy);
    }

    #[test]
    fn test_builtin_build_pushes_tagged_image() {
        let cmds = BuiltinStage::Build.commands();
        assert!(cmds[0].starts_with("docker build"));
        assert!(cmds.iter().any(|c| c.contains("docker push \"$IMAGE_REF\"")));
        assert_eq!(
            BuiltinStage::Build.outputs(),
            vec![IMAGE_DETAIL_FILE, DEFAULT_MANIFEST]
        );
    }

    #[test]
    fn test_build_forwards_what_deploy_reads() {
        let stages = StageConfig::standard_pipeline();
        let build = stages[1].output_patterns().unwrap();
        let manifest = stages[2].manifest.as_ref().unwrap().to_string_lossy().into_owned();
        assert!(build.iter().any(|p| p.matches(&manifest)));
    }

    #[test]
    fn test_builtin_test_collects_reports() {
        let test = StageConfig::from_builtin(BuiltinStage::Test);
        let patterns = test.report_patterns().unwrap();
        assert!(patterns[0].matches("test-results/junit.xml"));
        assert!(StageConfig::from_builtin(BuiltinStage::Build).reports.is_empty());
    }

    #[test]
    fn test_builtin_deploy_applies_rendered_manifest() {
        let cfg = StageConfig::from_builtin(BuiltinStage::Deploy);
        assert_eq!(cfg.manifest, Some(PathBuf::from(DEFAULT_MANIFEST)));
        assert!(cfg.commands.iter().any(|c| c.contains("$RENDERED_MANIFEST")));
        assert_eq!(cfg.tag_handoff(), TagHandoffRole::Resolve);
    }

    #[test]
    fn test_standard_pipeline_order() {
        let names: Vec<String> = StageConfig::standard_pipeline()
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(names, vec!["test", "build", "deploy"]);
    }

    #[test]
    fn test_validate_rejects_bad_definitions() {
        assert!(StageConfig::custom("", StageRole::Custom, vec!["true".into()])
            .validate()
            .is_err());
        assert!(StageConfig::custom("has space", StageRole::Custom, vec!["true".into()])
            .validate()
            .is_err());
        assert!(StageConfig::custom("lint", StageRole::Custom, vec![])
            .validate()
            .is_err());
        assert!(StageConfig::custom("lint", StageRole::Custom, vec!["true".into()])
            .with_manifest("../outside.yml")
            .validate()
            .is_err());
        assert!(StageConfig::custom("lint", StageRole::Custom, vec!["true".into()])
            .with_outputs(["../x"])
            .validate()
            .is_err());
        assert!(StageConfig::custom("lint", StageRole::Custom, vec!["true".into()])
            .with_reports(["/abs/results"])
            .validate()
            .is_err());
    }

    #[test]
    fn test_custom_builder() {
        let cfg = StageConfig::custom("lint", StageRole::Custom, vec!["true".into()])
            .with_env("CI", "1")
            .with_outputs(["report.txt"])
            .privileged();
        assert!(cfg.privileged);
        assert_eq!(cfg.env.get("CI").map(String::as_str), Some("1"));
        assert_eq!(cfg.tag_handoff(), TagHandoffRole::None);
        assert!(cfg.validate().is_ok());
    }
}
