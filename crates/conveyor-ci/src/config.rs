//! TOML pipeline configuration (`conveyor.toml`).

use std::path::Path;
use std::sync::Arc;

use conveyor_core::{
    ConveyorError, LogRecipient, NotificationRouter, Result, WebhookRecipient,
};
use conveyor_state::BlobStore;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::pipeline::PipelineSettings;
use crate::runner::{Isolation, SandboxExecutor};
use crate::stage::StageConfig;

/// Default file name looked up by the CLI.
pub const DEFAULT_CONFIG_FILE: &str = "conveyor.toml";

/// Container runtime used when `[executor]` names none.
pub const DEFAULT_CONTAINER_RUNTIME: &str = "docker";

/// Configuration written by `conveyor init`: the standard three-stage
/// container delivery pipeline.
pub const DEFAULT_CONFIG_TOML: &str = r#"# Conveyor pipeline configuration

[pipeline]
repository = "sample-cluster-app"
registry_host = "123456789012.dkr.ecr.us-east-1.amazonaws.com"
image_repository = "sample-cluster-app"
cluster = "stk-gameservers"
region = "us-east-1"
deploy_role_arn = "arn:aws:iam::123456789012:role/conveyor-deploy"
tag_scope = "shared"

[executor]
# "process" runs commands with sh on the host; "container" runs each one in
# `<runtime> run --rm`.
isolation = "process"
# runtime = "docker"
# image = "node:20"

[[stages]]
name = "test"
role = "test"
privileged = true
commands = ["npm install", "npm test"]
reports = ["test-results/**"]

[[stages]]
name = "build"
role = "build"
privileged = true
commands = [
    'docker build -t "$IMAGE_REF" .',
    'aws ecr get-login-password --region "$CLUSTER_REGION" | docker login --username AWS --password-stdin "$REGISTRY_HOST"',
    'docker push "$IMAGE_REF"',
]
# Deploy's workspace is built from this artifact alone.
outputs = ["imageDetail.json", "sample-cluster-app-deployment.yml"]

[[stages]]
name = "deploy"
role = "deploy"
manifest = "sample-cluster-app-deployment.yml"
commands = [
    'aws eks update-kubeconfig --name "$CLUSTER_NAME" --region "$CLUSTER_REGION"',
    'kubectl apply -f "$RENDERED_MANIFEST"',
]

[notifications]
monitored = ["test", "build", "deploy"]

[[notifications.recipients]]
kind = "log"

# [[notifications.recipients]]
# kind = "webhook"
# url = "https://hooks.example.com/conveyor"
"#;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationKind {
    #[default]
    Process,
    Container,
}

/// `[executor]` table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutorConfig {
    #[serde(default)]
    pub isolation: IsolationKind,
    #[serde(default)]
    pub runtime: Option<String>,
    /// Image every command runs in (container isolation only).
    #[serde(default)]
    pub image: Option<String>,
}

impl ExecutorConfig {
    pub fn isolation(&self) -> Result<Isolation> {
        match self.isolation {
            IsolationKind::Process => Ok(Isolation::Process),
            IsolationKind::Container => {
                let image = self.image.clone().ok_or_else(|| {
                    ConveyorError::Config("container isolation requires executor.image".to_string())
                })?;
                Ok(Isolation::Container {
                    runtime: self
                        .runtime
                        .clone()
                        .unwrap_or_else(|| DEFAULT_CONTAINER_RUNTIME.to_string()),
                    image,
                })
            }
        }
    }
}

/// One `[[notifications.recipients]]` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecipientConfig {
    Log,
    Webhook { url: String },
}

/// `[notifications]` table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationsConfig {
    /// Stages whose outcomes are dispatched; every stage when absent.
    #[serde(default)]
    pub monitored: Option<Vec<String>>,
    #[serde(default)]
    pub recipients: Vec<RecipientConfig>,
}

/// Parsed `conveyor.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConveyorConfig {
    pub pipeline: PipelineSettings,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub stages: Vec<StageConfig>,
    #[serde(default)]
    pub notifications: NotificationsConfig,
}

impl ConveyorConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ConveyorError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        let config = Self::from_toml_str(&raw)?;
        debug!(path = %path.display(), stages = config.stages.len(), "loaded configuration");
        Ok(config)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| ConveyorError::Config(e.to_string()))
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.pipeline
    }

    /// Declared stages, or the standard pipeline when none are declared.
    pub fn stage_configs(&self) -> Vec<StageConfig> {
        if self.stages.is_empty() {
            StageConfig::standard_pipeline()
        } else {
            self.stages.clone()
        }
    }

    pub fn executor(&self, blobs: Arc<dyn BlobStore>) -> Result<SandboxExecutor> {
        Ok(SandboxExecutor::new(self.executor.isolation()?, blobs))
    }

    pub fn router(&self) -> Result<NotificationRouter> {
        let mut router = NotificationRouter::new();
        for recipient in &self.notifications.recipients {
            router = match recipient {
                RecipientConfig::Log => router.with_recipient(Arc::new(LogRecipient)),
                RecipientConfig::Webhook { url } => {
                    router.with_recipient(Arc::new(WebhookRecipient::new(url.clone())?))
                }
            };
        }
        if let Some(monitored) = &self.notifications.monitored {
            router = router.with_monitored(monitored.iter().cloned());
        }
        Ok(router)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conveyor_core::TagScope;

    #[test]
    fn test_default_config_matches_standard_pipeline() {
        let config = ConveyorConfig::from_toml_str(DEFAULT_CONFIG_TOML).unwrap();
        assert_eq!(config.stage_configs(), StageConfig::standard_pipeline());
        assert_eq!(config.pipeline.repository, "sample-cluster-app");
        assert_eq!(config.pipeline.cluster.as_deref(), Some("stk-gameservers"));
        assert_eq!(config.pipeline.tag_scope, TagScope::Shared);
        assert_eq!(config.executor.isolation().unwrap(), Isolation::Process);
    }

    #[test]
    fn test_default_config_router() {
        let config = ConveyorConfig::from_toml_str(DEFAULT_CONFIG_TOML).unwrap();
        let router = config.router().unwrap();
        assert_eq!(router.recipient_count(), 1);
        assert!(router.is_monitored("deploy"));
        assert!(!router.is_monitored("lint"));
    }

    #[test]
    fn test_minimal_config_uses_standard_stages() {
        let config = ConveyorConfig::from_toml_str(
            r#"
            [pipeline]
            repository = "myrepo"
            registry_host = "reg.example"
            image_repository = "myrepo"
            tag_scope = "run"
            "#,
        )
        .unwrap();
        assert_eq!(config.stage_configs().len(), 3);
        assert_eq!(config.pipeline.tag_scope, TagScope::Run);
        assert!(config.router().unwrap().is_monitored("anything"));
    }

    #[test]
    fn test_container_isolation_needs_image() {
        let executor = ExecutorConfig {
            isolation: IsolationKind::Container,
            runtime: None,
            image: None,
        };
        assert!(matches!(executor.isolation(), Err(ConveyorError::Config(_))));

        let executor = ExecutorConfig {
            image: Some("node:20".into()),
            ..executor
        };
        assert_eq!(
            executor.isolation().unwrap(),
            Isolation::Container {
                runtime: "docker".into(),
                image: "node:20".into()
            }
        );
    }

    #[test]
    fn test_bad_webhook_url_rejected() {
        let config = ConveyorConfig::from_toml_str(
            r#"
            [pipeline]
            repository = "myrepo"
            registry_host = "reg.example"
            image_repository = "myrepo"

            [[notifications.recipients]]
            kind = "webhook"
            url = "ftp://nope"
            "#,
        )
        .unwrap();
        assert!(matches!(config.router(), Err(ConveyorError::Config(_))));
    }

    #[test]
    fn test_malformed_toml_is_config_error() {
        let err = ConveyorConfig::from_toml_str("[pipeline").unwrap_err();
        assert!(matches!(err, ConveyorError::Config(_)));
    }
}
