//! Stage execution in a fresh, isolated workspace.
//!
//! Every execution provisions a new temporary directory, materializes the
//! input artifact into it, optionally renders the stage manifest, runs the
//! commands in order and captures the declared outputs. The workspace is
//! removed when the execution returns.

use std::collections::BTreeMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use conveyor_core::artifact::{capture_outputs, capture_reports, materialize};
use conveyor_core::{manifest, Artifact, FileManifest};
use conveyor_state::BlobStore;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::stage::{StageConfig, IMAGE_DETAIL_FILE};

/// Mount point of the workspace inside containers.
const CONTAINER_WORKDIR: &str = "/workspace";

/// Fallback `PATH` for process isolation when the parent has none.
const DEFAULT_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

/// Result of one command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResult {
    pub command: String,

    /// Exit code (0 = success, -1 = killed by signal or never started).
    pub exit_code: i32,

    pub stdout: String,

    pub stderr: String,

    pub duration_ms: u64,
}

impl CommandResult {
    pub fn passed(&self) -> bool {
        self.exit_code == 0
    }
}

/// Why a stage failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// A command exited non-zero or could not be started.
    Command,
    /// The image tag could not be read (absent, unreadable, malformed).
    TagResolution,
    /// The image tag could not be generated or written.
    TagPublication,
    /// The stage credential does not allow a required operation.
    PermissionDenied,
    /// Declared outputs missing, or the manifest could not be rendered.
    Artifact,
    /// The workspace could not be provisioned or populated.
    Workspace,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Command => "command",
            FailureKind::TagResolution => "tag_resolution",
            FailureKind::TagPublication => "tag_publication",
            FailureKind::PermissionDenied => "permission_denied",
            FailureKind::Artifact => "artifact",
            FailureKind::Workspace => "workspace",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal status of a stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StageStatus {
    Succeeded,
    Failed { kind: FailureKind, reason: String },
}

impl StageStatus {
    pub fn failed(kind: FailureKind, reason: impl Into<String>) -> Self {
        StageStatus::Failed {
            kind,
            reason: reason.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, StageStatus::Succeeded)
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            StageStatus::Succeeded => None,
            StageStatus::Failed { kind, .. } => Some(*kind),
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            StageStatus::Succeeded => None,
            StageStatus::Failed { reason, .. } => Some(reason),
        }
    }
}

/// Everything an executor needs for one stage execution.
pub struct StageRequest<'a> {
    pub stage: &'a StageConfig,
    pub input: &'a Artifact,
    /// Variables for the commands and the manifest template.
    pub env: BTreeMap<String, String>,
    /// Image reference a Build stage records in `imageDetail.json`.
    pub image_ref: Option<String>,
}

/// What came out of one stage execution.
#[derive(Debug, Clone)]
pub struct StageExecution {
    pub status: StageStatus,
    pub commands: Vec<CommandResult>,
    /// Captured output files; empty when nothing was declared or the stage failed.
    pub outputs: FileManifest,
    /// Report files, collected after the commands whether or not they passed.
    pub reports: FileManifest,
    /// Rendered manifest text, when the stage declares one.
    pub rendered_manifest: Option<String>,
}

impl StageExecution {
    fn failed(kind: FailureKind, reason: impl Into<String>, commands: Vec<CommandResult>) -> Self {
        Self {
            status: StageStatus::failed(kind, reason),
            commands,
            outputs: FileManifest::new(),
            reports: FileManifest::new(),
            rendered_manifest: None,
        }
    }

    fn with_reports(mut self, reports: FileManifest) -> Self {
        self.reports = reports;
        self
    }
}

/// Runs one stage to a terminal status.
///
/// Implementations never return `Err`: every failure is reported as a
/// [`StageStatus::Failed`] so the orchestrator can notify and halt.
#[async_trait]
pub trait StageExecutor: Send + Sync {
    async fn execute(&self, request: StageRequest<'_>) -> StageExecution;
}

/// How commands are isolated from the host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "isolation", rename_all = "snake_case")]
pub enum Isolation {
    /// `sh -c` on the host with a cleared environment.
    #[default]
    Process,
    /// `<runtime> run --rm` with the workspace bind-mounted.
    Container { runtime: String, image: String },
}

/// Executor with a throwaway workspace per execution.
pub struct SandboxExecutor {
    isolation: Isolation,
    blobs: Arc<dyn BlobStore>,
}

impl SandboxExecutor {
    pub fn new(isolation: Isolation, blobs: Arc<dyn BlobStore>) -> Self {
        Self { isolation, blobs }
    }

    pub fn process(blobs: Arc<dyn BlobStore>) -> Self {
        Self::new(Isolation::Process, blobs)
    }

    pub fn isolation(&self) -> &Isolation {
        &self.isolation
    }

    fn build_command(&self, stage: &StageConfig, workspace: &Path, cmd: &str, env: &BTreeMap<String, String>) -> Command {
        match &self.isolation {
            Isolation::Process => {
                if stage.privileged {
                    debug!(stage = %stage.name, "privileged has no effect under process isolation");
                }
                let path = std::env::var("PATH").unwrap_or_else(|_| DEFAULT_PATH.to_string());
                let mut command = Command::new("sh");
                command
                    .arg("-c")
                    .arg(cmd)
                    .current_dir(workspace)
                    .env_clear()
                    .env("PATH", path)
                    .env("HOME", workspace)
                    .envs(env);
                command
            }
            Isolation::Container { runtime, image } => {
                let mut command = Command::new(runtime);
                command
                    .arg("run")
                    .arg("--rm")
                    .arg("-v")
                    .arg(format!("{}:{CONTAINER_WORKDIR}", workspace.display()))
                    .arg("-w")
                    .arg(CONTAINER_WORKDIR);
                if stage.privileged {
                    command.arg("--privileged");
                }
                for (key, value) in env {
                    command.arg("-e").arg(format!("{key}={value}"));
                }
                command.arg(image).arg("sh").arg("-c").arg(cmd);
                command
            }
        }
    }

    /// Report collection never fails the stage.
    async fn collect_reports(&self, stage: &StageConfig, workspace: &Path) -> FileManifest {
        if stage.reports.is_empty() {
            return FileManifest::new();
        }
        let collected = match stage.report_patterns() {
            Ok(patterns) => capture_reports(workspace, &patterns, self.blobs.as_ref()).await,
            Err(e) => Err(e),
        };
        match collected {
            Ok(files) => files,
            Err(e) => {
                warn!(stage = %stage.name, error = %e, "cannot collect stage reports");
                FileManifest::new()
            }
        }
    }

    async fn run_command(
        &self,
        stage: &StageConfig,
        workspace: &Path,
        cmd: &str,
        env: &BTreeMap<String, String>,
    ) -> CommandResult {
        let start = Instant::now();
        let output = self
            .build_command(stage, workspace, cmd, env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await;

        let duration_ms = start.elapsed().as_millis() as u64;
        match output {
            Ok(output) => CommandResult {
                command: cmd.to_string(),
                exit_code: output.status.code().unwrap_or(-1),
                stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
                duration_ms,
            },
            Err(e) => CommandResult {
                command: cmd.to_string(),
                exit_code: -1,
                stdout: String::new(),
                stderr: format!("failed to start: {e}"),
                duration_ms,
            },
        }
    }
}

#[async_trait]
impl StageExecutor for SandboxExecutor {
    async fn execute(&self, request: StageRequest<'_>) -> StageExecution {
        let stage = request.stage;

        let workspace = match tempfile::Builder::new()
            .prefix(&format!("conveyor-{}-", stage.name))
            .tempdir()
        {
            Ok(dir) => dir,
            Err(e) => {
                return StageExecution::failed(
                    FailureKind::Workspace,
                    format!("cannot create workspace: {e}"),
                    Vec::new(),
                )
            }
        };
        let ws = workspace.path();

        if let Err(e) = materialize(request.input, self.blobs.as_ref(), ws).await {
            return StageExecution::failed(
                FailureKind::Workspace,
                format!("cannot materialize input artifact: {e}"),
                Vec::new(),
            );
        }

        let mut env = request.env;
        let mut rendered_manifest = None;
        if let Some(template) = &stage.manifest {
            let template_path = ws.join(template);
            match manifest::render_file(&template_path, &env).await {
                Ok(out) => {
                    let rel = out.strip_prefix(ws).unwrap_or(&out).to_path_buf();
                    rendered_manifest = tokio::fs::read_to_string(&out).await.ok();
                    env.insert(
                        "RENDERED_MANIFEST".to_string(),
                        rel.to_string_lossy().into_owned(),
                    );
                }
                Err(e) => {
                    return StageExecution::failed(FailureKind::Artifact, e.to_string(), Vec::new())
                }
            }
        }

        let mut results = Vec::with_capacity(stage.commands.len());
        for cmd in &stage.commands {
            let result = self.run_command(stage, ws, cmd, &env).await;
            debug!(
                stage = %stage.name,
                command = %cmd,
                exit_code = result.exit_code,
                duration_ms = result.duration_ms,
                "command finished"
            );
            let passed = result.passed();
            let reason = if result.exit_code == -1 && result.stderr.starts_with("failed to start") {
                format!("`{cmd}` {}", result.stderr)
            } else {
                format!("`{cmd}` exited with code {}", result.exit_code)
            };
            results.push(result);
            if !passed {
                warn!(stage = %stage.name, %reason, "stage command failed");
                let reports = self.collect_reports(stage, ws).await;
                return StageExecution::failed(FailureKind::Command, reason, results)
                    .with_reports(reports);
            }
        }
        let reports = self.collect_reports(stage, ws).await;

        if let Some(image_ref) = &request.image_ref {
            let detail = ws.join(IMAGE_DETAIL_FILE);
            if !detail.exists() {
                let body = serde_json::json!({ "ImageURI": image_ref }).to_string();
                if let Err(e) = tokio::fs::write(&detail, body).await {
                    return StageExecution::failed(
                        FailureKind::Artifact,
                        format!("cannot write {IMAGE_DETAIL_FILE}: {e}"),
                        results,
                    )
                    .with_reports(reports);
                }
            }
        }

        let outputs = match stage.output_patterns() {
            Ok(patterns) => capture_outputs(ws, &patterns, self.blobs.as_ref()).await,
            Err(e) => Err(e),
        };
        let outputs = match outputs {
            Ok(files) => files,
            Err(e) => {
                return StageExecution::failed(FailureKind::Artifact, e.to_string(), results)
                    .with_reports(reports)
            }
        };

        info!(
            stage = %stage.name,
            commands = results.len(),
            outputs = outputs.len(),
            reports = reports.len(),
            "stage commands succeeded"
        );
        StageExecution {
            status: StageStatus::Succeeded,
            commands: results,
            outputs,
            reports,
            rendered_manifest,
        }
    }
}
