//! Pipeline orchestration and run recording.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use conveyor_core::obs;
use conveyor_core::{
    Artifact, ArtifactChannel, Capability, ConveyorError, CredentialIssuer, ImageRef, ImageTag,
    NotificationEvent, NotificationRouter, Result, StageRole, TagExchange, TagGenerator,
    TagHandoff, TagScope,
};
use conveyor_state::{
    BlobStore, ContentDigest, RunEvent, RunId, RunLedger, RunMetadata, RunSummary, TagRegistry,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, info, warn, Instrument};

use crate::audit::{STAGE_FAILED, STAGE_STARTED, STAGE_SUCCEEDED};
use crate::runner::{
    CommandResult, FailureKind, SandboxExecutor, StageExecution, StageExecutor, StageRequest,
    StageStatus,
};
use crate::source::SourceProvider;
use crate::spec::RunSpec;
use crate::stage::{StageConfig, TagHandoffRole};

/// Source of "now" for tag generation.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Deployment target and image coordinates shared by every stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineSettings {
    /// Source repository name; the tag registry key is derived from it.
    pub repository: String,

    /// Image registry host, e.g. `123456789012.dkr.ecr.us-east-1.amazonaws.com`.
    pub registry_host: String,

    pub image_repository: String,

    #[serde(default)]
    pub cluster: Option<String>,

    #[serde(default)]
    pub region: Option<String>,

    /// Role the deploy stage assumes; only used by operator tooling.
    #[serde(default)]
    pub deploy_role_arn: Option<String>,

    #[serde(default)]
    pub tag_scope: TagScope,
}

impl PipelineSettings {
    pub fn new(
        repository: impl Into<String>,
        registry_host: impl Into<String>,
        image_repository: impl Into<String>,
    ) -> Self {
        Self {
            repository: repository.into(),
            registry_host: registry_host.into(),
            image_repository: image_repository.into(),
            cluster: None,
            region: None,
            deploy_role_arn: None,
            tag_scope: TagScope::default(),
        }
    }

    pub fn with_cluster(mut self, cluster: impl Into<String>, region: impl Into<String>) -> Self {
        self.cluster = Some(cluster.into());
        self.region = Some(region.into());
        self
    }

    pub fn with_tag_scope(mut self, scope: TagScope) -> Self {
        self.tag_scope = scope;
        self
    }

    fn image_ref(&self, tag: ImageTag) -> ImageRef {
        ImageRef::new(&self.registry_host, &self.image_repository, tag)
    }
}

/// Overall outcome of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    Succeeded,
    /// The run halted at `stage`.
    Failed { stage: String },
}

/// What happened in one reached stage.
#[derive(Debug, Clone)]
pub struct StageReport {
    pub stage: String,
    pub role: StageRole,
    pub ordinal: usize,
    pub status: StageStatus,
    pub commands: Vec<CommandResult>,
    /// Artifact the stage added to the channel, if it produced a non-empty one.
    pub output: Option<Artifact>,
    /// Report files collected from the stage; never carried forward.
    pub reports: conveyor_core::FileManifest,
    /// Tag generated (Build) or resolved (Deploy) by this stage.
    pub image_tag: Option<ImageTag>,
    pub rendered_manifest: Option<String>,
    pub duration_ms: u64,
}

impl StageReport {
    pub fn passed(&self) -> bool {
        self.status.is_success()
    }
}

/// Result of a complete pipeline execution.
#[derive(Debug, Clone)]
pub struct PipelineResult {
    pub run_id: RunId,

    pub status: RunOutcome,

    /// Reports for reached stages only, in order.
    pub reports: Vec<StageReport>,

    /// Latest non-empty artifact when the run ended.
    pub artifact: Artifact,

    /// One event per stage that reached a terminal status, in order.
    pub notifications: Vec<NotificationEvent>,

    /// Total duration in milliseconds.
    pub duration_ms: u64,

    /// Digest of the pipeline definition.
    pub spec_digest: ContentDigest,
}

impl PipelineResult {
    pub fn is_success(&self) -> bool {
        self.status == RunOutcome::Succeeded
    }

    pub fn failed_stage(&self) -> Option<&str> {
        match &self.status {
            RunOutcome::Succeeded => None,
            RunOutcome::Failed { stage } => Some(stage),
        }
    }

    pub fn report(&self, stage: &str) -> Option<&StageReport> {
        self.reports.iter().find(|r| r.stage == stage)
    }

    /// Number of stages that passed.
    pub fn passed_count(&self) -> usize {
        self.reports.iter().filter(|r| r.passed()).count()
    }

    /// Number of stages that failed.
    pub fn failed_count(&self) -> usize {
        self.reports.iter().filter(|r| !r.passed()).count()
    }
}

/// Stage result before it is folded into the channel and the ledger.
struct StageOutcome {
    status: StageStatus,
    commands: Vec<CommandResult>,
    outputs: conveyor_core::FileManifest,
    reports: conveyor_core::FileManifest,
    rendered_manifest: Option<String>,
    image_tag: Option<ImageTag>,
}

impl StageOutcome {
    fn failed(kind: FailureKind, reason: impl Into<String>, image_tag: Option<ImageTag>) -> Self {
        Self {
            status: StageStatus::failed(kind, reason),
            commands: Vec::new(),
            outputs: Default::default(),
            reports: Default::default(),
            rendered_manifest: None,
            image_tag,
        }
    }

    fn from_execution(execution: StageExecution, image_tag: Option<ImageTag>) -> Self {
        Self {
            status: execution.status,
            commands: execution.commands,
            outputs: execution.outputs,
            reports: execution.reports,
            rendered_manifest: execution.rendered_manifest,
            image_tag,
        }
    }

    fn fail_after_commands(&mut self, kind: FailureKind, reason: String) {
        self.status = StageStatus::failed(kind, reason);
        self.outputs.clear();
    }
}

fn permission_or(kind: FailureKind, err: &ConveyorError) -> FailureKind {
    match err {
        ConveyorError::PermissionDenied { .. } => FailureKind::PermissionDenied,
        _ => kind,
    }
}

/// Builder for [`Pipeline`].
pub struct PipelineBuilder {
    settings: PipelineSettings,
    stages: Vec<StageConfig>,
    executor: Option<Arc<dyn StageExecutor>>,
    blobs: Option<Arc<dyn BlobStore>>,
    ledger: Option<Arc<dyn RunLedger>>,
    tag_registry: Option<Arc<dyn TagRegistry>>,
    issuer: CredentialIssuer,
    router: NotificationRouter,
    clock: Clock,
}

impl PipelineBuilder {
    /// Defaults to a process-isolated [`SandboxExecutor`] over the blob store.
    pub fn executor(mut self, executor: Arc<dyn StageExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn blob_store(mut self, blobs: Arc<dyn BlobStore>) -> Self {
        self.blobs = Some(blobs);
        self
    }

    pub fn ledger(mut self, ledger: Arc<dyn RunLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn tag_registry(mut self, registry: Arc<dyn TagRegistry>) -> Self {
        self.tag_registry = Some(registry);
        self
    }

    pub fn issuer(mut self, issuer: CredentialIssuer) -> Self {
        self.issuer = issuer;
        self
    }

    pub fn router(mut self, router: NotificationRouter) -> Self {
        self.router = router;
        self
    }

    pub fn clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn build(self) -> Result<Pipeline> {
        if self.settings.repository.trim().is_empty() {
            return Err(ConveyorError::InvalidPipeline(
                "repository must not be empty".to_string(),
            ));
        }
        if self.stages.is_empty() {
            return Err(ConveyorError::InvalidPipeline(
                "pipeline needs at least one stage".to_string(),
            ));
        }
        let mut seen = HashSet::new();
        for stage in &self.stages {
            stage.validate()?;
            if !seen.insert(stage.name.as_str()) {
                return Err(ConveyorError::InvalidPipeline(format!(
                    "duplicate stage name: {}",
                    stage.name
                )));
            }
        }

        let blobs = self
            .blobs
            .ok_or_else(|| ConveyorError::InvalidPipeline("no blob store configured".to_string()))?;
        let ledger = self
            .ledger
            .ok_or_else(|| ConveyorError::InvalidPipeline("no run ledger configured".to_string()))?;
        let registry = self.tag_registry.ok_or_else(|| {
            ConveyorError::InvalidPipeline("no tag registry configured".to_string())
        })?;
        let executor = self
            .executor
            .unwrap_or_else(|| Arc::new(SandboxExecutor::process(blobs.clone())));

        let spec = RunSpec::new(self.settings.clone(), self.stages.clone());
        let spec_digest = spec.digest()?;

        Ok(Pipeline {
            tags: TagExchange::new(registry, self.settings.tag_scope),
            settings: self.settings,
            stages: self.stages,
            executor,
            blobs,
            ledger,
            issuer: self.issuer,
            router: self.router,
            clock: self.clock,
            generator: TagGenerator::new(),
            spec_digest,
            run_lock: Mutex::new(()),
        })
    }
}

/// Ordered, gated stage pipeline.
pub struct Pipeline {
    settings: PipelineSettings,
    stages: Vec<StageConfig>,
    executor: Arc<dyn StageExecutor>,
    blobs: Arc<dyn BlobStore>,
    ledger: Arc<dyn RunLedger>,
    tags: TagExchange,
    issuer: CredentialIssuer,
    router: NotificationRouter,
    clock: Clock,
    generator: TagGenerator,
    spec_digest: ContentDigest,
    run_lock: Mutex<()>,
}

impl Pipeline {
    pub fn builder(settings: PipelineSettings, stages: Vec<StageConfig>) -> PipelineBuilder {
        PipelineBuilder {
            settings,
            stages,
            executor: None,
            blobs: None,
            ledger: None,
            tag_registry: None,
            issuer: CredentialIssuer::default(),
            router: NotificationRouter::new(),
            clock: Arc::new(Utc::now),
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub fn stages(&self) -> &[StageConfig] {
        &self.stages
    }

    pub fn spec_digest(&self) -> &ContentDigest {
        &self.spec_digest
    }

    /// Fetch the source and run every stage over it.
    ///
    /// A source failure is returned as an error; no stage runs and nothing
    /// is recorded or notified.
    pub async fn run_from(&self, source: &dyn SourceProvider) -> Result<PipelineResult> {
        info!(source = %source.describe(), "fetching source");
        let checkout = source.fetch(self.blobs.as_ref()).await?;
        self.run_with_revision(checkout.artifact, checkout.revision)
            .await
    }

    /// Run every stage in order starting from `source`.
    ///
    /// Stage failures are reported in the result; `Err` means the run
    /// could not be recorded.
    pub async fn run(&self, source: Artifact) -> Result<PipelineResult> {
        self.run_with_revision(source, None).await
    }

    async fn run_with_revision(
        &self,
        source: Artifact,
        revision: Option<String>,
    ) -> Result<PipelineResult> {
        let _guard = self.run_lock.lock().await;

        let metadata = RunMetadata {
            repository: self.settings.repository.clone(),
            commit_sha: revision,
            tags: json!({
                "stages": self.stages.iter().map(|s| &s.name).collect::<Vec<_>>(),
                "tag_scope": self.settings.tag_scope,
                "source_artifact": source.id.as_str(),
            }),
        };
        let run_id = self.ledger.create_run(&self.spec_digest, metadata).await?;
        let span = obs::run_span(&run_id.0);
        self.execute_run(run_id, source).instrument(span).await
    }

    async fn execute_run(&self, run_id: RunId, source: Artifact) -> Result<PipelineResult> {
        let start = Instant::now();
        obs::emit_run_started(&run_id.0, &self.settings.repository, self.stages.len());

        let mut channel = ArtifactChannel::seed(source);
        let mut reports = Vec::new();
        let mut notifications = Vec::new();
        let mut published: Option<ImageTag> = None;
        let mut failed_stage: Option<String> = None;
        let mut seq = 1u64;

        for (ordinal, stage) in self.stages.iter().enumerate() {
            obs::emit_stage_started(&run_id.0, &stage.name, ordinal);
            self.ledger
                .append_event(
                    &run_id,
                    RunEvent {
                        seq,
                        kind: STAGE_STARTED.to_string(),
                        payload: json!({
                            "stage": &stage.name,
                            "ordinal": ordinal,
                            "role": stage.role,
                            "input_artifact": channel.current().id.as_str(),
                        }),
                        timestamp: Utc::now(),
                    },
                )
                .await?;
            seq += 1;

            let stage_start = Instant::now();
            let outcome = self
                .execute_stage(&run_id, stage, channel.current(), &mut published)
                .await;
            let duration_ms = stage_start.elapsed().as_millis() as u64;

            let output = if outcome.status.is_success() {
                channel.record(&stage.name, outcome.outputs).cloned()
            } else {
                None
            };

            let succeeded = outcome.status.is_success();
            let outcome_str = if succeeded { "succeeded" } else { "failed" };
            obs::emit_stage_finished(&run_id.0, &stage.name, outcome_str, duration_ms);

            self.ledger
                .append_event(
                    &run_id,
                    RunEvent {
                        seq,
                        kind: if succeeded { STAGE_SUCCEEDED } else { STAGE_FAILED }.to_string(),
                        payload: json!({
                            "stage": &stage.name,
                            "ordinal": ordinal,
                            "role": stage.role,
                            "duration_ms": duration_ms,
                            "exit_code": outcome.commands.last().map(|c| c.exit_code),
                            "artifact": output.as_ref().map(|a| a.id.as_str()),
                            "reports": &outcome.reports,
                            "image_tag": outcome.image_tag.as_ref().map(|t| t.as_str()),
                            "failure": outcome.status.failure_kind(),
                            "reason": outcome.status.reason(),
                        }),
                        timestamp: Utc::now(),
                    },
                )
                .await?;
            seq += 1;

            let event = match outcome.status.reason() {
                None => NotificationEvent::succeeded(&run_id, &stage.name),
                Some(reason) => NotificationEvent::failed(&run_id, &stage.name, reason),
            };
            let dispatch = self.router.notify(&event).await;
            debug!(
                stage = %stage.name,
                dispatched = dispatch.dispatched,
                delivered = dispatch.delivered,
                failed = dispatch.failed,
                "stage notification dispatched"
            );
            notifications.push(event);

            reports.push(StageReport {
                stage: stage.name.clone(),
                role: stage.role,
                ordinal,
                status: outcome.status,
                commands: outcome.commands,
                output,
                reports: outcome.reports,
                image_tag: outcome.image_tag,
                rendered_manifest: outcome.rendered_manifest,
                duration_ms,
            });

            if !succeeded {
                failed_stage = Some(stage.name.clone());
                break;
            }
        }

        let duration_ms = start.elapsed().as_millis() as u64;
        let success = failed_stage.is_none();
        let summary = RunSummary {
            total_events: seq - 1,
            duration_ms,
            success,
            failed_stage: failed_stage.clone(),
        };

        let finalized = if success {
            self.ledger.complete_run(&run_id, summary).await
        } else {
            self.ledger.fail_run(&run_id, summary).await
        };
        if let Err(e) = finalized {
            obs::emit_run_finalize_error(&run_id.0, &e);
            return Err(e.into());
        }
        obs::emit_run_finished(&run_id.0, duration_ms, reports.len(), success);

        Ok(PipelineResult {
            run_id,
            status: match failed_stage {
                None => RunOutcome::Succeeded,
                Some(stage) => RunOutcome::Failed { stage },
            },
            reports,
            artifact: channel.into_current(),
            notifications,
            duration_ms,
            spec_digest: self.spec_digest.clone(),
        })
    }

    /// Run one stage to a terminal status. Never returns `Err`.
    async fn execute_stage(
        &self,
        run_id: &RunId,
        stage: &StageConfig,
        input: &Artifact,
        published: &mut Option<ImageTag>,
    ) -> StageOutcome {
        let credential = self.issuer.issue(&stage.name, stage.role);
        if let Err(e) = credential.require_all(Capability::required_by(stage.role)) {
            warn!(stage = %stage.name, error = %e, "stage credential rejected");
            return StageOutcome::failed(FailureKind::PermissionDenied, e.to_string(), None);
        }

        let mut env = BTreeMap::new();
        env.insert("CONVEYOR_RUN_ID".to_string(), run_id.0.clone());
        env.insert("CONVEYOR_STAGE".to_string(), stage.name.clone());
        env.insert(
            "SOURCE_REPOSITORY".to_string(),
            self.settings.repository.clone(),
        );
        if let Some(cluster) = &self.settings.cluster {
            env.insert("CLUSTER_NAME".to_string(), cluster.clone());
        }
        if let Some(region) = &self.settings.region {
            env.insert("CLUSTER_REGION".to_string(), region.clone());
        }
        env.extend(credential.env());
        env.extend(stage.env.clone());

        let handoff_role = stage.tag_handoff();
        let mut image_tag = None;
        let mut image_ref = None;
        match handoff_role {
            TagHandoffRole::None => {}
            TagHandoffRole::Publish => {
                let tag = match self.generator.next_at((self.clock)()) {
                    Ok(tag) => tag,
                    Err(e) => {
                        return StageOutcome::failed(FailureKind::TagPublication, e.to_string(), None)
                    }
                };
                let reference = self.settings.image_ref(tag.clone());
                self.export_image(&mut env, &tag, &reference);
                image_ref = Some(reference.to_string());
                image_tag = Some(tag);
            }
            TagHandoffRole::Resolve => {
                let resolved = match self
                    .tags
                    .resolve(&credential, &self.settings.repository, run_id)
                    .await
                {
                    Ok(resolved) => resolved,
                    Err(e) => {
                        warn!(stage = %stage.name, error = %e, "image tag resolution failed");
                        let kind = permission_or(FailureKind::TagResolution, &e);
                        return StageOutcome::failed(kind, e.to_string(), None);
                    }
                };
                if let Some(own) = published.as_ref() {
                    if *own != resolved.tag {
                        warn!(
                            stage = %stage.name,
                            published = %own,
                            resolved = %resolved.tag,
                            key = %resolved.key,
                            "resolved tag differs from the tag this run published"
                        );
                    }
                }
                let reference = self.settings.image_ref(resolved.tag.clone());
                self.export_image(&mut env, &resolved.tag, &reference);
                image_tag = Some(resolved.tag);
            }
        }

        let execution = self
            .executor
            .execute(StageRequest {
                stage,
                input,
                env,
                image_ref,
            })
            .await;
        let mut outcome = StageOutcome::from_execution(execution, image_tag);

        if handoff_role == TagHandoffRole::Publish && outcome.status.is_success() {
            if let Some(tag) = outcome.image_tag.clone() {
                let handoff = TagHandoff {
                    repository: self.settings.repository.clone(),
                    built_at: tag.built_at().unwrap_or_else(|_| Utc::now()),
                    tag: tag.clone(),
                    run_id: run_id.clone(),
                };
                // Fresh credential: the stage's may have expired while the commands ran.
                let publisher = self.issuer.issue(&stage.name, stage.role);
                match self.tags.publish(&publisher, &handoff).await {
                    Ok(_) => *published = Some(tag),
                    Err(e) => {
                        warn!(stage = %stage.name, error = %e, "image tag publication failed");
                        let kind = permission_or(FailureKind::TagPublication, &e);
                        outcome.fail_after_commands(kind, e.to_string());
                    }
                }
            }
        }

        outcome
    }

    fn export_image(&self, env: &mut BTreeMap<String, String>, tag: &ImageTag, reference: &ImageRef) {
        env.insert("IMAGE_TAG".to_string(), tag.as_str().to_string());
        env.insert(
            "IMAGE_REPOSITORY".to_string(),
            self.settings.image_repository.clone(),
        );
        env.insert(
            "REGISTRY_HOST".to_string(),
            self.settings.registry_host.clone(),
        );
        env.insert("IMAGE_REF".to_string(), reference.to_string());
    }
}
