//! Conveyor - continuous-delivery stage orchestrator CLI
//!
//! The `conveyor` command runs the test → build → deploy pipeline and gives
//! operators access to the state it leaves behind.
//!
//! ## Commands
//!
//! - `run`: Run the configured pipeline over a source directory or git branch
//! - `tag`: Read or overwrite the published image tag
//! - `runs`: Inspect recorded runs and audit their events
//! - `identity-mapping`: Print the cluster identity mapping command for the deploy role
//! - `init`: Write a default `conveyor.toml`

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use conveyor_ci::{
    ConveyorConfig, DirectorySource, GitSource, Pipeline, PipelineResult, RunAudit,
    SourceProvider, DEFAULT_CONFIG_FILE, DEFAULT_CONFIG_TOML,
};
use conveyor_core::tag::normalize_tag_value;
use conveyor_core::{ImageTag, TagKey, TagScope};
use conveyor_state::{FsBlobStore, RunId, RunLedger, SurrealHandle, TagRegistry};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, Level};

/// Blob store location used when `--blob-dir` is not given.
const DEFAULT_BLOB_DIR: &str = ".conveyor/blobs";

#[derive(Parser)]
#[command(name = "conveyor")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Continuous-delivery stage orchestrator", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline and record it
    Run {
        /// Pipeline configuration file
        #[arg(short, long, env = "CONVEYOR_CONFIG", default_value = DEFAULT_CONFIG_FILE)]
        config: PathBuf,

        /// Source directory (default: current directory)
        #[arg(short, long, conflicts_with = "git")]
        source: Option<PathBuf>,

        /// Clone this repository instead of reading a directory
        #[arg(long)]
        git: Option<String>,

        /// Branch to clone with --git
        #[arg(long, default_value = "main", requires = "git")]
        branch: String,

        /// Content-addressed store for artifact files
        #[arg(long, env = "CONVEYOR_BLOB_DIR", default_value = DEFAULT_BLOB_DIR)]
        blob_dir: PathBuf,
    },

    /// Read or overwrite the published image tag
    Tag {
        #[command(subcommand)]
        action: TagAction,
    },

    /// Inspect recorded runs
    Runs {
        #[command(subcommand)]
        action: RunsAction,
    },

    /// Print the command that maps the deploy role to cluster-admin
    IdentityMapping {
        /// Pipeline configuration file
        #[arg(short, long, env = "CONVEYOR_CONFIG", default_value = DEFAULT_CONFIG_FILE)]
        config: PathBuf,

        /// Override the configured cluster name
        #[arg(long)]
        cluster: Option<String>,

        /// Override the configured region
        #[arg(long)]
        region: Option<String>,

        /// Override the configured deploy role ARN
        #[arg(long)]
        role_arn: Option<String>,
    },

    /// Write a default pipeline configuration
    Init {
        /// Directory to write conveyor.toml into (default: current directory)
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand)]
enum TagAction {
    /// Show the tag Deploy would resolve
    Get {
        /// Source repository name
        repository: String,

        #[command(flatten)]
        scope: ScopeArgs,
    },

    /// Overwrite the tag (YYYYMMDDHHMMSS)
    Put {
        /// Source repository name
        repository: String,

        /// Image tag value
        tag: String,

        #[command(flatten)]
        scope: ScopeArgs,
    },
}

#[derive(clap::Args)]
struct ScopeArgs {
    /// Key scope
    #[arg(long, value_enum, default_value_t = ScopeArg::Shared)]
    scope: ScopeArg,

    /// Run id, required with --scope run
    #[arg(long, required_if_eq("scope", "run"))]
    run_id: Option<String>,
}

#[derive(Clone, Copy, ValueEnum)]
enum ScopeArg {
    Shared,
    Run,
}

impl ScopeArgs {
    fn key(&self, repository: &str) -> Result<TagKey> {
        let (scope, run_id) = match self.scope {
            ScopeArg::Shared => (TagScope::Shared, RunId::new()),
            ScopeArg::Run => {
                let id = self
                    .run_id
                    .clone()
                    .context("--run-id is required with --scope run")?;
                (TagScope::Run, RunId(id))
            }
        };
        Ok(TagKey::derive(repository, scope, &run_id)?)
    }
}

#[derive(Subcommand)]
enum RunsAction {
    /// List recorded runs, newest first
    List {
        /// Maximum number of runs to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Show one run's events and audit verdict
    Show {
        /// Run ID
        run_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    conveyor_core::init_tracing(cli.json, level);

    match cli.command {
        Commands::Run {
            config,
            source,
            git,
            branch,
            blob_dir,
        } => {
            let handle = connect().await?;
            let provider: Box<dyn SourceProvider> = match git {
                Some(url) => Box::new(GitSource::new(url, branch)),
                None => Box::new(DirectorySource::new(
                    source.unwrap_or_else(|| PathBuf::from(".")),
                )),
            };
            cmd_run(&handle, &config, provider.as_ref(), &blob_dir).await
        }
        Commands::Tag { action } => {
            let handle = connect().await?;
            let registry = handle.tag_registry();
            match action {
                TagAction::Get { repository, scope } => {
                    cmd_tag_get(&registry, &scope.key(&repository)?).await
                }
                TagAction::Put {
                    repository,
                    tag,
                    scope,
                } => cmd_tag_put(&registry, &scope.key(&repository)?, &tag).await,
            }
        }
        Commands::Runs { action } => {
            let handle = connect().await?;
            let ledger = handle.run_ledger();
            match action {
                RunsAction::List { limit } => cmd_runs_list(&ledger, limit).await,
                RunsAction::Show { run_id } => cmd_runs_show(&ledger, &RunId(run_id)).await,
            }
        }
        Commands::IdentityMapping {
            config,
            cluster,
            region,
            role_arn,
        } => cmd_identity_mapping(&config, cluster, region, role_arn),
        Commands::Init { path, force } => cmd_init(&path, force),
    }
}

async fn connect() -> Result<SurrealHandle> {
    SurrealHandle::setup_from_env()
        .await
        .context("Failed to connect to Conveyor state database")
}

// ========== Pipeline ==========

async fn cmd_run(
    handle: &SurrealHandle,
    config_path: &Path,
    source: &dyn SourceProvider,
    blob_dir: &Path,
) -> Result<()> {
    let config = ConveyorConfig::load(config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))?;
    let blobs = Arc::new(
        FsBlobStore::new(blob_dir)
            .with_context(|| format!("Failed to open blob store at {}", blob_dir.display()))?,
    );

    let pipeline = Pipeline::builder(config.settings().clone(), config.stage_configs())
        .executor(Arc::new(config.executor(blobs.clone())?))
        .blob_store(blobs)
        .ledger(Arc::new(handle.run_ledger()))
        .tag_registry(Arc::new(handle.tag_registry()))
        .router(config.router()?)
        .build()
        .context("Invalid pipeline configuration")?;

    println!("Running pipeline for {}", config.settings().repository);
    println!("Source: {}", source.describe());
    println!(
        "Stages: {}",
        pipeline
            .stages()
            .iter()
            .map(|s| s.name.as_str())
            .collect::<Vec<_>>()
            .join(" → ")
    );
    println!();

    let result = pipeline
        .run_from(source)
        .await
        .context("Pipeline failed to run")?;
    print_result(&result);

    let events = handle.run_ledger().get_events(&result.run_id).await?;
    let verdict = RunAudit::evaluate(&events);
    println!("Audit: {}", if verdict.passed { "✓ PASSED" } else { "✗ FAILED" });
    for violation in &verdict.violations {
        println!("  - {}", violation);
    }

    match result.failed_stage() {
        None => {
            println!("\n✓ Pipeline succeeded");
            Ok(())
        }
        Some(stage) => anyhow::bail!("Pipeline failed at stage {}", stage),
    }
}

fn print_result(result: &PipelineResult) {
    println!("Run ID: {}", result.run_id);
    println!(
        "Status: {}",
        if result.is_success() { "✓ SUCCEEDED" } else { "✗ FAILED" }
    );
    println!("Duration: {}ms", result.duration_ms);
    println!();

    for report in &result.reports {
        let status = if report.passed() { "✓" } else { "✗" };
        let tag = report
            .image_tag
            .as_ref()
            .map(|t| format!(", tag {}", t))
            .unwrap_or_default();
        println!(
            "  {} {} ({}ms{})",
            status, report.stage, report.duration_ms, tag
        );
        if let Some(reason) = report.status.reason() {
            println!("      {}", reason);
        }
    }

    println!();
    println!(
        "Summary: {}/{} stages passed, artifact {}",
        result.passed_count(),
        result.reports.len(),
        result.artifact.id.short()
    );
}

// ========== Tags ==========

async fn cmd_tag_get(registry: &dyn TagRegistry, key: &TagKey) -> Result<()> {
    let record = registry
        .get(key.as_str())
        .await
        .with_context(|| format!("No tag published under {}", key))?;
    let value = normalize_tag_value(&record.value);
    let tag = ImageTag::parse(&value)
        .with_context(|| format!("Stored value under {} is not a valid tag", key))?;
    println!("{} = {} (updated {})", key, tag, record.updated_at.to_rfc3339());
    Ok(())
}

async fn cmd_tag_put(registry: &dyn TagRegistry, key: &TagKey, tag: &str) -> Result<()> {
    let tag = ImageTag::parse(tag)?;
    registry.put(key.as_str(), tag.as_str()).await?;
    info!(key = %key, tag = %tag, "tag overwritten by operator");
    println!("{} = {}", key, tag);
    Ok(())
}

// ========== Runs ==========

async fn cmd_runs_list(ledger: &dyn RunLedger, limit: usize) -> Result<()> {
    let runs = ledger.list_runs(None).await?;
    if runs.is_empty() {
        println!("No runs recorded");
        return Ok(());
    }

    for run in runs.into_iter().take(limit) {
        let detail = match &run.summary {
            Some(summary) => match &summary.failed_stage {
                Some(stage) => format!("failed at {} ({}ms)", stage, summary.duration_ms),
                None => format!("{}ms", summary.duration_ms),
            },
            None => String::new(),
        };
        println!(
            "{} {} {:<9} {} {}",
            run.created_at.to_rfc3339(),
            run.run_id.short(),
            run.status.as_str(),
            run.metadata.repository,
            detail
        );
    }
    Ok(())
}

async fn cmd_runs_show(ledger: &dyn RunLedger, run_id: &RunId) -> Result<()> {
    let run = ledger
        .get_run(run_id)
        .await
        .with_context(|| format!("Run {} not found", run_id))?;
    let events = ledger.get_events(run_id).await?;

    println!("Run ID: {}", run.run_id);
    println!("Repository: {}", run.metadata.repository);
    if let Some(sha) = &run.metadata.commit_sha {
        println!("Commit: {}", sha);
    }
    println!("Spec: {}", run.spec_digest.short());
    println!("Status: {}", run.status.as_str());
    println!();

    for event in &events {
        let stage = event.payload["stage"].as_str().unwrap_or("?");
        let reason = event.payload["reason"]
            .as_str()
            .map(|r| format!(" - {}", r))
            .unwrap_or_default();
        println!("  {:>3} {:<16} {}{}", event.seq, event.kind, stage, reason);
    }

    let verdict = RunAudit::evaluate(&events);
    println!();
    println!("Audit: {}", verdict.message);
    for violation in &verdict.violations {
        println!("  - {}", violation);
    }
    Ok(())
}

// ========== Operator helpers ==========

fn identity_mapping_command(cluster: &str, region: &str, role_arn: &str) -> String {
    format!(
        "eksctl create iamidentitymapping --cluster {} --region {} --arn {} --group system:masters",
        cluster, region, role_arn
    )
}

fn cmd_identity_mapping(
    config_path: &Path,
    cluster: Option<String>,
    region: Option<String>,
    role_arn: Option<String>,
) -> Result<()> {
    let settings = if config_path.exists() {
        Some(ConveyorConfig::load(config_path)?.pipeline)
    } else {
        None
    };
    let pick = |flag: Option<String>, configured: Option<&Option<String>>, name: &str| {
        flag.or_else(|| configured.cloned().flatten())
            .with_context(|| format!("{} not set; pass --{} or set it in the config", name, name))
    };

    let cluster = pick(cluster, settings.as_ref().map(|s| &s.cluster), "cluster")?;
    let region = pick(region, settings.as_ref().map(|s| &s.region), "region")?;
    let role_arn = pick(
        role_arn,
        settings.as_ref().map(|s| &s.deploy_role_arn),
        "role-arn",
    )?;

    println!("{}", identity_mapping_command(&cluster, &region, &role_arn));
    Ok(())
}

fn cmd_init(path: &Path, force: bool) -> Result<()> {
    let target = path.join(DEFAULT_CONFIG_FILE);
    if target.exists() && !force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite)",
            target.display()
        );
    }
    std::fs::create_dir_all(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    std::fs::write(&target, DEFAULT_CONFIG_TOML)
        .with_context(|| format!("Failed to write {}", target.display()))?;
    println!("Wrote {}", target.display());
    Ok(())
}
