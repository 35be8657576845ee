//! Source providers: where a run's initial artifact comes from.

use std::path::PathBuf;

use async_trait::async_trait;
use conveyor_core::artifact::capture_tree;
use conveyor_core::git::{capture_head_sha, clone_branch};
use conveyor_core::{Artifact, ConveyorError, Result};
use conveyor_state::BlobStore;
use tracing::{debug, info};

/// Producer name of every source artifact.
pub const SOURCE_PRODUCER: &str = "source";

/// The fetched source snapshot.
#[derive(Debug, Clone)]
pub struct SourceCheckout {
    pub artifact: Artifact,
    /// Commit the snapshot was taken at, when known.
    pub revision: Option<String>,
}

/// Produces the artifact a run starts from.
#[async_trait]
pub trait SourceProvider: Send + Sync {
    /// Human-readable origin for logs and run metadata.
    fn describe(&self) -> String;

    async fn fetch(&self, blobs: &dyn BlobStore) -> Result<SourceCheckout>;
}

/// Snapshot of a local directory.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    path: PathBuf,
}

impl DirectorySource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl SourceProvider for DirectorySource {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    async fn fetch(&self, blobs: &dyn BlobStore) -> Result<SourceCheckout> {
        if !self.path.is_dir() {
            return Err(ConveyorError::Source(format!(
                "source directory not found: {}",
                self.path.display()
            )));
        }
        let files = capture_tree(&self.path, blobs).await?;
        let revision = match capture_head_sha(&self.path).await {
            Ok(sha) => Some(sha),
            Err(e) => {
                debug!(path = %self.path.display(), error = %e, "source is not a git checkout");
                None
            }
        };
        info!(path = %self.path.display(), files = files.len(), "captured source directory");
        Ok(SourceCheckout {
            artifact: Artifact::new(SOURCE_PRODUCER, 0, files),
            revision,
        })
    }
}

/// Fresh clone of one branch of a git repository.
#[derive(Debug, Clone)]
pub struct GitSource {
    url: String,
    branch: String,
}

impl GitSource {
    pub fn new(url: impl Into<String>, branch: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            branch: branch.into(),
        }
    }
}

#[async_trait]
impl SourceProvider for GitSource {
    fn describe(&self) -> String {
        format!("{}#{}", self.url, self.branch)
    }

    async fn fetch(&self, blobs: &dyn BlobStore) -> Result<SourceCheckout> {
        let checkout = tempfile::Builder::new()
            .prefix("conveyor-source-")
            .tempdir()?;
        clone_branch(&self.url, &self.branch, checkout.path()).await?;
        let revision = capture_head_sha(checkout.path()).await?;
        let files = capture_tree(checkout.path(), blobs).await?;
        info!(
            url = %self.url,
            branch = %self.branch,
            revision = %revision,
            files = files.len(),
            "cloned source"
        );
        Ok(SourceCheckout {
            artifact: Artifact::new(SOURCE_PRODUCER, 0, files),
            revision: Some(revision),
        })
    }
}
