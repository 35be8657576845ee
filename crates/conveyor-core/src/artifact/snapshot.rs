//! Capturing directories into artifacts and writing them back out.

use std::path::{Component, Path, PathBuf};

use conveyor_state::BlobStore;
use tracing::debug;

use super::{Artifact, FileManifest, OutputPattern};
use crate::domain::error::{ConveyorError, Result};

/// Directories never captured into a snapshot: VCS metadata and Conveyor's
/// own local state (blob store, embedded database).
pub const SKIPPED_DIRS: &[&str] = &[".git", ".conveyor"];

/// Capture every file under `root` except [`SKIPPED_DIRS`].
pub async fn capture_tree(root: &Path, blobs: &dyn BlobStore) -> Result<FileManifest> {
    let paths = list_files(root)?;
    store_files(root, paths, blobs).await
}

/// Capture the files under `root` matched by `patterns`.
///
/// Every pattern must match at least one file; an unmatched pattern is an
/// error naming it.
pub async fn capture_outputs(
    root: &Path,
    patterns: &[OutputPattern],
    blobs: &dyn BlobStore,
) -> Result<FileManifest> {
    if patterns.is_empty() {
        return Ok(FileManifest::new());
    }
    let all = list_files(root)?;

    let mut selected = Vec::new();
    for pattern in patterns {
        let hits: Vec<&String> = all.iter().filter(|p| pattern.matches(p)).collect();
        if hits.is_empty() {
            return Err(ConveyorError::Artifact(format!(
                "no matching artifact paths for pattern {}",
                pattern.as_str()
            )));
        }
        selected.extend(hits.into_iter().cloned());
    }
    selected.sort();
    selected.dedup();

    store_files(root, selected, blobs).await
}

/// Capture whatever `patterns` match under `root`. Unlike
/// [`capture_outputs`], a pattern with no matches is skipped.
pub async fn capture_reports(
    root: &Path,
    patterns: &[OutputPattern],
    blobs: &dyn BlobStore,
) -> Result<FileManifest> {
    if patterns.is_empty() {
        return Ok(FileManifest::new());
    }
    let selected: Vec<String> = list_files(root)?
        .into_iter()
        .filter(|p| patterns.iter().any(|pattern| pattern.matches(p)))
        .collect();
    if selected.is_empty() {
        debug!(root = %root.display(), "no report files found");
    }
    store_files(root, selected, blobs).await
}

/// Write every file of `artifact` beneath `dest`, creating directories as needed.
pub async fn materialize(artifact: &Artifact, blobs: &dyn BlobStore, dest: &Path) -> Result<()> {
    for (rel, digest) in &artifact.files {
        let target = dest.join(safe_relative(rel)?);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let bytes = blobs.get(digest).await?;
        tokio::fs::write(&target, bytes).await?;
    }
    debug!(
        artifact = %artifact.id.short(),
        files = artifact.files.len(),
        dest = %dest.display(),
        "materialized artifact"
    );
    Ok(())
}

async fn store_files(
    root: &Path,
    paths: Vec<String>,
    blobs: &dyn BlobStore,
) -> Result<FileManifest> {
    let mut manifest = FileManifest::new();
    for rel in paths {
        let bytes = tokio::fs::read(root.join(&rel)).await?;
        let digest = blobs.put(&bytes).await?;
        manifest.insert(rel, digest);
    }
    Ok(manifest)
}

/// Relative `/`-separated paths of all regular files under `root`, sorted.
fn list_files(root: &Path) -> Result<Vec<String>> {
    let mut out = Vec::new();
    walk(root, root, &mut out)?;
    out.sort();
    Ok(out)
}

fn walk(root: &Path, dir: &Path, out: &mut Vec<String>) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;

        if file_type.is_dir() {
            let name = entry.file_name();
            if SKIPPED_DIRS.iter().any(|s| name == *s) {
                continue;
            }
            walk(root, &path, out)?;
        } else if path.is_file() {
            let rel = path
                .strip_prefix(root)
                .map_err(|e| ConveyorError::Artifact(e.to_string()))?;
            out.push(to_slash(rel));
        }
    }
    Ok(())
}

fn to_slash(rel: &Path) -> String {
    rel.components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

fn safe_relative(rel: &str) -> Result<PathBuf> {
    let path = Path::new(rel);
    if path.is_absolute()
        || path
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
    {
        return Err(ConveyorError::Artifact(format!(
            "artifact path escapes workspace: {rel}"
        )));
    }
    Ok(path.to_path_buf())
}
