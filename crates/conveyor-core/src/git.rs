//! Git helpers for source checkouts.

use std::path::Path;

use tokio::process::Command;

use crate::domain::error::{ConveyorError, Result};

/// HEAD commit SHA of the repository containing `repo_dir`.
pub async fn capture_head_sha(repo_dir: &Path) -> Result<String> {
    let output = Command::new("git")
        .args(["rev-parse", "HEAD"])
        .current_dir(repo_dir)
        .output()
        .await
        .map_err(|e| ConveyorError::Source(format!("failed to run git: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ConveyorError::Source(format!(
            "git rev-parse HEAD failed: {}",
            stderr.trim()
        )));
    }

    let sha = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if sha.is_empty() {
        return Err(ConveyorError::Source(
            "git rev-parse HEAD returned empty output".to_string(),
        ));
    }
    Ok(sha)
}

/// Shallow-clone `url` at `branch` into `dest` (which must not exist yet).
pub async fn clone_branch(url: &str, branch: &str, dest: &Path) -> Result<()> {
    let output = Command::new("git")
        .args(["clone", "--depth", "1", "--branch", branch, url])
        .arg(dest)
        .output()
        .await
        .map_err(|e| ConveyorError::Source(format!("failed to run git: {e}")))?;

    if !output.status.success() {
        return Err(ConveyorError::Source(format!(
            "git clone {url}@{branch} failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(())
}
