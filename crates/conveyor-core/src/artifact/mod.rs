//! Artifacts: immutable filesystem snapshots handed from one stage to the next.
//!
//! - [`Artifact`]       - content-addressed file manifest
//! - [`ArtifactChannel`] - ordered per-run history, carries the latest non-empty snapshot
//! - [`snapshot`]       - capture a directory into a `BlobStore`, materialize it back
//! - [`pattern`]        - output glob patterns

pub mod channel;
pub mod pattern;
pub mod snapshot;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use conveyor_state::ContentDigest;
use serde::{Deserialize, Serialize};

pub use channel::ArtifactChannel;
pub use pattern::OutputPattern;
pub use snapshot::{capture_outputs, capture_reports, capture_tree, materialize};

/// Relative path (always `/`-separated) → digest of the file's bytes.
pub type FileManifest = BTreeMap<String, ContentDigest>;

/// A versioned snapshot of a working directory.
///
/// `id` is the SHA-256 of the canonical (sorted) file manifest, so two
/// snapshots with identical contents share an id regardless of who produced
/// them or when.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub id: ContentDigest,
    /// Stage (or `source`) that produced the snapshot.
    pub producer: String,
    /// Position in the run's artifact channel; the source is 0.
    pub version: u64,
    pub files: FileManifest,
    pub created_at: DateTime<Utc>,
}

impl Artifact {
    pub fn new(producer: impl Into<String>, version: u64, files: FileManifest) -> Self {
        Self {
            id: manifest_digest(&files),
            producer: producer.into(),
            version,
            files,
            created_at: Utc::now(),
        }
    }

    /// An artifact with no files is "empty" and is never carried forward.
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }
}

fn manifest_digest(files: &FileManifest) -> ContentDigest {
    let mut canonical = String::new();
    for (path, digest) in files {
        canonical.push_str(path);
        canonical.push('\0');
        canonical.push_str(digest.as_str());
        canonical.push('\n');
    }
    ContentDigest::from_bytes(canonical.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest(entries: &[(&str, &[u8])]) -> FileManifest {
        entries
            .iter()
            .map(|(p, b)| (p.to_string(), ContentDigest::from_bytes(b)))
            .collect()
    }

    #[test]
    fn test_artifact_id_depends_only_on_contents() {
        let a = Artifact::new("source", 0, manifest(&[("a.txt", b"1"), ("b.txt", b"2")]));
        let b = Artifact::new("build", 3, manifest(&[("b.txt", b"2"), ("a.txt", b"1")]));
        assert_eq!(a.id, b.id);

        let c = Artifact::new("source", 0, manifest(&[("a.txt", b"changed"), ("b.txt", b"2")]));
        assert_ne!(a.id, c.id);
    }

    #[test]
    fn test_renamed_file_changes_id() {
        let a = Artifact::new("s", 0, manifest(&[("a.txt", b"1")]));
        let b = Artifact::new("s", 0, manifest(&[("z.txt", b"1")]));
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_empty_artifact() {
        let a = Artifact::new("test", 1, FileManifest::new());
        assert!(a.is_empty());
        assert!(!a.contains("imageDetail.json"));
    }
}
