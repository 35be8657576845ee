//! Per-run artifact channel.

use tracing::debug;

use super::{Artifact, FileManifest};

/// Ordered, append-only history of the artifacts produced during one run.
///
/// The artifact handed to the next stage is always the most recently
/// recorded one; stages that produce nothing leave it unchanged.
#[derive(Debug, Clone)]
pub struct ArtifactChannel {
    history: Vec<Artifact>,
}

impl ArtifactChannel {
    /// Open a channel seeded with the source artifact (re-versioned to 0).
    pub fn seed(mut source: Artifact) -> Self {
        source.version = 0;
        Self {
            history: vec![source],
        }
    }

    /// The artifact the next stage receives.
    pub fn current(&self) -> &Artifact {
        // `seed` guarantees at least one entry.
        &self.history[self.history.len() - 1]
    }

    /// Record a stage's output. Empty outputs are dropped and `None` is
    /// returned; otherwise the new artifact becomes current.
    pub fn record(&mut self, producer: &str, files: FileManifest) -> Option<&Artifact> {
        if files.is_empty() {
            debug!(producer, "stage produced no artifact, carrying previous");
            return None;
        }
        let version = self.history.len() as u64;
        self.history.push(Artifact::new(producer, version, files));
        self.history.last()
    }

    pub fn history(&self) -> &[Artifact] {
        &self.history
    }

    pub fn into_current(mut self) -> Artifact {
        // Non-empty by construction.
        self.history.swap_remove(self.history.len() - 1)
    }
}
