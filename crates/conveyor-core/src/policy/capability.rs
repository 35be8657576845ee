//! Capabilities: the permission axis for stage credentials.

use serde::{Deserialize, Serialize};

use crate::domain::role::StageRole;

/// An operation against shared infrastructure a stage may be allowed to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    SourceRead,
    ImagePush,
    TagRead,
    TagWrite,
    ClusterRead,
    ClusterDeploy,
}

impl Capability {
    pub const ALL: [Capability; 6] = [
        Capability::SourceRead,
        Capability::ImagePush,
        Capability::TagRead,
        Capability::TagWrite,
        Capability::ClusterRead,
        Capability::ClusterDeploy,
    ];

    /// Capabilities a stage of `role` needs before any of its commands run.
    pub fn required_by(role: StageRole) -> &'static [Capability] {
        match role {
            StageRole::Test | StageRole::Custom => &[Capability::SourceRead],
            StageRole::Build => &[
                Capability::SourceRead,
                Capability::ImagePush,
                Capability::TagWrite,
            ],
            StageRole::Deploy => &[
                Capability::SourceRead,
                Capability::TagRead,
                Capability::ClusterRead,
                Capability::ClusterDeploy,
            ],
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::SourceRead => "source_read",
            Capability::ImagePush => "image_push",
            Capability::TagRead => "tag_read",
            Capability::TagWrite => "tag_write",
            Capability::ClusterRead => "cluster_read",
            Capability::ClusterDeploy => "cluster_deploy",
        }
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
