//! Policy rules and policy sets for stage authorization.

use serde::{Deserialize, Serialize};

use super::capability::Capability;
use crate::domain::role::StageRole;

/// Outcome of evaluating a (role, capability) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyVerdict {
    Allowed,
    Denied { reason: String },
}

impl PolicyVerdict {
    pub fn is_allowed(&self) -> bool {
        matches!(self, PolicyVerdict::Allowed)
    }
}

/// A single rule matching a (role, capability) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PolicyRule {
    Allow {
        role: StageRole,
        capability: Capability,
    },
    Deny {
        role: StageRole,
        capability: Capability,
        reason: String,
    },
}

impl PolicyRule {
    pub fn matches(&self, role: StageRole, capability: Capability) -> bool {
        match self {
            PolicyRule::Allow {
                role: r,
                capability: c,
            }
            | PolicyRule::Deny {
                role: r,
                capability: c,
                ..
            } => *r == role && *c == capability,
        }
    }

    pub fn verdict(&self) -> PolicyVerdict {
        match self {
            PolicyRule::Allow { .. } => PolicyVerdict::Allowed,
            PolicyRule::Deny { reason, .. } => PolicyVerdict::Denied {
                reason: reason.clone(),
            },
        }
    }
}

/// Ordered rules, evaluated first-match-wins. No match means **Denied**.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicySet {
    pub rules: Vec<PolicyRule>,
}

impl PolicySet {
    /// Everything denied.
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn with_rule(mut self, rule: PolicyRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Least-privilege grants for the standard three-stage pipeline.
    ///
    /// | Role   | source_read | image_push | tag_read | tag_write | cluster_read | cluster_deploy |
    /// |--------|-------------|------------|----------|-----------|--------------|----------------|
    /// | Test   |      ✓      |     ✗      |    ✗     |     ✗     |      ✗       |       ✗        |
    /// | Build  |      ✓      |     ✓      |    ✗     |     ✓     |      ✗       |       ✗        |
    /// | Deploy |      ✓      |     ✗      |    ✓     |     ✗     |      ✓       |       ✓        |
    /// | Custom |      ✓      |     ✗      |    ✗     |     ✗     |      ✗       |       ✗        |
    pub fn default_pipeline() -> Self {
        let mut rules = Vec::new();
        let mut allow = |role: StageRole, caps: &[Capability]| {
            for cap in caps {
                rules.push(PolicyRule::Allow {
                    role,
                    capability: *cap,
                });
            }
        };

        allow(StageRole::Test, &[Capability::SourceRead]);
        allow(
            StageRole::Build,
            &[
                Capability::SourceRead,
                Capability::ImagePush,
                Capability::TagWrite,
            ],
        );
        allow(
            StageRole::Deploy,
            &[
                Capability::SourceRead,
                Capability::TagRead,
                Capability::ClusterRead,
                Capability::ClusterDeploy,
            ],
        );
        allow(StageRole::Custom, &[Capability::SourceRead]);

        Self { rules }
    }

    pub fn evaluate(&self, role: StageRole, capability: Capability) -> PolicyVerdict {
        for rule in &self.rules {
            if rule.matches(role, capability) {
                return rule.verdict();
            }
        }
        PolicyVerdict::Denied {
            reason: format!("no policy rule matched role={role} capability={capability}"),
        }
    }

    /// Every capability `role` is allowed.
    pub fn granted(&self, role: StageRole) -> Vec<Capability> {
        Capability::ALL
            .into_iter()
            .filter(|cap| self.evaluate(role, *cap).is_allowed())
            .collect()
    }
}

impl Default for PolicySet {
    fn default() -> Self {
        Self::default_pipeline()
    }
}
