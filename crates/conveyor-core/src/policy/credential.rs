//! Short-lived, per-stage scoped credentials.

use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::capability::Capability;
use super::rules::PolicySet;
use crate::domain::error::{ConveyorError, Result};
use crate::domain::role::StageRole;

/// Environment variable carrying the stage token into commands.
pub const STAGE_TOKEN_ENV: &str = "CONVEYOR_STAGE_TOKEN";
/// Environment variable carrying the token expiry (RFC 3339).
pub const STAGE_TOKEN_EXPIRES_ENV: &str = "CONVEYOR_STAGE_TOKEN_EXPIRES_AT";

pub const DEFAULT_CREDENTIAL_TTL_SECS: i64 = 3600;

/// Grant of capabilities to one stage execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopedCredential {
    pub stage: String,
    pub role: StageRole,
    pub capabilities: BTreeSet<Capability>,
    pub token: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl ScopedCredential {
    pub fn allows(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Fails with `PermissionDenied` unless the credential is live and
    /// carries `capability`.
    pub fn require(&self, capability: Capability) -> Result<()> {
        self.require_at(capability, Utc::now())
    }

    pub fn require_at(&self, capability: Capability, now: DateTime<Utc>) -> Result<()> {
        if self.is_expired_at(now) {
            return Err(ConveyorError::PermissionDenied {
                stage: self.stage.clone(),
                reason: format!("credential expired at {}", self.expires_at.to_rfc3339()),
            });
        }
        if !self.allows(capability) {
            return Err(ConveyorError::PermissionDenied {
                stage: self.stage.clone(),
                reason: format!("credential lacks {capability}"),
            });
        }
        Ok(())
    }

    /// [`require`](Self::require) for each capability, stopping at the first denial.
    pub fn require_all(&self, capabilities: &[Capability]) -> Result<()> {
        let now = Utc::now();
        capabilities
            .iter()
            .try_for_each(|cap| self.require_at(*cap, now))
    }

    /// Variables exported to the stage's commands.
    pub fn env(&self) -> Vec<(String, String)> {
        vec![
            (STAGE_TOKEN_ENV.to_string(), self.token.clone()),
            (
                STAGE_TOKEN_EXPIRES_ENV.to_string(),
                self.expires_at.to_rfc3339(),
            ),
        ]
    }
}

/// Issues credentials from a policy.
#[derive(Debug, Clone)]
pub struct CredentialIssuer {
    policy: PolicySet,
    ttl: Duration,
}

impl Default for CredentialIssuer {
    fn default() -> Self {
        Self::new(PolicySet::default_pipeline())
    }
}

impl CredentialIssuer {
    pub fn new(policy: PolicySet) -> Self {
        Self {
            policy,
            ttl: Duration::seconds(DEFAULT_CREDENTIAL_TTL_SECS),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn policy(&self) -> &PolicySet {
        &self.policy
    }

    pub fn issue(&self, stage: &str, role: StageRole) -> ScopedCredential {
        let issued_at = Utc::now();
        let capabilities: BTreeSet<Capability> = self.policy.granted(role).into_iter().collect();
        debug!(
            stage,
            role = %role,
            capabilities = ?capabilities,
            "issued scoped credential"
        );
        ScopedCredential {
            stage: stage.to_string(),
            role,
            capabilities,
            token: format!("cvy_{}", uuid::Uuid::new_v4().simple()),
            issued_at,
            expires_at: issued_at + self.ttl,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::rules::PolicyRule;

    #[test]
    fn test_issue_scopes_to_role() {
        let issuer = CredentialIssuer::default();
        let cred = issuer.issue("build", StageRole::Build);
        assert!(cred.allows(Capability::TagWrite));
        assert!(!cred.allows(Capability::TagRead));
        assert!(cred.require(Capability::ImagePush).is_ok());
        assert!(cred.token.starts_with("cvy_"));
        assert!(cred.expires_at > cred.issued_at);
    }

    #[test]
    fn test_tokens_are_unique_per_issue() {
        let issuer = CredentialIssuer::default();
        let a = issuer.issue("test", StageRole::Test);
        let b = issuer.issue("test", StageRole::Test);
        assert_ne!(a.token, b.token);
    }

    #[test]
    fn test_missing_capability_is_denied() {
        let issuer = CredentialIssuer::new(PolicySet::empty().with_rule(PolicyRule::Allow {
            role: StageRole::Build,
            capability: Capability::ImagePush,
        }));
        let cred = issuer.issue("build", StageRole::Build);
        let err = cred.require(Capability::TagWrite).unwrap_err();
        assert!(
            matches!(err, ConveyorError::PermissionDenied { ref reason, .. } if reason.contains("tag_write"))
        );
    }

    #[test]
    fn test_require_all_reports_first_missing() {
        let cred = CredentialIssuer::default().issue("test", StageRole::Test);
        assert!(cred.require_all(&[Capability::SourceRead]).is_ok());
        let err = cred
            .require_all(&[Capability::SourceRead, Capability::ImagePush, Capability::TagWrite])
            .unwrap_err();
        assert!(err.to_string().contains("image_push"));
    }

    #[test]
    fn test_expired_credential_is_denied() {
        let issuer = CredentialIssuer::default().with_ttl(Duration::seconds(60));
        let cred = issuer.issue("deploy", StageRole::Deploy);
        let later = cred.expires_at + Duration::seconds(1);
        let err = cred.require_at(Capability::TagRead, later).unwrap_err();
        assert!(err.to_string().contains("expired"));
    }

    #[test]
    fn test_env_exports_token_and_expiry() {
        let cred = CredentialIssuer::default().issue("test", StageRole::Test);
        let env = cred.env();
        assert_eq!(env[0].0, STAGE_TOKEN_ENV);
        assert_eq!(env[0].1, cred.token);
        assert_eq!(env[1].0, STAGE_TOKEN_EXPIRES_ENV);
    }
}
