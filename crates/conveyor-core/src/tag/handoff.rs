//! Typed Build → Deploy handoff over the tag registry.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use conveyor_state::{RunId, TagRegistry};
use serde::{Deserialize, Serialize};

use super::image::ImageTag;
use super::key::{TagKey, TagScope};
use crate::domain::error::Result;
use crate::obs;
use crate::policy::{Capability, ScopedCredential};

/// What Build hands to Deploy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagHandoff {
    pub repository: String,
    pub tag: ImageTag,
    pub built_at: DateTime<Utc>,
    pub run_id: RunId,
}

/// A tag read back from the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTag {
    pub key: TagKey,
    pub tag: ImageTag,
    pub updated_at: DateTime<Utc>,
}

/// Strip whitespace and wrapping quotes left behind by shell pipelines
/// (`"20240101120000"\n` → `20240101120000`).
pub fn normalize_tag_value(raw: &str) -> String {
    let mut s = raw.trim();
    loop {
        let stripped = s
            .strip_prefix('"')
            .and_then(|r| r.strip_suffix('"'))
            .or_else(|| s.strip_prefix('\'').and_then(|r| r.strip_suffix('\'')));
        match stripped {
            Some(inner) => s = inner.trim(),
            None => return s.to_string(),
        }
    }
}

/// Publishes and resolves tags through one key derivation.
#[derive(Clone)]
pub struct TagExchange {
    registry: Arc<dyn TagRegistry>,
    scope: TagScope,
}

impl TagExchange {
    pub fn new(registry: Arc<dyn TagRegistry>, scope: TagScope) -> Self {
        Self { registry, scope }
    }

    pub fn scope(&self) -> TagScope {
        self.scope
    }

    pub fn key_for(&self, repository: &str, run_id: &RunId) -> Result<TagKey> {
        TagKey::derive(repository, self.scope, run_id)
    }

    /// Overwrite the key for `handoff.repository` with `handoff.tag`.
    /// Requires `tag_write`.
    pub async fn publish(
        &self,
        credential: &ScopedCredential,
        handoff: &TagHandoff,
    ) -> Result<TagKey> {
        credential.require(Capability::TagWrite)?;
        let key = self.key_for(&handoff.repository, &handoff.run_id)?;
        self.registry
            .put(key.as_str(), handoff.tag.as_str())
            .await?;
        obs::emit_tag_published(&handoff.run_id.0, key.as_str(), handoff.tag.as_str());
        Ok(key)
    }

    /// Read the current tag for `repository`. Requires `tag_read`.
    ///
    /// A key that was never written is `TagNotFound`; there is no default.
    pub async fn resolve(
        &self,
        credential: &ScopedCredential,
        repository: &str,
        run_id: &RunId,
    ) -> Result<ResolvedTag> {
        credential.require(Capability::TagRead)?;
        let key = self.key_for(repository, run_id)?;
        let record = self.registry.get(key.as_str()).await?;
        let tag = ImageTag::parse(&normalize_tag_value(&record.value))?;
        obs::emit_tag_resolved(&run_id.0, key.as_str(), tag.as_str());
        Ok(ResolvedTag {
            key,
            tag,
            updated_at: record.updated_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::error::ConveyorError;
    use crate::domain::role::StageRole;
    use crate::policy::CredentialIssuer;
    use conveyor_state::fakes::{MemoryTagRegistry, UnreachableTagRegistry};

    fn handoff(tag: &str, run_id: &RunId) -> TagHandoff {
        let tag = ImageTag::parse(tag).unwrap();
        TagHandoff {
            repository: "myrepo".to_string(),
            built_at: tag.built_at().unwrap(),
            tag,
            run_id: run_id.clone(),
        }
    }

    #[test]
    fn test_normalize_strips_quotes_and_whitespace() {
        assert_eq!(normalize_tag_value("\"20240101120000\"\n"), "20240101120000");
        assert_eq!(normalize_tag_value("  '20240101120000' "), "20240101120000");
        assert_eq!(normalize_tag_value("\" \"x\" \""), "x");
        assert_eq!(normalize_tag_value("\"unbalanced"), "\"unbalanced");
    }

    #[tokio::test]
    async fn test_publish_then_resolve_round_trip() {
        let registry = Arc::new(MemoryTagRegistry::new());
        let exchange = TagExchange::new(registry.clone(), TagScope::Shared);
        let issuer = CredentialIssuer::default();
        let run = RunId::new();

        let key = exchange
            .publish(&issuer.issue("build", StageRole::Build), &handoff("20240101120000", &run))
            .await
            .unwrap();
        assert_eq!(key.as_str(), "myrepo-image-latest-tag");

        let resolved = exchange
            .resolve(&issuer.issue("deploy", StageRole::Deploy), "myrepo", &run)
            .await
            .unwrap();
        assert_eq!(resolved.tag.as_str(), "20240101120000");
    }

    #[tokio::test]
    async fn test_resolve_strips_quoted_value() {
        let registry = Arc::new(MemoryTagRegistry::new());
        registry
            .put("myrepo-image-latest-tag", "\"20240101120000\"")
            .await
            .unwrap();
        let exchange = TagExchange::new(registry, TagScope::Shared);
        let cred = CredentialIssuer::default().issue("deploy", StageRole::Deploy);
        let resolved = exchange.resolve(&cred, "myrepo", &RunId::new()).await.unwrap();
        assert_eq!(resolved.tag.as_str(), "20240101120000");
    }

    #[tokio::test]
    async fn test_resolve_without_publish_is_not_found() {
        let exchange = TagExchange::new(Arc::new(MemoryTagRegistry::new()), TagScope::Shared);
        let cred = CredentialIssuer::default().issue("deploy", StageRole::Deploy);
        let err = exchange
            .resolve(&cred, "myrepo", &RunId::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ConveyorError::TagNotFound { .. }));
    }

    #[tokio::test]
    async fn test_run_scope_isolates_runs() {
        let registry = Arc::new(MemoryTagRegistry::new());
        let exchange = TagExchange::new(registry, TagScope::Run);
        let issuer = CredentialIssuer::default();
        let run_a = RunId::new();
        let run_b = RunId::new();

        exchange
            .publish(&issuer.issue("build", StageRole::Build), &handoff("20240101120000", &run_a))
            .await
            .unwrap();
        let deploy = issuer.issue("deploy", StageRole::Deploy);
        assert!(exchange.resolve(&deploy, "myrepo", &run_a).await.is_ok());
        assert!(matches!(
            exchange.resolve(&deploy, "myrepo", &run_b).await.unwrap_err(),
            ConveyorError::TagNotFound { .. }
        ));
    }

    #[tokio::test]
    async fn test_wrong_role_cannot_publish_or_resolve() {
        let registry = Arc::new(MemoryTagRegistry::new());
        let exchange = TagExchange::new(registry.clone(), TagScope::Shared);
        let issuer = CredentialIssuer::default();
        let run = RunId::new();

        let deploy = issuer.issue("deploy", StageRole::Deploy);
        let err = exchange
            .publish(&deploy, &handoff("20240101120000", &run))
            .await
            .unwrap_err();
        assert!(matches!(err, ConveyorError::PermissionDenied { .. }));
        assert_eq!(registry.write_count(), 0);

        let build = issuer.issue("build", StageRole::Build);
        let err = exchange.resolve(&build, "myrepo", &run).await.unwrap_err();
        assert!(matches!(err, ConveyorError::PermissionDenied { .. }));
    }

    #[tokio::test]
    async fn test_store_outage_surfaces_as_storage_error() {
        let exchange = TagExchange::new(Arc::new(UnreachableTagRegistry), TagScope::Shared);
        let cred = CredentialIssuer::default().issue("deploy", StageRole::Deploy);
        let err = exchange
            .resolve(&cred, "myrepo", &RunId::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ConveyorError::Storage(_)));
    }
}
