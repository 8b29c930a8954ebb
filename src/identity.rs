//! Project identity resolution.
//!
//! A persisted project identifier may arrive as a public alias or as the
//! canonical id itself. The resolver canonicalizes either form through an
//! injected directory lookup and caches confirmed mappings for the life of
//! the resolver instance.

use crate::error::Result;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// A project record as known to the backing identity provider.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProjectRecord {
    pub canonical_id: String,
    /// Public alias, when the project has one distinct from the canonical id.
    pub alias: Option<String>,
}

/// Backing lookup for project identity.
#[async_trait]
pub trait ProjectDirectory: Send + Sync {
    /// Find the record whose alias equals `mixed_id`, if any.
    async fn lookup_alias(&self, mixed_id: &str) -> Result<Option<ProjectRecord>>;
}

/// Directory that knows no aliases; every id is treated as canonical.
pub struct NullDirectory;

#[async_trait]
impl ProjectDirectory for NullDirectory {
    async fn lookup_alias(&self, _mixed_id: &str) -> Result<Option<ProjectRecord>> {
        Ok(None)
    }
}

/// Resolves mixed project ids to canonical ids with a process-lifetime cache.
pub struct IdentityResolver {
    directory: Arc<dyn ProjectDirectory>,
    cache: RwLock<HashMap<String, String>>,
}

impl IdentityResolver {
    pub fn new(directory: Arc<dyn ProjectDirectory>) -> Self {
        Self {
            directory,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Resolve a possibly-aliased id to its canonical form.
    ///
    /// Unknown ids are assumed to already be canonical and are returned
    /// unchanged without caching, since the assumption is unconfirmed. A
    /// failed directory lookup degrades the same way; it is logged, never
    /// surfaced.
    pub async fn resolve(&self, mixed_id: &str) -> String {
        if let Some(canonical) = self.cache.read().get(mixed_id) {
            return canonical.clone();
        }

        match self.directory.lookup_alias(mixed_id).await {
            Ok(Some(record)) => {
                let mut cache = self.cache.write();
                cache.insert(mixed_id.to_string(), record.canonical_id.clone());
                if let Some(alias) = record.alias {
                    if alias != mixed_id {
                        cache.insert(alias, record.canonical_id.clone());
                    }
                }
                record.canonical_id
            }
            Ok(None) => mixed_id.to_string(),
            Err(e) => {
                tracing::warn!(
                    mixed_id,
                    error = %e,
                    "identity lookup failed; treating id as canonical"
                );
                mixed_id.to_string()
            }
        }
    }

    /// Drop every cached mapping.
    pub fn clear_cache(&self) {
        self.cache.write().clear();
    }

    #[cfg(test)]
    fn cached(&self, mixed_id: &str) -> Option<String> {
        self.cache.read().get(mixed_id).cloned()
    }
}
