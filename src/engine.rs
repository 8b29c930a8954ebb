//! Main engine tying all components together.

use crate::diff::{diff, ChangeKind};
use crate::error::{Result, SnapshotError};
use crate::identity::{IdentityResolver, ProjectDirectory};
use crate::policy::SnapshotPolicy;
use crate::reconstruct::reconstruct;
use crate::store::SnapshotStore;
use crate::trigger::ProjectScheduler;
use crate::types::{
    ChangeType, FileMap, SnapshotContents, SnapshotVersionIndex, Timestamp, Version,
    VersionedSnapshot,
};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Engine configuration.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Base path for the snapshot store.
    pub path: PathBuf,

    /// Full-vs-differential and debounce policy.
    pub policy: SnapshotPolicy,

    /// Decoded-snapshot cache size (number of version records).
    pub snapshot_cache_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./snapshots"),
            policy: SnapshotPolicy::default(),
            snapshot_cache_size: 256,
        }
    }
}

/// The versioned snapshot engine.
///
/// Records the history of project file trees as an append-only sequence of
/// full and differential snapshots, and reconstructs any historical state on
/// demand. Cloning is cheap; clones share the same store and scheduler.
///
/// ## Example
///
/// ```ignore
/// use treeline::{ChangeType, EngineConfig, FileMap, NullDirectory, SnapshotEngine};
/// use std::sync::Arc;
///
/// let engine = SnapshotEngine::open_or_create(
///     EngineConfig { path: "./history".into(), ..Default::default() },
///     Arc::new(NullDirectory),
/// )?;
///
/// // Fire-and-forget: bursts of edits coalesce into one version.
/// engine.notify_change("project-1", files, ChangeType::UserEdit, None);
///
/// // Historical read.
/// let tree = engine.reconstruct_full_snapshot("project-1", treeline::Version(3)).await?;
/// ```
#[derive(Clone)]
pub struct SnapshotEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    store: SnapshotStore,
    resolver: IdentityResolver,
    policy: SnapshotPolicy,
    scheduler: ProjectScheduler,
}

impl SnapshotEngine {
    /// Open an existing engine store or create a new one.
    pub fn open_or_create(
        config: EngineConfig,
        directory: Arc<dyn ProjectDirectory>,
    ) -> Result<Self> {
        let store = SnapshotStore::open_or_create(&config.path, config.snapshot_cache_size)?;
        Ok(Self {
            inner: Arc::new(EngineInner {
                store,
                resolver: IdentityResolver::new(directory),
                policy: config.policy,
                scheduler: ProjectScheduler::new(),
            }),
        })
    }

    /// Record a file-tree mutation, debounced per project.
    ///
    /// Only the last call within the quiet period proceeds; the capture then
    /// runs on the engine's runtime with errors logged, never thrown. Must be
    /// called within a tokio runtime.
    pub fn notify_change(
        &self,
        mixed_project_id: &str,
        current_files: FileMap,
        change_type: ChangeType,
        debounce: Option<Duration>,
    ) {
        let delay = debounce.unwrap_or(self.inner.policy.debounce);
        let inner = Arc::clone(&self.inner);
        let mixed_id = mixed_project_id.to_string();

        self.inner.scheduler.reschedule(mixed_project_id, delay, async move {
            match inner.capture(&mixed_id, current_files, change_type).await {
                Ok(Some(snapshot)) => tracing::debug!(
                    project = %snapshot.project_id,
                    version = %snapshot.version,
                    full = snapshot.is_full(),
                    "snapshot persisted"
                ),
                Ok(None) => tracing::debug!(project = %mixed_id, "no changes; snapshot skipped"),
                Err(e) => tracing::warn!(
                    project = %mixed_id,
                    error = %e,
                    "snapshot attempt abandoned"
                ),
            }
        });
    }

    /// Capture a snapshot immediately, bypassing the debounce timer.
    ///
    /// Returns the persisted snapshot, or `None` when the tree is unchanged
    /// since the latest version.
    pub async fn capture_now(
        &self,
        mixed_project_id: &str,
        current_files: FileMap,
        change_type: ChangeType,
    ) -> Result<Option<VersionedSnapshot>> {
        self.inner
            .capture(mixed_project_id, current_files, change_type)
            .await
    }

    /// A project's version index, if it has any history.
    pub async fn get_snapshot_versions(
        &self,
        mixed_project_id: &str,
    ) -> Result<Option<SnapshotVersionIndex>> {
        let project_id = self.inner.resolver.resolve(mixed_project_id).await;
        self.inner.store.get_version_index(&project_id)
    }

    /// One stored version record, as persisted (full tree or differential).
    pub async fn get_versioned_snapshot(
        &self,
        mixed_project_id: &str,
        version: Version,
    ) -> Result<Option<VersionedSnapshot>> {
        let project_id = self.inner.resolver.resolve(mixed_project_id).await;
        self.inner.store.get_version(&project_id, version)
    }

    /// The complete file tree at a version, replaying deltas as needed.
    pub async fn reconstruct_full_snapshot(
        &self,
        mixed_project_id: &str,
        version: Version,
    ) -> Result<Option<FileMap>> {
        let project_id = self.inner.resolver.resolve(mixed_project_id).await;
        reconstruct(&self.inner.store, &project_id, version)
    }

    /// Paths touched by the most recent version.
    pub async fn list_changed_paths(&self, mixed_project_id: &str) -> Result<BTreeSet<String>> {
        let project_id = self.inner.resolver.resolve(mixed_project_id).await;
        self.inner.store.list_changed_paths(&project_id)
    }

    /// Delete a project's entire history: every version record plus the
    /// index. Cancels any pending debounce timer first so a queued capture
    /// cannot recreate the history.
    pub async fn delete_project_history(&self, mixed_project_id: &str) -> Result<()> {
        self.inner.scheduler.cancel(mixed_project_id);
        let project_id = self.inner.resolver.resolve(mixed_project_id).await;
        self.inner.scheduler.cancel(&project_id);

        let lock = self.inner.scheduler.serialize_lock(&project_id);
        let _guard = lock.lock().await;
        self.inner.store.delete_project(&project_id)
    }

    /// Drop all cached alias mappings.
    pub fn clear_identity_cache(&self) {
        self.inner.resolver.clear_cache();
    }

    /// The engine's policy parameters.
    pub fn policy(&self) -> &SnapshotPolicy {
        &self.inner.policy
    }
}

impl EngineInner {
    /// Resolve, serialize, and persist one snapshot attempt.
    async fn capture(
        &self,
        mixed_project_id: &str,
        current_files: FileMap,
        change_type: ChangeType,
    ) -> Result<Option<VersionedSnapshot>> {
        let project_id = self.resolver.resolve(mixed_project_id).await;

        // Version creation for one project is strictly serialized: a firing
        // must not read latest_version while another firing's put is in
        // flight.
        let lock = self.scheduler.serialize_lock(&project_id);
        let _guard = lock.lock().await;

        let index = self.store.get_version_index(&project_id)?;
        let snapshot = match index {
            None => self.bootstrap(&project_id, current_files),
            Some(index) => {
                match self.next_version(&project_id, &index, current_files, change_type)? {
                    Some(snapshot) => snapshot,
                    None => return Ok(None),
                }
            }
        };

        self.store.put_version(&snapshot)?;
        Ok(Some(snapshot))
    }

    /// The very first snapshot of a project: always full, always `Initial`,
    /// even when the tree is still empty.
    fn bootstrap(&self, project_id: &str, current_files: FileMap) -> VersionedSnapshot {
        let modified_files: BTreeSet<String> = current_files.keys().cloned().collect();
        VersionedSnapshot {
            project_id: project_id.to_string(),
            version: Version::FIRST,
            timestamp: Timestamp::now(),
            change_type: ChangeType::Initial,
            contents: SnapshotContents::Full {
                files: current_files,
            },
            modified_files,
            previous: None,
        }
    }

    /// Assemble the next version, or `None` when the tree is unchanged.
    fn next_version(
        &self,
        project_id: &str,
        index: &SnapshotVersionIndex,
        current_files: FileMap,
        change_type: ChangeType,
    ) -> Result<Option<VersionedSnapshot>> {
        let latest = index.latest_version;
        let latest_state = reconstruct(&self.store, project_id, latest)?.ok_or_else(|| {
            SnapshotError::Corruption(format!(
                "index for project {} names version {} but the record is missing",
                project_id, latest
            ))
        })?;

        let changes = diff(&latest_state, &current_files);
        if changes.is_empty() {
            return Ok(None);
        }

        let version = latest.next();
        let modified_files: BTreeSet<String> =
            changes.iter().map(|c| c.path.clone()).collect();

        let contents = if self
            .policy
            .should_be_full(version, change_type, current_files.len())
        {
            SnapshotContents::Full {
                files: current_files,
            }
        } else {
            let previous = self.store.get_version(project_id, latest)?.ok_or_else(|| {
                SnapshotError::Corruption(format!(
                    "latest version {} of project {} disappeared mid-capture",
                    latest, project_id
                ))
            })?;
            // A full predecessor is its own baseline; a differential one
            // passes its baseline along.
            let baseline = previous.baseline().unwrap_or(latest);

            let mut delta = FileMap::new();
            for change in &changes {
                if matches!(change.kind, ChangeKind::Added | ChangeKind::Modified) {
                    if let Some(entry) = current_files.get(&change.path) {
                        delta.insert(change.path.clone(), entry.clone());
                    }
                }
            }
            SnapshotContents::Differential {
                files: delta,
                baseline,
            }
        };

        // A full snapshot's modified set covers the whole tree.
        let modified_files = match &contents {
            SnapshotContents::Full { files } => files.keys().cloned().collect(),
            SnapshotContents::Differential { .. } => modified_files,
        };

        Ok(Some(VersionedSnapshot {
            project_id: project_id.to_string(),
            version,
            timestamp: Timestamp::now(),
            change_type,
            contents,
            modified_files,
            previous: Some(latest),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::NullDirectory;
    use crate::types::FileTreeEntry;
    use tempfile::TempDir;

    fn test_engine(dir: &TempDir) -> SnapshotEngine {
        SnapshotEngine::open_or_create(
            EngineConfig {
                path: dir.path().join("store"),
                ..Default::default()
            },
            Arc::new(NullDirectory),
        )
        .unwrap()
    }

    fn one_file(content: &str) -> FileMap {
        let mut files = FileMap::new();
        files.insert("/home/project/a.txt".into(), FileTreeEntry::text(content));
        files
    }

    #[tokio::test]
    async fn test_bootstrap_is_initial_full() {
        let dir = TempDir::new().unwrap();
        let engine = test_engine(&dir);

        let snapshot = engine
            .capture_now("p1", one_file("x"), ChangeType::UserEdit)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(snapshot.version, Version(1));
        assert_eq!(snapshot.change_type, ChangeType::Initial);
        assert!(snapshot.is_full());
    }

    #[tokio::test]
    async fn test_unchanged_tree_is_noop() {
        let dir = TempDir::new().unwrap();
        let engine = test_engine(&dir);

        engine
            .capture_now("p1", one_file("x"), ChangeType::UserEdit)
            .await
            .unwrap();
        let second = engine
            .capture_now("p1", one_file("x"), ChangeType::UserEdit)
            .await
            .unwrap();

        assert!(second.is_none());
        let index = engine.get_snapshot_versions("p1").await.unwrap().unwrap();
        assert_eq!(index.latest_version, Version(1));
    }

    #[tokio::test]
    async fn test_second_version_is_differential() {
        let dir = TempDir::new().unwrap();
        let engine = test_engine(&dir);

        engine
            .capture_now("p1", one_file("x"), ChangeType::UserEdit)
            .await
            .unwrap();
        let snapshot = engine
            .capture_now("p1", one_file("y"), ChangeType::AiResponse)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(snapshot.version, Version(2));
        assert!(!snapshot.is_full());
        assert_eq!(snapshot.baseline(), Some(Version(1)));
        assert_eq!(snapshot.change_type, ChangeType::AiResponse);
    }
}
