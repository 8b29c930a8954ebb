//! Reconstruction of historical file trees.
//!
//! A full snapshot is its own answer. A differential snapshot is replayed
//! from its baseline: start from the baseline's full tree, then apply every
//! intermediate version in ascending order. Deletions inside a version are
//! recovered as the paths it touched but did not store.

use crate::error::{Result, SnapshotError};
use crate::store::SnapshotStore;
use crate::types::{FileMap, SnapshotContents, Version, VersionedSnapshot};

/// Reconstruct the complete file tree at `target`, or `None` if the version
/// does not exist.
///
/// A chain whose baseline or intermediate records are missing or malformed
/// fails with [`SnapshotError::BrokenChain`]; partial state is never
/// returned.
pub fn reconstruct(
    store: &SnapshotStore,
    project_id: &str,
    target: Version,
) -> Result<Option<FileMap>> {
    let snapshot = match store.get_version(project_id, target)? {
        Some(snapshot) => snapshot,
        None => return Ok(None),
    };

    let baseline = match &snapshot.contents {
        SnapshotContents::Full { files } => return Ok(Some(files.clone())),
        SnapshotContents::Differential { baseline, .. } => *baseline,
    };

    let baseline_snapshot = store
        .get_version(project_id, baseline)?
        .ok_or(SnapshotError::BrokenChain {
            version: target,
            missing: baseline,
        })?;

    let mut state = match baseline_snapshot.contents {
        SnapshotContents::Full { files } => files,
        // The chain named a differential as its baseline.
        SnapshotContents::Differential { .. } => {
            return Err(SnapshotError::BrokenChain {
                version: target,
                missing: baseline,
            })
        }
    };

    let index = store
        .get_version_index(project_id)?
        .ok_or_else(|| SnapshotError::Corruption(format!(
            "version {} of project {} exists but the project has no index",
            target, project_id
        )))?;

    for entry in index
        .versions
        .iter()
        .filter(|e| e.version > baseline && e.version <= target)
    {
        let step = store
            .get_version(project_id, entry.version)?
            .ok_or(SnapshotError::BrokenChain {
                version: target,
                missing: entry.version,
            })?;
        apply(&mut state, &step);
    }

    Ok(Some(state))
}

/// Apply one version on top of a working tree.
fn apply(state: &mut FileMap, snapshot: &VersionedSnapshot) {
    match &snapshot.contents {
        SnapshotContents::Full { files } => {
            *state = files.clone();
        }
        SnapshotContents::Differential { files, .. } => {
            for (path, entry) in files {
                state.insert(path.clone(), entry.clone());
            }
            // Touched but not stored means deleted in this version.
            for path in &snapshot.modified_files {
                if !files.contains_key(path) {
                    state.remove(path);
                }
            }
        }
    }
}
