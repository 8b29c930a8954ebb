//! Error handling and corruption recovery tests.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use treeline::{
    ChangeType, EngineConfig, FileMap, FileTreeEntry, NullDirectory, ProjectDirectory,
    ProjectRecord, Result, SnapshotEngine, SnapshotError, SnapshotPolicy, SnapshotStore, Version,
};

fn test_engine(dir: &TempDir) -> SnapshotEngine {
    SnapshotEngine::open_or_create(
        EngineConfig {
            path: dir.path().join("store"),
            policy: SnapshotPolicy::default(),
            snapshot_cache_size: 100,
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

/// Locate a store file by name, wherever the sharded layout put it.
fn find_file(root: &Path, name: &str) -> Option<PathBuf> {
    for entry in fs::read_dir(root).ok()? {
        let path = entry.ok()?.path();
        if path.is_dir() {
            if let Some(found) = find_file(&path, name) {
                return Some(found);
            }
        } else if path.file_name().and_then(|n| n.to_str()) == Some(name) {
            return Some(path);
        }
    }
    None
}

// --- Broken Chains ---

#[tokio::test]
async fn test_missing_baseline_is_broken_chain() {
    let dir = TempDir::new().unwrap();

    {
        let engine = test_engine(&dir);
        engine
            .capture_now("proj", one_file("v1"), ChangeType::Upload)
            .await
            .unwrap();
        engine
            .capture_now("proj", one_file("v2"), ChangeType::UserEdit)
            .await
            .unwrap();
    }

    // Remove the baseline full snapshot from disk.
    let baseline = find_file(&dir.path().join("store"), "v00000001.snap").unwrap();
    fs::remove_file(baseline).unwrap();

    let engine = test_engine(&dir);
    let result = engine.reconstruct_full_snapshot("proj", Version(2)).await;
    assert!(matches!(
        result,
        Err(SnapshotError::BrokenChain {
            version: Version(2),
            missing: Version(1),
        })
    ));
}

#[tokio::test]
async fn test_missing_intermediate_is_broken_chain() {
    let dir = TempDir::new().unwrap();

    {
        let engine = test_engine(&dir);
        for content in ["v1", "v2", "v3"] {
            engine
                .capture_now("proj", one_file(content), ChangeType::UserEdit)
                .await
                .unwrap();
        }
    }

    let intermediate = find_file(&dir.path().join("store"), "v00000002.snap").unwrap();
    fs::remove_file(intermediate).unwrap();

    let engine = test_engine(&dir);

    // The target past the gap fails; nothing partial comes back.
    let result = engine.reconstruct_full_snapshot("proj", Version(3)).await;
    assert!(matches!(
        result,
        Err(SnapshotError::BrokenChain {
            version: Version(3),
            missing: Version(2),
        })
    ));

    // Versions before the gap are still readable.
    let state = engine
        .reconstruct_full_snapshot("proj", Version(1))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(state, one_file("v1"));
}

#[tokio::test]
async fn test_corrupt_record_surfaces_through_reconstruction() {
    let dir = TempDir::new().unwrap();

    {
        let engine = test_engine(&dir);
        engine
            .capture_now("proj", one_file("v1"), ChangeType::Upload)
            .await
            .unwrap();
        engine
            .capture_now("proj", one_file("v2"), ChangeType::UserEdit)
            .await
            .unwrap();
    }

    let baseline = find_file(&dir.path().join("store"), "v00000001.snap").unwrap();
    let mut bytes = fs::read(&baseline).unwrap();
    let mid = bytes.len() / 2;
    bytes[mid] ^= 0xFF;
    fs::write(&baseline, bytes).unwrap();

    let engine = test_engine(&dir);
    let result = engine.reconstruct_full_snapshot("proj", Version(2)).await;
    assert!(matches!(
        result,
        Err(SnapshotError::ChecksumMismatch { .. })
    ));
}

// --- Store-Level Validation ---

#[test]
fn test_version_conflict_on_out_of_sequence_put() {
    use std::collections::BTreeSet;
    use treeline::{SnapshotContents, Timestamp, VersionedSnapshot};

    let dir = TempDir::new().unwrap();
    let store = SnapshotStore::create(dir.path().join("store"), 100).unwrap();

    let make = |version: u32| VersionedSnapshot {
        project_id: "proj".into(),
        version: Version(version),
        timestamp: Timestamp::now(),
        change_type: ChangeType::UserEdit,
        contents: SnapshotContents::Full {
            files: one_file("x"),
        },
        modified_files: BTreeSet::new(),
        previous: Version(version).prev(),
    };

    store.put_version(&make(1)).unwrap();
    let result = store.put_version(&make(5));
    assert!(matches!(
        result,
        Err(SnapshotError::VersionConflict {
            expected: Version(2),
            got: Version(5),
        })
    ));
}

#[test]
fn test_second_open_fails_while_locked() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("store");

    let _held = SnapshotStore::create(&path, 100).unwrap();
    let result = SnapshotStore::open(&path, 100);
    assert!(matches!(result, Err(SnapshotError::Locked)));
}

#[test]
fn test_open_missing_store_fails() {
    let dir = TempDir::new().unwrap();
    let result = SnapshotStore::open(dir.path().join("nowhere"), 100);
    assert!(matches!(result, Err(SnapshotError::NotInitialized)));
}

#[test]
fn test_mangled_manifest_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("store");

    drop(SnapshotStore::create(&path, 100).unwrap());
    fs::write(path.join("MANIFEST"), b"not a manifest").unwrap();

    let result = SnapshotStore::open(&path, 100);
    assert!(matches!(result, Err(SnapshotError::InvalidFormat(_))));
}

// --- Identity Degradation ---

struct FailingDirectory;

#[async_trait::async_trait]
impl ProjectDirectory for FailingDirectory {
    async fn lookup_alias(&self, _mixed_id: &str) -> Result<Option<ProjectRecord>> {
        Err(SnapshotError::NotInitialized)
    }
}

#[tokio::test]
async fn test_identity_lookup_failure_does_not_block_capture() {
    let dir = TempDir::new().unwrap();
    let engine = SnapshotEngine::open_or_create(
        EngineConfig {
            path: dir.path().join("store"),
            policy: SnapshotPolicy::default(),
            snapshot_cache_size: 100,
        },
        Arc::new(FailingDirectory),
    )
    .unwrap();

    let snapshot = engine
        .capture_now("proj", one_file("x"), ChangeType::Upload)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(snapshot.project_id, "proj");

    // The same degraded id reads back its own history.
    let index = engine.get_snapshot_versions("proj").await.unwrap().unwrap();
    assert_eq!(index.latest_version, Version(1));
}

// --- Deletion Edge Cases ---

#[tokio::test]
async fn test_delete_unknown_project_is_noop() {
    let dir = TempDir::new().unwrap();
    let engine = test_engine(&dir);
    engine.delete_project_history("never-captured").await.unwrap();
}
