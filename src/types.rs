//! Core types for the snapshot engine.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Root directory all project paths are anchored under.
pub const WORK_DIR: &str = "/home/project";

/// Strip the work-directory prefix from a path for display.
///
/// Paths that do not start with [`WORK_DIR`] are returned unchanged.
pub fn work_relative(path: &str) -> &str {
    path.strip_prefix(WORK_DIR)
        .map(|rest| rest.strip_prefix('/').unwrap_or(rest))
        .unwrap_or(path)
}

/// Version number of a snapshot within a project (1-based, gap-free).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Version(pub u32);

impl Version {
    /// The first version of any project.
    pub const FIRST: Version = Version(1);

    pub fn next(self) -> Self {
        Version(self.0 + 1)
    }

    pub fn prev(self) -> Option<Self> {
        if self.0 > 1 {
            Some(Version(self.0 - 1))
        } else {
            None
        }
    }
}

impl fmt::Debug for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Version({})", self.0)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Microseconds since Unix epoch.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Current time.
    pub fn now() -> Self {
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("Time went backwards");
        Timestamp(duration.as_micros() as i64)
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

/// One entry in a project's file tree.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileTreeEntry {
    File { content: String, is_binary: bool },
    Folder,
}

impl FileTreeEntry {
    /// Convenience constructor for a text file.
    pub fn text(content: impl Into<String>) -> Self {
        FileTreeEntry::File {
            content: content.into(),
            is_binary: false,
        }
    }

    pub fn is_file(&self) -> bool {
        matches!(self, FileTreeEntry::File { .. })
    }

    /// File content, if this entry is a file.
    pub fn content(&self) -> Option<&str> {
        match self {
            FileTreeEntry::File { content, .. } => Some(content),
            FileTreeEntry::Folder => None,
        }
    }
}

/// A complete or partial file tree: normalized path -> entry.
pub type FileMap = BTreeMap<String, FileTreeEntry>;

/// Why a snapshot was taken. Audit/filtering only; reconstruction ignores it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeType {
    Initial,
    Upload,
    AiResponse,
    UserEdit,
}

/// How a snapshot stores its file tree.
///
/// A full snapshot carries the entire tree. A differential snapshot carries
/// only the entries added or modified since the previous version; deleted
/// paths appear in the snapshot's `modified_files` but never in `files`.
/// The baseline is the nearest full snapshot at or before this version.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SnapshotContents {
    Full { files: FileMap },
    Differential { files: FileMap, baseline: Version },
}

/// One immutable version of one project's file tree.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionedSnapshot {
    /// Canonical project id.
    pub project_id: String,

    /// Position in the project's history (1-based, gap-free).
    pub version: Version,

    /// When the snapshot was taken.
    pub timestamp: Timestamp,

    /// Why the snapshot was taken.
    pub change_type: ChangeType,

    /// Full tree or differential payload.
    pub contents: SnapshotContents,

    /// Paths touched in this version: added, modified, or deleted.
    pub modified_files: BTreeSet<String>,

    /// Immediately preceding version, for audit chains.
    pub previous: Option<Version>,
}

impl VersionedSnapshot {
    pub fn is_full(&self) -> bool {
        matches!(self.contents, SnapshotContents::Full { .. })
    }

    /// The stored file entries (entire tree if full, added/modified only if
    /// differential).
    pub fn files(&self) -> &FileMap {
        match &self.contents {
            SnapshotContents::Full { files } => files,
            SnapshotContents::Differential { files, .. } => files,
        }
    }

    /// Baseline full-snapshot version, present only on differentials.
    pub fn baseline(&self) -> Option<Version> {
        match &self.contents {
            SnapshotContents::Full { .. } => None,
            SnapshotContents::Differential { baseline, .. } => Some(*baseline),
        }
    }

    /// Derived storage identifier for this version record.
    pub fn record_id(&self) -> String {
        snapshot_record_id(&self.project_id, self.version)
    }
}

/// Derived storage identifier for a version record.
pub fn snapshot_record_id(project_id: &str, version: Version) -> String {
    format!("{}-{}", project_id, version)
}

/// Index entry describing one persisted version.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionIndexEntry {
    pub version: Version,
    pub timestamp: Timestamp,
    pub change_type: ChangeType,
    pub is_full_snapshot: bool,
    pub snapshot_record_id: String,
}

/// Per-project version index: every version plus the latest version number.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotVersionIndex {
    pub project_id: String,
    pub latest_version: Version,
    /// Sorted ascending by version.
    pub versions: Vec<VersionIndexEntry>,
}

impl SnapshotVersionIndex {
    /// Empty index for a project that has no versions yet.
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            latest_version: Version(0),
            versions: Vec::new(),
        }
    }

    /// Append an entry for a new version, bump `latest_version`, keep sorted.
    pub fn record(&mut self, snapshot: &VersionedSnapshot) {
        self.versions.push(VersionIndexEntry {
            version: snapshot.version,
            timestamp: snapshot.timestamp,
            change_type: snapshot.change_type,
            is_full_snapshot: snapshot.is_full(),
            snapshot_record_id: snapshot.record_id(),
        });
        self.versions.sort_by_key(|e| e.version);
        self.latest_version = self.latest_version.max(snapshot.version);
    }

    pub fn entry(&self, version: Version) -> Option<&VersionIndexEntry> {
        self.versions.iter().find(|e| e.version == version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(version: u32) -> VersionedSnapshot {
        VersionedSnapshot {
            project_id: "proj".into(),
            version: Version(version),
            timestamp: Timestamp(0),
            change_type: ChangeType::UserEdit,
            contents: SnapshotContents::Full {
                files: FileMap::new(),
            },
            modified_files: BTreeSet::new(),
            previous: version.checked_sub(1).filter(|v| *v > 0).map(Version),
        }
    }

    #[test]
    fn test_version_navigation() {
        assert_eq!(Version(1).next(), Version(2));
        assert_eq!(Version(2).prev(), Some(Version(1)));
        assert_eq!(Version(1).prev(), None);
    }

    #[test]
    fn test_record_id_format() {
        assert_eq!(snapshot(3).record_id(), "proj-3");
        assert_eq!(snapshot_record_id("p", Version(10)), "p-10");
    }

    #[test]
    fn test_index_record_keeps_sorted() {
        let mut index = SnapshotVersionIndex::new("proj");
        index.record(&snapshot(2));
        index.record(&snapshot(1));
        index.record(&snapshot(3));

        let versions: Vec<u32> = index.versions.iter().map(|e| e.version.0).collect();
        assert_eq!(versions, vec![1, 2, 3]);
        assert_eq!(index.latest_version, Version(3));
        assert!(index.entry(Version(2)).is_some());
        assert!(index.entry(Version(9)).is_none());
    }

    #[test]
    fn test_work_relative() {
        assert_eq!(work_relative("/home/project/src/main.rs"), "src/main.rs");
        assert_eq!(work_relative("/elsewhere/a.txt"), "/elsewhere/a.txt");
    }

    #[test]
    fn test_contents_serialized_shape() {
        // The variant tag distinguishes full from differential on the wire;
        // a full snapshot must not carry a baseline field.
        let full = serde_json::to_value(SnapshotContents::Full {
            files: FileMap::new(),
        })
        .unwrap();
        assert!(full.get("Full").is_some());

        let diff = serde_json::to_value(SnapshotContents::Differential {
            files: FileMap::new(),
            baseline: Version(3),
        })
        .unwrap();
        assert_eq!(diff["Differential"]["baseline"], 3);
    }

    #[test]
    fn test_contents_accessors() {
        let full = snapshot(1);
        assert!(full.is_full());
        assert_eq!(full.baseline(), None);

        let diff = VersionedSnapshot {
            contents: SnapshotContents::Differential {
                files: FileMap::new(),
                baseline: Version(1),
            },
            ..snapshot(2)
        };
        assert!(!diff.is_full());
        assert_eq!(diff.baseline(), Some(Version(1)));
    }
}
