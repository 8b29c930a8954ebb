//! File map diff engine.
//!
//! Pure comparison of two file trees. The result drives both differential
//! snapshot assembly and the human-readable change lists in history views.

use crate::types::{FileMap, FileTreeEntry};
use std::collections::BTreeSet;

/// How a path changed between two trees.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Modified,
    Deleted,
}

/// One changed path, with whichever file contents were present on each side.
///
/// Folders carry no content, so `old_content`/`new_content` are `None` for
/// folder entries. A file-to-folder (or folder-to-file) type change is
/// reported as `Modified`, capturing the content of whichever side is a file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileChange {
    pub path: String,
    pub kind: ChangeKind,
    pub old_content: Option<String>,
    pub new_content: Option<String>,
}

/// Compare two file trees and list every added, modified, or deleted path.
///
/// Identical files and folder-to-folder pairs produce no entry. Callers must
/// not rely on the ordering of the returned list.
pub fn diff(old: &FileMap, new: &FileMap) -> Vec<FileChange> {
    let paths: BTreeSet<&String> = old.keys().chain(new.keys()).collect();

    let mut changes = Vec::new();
    for path in paths {
        match (old.get(path), new.get(path)) {
            (None, Some(entry)) => changes.push(FileChange {
                path: path.clone(),
                kind: ChangeKind::Added,
                old_content: None,
                new_content: entry.content().map(str::to_owned),
            }),
            (Some(entry), None) => changes.push(FileChange {
                path: path.clone(),
                kind: ChangeKind::Deleted,
                old_content: entry.content().map(str::to_owned),
                new_content: None,
            }),
            (Some(old_entry), Some(new_entry)) => {
                if entries_equal(old_entry, new_entry) {
                    continue;
                }
                changes.push(FileChange {
                    path: path.clone(),
                    kind: ChangeKind::Modified,
                    old_content: old_entry.content().map(str::to_owned),
                    new_content: new_entry.content().map(str::to_owned),
                });
            }
            (None, None) => unreachable!("path came from the union of both key sets"),
        }
    }

    changes
}

fn entries_equal(old: &FileTreeEntry, new: &FileTreeEntry) -> bool {
    match (old, new) {
        (FileTreeEntry::Folder, FileTreeEntry::Folder) => true,
        (
            FileTreeEntry::File {
                content: old_content,
                is_binary: old_binary,
            },
            FileTreeEntry::File {
                content: new_content,
                is_binary: new_binary,
            },
        ) => old_content == new_content && old_binary == new_binary,
        _ => false,
    }
}
