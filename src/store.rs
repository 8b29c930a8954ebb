//! Persistent snapshot store.
//!
//! Two logical tables per project: version records (one file per version)
//! and a single version-index record. Both live under a sharded per-project
//! directory. A version record becomes visible only once the index names it,
//! so a `put_version` interrupted between the two writes leaves no partially
//! visible state.

use crate::error::{Result, SnapshotError};
use crate::types::{SnapshotVersionIndex, Version, VersionedSnapshot};
use fs2::FileExt;
use lru::LruCache;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

/// Magic bytes for the store manifest.
const STORE_MAGIC: &[u8; 4] = b"TLS\0";

/// Magic bytes for version record files.
const RECORD_MAGIC: &[u8; 4] = b"SNP\0";

/// Magic bytes for version index files.
const INDEX_MAGIC: &[u8; 4] = b"VIX\0";

/// Current on-disk format version.
const FORMAT_VERSION: u8 = 1;

/// Upper bound on a single payload; anything larger is treated as corruption.
const MAX_PAYLOAD_BYTES: u32 = 256 * 1024 * 1024;

/// Persistent, single-writer store for version records and version indexes.
pub struct SnapshotStore {
    /// Base path for the store.
    root: PathBuf,

    /// Lock file for exclusive access.
    _lock_file: File,

    /// Decoded snapshots, keyed by (project, version).
    cache: Mutex<LruCache<(String, Version), VersionedSnapshot>>,

    /// Serializes index read-modify-write cycles.
    write_lock: Mutex<()>,
}

impl SnapshotStore {
    /// Open an existing store or create a new one.
    pub fn open_or_create(root: impl AsRef<Path>, cache_size: usize) -> Result<Self> {
        let root = root.as_ref();
        if root.exists() {
            Self::open(root, cache_size)
        } else {
            Self::create(root, cache_size)
        }
    }

    /// Create a new store.
    pub fn create(root: impl AsRef<Path>, cache_size: usize) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(root.join("projects"))?;
        Self::write_manifest(&root)?;

        let lock_file = Self::acquire_lock(&root)?;
        Ok(Self::assemble(root, lock_file, cache_size))
    }

    /// Open an existing store.
    pub fn open(root: impl AsRef<Path>, cache_size: usize) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.exists() {
            return Err(SnapshotError::NotInitialized);
        }
        Self::verify_manifest(&root)?;

        let lock_file = Self::acquire_lock(&root)?;
        Ok(Self::assemble(root, lock_file, cache_size))
    }

    fn assemble(root: PathBuf, lock_file: File, cache_size: usize) -> Self {
        let cache_size = NonZeroUsize::new(cache_size.max(1)).unwrap();
        Self {
            root,
            _lock_file: lock_file,
            cache: Mutex::new(LruCache::new(cache_size)),
            write_lock: Mutex::new(()),
        }
    }

    /// Get the store path.
    pub fn path(&self) -> &Path {
        &self.root
    }

    // --- Version index ---

    /// Fetch a project's version index, if the project has any history.
    pub fn get_version_index(&self, project_id: &str) -> Result<Option<SnapshotVersionIndex>> {
        let path = self.index_path(project_id);
        match read_payload::<SnapshotVersionIndex>(&path, INDEX_MAGIC)? {
            Some(index) => Ok(Some(index)),
            None => Ok(None),
        }
    }

    /// Latest version number for a project, if any.
    pub fn latest_version(&self, project_id: &str) -> Result<Option<Version>> {
        Ok(self
            .get_version_index(project_id)?
            .map(|index| index.latest_version))
    }

    // --- Version records ---

    /// Fetch one version record.
    ///
    /// Only index-published versions are readable. A record file left behind
    /// by a `put_version` that failed before publishing its index entry is
    /// invisible here, so readers and the index never disagree.
    pub fn get_version(
        &self,
        project_id: &str,
        version: Version,
    ) -> Result<Option<VersionedSnapshot>> {
        let key = (project_id.to_string(), version);
        if let Some(snapshot) = self.cache.lock().get(&key) {
            return Ok(Some(snapshot.clone()));
        }

        let published = self
            .get_version_index(project_id)?
            .map(|index| index.entry(version).is_some())
            .unwrap_or(false);
        if !published {
            return Ok(None);
        }

        let path = self.record_path(project_id, version);
        match read_payload::<VersionedSnapshot>(&path, RECORD_MAGIC)? {
            Some(snapshot) => {
                self.cache.lock().put(key, snapshot.clone());
                Ok(Some(snapshot))
            }
            None => Ok(None),
        }
    }

    /// Persist a new version record and publish it in the index.
    ///
    /// The record file is written and synced first; the index is then
    /// replaced atomically. Versions must arrive in sequence: the snapshot's
    /// version must be exactly one past the index's latest.
    pub fn put_version(&self, snapshot: &VersionedSnapshot) -> Result<()> {
        let _guard = self.write_lock.lock();

        let project_id = snapshot.project_id.as_str();
        let mut index = self
            .get_version_index(project_id)?
            .unwrap_or_else(|| SnapshotVersionIndex::new(project_id));

        let expected = index.latest_version.next();
        if snapshot.version != expected {
            return Err(SnapshotError::VersionConflict {
                expected,
                got: snapshot.version,
            });
        }

        if let Some(baseline) = snapshot.baseline() {
            let baseline_is_full = index
                .entry(baseline)
                .map(|e| e.is_full_snapshot)
                .unwrap_or(false);
            if baseline > snapshot.version || !baseline_is_full {
                return Err(SnapshotError::Corruption(format!(
                    "differential version {} names baseline {} which is not a persisted full snapshot",
                    snapshot.version, baseline
                )));
            }
        }

        let dir = self.project_dir(project_id);
        fs::create_dir_all(&dir)?;

        write_payload(
            &self.record_path(project_id, snapshot.version),
            RECORD_MAGIC,
            snapshot,
        )?;

        index.record(snapshot);
        replace_payload(&self.index_path(project_id), INDEX_MAGIC, &index)?;

        self.cache
            .lock()
            .put((project_id.to_string(), snapshot.version), snapshot.clone());

        Ok(())
    }

    /// Delete every version record and the index for a project.
    ///
    /// A project with no persisted history is not an error; there is simply
    /// nothing to delete.
    pub fn delete_project(&self, project_id: &str) -> Result<()> {
        let _guard = self.write_lock.lock();

        let mut cache = self.cache.lock();
        let stale: Vec<(String, Version)> = cache
            .iter()
            .filter(|((project, _), _)| project == project_id)
            .map(|(key, _)| key.clone())
            .collect();
        for key in stale {
            cache.pop(&key);
        }
        drop(cache);

        match fs::remove_dir_all(self.project_dir(project_id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Paths touched by the most recent version, for change badges.
    pub fn list_changed_paths(&self, project_id: &str) -> Result<BTreeSet<String>> {
        let index = match self.get_version_index(project_id)? {
            Some(index) => index,
            None => return Ok(BTreeSet::new()),
        };

        match self.get_version(project_id, index.latest_version)? {
            Some(snapshot) => Ok(snapshot.modified_files),
            None => Ok(BTreeSet::new()),
        }
    }

    // --- Layout ---

    fn project_dir(&self, project_id: &str) -> PathBuf {
        let digest = hex::encode(Sha256::digest(project_id.as_bytes()));
        self.root
            .join("projects")
            .join(&digest[..2])
            .join(digest)
    }

    fn record_path(&self, project_id: &str, version: Version) -> PathBuf {
        self.project_dir(project_id)
            .join(format!("v{:08}.snap", version.0))
    }

    fn index_path(&self, project_id: &str) -> PathBuf {
        self.project_dir(project_id).join("index.bin")
    }

    // --- Manifest and lock ---

    fn write_manifest(root: &Path) -> Result<()> {
        let mut file = File::create(root.join("MANIFEST"))?;
        file.write_all(STORE_MAGIC)?;
        file.write_all(&[FORMAT_VERSION])?;
        file.sync_all()?;
        Ok(())
    }

    fn verify_manifest(root: &Path) -> Result<()> {
        let mut file = File::open(root.join("MANIFEST"))?;

        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        if &magic != STORE_MAGIC {
            return Err(SnapshotError::InvalidFormat("Invalid store magic".into()));
        }

        let mut version = [0u8; 1];
        file.read_exact(&mut version)?;
        if version[0] != FORMAT_VERSION {
            return Err(SnapshotError::InvalidFormat(format!(
                "Unsupported store version: {}",
                version[0]
            )));
        }

        Ok(())
    }

    fn acquire_lock(root: &Path) -> Result<File> {
        let lock_file = File::create(root.join("LOCK"))?;
        lock_file
            .try_lock_exclusive()
            .map_err(|_| SnapshotError::Locked)?;
        Ok(lock_file)
    }
}

// --- Payload framing ---

fn encode_payload<T: Serialize>(magic: &[u8; 4], value: &T) -> Result<Vec<u8>> {
    let payload = rmp_serde::to_vec(value)?;
    let mut buf = Vec::with_capacity(payload.len() + 13);
    buf.extend_from_slice(magic);
    buf.push(FORMAT_VERSION);
    buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    buf.extend_from_slice(&payload);
    buf.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
    Ok(buf)
}

fn write_payload<T: Serialize>(path: &Path, magic: &[u8; 4], value: &T) -> Result<()> {
    let buf = encode_payload(magic, value)?;
    let mut file = File::create(path)?;
    file.write_all(&buf)?;
    file.sync_all()?;
    Ok(())
}

/// Atomically replace a payload file via a temp file and rename.
fn replace_payload<T: Serialize>(path: &Path, magic: &[u8; 4], value: &T) -> Result<()> {
    let buf = encode_payload(magic, value)?;
    let tmp_path = path.with_extension("tmp");

    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&tmp_path)?;
    file.write_all(&buf)?;
    file.sync_all()?;
    drop(file);

    fs::rename(&tmp_path, path)?;
    Ok(())
}

fn read_payload<T: DeserializeOwned>(path: &Path, magic: &[u8; 4]) -> Result<Option<T>> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let mut header_magic = [0u8; 4];
    file.read_exact(&mut header_magic)?;
    if &header_magic != magic {
        return Err(SnapshotError::InvalidFormat("Invalid payload magic".into()));
    }

    let mut version = [0u8; 1];
    file.read_exact(&mut version)?;
    if version[0] != FORMAT_VERSION {
        return Err(SnapshotError::InvalidFormat(format!(
            "Unsupported payload version: {}",
            version[0]
        )));
    }

    let mut len_bytes = [0u8; 4];
    file.read_exact(&mut len_bytes)?;
    let len = u32::from_le_bytes(len_bytes);
    if len > MAX_PAYLOAD_BYTES {
        return Err(SnapshotError::Corruption("payload too large".into()));
    }

    let mut payload = vec![0u8; len as usize];
    file.read_exact(&mut payload)?;

    let mut checksum_bytes = [0u8; 4];
    file.read_exact(&mut checksum_bytes)?;
    let stored = u32::from_le_bytes(checksum_bytes);
    let computed = crc32fast::hash(&payload);
    if stored != computed {
        return Err(SnapshotError::ChecksumMismatch {
            expected: stored,
            got: computed,
        });
    }

    Ok(Some(rmp_serde::from_slice(&payload)?))
}
