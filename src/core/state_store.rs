//! Durable set of processed release locators.
//!
//! Stored as a single JSON array of strings. The whole set is rewritten on
//! every commit through a temp file in the same directory followed by a
//! rename, so a crash mid-write leaves either the old or the new file.
//!
//! An unreadable state file is an error, never an empty set: resetting
//! would make the next cycle reprocess the whole feed.

use std::collections::BTreeSet;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::debug;

/// Errors that can occur with the state store
#[derive(Debug, Error)]
pub enum StateStoreError {
    #[error("State file {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("State file {0} is locked by another process")]
    Locked(PathBuf),

    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StateStoreError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Processed-locator store, owned by the scheduler
pub struct StateStore {
    /// Path to the JSON state file
    path: PathBuf,

    /// Locators already delivered
    processed: BTreeSet<String>,

    /// Advisory lock held for the lifetime of the store
    _lock: File,
}

impl StateStore {
    /// Lock and load the store at `path`.
    ///
    /// A missing file yields an empty set; the file is only created by the
    /// first commit.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StateStoreError> {
        let path = path.into();
        let lock_path = lock_path_for(&path);

        if let Some(parent) = non_empty_parent(&path) {
            std::fs::create_dir_all(parent).map_err(|e| StateStoreError::io(parent, e))?;
        }

        let lock = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&lock_path)
            .map_err(|e| StateStoreError::io(&lock_path, e))?;

        match lock.try_lock_exclusive() {
            Ok(()) => {}
            Err(e) if e.raw_os_error() == fs2::lock_contended_error().raw_os_error() => {
                return Err(StateStoreError::Locked(path));
            }
            Err(e) => return Err(StateStoreError::io(&lock_path, e)),
        }

        let processed = Self::load(&path)?;
        debug!(path = %path.display(), count = processed.len(), "Loaded state file");

        Ok(Self {
            path,
            processed,
            _lock: lock,
        })
    }

    /// Read the set stored at `path` without locking
    pub fn load(path: &Path) -> Result<BTreeSet<String>, StateStoreError> {
        let content = match std::fs::read(path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(BTreeSet::new()),
            Err(e) => return Err(StateStoreError::io(path, e)),
        };

        serde_json::from_slice::<Vec<String>>(&content)
            .map(|locators| locators.into_iter().collect())
            .map_err(|source| StateStoreError::Corrupt {
                path: path.to_path_buf(),
                source,
            })
    }

    /// Path to the state file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether `locator` has already been delivered
    pub fn contains(&self, locator: &str) -> bool {
        self.processed.contains(locator)
    }

    /// Number of processed locators
    pub fn len(&self) -> usize {
        self.processed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processed.is_empty()
    }

    /// Rewrite the state file with the current set
    pub fn commit(&self) -> Result<(), StateStoreError> {
        let dir = non_empty_parent(&self.path).unwrap_or(Path::new("."));
        let json = serde_json::to_vec(&self.processed)?;

        let mut tmp = NamedTempFile::new_in(dir).map_err(|e| StateStoreError::io(dir, e))?;
        tmp.write_all(&json)
            .and_then(|_| tmp.as_file().sync_all())
            .map_err(|e| StateStoreError::io(tmp.path(), e))?;
        tmp.persist(&self.path)
            .map_err(|e| StateStoreError::io(&self.path, e.error))?;

        Ok(())
    }

    /// Record a delivered locator and persist immediately.
    ///
    /// Returns false if it was already present (no write happens then).
    pub fn insert_and_commit(&mut self, locator: &str) -> Result<bool, StateStoreError> {
        if !self.processed.insert(locator.to_string()) {
            return Ok(false);
        }

        if let Err(e) = self.commit() {
            // Keep memory consistent with disk
            self.processed.remove(locator);
            return Err(e);
        }

        Ok(true)
    }
}

fn lock_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".lock");
    path.with_file_name(name)
}

fn non_empty_parent(path: &Path) -> Option<&Path> {
    path.parent().filter(|p| !p.as_os_str().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_is_empty() {
        let temp = TempDir::new().unwrap();
        let store = StateStore::open(temp.path().join("downloaded.json")).unwrap();
        assert!(store.is_empty());
        // Nothing written until the first commit
        assert!(!store.path().exists());
    }

    #[test]
    fn test_insert_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let mut store = StateStore::open(temp.path().join("downloaded.json")).unwrap();

        assert!(store.insert_and_commit("magnet:?xt=a").unwrap());
        assert!(!store.insert_and_commit("magnet:?xt=a").unwrap());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_file_is_plain_json_array() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("downloaded.json");
        let mut store = StateStore::open(&path).unwrap();
        store.insert_and_commit("b").unwrap();
        store.insert_and_commit("a").unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert_eq!(raw, r#"["a","b"]"#);
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("downloaded.json");
        std::fs::write(&path, "{not json").unwrap();

        let err = StateStore::open(&path).err().unwrap();
        assert!(matches!(err, StateStoreError::Corrupt { .. }));
    }

    #[test]
    fn test_wrong_shape_is_an_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("downloaded.json");
        std::fs::write(&path, r#"{"a": 1}"#).unwrap();

        assert!(matches!(
            StateStore::load(&path),
            Err(StateStoreError::Corrupt { .. })
        ));
    }

    #[test]
    fn test_second_writer_is_locked_out() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("downloaded.json");

        let _first = StateStore::open(&path).unwrap();
        let second = StateStore::open(&path);
        assert!(matches!(second, Err(StateStoreError::Locked(_))));
    }

    #[test]
    fn test_lock_path() {
        assert_eq!(
            lock_path_for(Path::new("state/downloaded.json")),
            PathBuf::from("state/downloaded.json.lock")
        );
    }
}
