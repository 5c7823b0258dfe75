//! Observed state of a destination directory.
//!
//! Sizes are cheap and listed up front; digests are computed only when asked.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use crate::digest;
use crate::error::InstallerError;
use crate::reconcile::local_name;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObservedFile {
    pub size: u64,
}

pub trait LocalState {
    /// Size of the file recorded under `name`, `None` if absent.
    fn observe(&self, name: &str) -> Option<ObservedFile>;
    /// SHA-256 of the file recorded under `name`. Expensive.
    fn digest(&self, name: &str) -> Result<String, InstallerError>;
    /// Every file name present, in any order.
    fn names(&self) -> Vec<String>;
}

/// Files below a root directory, keyed by their `/`-separated relative path.
#[derive(Debug, Clone)]
pub struct DirectoryState {
    root: PathBuf,
    files: BTreeMap<String, ObservedFile>,
}

impl DirectoryState {
    /// Lists `root` recursively. A missing root is an empty state.
    pub fn scan(root: &Path) -> Result<Self, InstallerError> {
        let mut files = BTreeMap::new();
        if root.exists() {
            for path in walk_files(root)? {
                let relative = path
                    .strip_prefix(root)
                    .map_err(|err| InstallerError::Filesystem(err.to_string()))?;
                let name = relative
                    .components()
                    .map(|part| part.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                let size = fs::metadata(&path)
                    .map_err(|err| InstallerError::Filesystem(err.to_string()))?
                    .len();
                files.insert(name, ObservedFile { size });
            }
        }
        Ok(Self {
            root: root.to_path_buf(),
            files,
        })
    }

    /// Drops `name` from the listing, for bookkeeping files that live next to the data.
    pub fn without(mut self, name: &str) -> Self {
        self.files.remove(name);
        self
    }
}

impl LocalState for DirectoryState {
    fn observe(&self, name: &str) -> Option<ObservedFile> {
        self.files.get(local_name(name)).copied()
    }

    fn digest(&self, name: &str) -> Result<String, InstallerError> {
        digest::sha256_file(&self.root.join(local_name(name)))
    }

    fn names(&self) -> Vec<String> {
        self.files.keys().cloned().collect()
    }
}

/// In-memory state with digests known up front.
#[derive(Debug, Clone, Default)]
pub struct SnapshotState {
    files: BTreeMap<String, (u64, String)>,
}

impl SnapshotState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, name: &str, size: u64, sha256: &str) -> Self {
        self.insert(name, size, sha256);
        self
    }

    pub fn insert(&mut self, name: &str, size: u64, sha256: &str) {
        self.files
            .insert(name.to_string(), (size, sha256.to_string()));
    }
}

impl LocalState for SnapshotState {
    fn observe(&self, name: &str) -> Option<ObservedFile> {
        self.files.get(name).map(|(size, _)| ObservedFile { size: *size })
    }

    fn digest(&self, name: &str) -> Result<String, InstallerError> {
        self.files
            .get(name)
            .map(|(_, digest)| digest.clone())
            .ok_or_else(|| InstallerError::Filesystem(format!("no such file: {name}")))
    }

    fn names(&self) -> Vec<String> {
        self.files.keys().cloned().collect()
    }
}

/// Wraps another state and answers digests for files already verified earlier in the run.
/// Sizes still come from the inner state, so a file that changed length is caught.
pub struct VerifiedState<'a> {
    inner: &'a dyn LocalState,
    known: HashMap<String, String>,
}

impl<'a> VerifiedState<'a> {
    pub fn new(inner: &'a dyn LocalState) -> Self {
        Self {
            inner,
            known: HashMap::new(),
        }
    }

    pub fn with_digest(mut self, name: &str, sha256: &str) -> Self {
        self.known
            .insert(local_name(name).to_string(), sha256.to_string());
        self
    }
}

impl LocalState for VerifiedState<'_> {
    fn observe(&self, name: &str) -> Option<ObservedFile> {
        self.inner.observe(name)
    }

    fn digest(&self, name: &str) -> Result<String, InstallerError> {
        match self.known.get(local_name(name)) {
            Some(sha256) => Ok(sha256.clone()),
            None => self.inner.digest(name),
        }
    }

    fn names(&self) -> Vec<String> {
        self.inner.names()
    }
}

fn walk_files(root: &Path) -> Result<Vec<PathBuf>, InstallerError> {
    let mut items = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(path) = stack.pop() {
        let entries = fs::read_dir(&path).map_err(|err| InstallerError::Filesystem(err.to_string()))?;
        for entry in entries {
            let entry = entry.map_err(|err| InstallerError::Filesystem(err.to_string()))?;
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else {
                items.push(path);
            }
        }
    }
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_lists_nested_files() {
        let temp = tempfile::tempdir().unwrap();
        fs::create_dir_all(temp.path().join("rocksdb")).unwrap();
        fs::write(temp.path().join("rocksdb/000001.sst"), b"12345").unwrap();
        fs::write(temp.path().join("spec.yaml"), b"x").unwrap();

        let state = DirectoryState::scan(temp.path()).unwrap();
        assert_eq!(state.names(), vec!["rocksdb/000001.sst", "spec.yaml"]);
        assert_eq!(state.observe("rocksdb/000001.sst"), Some(ObservedFile { size: 5 }));
        assert_eq!(
            state.digest("spec.yaml").unwrap(),
            digest::sha256_hex(b"x")
        );
    }

    #[test]
    fn verified_digests_skip_the_disk() {
        let temp = tempfile::tempdir().unwrap();
        fs::write(temp.path().join("old.bin"), b"old").unwrap();
        fs::write(temp.path().join("new.bin"), b"new").unwrap();
        let scanned = DirectoryState::scan(temp.path()).unwrap();

        let state = VerifiedState::new(&scanned).with_digest("./old.bin", "recorded");
        fs::remove_file(temp.path().join("old.bin")).unwrap();

        assert_eq!(state.digest("old.bin").unwrap(), "recorded");
        assert_eq!(state.observe("old.bin"), Some(ObservedFile { size: 3 }));
        assert_eq!(state.digest("new.bin").unwrap(), digest::sha256_hex(b"new"));
        assert_eq!(state.names(), vec!["new.bin", "old.bin"]);
    }

    #[test]
    fn missing_root_is_empty() {
        let temp = tempfile::tempdir().unwrap();
        let state = DirectoryState::scan(&temp.path().join("absent")).unwrap();
        assert!(state.names().is_empty());
    }
}
