use std::fs;
use std::path::{Path, PathBuf};

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::domain::DatasetDescriptor;
use crate::error::InstallerError;
use crate::transfer::MANIFEST_FILE_NAME;

/// Layout of an installation below `base_dir`.
#[derive(Debug, Clone)]
pub struct Store {
    base_dir: Utf8PathBuf,
    static_infix: String,
}

impl Store {
    pub fn new(base_dir: Utf8PathBuf, static_infix: &str) -> Self {
        Self {
            base_dir,
            static_infix: static_infix.to_string(),
        }
    }

    pub fn static_root(&self) -> Utf8PathBuf {
        self.base_dir.join("volumes").join(&self.static_infix)
    }

    pub fn data_root(&self) -> Utf8PathBuf {
        self.static_root().join("data")
    }

    pub fn metadata_root(&self) -> Utf8PathBuf {
        self.static_root().join("metadata")
    }

    pub fn dataset_dir(&self, descriptor: &DatasetDescriptor) -> Utf8PathBuf {
        self.data_root()
            .join(descriptor.category.as_str())
            .join(descriptor.dir_name())
    }

    pub fn manifest_path(&self, descriptor: &DatasetDescriptor) -> Utf8PathBuf {
        self.dataset_dir(descriptor).join(MANIFEST_FILE_NAME)
    }

    pub fn metadata_path(&self, descriptor: &DatasetDescriptor) -> Utf8PathBuf {
        let file = match descriptor.release {
            Some(release) => format!("{}-{}.json", descriptor.dataset, release.path_component()),
            None => format!("{}.json", descriptor.dataset),
        };
        self.metadata_root().join(file)
    }

    pub fn ensure_dir(path: &Utf8Path) -> Result<(), InstallerError> {
        fs::create_dir_all(path.as_std_path())
            .map_err(|err| InstallerError::Filesystem(format!("create {path}: {err}")))
    }

    pub fn write_metadata(path: &Utf8Path, metadata: &Metadata) -> Result<(), InstallerError> {
        let content = serde_json::to_vec_pretty(metadata)
            .map_err(|err| InstallerError::Filesystem(err.to_string()))?;
        Self::write_bytes_atomic(path, &content)
    }

    pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), InstallerError> {
        if let Some(parent) = path.parent() {
            Self::ensure_dir(parent)?;
        }
        let tmp_path = path.with_extension("tmp");
        fs::write(tmp_path.as_std_path(), content)
            .map_err(|err| InstallerError::Filesystem(err.to_string()))?;
        fs::rename(tmp_path.as_std_path(), path.as_std_path())
            .map_err(|err| InstallerError::Filesystem(err.to_string()))?;
        Ok(())
    }

    /// Temporary file next to `dest`, so the final rename stays on one filesystem.
    pub fn temp_file_for(dest: &Path) -> Result<NamedTempFile, InstallerError> {
        let parent = dest
            .parent()
            .ok_or_else(|| InstallerError::Filesystem("invalid destination path".to_string()))?;
        fs::create_dir_all(parent).map_err(|err| InstallerError::Filesystem(err.to_string()))?;
        tempfile::Builder::new()
            .prefix(".varfish-installer")
            .tempfile_in(parent)
            .map_err(|err| InstallerError::Filesystem(err.to_string()))
    }

    /// Moves a verified temporary file over `dest`.
    pub fn persist(temp: NamedTempFile, dest: &Path) -> Result<(), InstallerError> {
        temp.persist(dest)
            .map_err(|err| InstallerError::Filesystem(format!("persist {}: {err}", dest.display())))?;
        Ok(())
    }

    pub fn list_metadata(&self) -> Result<Vec<Metadata>, InstallerError> {
        let root = self.metadata_root();
        if !root.as_std_path().exists() {
            return Ok(Vec::new());
        }
        let mut entries = Vec::new();
        for path in json_files(root.as_std_path())? {
            let content = fs::read_to_string(&path)
                .map_err(|err| InstallerError::Filesystem(err.to_string()))?;
            let metadata: Metadata = serde_json::from_str(&content)
                .map_err(|err| InstallerError::Filesystem(format!("{}: {err}", path.display())))?;
            entries.push(metadata);
        }
        entries.sort_by(|a, b| (&a.dataset, &a.release).cmp(&(&b.dataset, &b.release)));
        Ok(entries)
    }
}

/// Record written after a dataset was fully synchronized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub dataset: String,
    pub category: String,
    pub release: Option<String>,
    pub version: String,
    pub files: usize,
    pub bytes: u64,
    pub synced_at: String,
    pub tool: String,
    pub resolved_path: String,
}

fn json_files(root: &Path) -> Result<Vec<PathBuf>, InstallerError> {
    let entries = fs::read_dir(root).map_err(|err| InstallerError::Filesystem(err.to_string()))?;
    let mut files = Vec::new();
    for entry in entries {
        let path = entry
            .map_err(|err| InstallerError::Filesystem(err.to_string()))?
            .path();
        if path.is_file() && path.extension().map(|ext| ext == "json").unwrap_or(false) {
            files.push(path);
        }
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Dataset, GenomeRelease};

    #[test]
    fn layout_paths() {
        let store = Store::new(Utf8PathBuf::from(".prod"), "varfish-static");
        let descriptor = DatasetDescriptor::new(
            Dataset::AnnonarsGnomadExomes,
            Some(GenomeRelease::Grch37),
            "4.1+0.33.0",
        )
        .unwrap();

        let dir = store.dataset_dir(&descriptor);
        assert!(dir.ends_with("volumes/varfish-static/data/annonars/gnomad-exomes-grch37-4.1+0.33.0"));
        assert!(
            store
                .metadata_path(&descriptor)
                .ends_with("metadata/annonars-gnomad-exomes-grch37.json")
        );
        assert!(store.manifest_path(&descriptor).ends_with("MANIFEST.txt"));
    }
}
