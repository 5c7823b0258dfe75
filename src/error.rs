use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum InstallerError {
    #[error("unknown dataset: {0}")]
    #[diagnostic(help("run `varfish-installer download --help` for the list of datasets"))]
    UnknownDataset(String),

    #[error("dataset {0} is release-specific but no genome release was given")]
    MissingRelease(String),

    #[error("invalid genome release: {0}")]
    InvalidRelease(String),

    #[error("invalid version for dataset {dataset}: {message}")]
    InvalidVersion { dataset: String, message: String },

    #[error("missing config file varfish-installer.json in current directory")]
    MissingConfig,

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("failed to read manifest {0}")]
    ManifestRead(String),

    #[error("manifest line {line}: header must contain ':'")]
    ManifestHeader { line: usize },

    #[error("manifest line {line}: trailer must contain '## EOF SHA256='")]
    ManifestTrailer { line: usize },

    #[error("manifest line {line}: expected 4 comma-separated fields, found {found}")]
    ManifestFieldCount { line: usize, found: usize },

    #[error("manifest line {line}: invalid size {value:?}")]
    ManifestSize { line: usize, value: String },

    #[error("manifest line {line}: malformed {field} digest {value:?}")]
    ManifestDigest {
        line: usize,
        field: &'static str,
        value: String,
    },

    #[error("manifest lists {name} twice (line {first_line} as {first_name:?}, line {second_line} as {second_name:?})")]
    DuplicateEntry {
        name: String,
        first_name: String,
        first_line: usize,
        second_name: String,
        second_line: usize,
    },

    #[error("transfer failed: {0}")]
    TransferHttp(String),

    #[error("remote returned status {status}: {message}")]
    TransferStatus { status: u16, message: String },

    #[error("digest mismatch for {name}: expected {expected}, got {actual}")]
    DigestMismatch {
        name: String,
        expected: String,
        actual: String,
    },

    #[error("size mismatch for {name}: expected {expected} bytes, got {actual}")]
    SizeMismatch {
        name: String,
        expected: u64,
        actual: u64,
    },

    #[error("filesystem error: {0}")]
    Filesystem(String),
}

impl InstallerError {
    /// Configuration errors abort a whole run; everything else is scoped to one dataset.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            InstallerError::UnknownDataset(_)
                | InstallerError::MissingRelease(_)
                | InstallerError::InvalidRelease(_)
                | InstallerError::InvalidVersion { .. }
                | InstallerError::MissingConfig
                | InstallerError::ConfigRead(_)
                | InstallerError::ConfigParse(_)
        )
    }

    pub fn is_parse(&self) -> bool {
        matches!(
            self,
            InstallerError::ManifestRead(_)
                | InstallerError::ManifestHeader { .. }
                | InstallerError::ManifestTrailer { .. }
                | InstallerError::ManifestFieldCount { .. }
                | InstallerError::ManifestSize { .. }
                | InstallerError::ManifestDigest { .. }
        )
    }
}
