//! Parser for hashdeep-style audit manifests.
//!
//! A manifest looks like this:
//!
//! ```text
//! hashdeep:/data
//! %%%% size,md5,sha256,filename
//! ## Invoked from: /data
//! 10,<md5>,<sha256>,file1
//! 20,<md5>,<sha256>,file2
//! ## EOF SHA256=<sha256 of the preceding lines>
//! ```
//!
//! The first line is always the header. Entry lines are strict, everything
//! starting with `##` or `%%%%` is skipped.

use std::fmt;
use std::fs;
use std::io::Read;
use std::path::PathBuf;

use regex::Regex;
use serde::Serialize;
use tracing::{debug, warn};

use crate::digest;
use crate::error::InstallerError;

const TRAILER_PREFIX: &str = "## EOF";
const TRAILER_MARKER: &str = "## EOF SHA256=";

/// One expected file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ManifestEntry {
    pub size: u64,
    pub md5: String,
    pub sha256: String,
    pub name: String,
}

impl ManifestEntry {
    /// Re-renders the entry as its manifest line.
    pub fn to_line(&self) -> String {
        format!("{},{},{},{}", self.size, self.md5, self.sha256, self.name)
    }
}

/// Where the manifest text comes from.
pub enum ManifestSource {
    Path(PathBuf),
    Stream(Box<dyn Read + Send>),
}

impl ManifestSource {
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        ManifestSource::Path(path.into())
    }

    pub fn from_reader<R: Read + Send + 'static>(reader: R) -> Self {
        ManifestSource::Stream(Box::new(reader))
    }

    fn describe(&self) -> String {
        match self {
            ManifestSource::Path(path) => path.display().to_string(),
            ManifestSource::Stream(_) => "<stream>".to_string(),
        }
    }

    fn read_to_string(self) -> Result<String, InstallerError> {
        let label = self.describe();
        match self {
            ManifestSource::Path(path) => fs::read_to_string(&path)
                .map_err(|err| InstallerError::ManifestRead(format!("{label}: {err}"))),
            ManifestSource::Stream(mut reader) => {
                let mut content = String::new();
                reader
                    .read_to_string(&mut content)
                    .map_err(|err| InstallerError::ManifestRead(format!("{label}: {err}")))?;
                Ok(content)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParseOptions {
    /// Reject digests that are not lowercase hex of the expected length.
    pub strict_digests: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum IntegrityWarning {
    MissingInvocationPath,
    MissingChecksum,
}

impl fmt::Display for IntegrityWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntegrityWarning::MissingInvocationPath => {
                write!(f, "manifest header has no hashdeep invocation path")
            }
            IntegrityWarning::MissingChecksum => {
                write!(f, "manifest has no trailer checksum")
            }
        }
    }
}

/// The parsed audit file. Created by [`Manifest::parse`] and never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    raw_content: String,
    hashdeep_invocation_path: Option<String>,
    sha256_checksum: Option<String>,
    entries: Vec<ManifestEntry>,
    entry_lines: Vec<usize>,
    trailer_offset: Option<usize>,
}

impl Manifest {
    pub fn parse(source: ManifestSource) -> Result<Self, InstallerError> {
        Self::parse_with(source, ParseOptions::default())
    }

    pub fn parse_with(source: ManifestSource, options: ParseOptions) -> Result<Self, InstallerError> {
        let content = source.read_to_string()?;
        Self::parse_str_with(&content, options)
    }

    pub fn parse_str(content: &str) -> Result<Self, InstallerError> {
        Self::parse_str_with(content, ParseOptions::default())
    }

    pub fn parse_str_with(content: &str, options: ParseOptions) -> Result<Self, InstallerError> {
        let md5_re = Regex::new(r"^[0-9a-f]{32}$").unwrap();
        let sha256_re = Regex::new(r"^[0-9a-f]{64}$").unwrap();

        let mut invocation_path = None;
        let mut checksum = None;
        let mut trailer_offset = None;
        let mut entries = Vec::new();
        let mut entry_lines = Vec::new();
        let mut saw_header = false;

        let mut offset = 0usize;
        for (index, raw_line) in content.split_inclusive('\n').enumerate() {
            let line_no = index + 1;
            let line_start = offset;
            offset += raw_line.len();
            let line = raw_line
                .strip_suffix('\n')
                .map(|rest| rest.strip_suffix('\r').unwrap_or(rest))
                .unwrap_or(raw_line);

            if index == 0 {
                let (_, path) = line
                    .split_once(':')
                    .ok_or(InstallerError::ManifestHeader { line: line_no })?;
                invocation_path = Some(path.trim().to_string());
                saw_header = true;
                continue;
            }

            if line.starts_with(TRAILER_PREFIX) {
                if !line.contains(TRAILER_MARKER) {
                    return Err(InstallerError::ManifestTrailer { line: line_no });
                }
                let value = line.rsplit('=').next().unwrap_or_default();
                checksum = Some(value.to_string());
                trailer_offset = Some(line_start);
                continue;
            }

            if line.starts_with("##") || line.starts_with("%%%%") || line.is_empty() {
                continue;
            }

            let fields = line.split(',').collect::<Vec<_>>();
            if fields.len() != 4 {
                return Err(InstallerError::ManifestFieldCount {
                    line: line_no,
                    found: fields.len(),
                });
            }
            // Digits only: `u64::from_str` would also take a leading `+`.
            let size = Some(fields[0])
                .filter(|value| !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit()))
                .and_then(|value| value.parse::<u64>().ok())
                .ok_or_else(|| InstallerError::ManifestSize {
                    line: line_no,
                    value: fields[0].to_string(),
                })?;
            if options.strict_digests {
                if !md5_re.is_match(fields[1]) {
                    return Err(InstallerError::ManifestDigest {
                        line: line_no,
                        field: "md5",
                        value: fields[1].to_string(),
                    });
                }
                if !sha256_re.is_match(fields[2]) {
                    return Err(InstallerError::ManifestDigest {
                        line: line_no,
                        field: "sha256",
                        value: fields[2].to_string(),
                    });
                }
            }
            entries.push(ManifestEntry {
                size,
                md5: fields[1].to_string(),
                sha256: fields[2].to_string(),
                name: fields[3].to_string(),
            });
            entry_lines.push(line_no);
        }

        if !saw_header {
            return Err(InstallerError::ManifestHeader { line: 1 });
        }

        let manifest = Self {
            raw_content: content.to_string(),
            hashdeep_invocation_path: invocation_path.filter(|path| !path.is_empty()),
            sha256_checksum: checksum.filter(|sum| !sum.is_empty()),
            entries,
            entry_lines,
            trailer_offset,
        };
        for warning in manifest.integrity_warnings() {
            warn!("{warning}");
        }
        debug!(entries = manifest.entries.len(), "parsed manifest");
        Ok(manifest)
    }

    pub fn raw_content(&self) -> &str {
        &self.raw_content
    }

    pub fn hashdeep_invocation_path(&self) -> Option<&str> {
        self.hashdeep_invocation_path.as_deref()
    }

    pub fn sha256_checksum(&self) -> Option<&str> {
        self.sha256_checksum.as_deref()
    }

    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    /// 1-based manifest line of the entry at `index`.
    pub fn entry_line(&self, index: usize) -> Option<usize> {
        self.entry_lines.get(index).copied()
    }

    pub fn total_size(&self) -> u64 {
        self.entries.iter().map(|entry| entry.size).sum()
    }

    pub fn integrity_warnings(&self) -> Vec<IntegrityWarning> {
        let mut warnings = Vec::new();
        if self.hashdeep_invocation_path.is_none() {
            warnings.push(IntegrityWarning::MissingInvocationPath);
        }
        if self.sha256_checksum.is_none() {
            warnings.push(IntegrityWarning::MissingChecksum);
        }
        warnings
    }

    /// SHA-256 over every byte preceding the trailer line.
    pub fn body_sha256(&self) -> String {
        let end = self.trailer_offset.unwrap_or(self.raw_content.len());
        digest::sha256_hex(&self.raw_content.as_bytes()[..end])
    }

    /// `None` when the manifest carries no trailer checksum.
    pub fn verify_self_checksum(&self) -> Option<bool> {
        self.sha256_checksum()
            .map(|expected| expected.eq_ignore_ascii_case(&self.body_sha256()))
    }
}
