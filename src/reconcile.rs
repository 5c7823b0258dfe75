//! Diffs a manifest against observed local state.

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use tracing::debug;

use crate::error::InstallerError;
use crate::local::LocalState;
use crate::manifest::{Manifest, ManifestEntry};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum CorruptReason {
    Size { expected: u64, actual: u64 },
    Digest { expected: String, actual: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum SyncStatus {
    Satisfied,
    Missing,
    Corrupt { reason: CorruptReason },
}

impl SyncStatus {
    pub fn needs_fetch(&self) -> bool {
        !matches!(self, SyncStatus::Satisfied)
    }

    pub fn label(&self) -> &'static str {
        match self {
            SyncStatus::Satisfied => "satisfied",
            SyncStatus::Missing => "missing",
            SyncStatus::Corrupt { .. } => "corrupt",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanItem {
    pub entry: ManifestEntry,
    #[serde(flatten)]
    pub status: SyncStatus,
}

/// A file on disk that no manifest entry references. Never deleted by the installer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StaleFile {
    pub name: String,
    pub size: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PlanSummary {
    pub satisfied: usize,
    pub missing: usize,
    pub corrupt: usize,
    pub stale: usize,
    pub bytes_to_fetch: u64,
}

/// Per-entry classification in manifest order, plus stale extras sorted by name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncPlan {
    pub items: Vec<PlanItem>,
    pub stale: Vec<StaleFile>,
}

impl SyncPlan {
    pub fn to_fetch(&self) -> impl Iterator<Item = &PlanItem> {
        self.items.iter().filter(|item| item.status.needs_fetch())
    }

    pub fn is_satisfied(&self) -> bool {
        self.items.iter().all(|item| !item.status.needs_fetch())
    }

    pub fn status_of(&self, name: &str) -> Option<&SyncStatus> {
        self.items
            .iter()
            .find(|item| item.entry.name == name)
            .map(|item| &item.status)
    }

    pub fn summary(&self) -> PlanSummary {
        let mut summary = PlanSummary {
            stale: self.stale.len(),
            ..PlanSummary::default()
        };
        for item in &self.items {
            match item.status {
                SyncStatus::Satisfied => summary.satisfied += 1,
                SyncStatus::Missing => summary.missing += 1,
                SyncStatus::Corrupt { .. } => summary.corrupt += 1,
            }
            if item.status.needs_fetch() {
                summary.bytes_to_fetch += item.entry.size;
            }
        }
        summary
    }
}

/// Rejects manifests listing the same local path twice, `a` and `./a` included.
pub fn check_unique_names(manifest: &Manifest) -> Result<(), InstallerError> {
    let mut seen = HashMap::<&str, (&str, usize)>::new();
    for (index, entry) in manifest.entries().iter().enumerate() {
        let line = manifest.entry_line(index).unwrap_or(index + 1);
        let path = local_name(&entry.name);
        if let Some((first_name, first_line)) = seen.insert(path, (entry.name.as_str(), line)) {
            return Err(InstallerError::DuplicateEntry {
                name: path.to_string(),
                first_name: first_name.to_string(),
                first_line,
                second_name: entry.name.clone(),
                second_line: line,
            });
        }
    }
    Ok(())
}

/// Classifies every manifest entry against `state`.
///
/// Digests are only computed for files whose size already matches.
pub fn reconcile(manifest: &Manifest, state: &dyn LocalState) -> Result<SyncPlan, InstallerError> {
    check_unique_names(manifest)?;

    let mut items = Vec::with_capacity(manifest.entries().len());
    for entry in manifest.entries() {
        let status = classify(entry, state)?;
        debug!(name = %entry.name, status = status.label(), "classified");
        items.push(PlanItem {
            entry: entry.clone(),
            status,
        });
    }

    let referenced = manifest
        .entries()
        .iter()
        .map(|entry| local_name(&entry.name))
        .collect::<HashSet<_>>();
    let mut stale = state
        .names()
        .into_iter()
        .filter(|name| !referenced.contains(local_name(name)))
        .filter_map(|name| {
            state
                .observe(&name)
                .map(|observed| StaleFile {
                    name,
                    size: observed.size,
                })
        })
        .collect::<Vec<_>>();
    stale.sort_by(|a, b| a.name.cmp(&b.name));

    Ok(SyncPlan { items, stale })
}

/// Manifest tools record relative names with or without a leading `./`.
pub fn local_name(name: &str) -> &str {
    name.trim_start_matches("./")
}

fn classify(entry: &ManifestEntry, state: &dyn LocalState) -> Result<SyncStatus, InstallerError> {
    let Some(observed) = state.observe(&entry.name) else {
        return Ok(SyncStatus::Missing);
    };
    if observed.size != entry.size {
        return Ok(SyncStatus::Corrupt {
            reason: CorruptReason::Size {
                expected: entry.size,
                actual: observed.size,
            },
        });
    }
    let actual = state.digest(&entry.name)?;
    if !actual.eq_ignore_ascii_case(&entry.sha256) {
        return Ok(SyncStatus::Corrupt {
            reason: CorruptReason::Digest {
                expected: entry.sha256.clone(),
                actual,
            },
        });
    }
    Ok(SyncStatus::Satisfied)
}
