use std::io::Read;
use std::path::{Component, Path};
use std::time::Instant;

use camino::Utf8Path;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::RemoteSettings;
use crate::digest;
use crate::domain::{DatasetCatalog, DatasetDescriptor};
use crate::error::InstallerError;
use crate::local::{DirectoryState, VerifiedState};
use crate::manifest::{Manifest, ManifestEntry, ManifestSource, ParseOptions};
use crate::reconcile::{PlanSummary, StaleFile, SyncPlan, SyncStatus, reconcile};
use crate::store::{Metadata, Store};
use crate::transfer::{Locator, MANIFEST_FILE_NAME, TransferProvider};

#[derive(Debug, Clone, Copy, Default)]
pub struct SyncOptions {
    pub dry_run: bool,
    pub strict_digests: bool,
}

impl SyncOptions {
    fn parse_options(&self) -> ParseOptions {
        ParseOptions {
            strict_digests: self.strict_digests,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncResult {
    pub items: Vec<DatasetSyncResult>,
}

impl SyncResult {
    pub fn failures(&self) -> usize {
        self.items.iter().filter(|item| item.error.is_some()).count()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DatasetSyncResult {
    pub dataset: String,
    pub release: Option<String>,
    pub version: String,
    pub action: String,
    pub path: String,
    pub summary: Option<PlanSummary>,
    pub fetched_files: usize,
    pub fetched_bytes: u64,
    pub stale: Vec<StaleFile>,
    pub warnings: Vec<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusResult {
    pub datasets: Vec<DatasetStatus>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DatasetStatus {
    pub dataset: String,
    pub release: Option<String>,
    pub version: String,
    pub path: String,
    pub summary: Option<PlanSummary>,
    pub plan: Option<SyncPlan>,
    pub warnings: Vec<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListResult {
    pub datasets: Vec<Metadata>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ManifestReport {
    pub source: String,
    pub invocation_path: Option<String>,
    pub sha256_checksum: Option<String>,
    pub checksum_valid: Option<bool>,
    pub entries: usize,
    pub total_bytes: u64,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Copy)]
pub enum ProgressSinkKind {
    Sync,
    Status,
    List,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

fn emit(sink: &dyn ProgressSink, message: String) {
    sink.event(ProgressEvent { message });
}

/// Reconciled view of one dataset, shared by `sync` and `status`.
struct Planned {
    descriptor: DatasetDescriptor,
    plan: SyncPlan,
    warnings: Vec<String>,
}

#[derive(Clone)]
pub struct App<T: TransferProvider> {
    store: Store,
    remote: RemoteSettings,
    transfer: T,
}

impl<T: TransferProvider> App<T> {
    pub fn new(store: Store, remote: RemoteSettings, transfer: T) -> Self {
        Self {
            store,
            remote,
            transfer,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn transfer(&self) -> &T {
        &self.transfer
    }

    /// Brings every dataset in `catalog` in line with its manifest.
    ///
    /// Parse and reconciliation errors are recorded per dataset; integrity
    /// errors after a transfer abort the run.
    pub fn sync(
        &self,
        catalog: &DatasetCatalog,
        options: SyncOptions,
        sink: &dyn ProgressSink,
    ) -> Result<SyncResult, InstallerError> {
        let mut items = Vec::new();
        for descriptor in catalog.values() {
            match self.sync_dataset(descriptor, options, sink) {
                Ok(item) => items.push(item),
                Err(err @ (InstallerError::DigestMismatch { .. } | InstallerError::SizeMismatch { .. })) => {
                    return Err(err);
                }
                Err(err) if err.is_configuration() => return Err(err),
                Err(err) => {
                    warn!(dataset = %descriptor.label(), parse_error = err.is_parse(), error = %err, "dataset failed");
                    emit(sink, format!("phase=Store; {} failed: {err}", descriptor.label()));
                    items.push(DatasetSyncResult {
                        dataset: descriptor.dataset.to_string(),
                        release: descriptor.release.map(|release| release.to_string()),
                        version: descriptor.version_raw.clone(),
                        action: "failed".to_string(),
                        path: self.store.dataset_dir(descriptor).to_string(),
                        summary: None,
                        fetched_files: 0,
                        fetched_bytes: 0,
                        stale: Vec::new(),
                        warnings: Vec::new(),
                        error: Some(err.to_string()),
                    });
                }
            }
        }
        Ok(SyncResult { items })
    }

    /// Reconciles without transferring anything but remote manifests.
    pub fn status(
        &self,
        catalog: &DatasetCatalog,
        options: SyncOptions,
        sink: &dyn ProgressSink,
    ) -> Result<StatusResult, InstallerError> {
        let options = SyncOptions {
            dry_run: true,
            ..options
        };
        let mut datasets = Vec::new();
        for descriptor in catalog.values() {
            let path = self.store.dataset_dir(descriptor).to_string();
            let status = match self.plan_dataset(descriptor, options, sink) {
                Ok(planned) => DatasetStatus {
                    dataset: descriptor.dataset.to_string(),
                    release: descriptor.release.map(|release| release.to_string()),
                    version: descriptor.version_raw.clone(),
                    path,
                    summary: Some(planned.plan.summary()),
                    plan: Some(planned.plan),
                    warnings: planned.warnings,
                    error: None,
                },
                Err(err) if err.is_configuration() => return Err(err),
                Err(err) => DatasetStatus {
                    dataset: descriptor.dataset.to_string(),
                    release: descriptor.release.map(|release| release.to_string()),
                    version: descriptor.version_raw.clone(),
                    path,
                    summary: None,
                    plan: None,
                    warnings: Vec::new(),
                    error: Some(err.to_string()),
                },
            };
            datasets.push(status);
        }
        Ok(StatusResult { datasets })
    }

    pub fn list(&self, sink: &dyn ProgressSink) -> Result<ListResult, InstallerError> {
        emit(sink, "phase=Resolve; scanning installation".to_string());
        Ok(ListResult {
            datasets: self.store.list_metadata()?,
        })
    }

    /// Parses a manifest file on its own and reports what it asserts.
    pub fn inspect_manifest(path: &Path, options: SyncOptions) -> Result<ManifestReport, InstallerError> {
        let manifest = Manifest::parse_with(ManifestSource::from_path(path), options.parse_options())?;
        crate::reconcile::check_unique_names(&manifest)?;
        Ok(ManifestReport {
            source: path.display().to_string(),
            invocation_path: manifest.hashdeep_invocation_path().map(str::to_string),
            sha256_checksum: manifest.sha256_checksum().map(str::to_string),
            checksum_valid: manifest.verify_self_checksum(),
            entries: manifest.entries().len(),
            total_bytes: manifest.total_size(),
            warnings: manifest_warnings(&manifest),
        })
    }

    fn sync_dataset(
        &self,
        descriptor: &DatasetDescriptor,
        options: SyncOptions,
        sink: &dyn ProgressSink,
    ) -> Result<DatasetSyncResult, InstallerError> {
        let planned = self.plan_dataset(descriptor, options, sink)?;
        let dataset_dir = self.store.dataset_dir(descriptor);
        let summary = planned.plan.summary();
        for stale in &planned.plan.stale {
            warn!(dataset = %descriptor.label(), file = %stale.name, "file not listed in manifest, leaving in place");
        }

        let mut result = DatasetSyncResult {
            dataset: descriptor.dataset.to_string(),
            release: descriptor.release.map(|release| release.to_string()),
            version: descriptor.version_raw.clone(),
            action: if planned.plan.is_satisfied() {
                "up-to-date".to_string()
            } else if options.dry_run {
                "planned".to_string()
            } else {
                "synced".to_string()
            },
            path: dataset_dir.to_string(),
            summary: Some(summary.clone()),
            fetched_files: 0,
            fetched_bytes: 0,
            stale: planned.plan.stale.clone(),
            warnings: planned.warnings.clone(),
            error: None,
        };
        if options.dry_run {
            return Ok(result);
        }

        let to_fetch = planned.plan.to_fetch().collect::<Vec<_>>();
        let total = to_fetch.len();
        for (index, item) in to_fetch.into_iter().enumerate() {
            emit(
                sink,
                format!(
                    "phase=Fetch; {} [{}/{}] {} ({})",
                    descriptor.label(),
                    index + 1,
                    total,
                    item.entry.name,
                    item.status.label()
                ),
            );
            let start = Instant::now();
            self.fetch_entry(&planned.descriptor, &dataset_dir, &item.entry)?;
            emit(
                sink,
                format!(
                    "transfer.response latency_ms={}",
                    start.elapsed().as_millis()
                ),
            );
            result.fetched_files += 1;
            result.fetched_bytes += item.entry.size;
        }

        emit(sink, format!("phase=Verify; re-checking {}", descriptor.label()));
        let manifest = planned
            .descriptor
            .manifest
            .as_ref()
            .ok_or_else(|| InstallerError::Filesystem("manifest not loaded".to_string()))?;
        // Entries satisfied before the transfers keep their digest; only fetched files are re-hashed.
        let scanned = DirectoryState::scan(dataset_dir.as_std_path())?.without(MANIFEST_FILE_NAME);
        let state = planned
            .plan
            .items
            .iter()
            .filter(|item| item.status == SyncStatus::Satisfied)
            .fold(VerifiedState::new(&scanned), |state, item| {
                state.with_digest(&item.entry.name, &item.entry.sha256)
            });
        let replan = reconcile(manifest, &state)?;
        if !replan.is_satisfied() {
            let pending = replan
                .to_fetch()
                .map(|item| item.entry.name.clone())
                .collect::<Vec<_>>();
            return Err(InstallerError::Filesystem(format!(
                "{} still unsatisfied after transfer: {}",
                descriptor.label(),
                pending.join(", ")
            )));
        }

        emit(sink, format!("phase=Store; recording {}", descriptor.label()));
        let metadata = Metadata {
            dataset: descriptor.dataset.to_string(),
            category: descriptor.category.to_string(),
            release: descriptor.release.map(|release| release.to_string()),
            version: descriptor.version_raw.clone(),
            files: manifest.entries().len(),
            bytes: manifest.total_size(),
            synced_at: chrono::Utc::now().to_rfc3339(),
            tool: format!("varfish-installer/{}", env!("CARGO_PKG_VERSION")),
            resolved_path: dataset_dir.to_string(),
        };
        Store::write_metadata(&self.store.metadata_path(descriptor), &metadata)?;
        info!(
            dataset = %descriptor.label(),
            fetched = result.fetched_files,
            bytes = result.fetched_bytes,
            "dataset synchronized"
        );
        Ok(result)
    }

    fn plan_dataset(
        &self,
        descriptor: &DatasetDescriptor,
        options: SyncOptions,
        sink: &dyn ProgressSink,
    ) -> Result<Planned, InstallerError> {
        emit(sink, format!("phase=Resolve; {}", descriptor.label()));
        let dataset_dir = self.store.dataset_dir(descriptor);

        emit(sink, format!("phase=Prepare; manifest for {}", descriptor.label()));
        let manifest = self.load_manifest(descriptor, options)?;
        let warnings = manifest_warnings(&manifest);

        emit(sink, format!("phase=Verify; reconciling {}", descriptor.label()));
        let state = DirectoryState::scan(dataset_dir.as_std_path())?.without(MANIFEST_FILE_NAME);
        let plan = reconcile(&manifest, &state)?;
        Ok(Planned {
            descriptor: descriptor.clone().with_manifest(manifest),
            plan,
            warnings,
        })
    }

    /// Uses the installed manifest when present, otherwise fetches it.
    /// Dry runs parse the remote copy without writing it.
    fn load_manifest(
        &self,
        descriptor: &DatasetDescriptor,
        options: SyncOptions,
    ) -> Result<Manifest, InstallerError> {
        let parse_options = options.parse_options();
        let local = self.store.manifest_path(descriptor);
        if local.as_std_path().exists() {
            return Manifest::parse_with(ManifestSource::from_path(local.as_std_path()), parse_options);
        }

        let locator = Locator::for_manifest(descriptor, &self.remote);
        let reader = self.transfer.fetch(&locator)?;
        if options.dry_run {
            return Manifest::parse_with(ManifestSource::Stream(reader), parse_options);
        }

        // Parse before persisting so a broken manifest never lands in the installation.
        let mut reader = reader;
        let mut content = Vec::new();
        reader
            .read_to_end(&mut content)
            .map_err(|err| InstallerError::TransferHttp(err.to_string()))?;
        let text = String::from_utf8(content)
            .map_err(|err| InstallerError::ManifestRead(format!("{}: {err}", locator.url)))?;
        let manifest = Manifest::parse_str_with(&text, parse_options)?;
        Store::write_bytes_atomic(&local, text.as_bytes())?;
        Ok(manifest)
    }

    /// Downloads one entry into a temp file, verifies it, then moves it into place.
    fn fetch_entry(
        &self,
        descriptor: &DatasetDescriptor,
        dataset_dir: &Utf8Path,
        entry: &ManifestEntry,
    ) -> Result<(), InstallerError> {
        let relative = Path::new(&entry.name);
        if relative
            .components()
            .any(|part| !matches!(part, Component::Normal(_) | Component::CurDir))
        {
            return Err(InstallerError::Filesystem(format!(
                "refusing to write {} outside the dataset directory",
                entry.name
            )));
        }
        let dest = dataset_dir.as_std_path().join(relative);

        let locator = Locator::for_file(descriptor, &self.remote, &entry.name);
        let mut reader = self.transfer.fetch(&locator)?;
        let mut temp = Store::temp_file_for(&dest)?;
        let copied = digest::copy_hashing(&mut reader, temp.as_file_mut())?;

        if copied.bytes != entry.size {
            return Err(InstallerError::SizeMismatch {
                name: entry.name.clone(),
                expected: entry.size,
                actual: copied.bytes,
            });
        }
        if !copied.sha256.eq_ignore_ascii_case(&entry.sha256) {
            return Err(InstallerError::DigestMismatch {
                name: entry.name.clone(),
                expected: entry.sha256.clone(),
                actual: copied.sha256,
            });
        }
        if !copied.md5.eq_ignore_ascii_case(&entry.md5) {
            return Err(InstallerError::DigestMismatch {
                name: entry.name.clone(),
                expected: entry.md5.clone(),
                actual: copied.md5,
            });
        }
        Store::persist(temp, &dest)
    }
}

fn manifest_warnings(manifest: &Manifest) -> Vec<String> {
    let mut warnings = manifest
        .integrity_warnings()
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>();
    if manifest.verify_self_checksum() == Some(false) {
        warn!("manifest trailer checksum does not match its body");
        warnings.push("manifest trailer checksum does not match its body".to_string());
    }
    warnings
}
