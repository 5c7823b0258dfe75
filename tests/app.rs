use std::collections::HashMap;
use std::fs;
use std::io::{Cursor, Read};
use std::sync::Mutex;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use varfish_installer::app::{App, ProgressEvent, ProgressSink, SyncOptions};
use varfish_installer::config::RemoteSettings;
use varfish_installer::digest::sha256_hex;
use varfish_installer::domain::{
    Dataset, DatasetCatalog, DatasetDescriptor, DownloadSubset, GenomeRelease,
};
use varfish_installer::error::InstallerError;
use varfish_installer::reconcile::SyncStatus;
use varfish_installer::store::Store;
use varfish_installer::transfer::{Locator, TransferProvider};

/// Serves fixed bodies by URL and records every request.
#[derive(Default)]
struct MockTransfer {
    bodies: HashMap<String, Vec<u8>>,
    requests: Mutex<Vec<String>>,
}

impl MockTransfer {
    fn serve(&mut self, locator: Locator, body: impl Into<Vec<u8>>) {
        self.bodies.insert(locator.url, body.into());
    }

    fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

impl TransferProvider for MockTransfer {
    fn fetch(&self, locator: &Locator) -> Result<Box<dyn Read + Send>, InstallerError> {
        self.requests.lock().unwrap().push(locator.url.clone());
        match self.bodies.get(&locator.url) {
            Some(body) => Ok(Box::new(Cursor::new(body.clone()))),
            None => Err(InstallerError::TransferStatus {
                status: 404,
                message: locator.url.clone(),
            }),
        }
    }
}

struct Quiet;

impl ProgressSink for Quiet {
    fn event(&self, _event: ProgressEvent) {}
}

fn remote() -> RemoteSettings {
    RemoteSettings {
        s3_endpoint_url: "https://s3.example.org".to_string(),
        s3_bucket: "varfish-public".to_string(),
        static_infix: "varfish-static".to_string(),
        subset: DownloadSubset::Full,
        disable_ssl_verification: false,
    }
}

fn descriptor(release: GenomeRelease) -> DatasetDescriptor {
    DatasetDescriptor::new(Dataset::AnnonarsCadd, Some(release), "1.6+0.33.0").unwrap()
}

fn catalog(descriptors: &[DatasetDescriptor]) -> DatasetCatalog {
    descriptors
        .iter()
        .map(|descriptor| (descriptor.key(), descriptor.clone()))
        .collect()
}

fn manifest_for(files: &[(&str, &[u8])]) -> String {
    let mut content = "hashdeep:/data/cadd\n%%%% size,md5,sha256,filename\n".to_string();
    for (name, body) in files {
        content.push_str(&format!(
            "{},{:x},{},{}\n",
            body.len(),
            md5::compute(body),
            sha256_hex(body),
            name
        ));
    }
    let checksum = sha256_hex(content.as_bytes());
    content.push_str(&format!("## EOF SHA256={checksum}\n"));
    content
}

const FILES: &[(&str, &[u8])] = &[
    ("rocksdb/CURRENT", b"MANIFEST-000001\n"),
    ("rocksdb/000001.sst", b"some sorted table bytes"),
    ("spec.yaml", b"dc.identifier: annonars/cadd\n"),
];

fn serve_dataset(transfer: &mut MockTransfer, descriptor: &DatasetDescriptor, files: &[(&str, &[u8])]) {
    let remote = remote();
    transfer.serve(
        Locator::for_manifest(descriptor, &remote),
        manifest_for(files),
    );
    for (name, body) in files {
        transfer.serve(Locator::for_file(descriptor, &remote, name), body.to_vec());
    }
}

fn app_in(temp: &tempfile::TempDir, transfer: MockTransfer) -> App<MockTransfer> {
    let base = Utf8PathBuf::from_path_buf(temp.path().join(".prod")).unwrap();
    App::new(Store::new(base, "varfish-static"), remote(), transfer)
}

#[test]
fn sync_fetches_missing_files_and_records_metadata() {
    let temp = tempfile::tempdir().unwrap();
    let grch37 = descriptor(GenomeRelease::Grch37);
    let mut transfer = MockTransfer::default();
    serve_dataset(&mut transfer, &grch37, FILES);
    let app = app_in(&temp, transfer);

    let result = app
        .sync(&catalog(&[grch37.clone()]), SyncOptions::default(), &Quiet)
        .unwrap();
    assert_eq!(result.failures(), 0);
    let item = &result.items[0];
    assert_eq!(item.action, "synced");
    assert_eq!(item.fetched_files, 3);
    assert!(item.warnings.is_empty());

    let dir = app.store().dataset_dir(&grch37);
    assert!(dir.ends_with("data/annonars/cadd-grch37-1.6+0.33.0"));
    assert_eq!(
        fs::read(dir.join("rocksdb/000001.sst")).unwrap(),
        b"some sorted table bytes"
    );
    assert!(dir.join("MANIFEST.txt").exists());

    let listed = app.list(&Quiet).unwrap();
    assert_eq!(listed.datasets.len(), 1);
    assert_eq!(listed.datasets[0].dataset, "annonars-cadd");
    assert_eq!(listed.datasets[0].release.as_deref(), Some("GRCh37"));
    assert_eq!(listed.datasets[0].files, 3);
}

#[test]
fn second_sync_transfers_nothing() {
    let temp = tempfile::tempdir().unwrap();
    let grch37 = descriptor(GenomeRelease::Grch37);
    let mut transfer = MockTransfer::default();
    serve_dataset(&mut transfer, &grch37, FILES);
    let app = app_in(&temp, transfer);
    let catalog = catalog(&[grch37]);

    app.sync(&catalog, SyncOptions::default(), &Quiet).unwrap();
    let before = app.transfer().requests().len();
    let result = app.sync(&catalog, SyncOptions::default(), &Quiet).unwrap();

    assert_eq!(result.items[0].action, "up-to-date");
    assert_eq!(result.items[0].fetched_files, 0);
    // The installed MANIFEST.txt is reused, nothing goes over the wire.
    assert_eq!(app.transfer().requests().len(), before);
}

#[test]
fn corrupt_local_file_is_replaced() {
    let temp = tempfile::tempdir().unwrap();
    let grch37 = descriptor(GenomeRelease::Grch37);
    let mut transfer = MockTransfer::default();
    serve_dataset(&mut transfer, &grch37, FILES);
    let app = app_in(&temp, transfer);
    let catalog = catalog(&[grch37.clone()]);
    app.sync(&catalog, SyncOptions::default(), &Quiet).unwrap();

    let target = app.store().dataset_dir(&grch37).join("spec.yaml");
    fs::write(&target, b"dc.identifier: annonars/cadX\n").unwrap();

    let status = app.status(&catalog, SyncOptions::default(), &Quiet).unwrap();
    let plan = status.datasets[0].plan.as_ref().unwrap();
    assert_matches!(plan.status_of("spec.yaml"), Some(SyncStatus::Corrupt { .. }));

    let result = app.sync(&catalog, SyncOptions::default(), &Quiet).unwrap();
    assert_eq!(result.items[0].fetched_files, 1);
    assert_eq!(fs::read(&target).unwrap(), b"dc.identifier: annonars/cadd\n");
}

#[test]
fn digest_mismatch_aborts_and_leaves_no_file() {
    let temp = tempfile::tempdir().unwrap();
    let grch37 = descriptor(GenomeRelease::Grch37);
    let mut transfer = MockTransfer::default();
    serve_dataset(&mut transfer, &grch37, FILES);
    // Same length, different content.
    transfer.serve(
        Locator::for_file(&grch37, &remote(), "spec.yaml"),
        b"dc.identifier: annonars/cadX\n".to_vec(),
    );
    let app = app_in(&temp, transfer);

    let err = app
        .sync(&catalog(&[grch37.clone()]), SyncOptions::default(), &Quiet)
        .unwrap_err();
    assert_matches!(err, InstallerError::DigestMismatch { ref name, .. } if name == "spec.yaml");

    let dir = app.store().dataset_dir(&grch37);
    assert!(!dir.join("spec.yaml").exists());
    assert!(!app.store().metadata_path(&grch37).exists());
}

#[test]
fn short_transfer_is_a_size_mismatch() {
    let temp = tempfile::tempdir().unwrap();
    let grch37 = descriptor(GenomeRelease::Grch37);
    let mut transfer = MockTransfer::default();
    serve_dataset(&mut transfer, &grch37, FILES);
    transfer.serve(
        Locator::for_file(&grch37, &remote(), "rocksdb/000001.sst"),
        b"truncated".to_vec(),
    );
    let app = app_in(&temp, transfer);

    let err = app
        .sync(&catalog(&[grch37]), SyncOptions::default(), &Quiet)
        .unwrap_err();
    assert_matches!(err, InstallerError::SizeMismatch { expected: 23, actual: 9, .. });
}

#[test]
fn dry_run_writes_nothing() {
    let temp = tempfile::tempdir().unwrap();
    let grch37 = descriptor(GenomeRelease::Grch37);
    let mut transfer = MockTransfer::default();
    serve_dataset(&mut transfer, &grch37, FILES);
    let app = app_in(&temp, transfer);

    let options = SyncOptions {
        dry_run: true,
        ..SyncOptions::default()
    };
    let result = app.sync(&catalog(&[grch37]), options, &Quiet).unwrap();

    let item = &result.items[0];
    assert_eq!(item.action, "planned");
    let summary = item.summary.as_ref().unwrap();
    assert_eq!(summary.missing, 3);
    assert_eq!(item.fetched_files, 0);
    assert!(!temp.path().join(".prod").exists());
    assert_eq!(app.transfer().requests().len(), 1);
}

#[test]
fn broken_manifest_fails_only_its_dataset() {
    let temp = tempfile::tempdir().unwrap();
    let grch37 = descriptor(GenomeRelease::Grch37);
    let grch38 = descriptor(GenomeRelease::Grch38);
    let mut transfer = MockTransfer::default();
    serve_dataset(&mut transfer, &grch37, FILES);
    transfer.serve(
        Locator::for_manifest(&grch38, &remote()),
        "no header colon here\n1,a,b,c\n",
    );
    let app = app_in(&temp, transfer);

    let result = app
        .sync(&catalog(&[grch37.clone(), grch38.clone()]), SyncOptions::default(), &Quiet)
        .unwrap();

    assert_eq!(result.failures(), 1);
    let by_release = result
        .items
        .iter()
        .map(|item| (item.release.clone().unwrap(), item.action.clone()))
        .collect::<Vec<_>>();
    assert_eq!(
        by_release,
        vec![
            ("GRCh37".to_string(), "synced".to_string()),
            ("GRCh38".to_string(), "failed".to_string()),
        ]
    );
    assert!(!app.store().manifest_path(&grch38).exists());
}

#[test]
fn status_reports_stale_files_without_touching_them() {
    let temp = tempfile::tempdir().unwrap();
    let grch37 = descriptor(GenomeRelease::Grch37);
    let mut transfer = MockTransfer::default();
    serve_dataset(&mut transfer, &grch37, FILES);
    let app = app_in(&temp, transfer);
    let catalog = catalog(&[grch37.clone()]);
    app.sync(&catalog, SyncOptions::default(), &Quiet).unwrap();

    let extra = app.store().dataset_dir(&grch37).join("old.sst");
    fs::write(&extra, b"left over").unwrap();

    let status = app.status(&catalog, SyncOptions::default(), &Quiet).unwrap();
    let entry = &status.datasets[0];
    let summary = entry.summary.as_ref().unwrap();
    assert_eq!(summary.satisfied, 3);
    assert_eq!(summary.stale, 1);
    assert_eq!(entry.plan.as_ref().unwrap().stale[0].name, "old.sst");

    app.sync(&catalog, SyncOptions::default(), &Quiet).unwrap();
    assert!(extra.exists());
}

#[test]
fn inspect_manifest_reports_self_checksum() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("MANIFEST.txt");
    fs::write(&path, manifest_for(FILES)).unwrap();

    let report = App::<MockTransfer>::inspect_manifest(&path, SyncOptions::default()).unwrap();
    assert_eq!(report.entries, 3);
    assert_eq!(report.invocation_path.as_deref(), Some("/data/cadd"));
    assert_eq!(report.checksum_valid, Some(true));
    assert!(report.warnings.is_empty());
}
