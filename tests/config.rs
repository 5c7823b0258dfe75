use std::fs;

use assert_matches::assert_matches;

use varfish_installer::config::{ConfigLoader, DEFAULT_S3_BUCKET};
use varfish_installer::domain::{Dataset, DownloadSubset, GenomeRelease};
use varfish_installer::error::InstallerError;

#[test]
fn loads_json_config_file() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("varfish-installer.json");
    fs::write(
        &path,
        r#"{
  "base_dir": "/srv/varfish",
  "subset": "reduced-dev",
  "datasets": ["annonars-clinvar", "viguno-hpo"],
  "releases": ["GRCh38"],
  "versions": {
    "annonars-clinvar": "20240612+0.33.0",
    "viguno-hpo": "20240116+0.2.1"
  }
}"#,
    )
    .unwrap();

    let resolved = ConfigLoader::resolve(path.to_str()).unwrap();
    assert_eq!(resolved.base_dir, "/srv/varfish");
    assert_eq!(resolved.remote.subset, DownloadSubset::Development);
    assert_eq!(resolved.remote.s3_bucket, DEFAULT_S3_BUCKET);
    assert_eq!(resolved.datasets, vec![Dataset::AnnonarsClinvar, Dataset::VigunoHpo]);
    assert_eq!(resolved.releases, vec![GenomeRelease::Grch38]);
    assert_eq!(resolved.versions[&Dataset::VigunoHpo], "20240116+0.2.1");
}

#[test]
fn unreadable_and_malformed_configs() {
    let temp = tempfile::tempdir().unwrap();
    let missing = temp.path().join("absent.json");
    assert_matches!(
        ConfigLoader::resolve(missing.to_str()),
        Err(InstallerError::ConfigRead(_))
    );

    let broken = temp.path().join("broken.json");
    fs::write(&broken, "{ not json").unwrap();
    assert_matches!(
        ConfigLoader::resolve(broken.to_str()),
        Err(InstallerError::ConfigParse(_))
    );
}

#[test]
fn invalid_release_is_a_configuration_error() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("cfg.json");
    fs::write(&path, r#"{"releases": ["hg19"]}"#).unwrap();
    let err = ConfigLoader::resolve(path.to_str()).unwrap_err();
    assert!(err.is_configuration());
    assert_matches!(err, InstallerError::InvalidRelease(_));
}
