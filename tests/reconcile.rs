use std::fs;

use assert_matches::assert_matches;

use varfish_installer::digest::sha256_hex;
use varfish_installer::error::InstallerError;
use varfish_installer::local::{DirectoryState, SnapshotState};
use varfish_installer::manifest::Manifest;
use varfish_installer::reconcile::{CorruptReason, StaleFile, SyncStatus, reconcile};

#[test]
fn duplicate_names_are_rejected_before_classification() {
    let manifest = Manifest::parse_str("h:/x\n1,a,b,same\n2,c,d,other\n3,e,f,same\n").unwrap();
    let err = reconcile(&manifest, &SnapshotState::new()).unwrap_err();
    assert_matches!(
        err,
        InstallerError::DuplicateEntry { ref name, first_line: 2, second_line: 4, .. } if name == "same"
    );
}

#[test]
fn dot_slash_spelling_of_the_same_path_is_a_duplicate() {
    let temp = tempfile::tempdir().unwrap();
    fs::write(temp.path().join("a"), b"data").unwrap();

    let sha = sha256_hex(b"data");
    let other = "f".repeat(64);
    let manifest = Manifest::parse_str(&format!("h:/x\n4,m,{sha},a\n4,m,{other},./a\n")).unwrap();
    let err = reconcile(&manifest, &DirectoryState::scan(temp.path()).unwrap()).unwrap_err();
    assert_matches!(
        err,
        InstallerError::DuplicateEntry {
            ref name,
            ref first_name,
            first_line: 2,
            ref second_name,
            second_line: 3,
        } if name == "a" && first_name == "a" && second_name == "./a"
    );
}

#[test]
fn size_and_digest_mismatches_are_corrupt() {
    let manifest = Manifest::parse_str("h:/x\n10,m,aaa,short\n10,m,aaa,tampered\n").unwrap();
    let state = SnapshotState::new()
        .with_file("short", 4, "aaa")
        .with_file("tampered", 10, "fff");

    let plan = reconcile(&manifest, &state).unwrap();
    assert_eq!(
        plan.status_of("short"),
        Some(&SyncStatus::Corrupt {
            reason: CorruptReason::Size {
                expected: 10,
                actual: 4
            }
        })
    );
    assert_eq!(
        plan.status_of("tampered"),
        Some(&SyncStatus::Corrupt {
            reason: CorruptReason::Digest {
                expected: "aaa".to_string(),
                actual: "fff".to_string()
            }
        })
    );
    let summary = plan.summary();
    assert_eq!(summary.corrupt, 2);
    assert_eq!(summary.bytes_to_fetch, 20);
}

#[test]
fn digest_comparison_ignores_case() {
    let manifest = Manifest::parse_str("h:/x\n3,m,ABCDEF,f\n").unwrap();
    let state = SnapshotState::new().with_file("f", 3, "abcdef");
    assert!(reconcile(&manifest, &state).unwrap().is_satisfied());
}

#[test]
fn stale_files_are_reported_sorted_and_left_alone() {
    let temp = tempfile::tempdir().unwrap();
    fs::write(temp.path().join("keep"), b"data").unwrap();
    fs::write(temp.path().join("zz-extra"), b"12").unwrap();
    fs::write(temp.path().join("aa-extra"), b"1").unwrap();

    let sha = sha256_hex(b"data");
    let manifest = Manifest::parse_str(&format!("h:/x\n4,m,{sha},keep\n")).unwrap();
    let state = DirectoryState::scan(temp.path()).unwrap();
    let plan = reconcile(&manifest, &state).unwrap();

    assert!(plan.is_satisfied());
    assert_eq!(
        plan.stale,
        vec![
            StaleFile {
                name: "aa-extra".to_string(),
                size: 1
            },
            StaleFile {
                name: "zz-extra".to_string(),
                size: 2
            },
        ]
    );
    assert!(temp.path().join("aa-extra").exists());
    assert!(temp.path().join("zz-extra").exists());
}

#[test]
fn dot_slash_names_match_files_on_disk() {
    let temp = tempfile::tempdir().unwrap();
    fs::create_dir_all(temp.path().join("rocksdb")).unwrap();
    fs::write(temp.path().join("rocksdb/CURRENT"), b"MANIFEST-000001\n").unwrap();

    let sha = sha256_hex(b"MANIFEST-000001\n");
    let manifest = Manifest::parse_str(&format!("h:/x\n16,m,{sha},./rocksdb/CURRENT\n")).unwrap();
    let plan = reconcile(&manifest, &DirectoryState::scan(temp.path()).unwrap()).unwrap();

    assert_eq!(plan.status_of("./rocksdb/CURRENT"), Some(&SyncStatus::Satisfied));
    assert!(plan.stale.is_empty());
}

#[test]
fn reconciliation_is_idempotent() {
    let manifest = Manifest::parse_str("h:/x\n1,m,a,one\n2,m,b,two\n3,m,c,three\n").unwrap();
    let state = SnapshotState::new()
        .with_file("one", 1, "a")
        .with_file("two", 9, "b")
        .with_file("four", 4, "d");

    let first = reconcile(&manifest, &state).unwrap();
    let second = reconcile(&manifest, &state).unwrap();
    assert_eq!(first, second);
    assert_eq!(first.to_fetch().count(), 2);
}

#[test]
fn empty_manifest_reports_everything_as_stale() {
    let manifest = Manifest::parse_str("h:/x\n").unwrap();
    let state = SnapshotState::new().with_file("b", 2, "x").with_file("a", 1, "y");
    let plan = reconcile(&manifest, &state).unwrap();
    assert!(plan.items.is_empty());
    assert!(plan.is_satisfied());
    let names = plan.stale.iter().map(|s| s.name.as_str()).collect::<Vec<_>>();
    assert_eq!(names, ["a", "b"]);
}
