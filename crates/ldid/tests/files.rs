//! Processing files on disk.

mod common;

use common::*;
use ldid::{sign_bytes, Error, Ldid};
use std::fs;
use tempfile::tempdir;

#[test]
fn test_sign_file_in_place() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("cat");
    let original = Fixture::default().build();
    fs::write(&path, &original).unwrap();

    let report = Ldid::new().sign().process_file(&path).unwrap();
    assert!(report.modified);
    assert_eq!(report.slices.len(), 1);

    let signed = fs::read(&path).unwrap();
    // SuperBlob length, right after the magic at the signature offset.
    assert_eq!(report.slices[0].signature_size, Some(be32(&signed, 0x1044) as usize));
    // The identifier defaults to the file name.
    assert_eq!(signed, sign_bytes(&original, "cat", None).unwrap());
}

#[test]
fn test_read_only_operations_leave_file_alone() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("cat");
    let signed = sign_bytes(&Fixture::default().build(), "cat", None).unwrap();
    fs::write(&path, &signed).unwrap();
    let modified = fs::metadata(&path).unwrap().modified().unwrap();

    let report = Ldid::new()
        .extract_entitlements()
        .list_architectures()
        .process_file(&path)
        .unwrap();
    assert!(!report.modified);
    assert_eq!(report.slices[0].entitlements, Some(None));
    assert_eq!(fs::read(&path).unwrap(), signed);
    assert_eq!(fs::metadata(&path).unwrap().modified().unwrap(), modified);
}

#[test]
fn test_entitlements_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("cat");
    let entitlements = dir.path().join("ent.xml");
    fs::write(&path, Fixture::default().build()).unwrap();
    fs::write(&entitlements, b"<plist version=\"1.0\"><dict/></plist>").unwrap();

    Ldid::new()
        .sign()
        .entitlements_file(&entitlements)
        .process_file(&path)
        .unwrap();

    let report = Ldid::new().extract_entitlements().process_file(&path).unwrap();
    assert_eq!(
        report.slices[0].entitlements,
        Some(Some(b"<plist version=\"1.0\"><dict/></plist>".to_vec()))
    );
}

#[test]
fn test_batch_continues_after_failure() {
    let dir = tempdir().unwrap();
    let good = dir.path().join("cat");
    let bad = dir.path().join("notes.txt");
    let original = Fixture::default().build();
    fs::write(&good, &original).unwrap();
    fs::write(&bad, b"just some text, not a Mach-O").unwrap();

    let summary = Ldid::new().sign().process_files([&bad, &good]);
    assert_eq!(summary.processed(), 1);
    assert_eq!(summary.failed(), 1);
    assert_eq!(summary.failures[0].0, bad);
    assert!(matches!(summary.failures[0].1, Error::Malformed(_)));

    assert_eq!(fs::read(&bad).unwrap(), b"just some text, not a Mach-O");
    assert_eq!(fs::read(&good).unwrap(), sign_bytes(&original, "cat", None).unwrap());
}

#[test]
fn test_invalid_options_fail_every_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("cat");
    let original = Fixture::default().build();
    fs::write(&path, &original).unwrap();

    let summary = Ldid::new().sign().strip().process_files([&path]);
    assert_eq!(summary.failed(), 1);
    assert!(matches!(summary.failures[0].1, Error::Config(_)));
    assert_eq!(fs::read(&path).unwrap(), original);
}

#[test]
fn test_batch_survives_corrupt_fat_alignment() {
    let dir = tempdir().unwrap();
    let corrupt = dir.path().join("universal");
    let good = dir.path().join("cat");
    let mut data = fat(&[(&Fixture::default(), 14)], false);
    data[24..28].copy_from_slice(&0xffff_ffffu32.to_be_bytes());
    fs::write(&corrupt, &data).unwrap();
    fs::write(&good, Fixture::default().build()).unwrap();

    let summary = Ldid::new().sign().process_files([&corrupt, &good]);
    assert_eq!(summary.failed(), 1);
    assert_eq!(summary.processed(), 1);
    assert!(matches!(summary.failures[0].1, Error::Malformed(_)));
    assert_eq!(fs::read(&corrupt).unwrap(), data);
}
