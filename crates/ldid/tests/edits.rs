//! In-place edits: timestamps, encryption, rehashing.

mod common;

use common::*;
use ldid::hash::lookup2;
use ldid::macho::load_command::LoadCommand;
use ldid::{sign_bytes, Error, Ldid, MachOFile, TimestampMode};

fn dylib_timestamp(data: &[u8]) -> u32 {
    let file = MachOFile::parse(data).unwrap();
    match &file.slices[0].id_dylib().unwrap().command {
        LoadCommand::IdDylib(dylib) => dylib.timestamp,
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn test_literal_timestamp() {
    let original = Fixture::dylib().build();
    assert_eq!(dylib_timestamp(&original), ORIGINAL_TIMESTAMP);

    let processed = Ldid::new()
        .timestamp(TimestampMode::Literal(0x5f5e_1000))
        .process_bytes(&original, "libfixture.dylib")
        .unwrap();
    assert_eq!(processed.slices[0].timestamp, Some(0x5f5e_1000));

    let data = processed.data.unwrap();
    assert_eq!(data.len(), original.len());
    assert_eq!(dylib_timestamp(&data), 0x5f5e_1000);
}

#[test]
fn test_derived_timestamp() {
    let original = Fixture::dylib().build();
    let file = MachOFile::parse(&original).unwrap();
    let at = file.slices[0].id_dylib().unwrap().offset + 12;

    let mut zeroed = original.clone();
    zeroed[at..at + 4].fill(0);
    let expected = lookup2(&zeroed, 0);

    let processed = Ldid::new()
        .timestamp(TimestampMode::Derived { seed: 0 })
        .process_bytes(&original, "libfixture.dylib")
        .unwrap();
    assert_eq!(processed.slices[0].timestamp, Some(expected));
    assert_eq!(dylib_timestamp(processed.data.as_deref().unwrap()), expected);

    // The previous value does not influence the result.
    let again = Ldid::new()
        .timestamp(TimestampMode::Derived { seed: 0 })
        .process_bytes(processed.data.as_deref().unwrap(), "libfixture.dylib")
        .unwrap();
    assert_eq!(again.slices[0].timestamp, Some(expected));

    let seeded = Ldid::new()
        .timestamp(TimestampMode::Derived { seed: 1 })
        .process_bytes(&original, "libfixture.dylib")
        .unwrap();
    assert_ne!(seeded.slices[0].timestamp, Some(expected));
}

#[test]
fn test_timestamp_on_executable_is_skipped() {
    let original = Fixture::default().build();
    let processed = Ldid::new()
        .timestamp(TimestampMode::Literal(7))
        .process_bytes(&original, "cat")
        .unwrap();
    assert_eq!(processed.slices[0].timestamp, None);
    assert_eq!(processed.data.unwrap(), original);
}

#[test]
fn test_timestamp_is_covered_by_signature() {
    let original = Fixture::dylib().build();
    let processed = Ldid::new()
        .timestamp(TimestampMode::Literal(9))
        .sign()
        .process_bytes(&original, "libfixture.dylib")
        .unwrap();
    let combined = processed.data.unwrap();

    let stamped = Ldid::new()
        .timestamp(TimestampMode::Literal(9))
        .process_bytes(&original, "libfixture.dylib")
        .unwrap()
        .data
        .unwrap();
    assert_eq!(combined, sign_bytes(&stamped, "libfixture.dylib", None).unwrap());
}

#[test]
fn test_disable_encryption() {
    for fixture in [
        Fixture {
            encryption: true,
            ..Fixture::default()
        },
        Fixture {
            encryption: true,
            ..Fixture::x86()
        },
        Fixture {
            encryption: true,
            ..Fixture::powerpc()
        },
    ] {
        let original = fixture.build();
        let before = MachOFile::parse(&original).unwrap();
        assert_eq!(before.slices[0].encryption_info().next().unwrap().1.cryptid, 1);

        let processed = Ldid::new()
            .disable_encryption()
            .process_bytes(&original, "cat")
            .unwrap();
        assert_eq!(processed.slices[0].encryption_disabled, 1);

        let data = processed.data.unwrap();
        let after = MachOFile::parse(&data).unwrap();
        let (_, info) = after.slices[0].encryption_info().next().unwrap();
        assert_eq!(info.cryptid, 0);
        assert_eq!(info.cryptoff, SECTION_OFFSET as u32);
    }
}

#[test]
fn test_disable_encryption_without_command() {
    let original = Fixture::default().build();
    let result = Ldid::new().disable_encryption().process_bytes(&original, "cat");
    assert!(matches!(
        result,
        Err(Error::MissingCommand("LC_ENCRYPTION_INFO"))
    ));
}

#[test]
fn test_rehash_after_patching_code() {
    let original = Fixture::default().build();
    let signed = sign_bytes(&original, "cat", Some(b"<plist/>")).unwrap();

    let mut patched = original.clone();
    patched[0x900] ^= 0xff;
    let expected = sign_bytes(&patched, "cat", Some(b"<plist/>")).unwrap();

    let mut tampered = signed.clone();
    tampered[0x900] ^= 0xff;
    assert_ne!(tampered, expected);

    let processed = Ldid::new().rehash().process_bytes(&tampered, "cat").unwrap();
    assert_eq!(processed.slices[0].rehashed_pages, Some(2));
    assert_eq!(processed.data.unwrap(), expected);
}

#[test]
fn test_rehash_unsigned() {
    let original = Fixture::default().build();
    let result = Ldid::new().rehash().process_bytes(&original, "cat");
    assert!(matches!(
        result,
        Err(Error::MissingCommand("LC_CODE_SIGNATURE"))
    ));
}

#[test]
fn test_extract_from_unsigned() {
    let original = Fixture::default().build();
    let result = Ldid::new().extract_entitlements().process_bytes(&original, "cat");
    assert!(matches!(
        result,
        Err(Error::MissingCommand("LC_CODE_SIGNATURE"))
    ));
}
