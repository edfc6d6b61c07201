//! Tests for ObfuscationKey and value obfuscation at rest
//!
//! These tests verify:
//! - The transform is self-inverse and position dependent
//! - Keys are never transformed, values always are
//! - The pad is stored raw under the reserved record
//! - The pad is fixed once a store exists

use indexdb::obfuscation::{ObfuscationKey, OBFUSCATION_KEY_LEN, OBFUSCATION_KEY_RECORD};
use indexdb::{Config, DbError, DbWrapper, Engine, FailurePolicy};
use proptest::prelude::*;
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn open(path: &std::path::Path, obfuscate: bool) -> DbWrapper {
    DbWrapper::open(
        Config::builder()
            .data_dir(path)
            .obfuscate(obfuscate)
            .failure_policy(FailurePolicy::Propagate)
            .build(),
    )
    .unwrap()
}

// =============================================================================
// Transform Tests
// =============================================================================

#[test]
fn test_identity_leaves_data_unchanged() {
    let mut data = b"unchanged".to_vec();
    ObfuscationKey::IDENTITY.apply(&mut data);
    assert_eq!(data, b"unchanged");
    assert!(ObfuscationKey::IDENTITY.is_identity());
    assert_eq!(ObfuscationKey::default(), ObfuscationKey::IDENTITY);
}

#[test]
fn test_pad_repeats_every_eight_bytes() {
    let key = ObfuscationKey::new([1, 2, 3, 4, 5, 6, 7, 8]);
    let mut data = vec![0u8; 20];
    key.apply(&mut data);

    assert_eq!(&data[0..8], &[1, 2, 3, 4, 5, 6, 7, 8]);
    assert_eq!(&data[8..16], &[1, 2, 3, 4, 5, 6, 7, 8]);
    assert_eq!(&data[16..20], &[1, 2, 3, 4]);
}

#[test]
fn test_generated_keys_are_never_identity() {
    for _ in 0..100 {
        assert!(!ObfuscationKey::generate().is_identity());
    }
}

#[test]
fn test_from_slice_requires_eight_bytes() {
    assert!(ObfuscationKey::from_slice(&[0u8; 7]).is_none());
    assert!(ObfuscationKey::from_slice(&[0u8; 9]).is_none());
    let key = ObfuscationKey::from_slice(&[0xab; OBFUSCATION_KEY_LEN]).unwrap();
    assert_eq!(key.as_bytes(), &[0xab; OBFUSCATION_KEY_LEN]);
}

#[test]
fn test_hex_rendering() {
    let key = ObfuscationKey::new([0x00, 0x01, 0x0a, 0xff, 0x10, 0x20, 0x30, 0x40]);
    assert_eq!(key.to_hex(), "00010aff10203040");
    assert_eq!(key.to_string(), "00010aff10203040");
}

proptest! {
    #[test]
    fn prop_apply_twice_restores(pad in any::<[u8; 8]>(), data in proptest::collection::vec(any::<u8>(), 0..256)) {
        let key = ObfuscationKey::new(pad);
        let mut buf = data.clone();
        key.apply(&mut buf);
        key.apply(&mut buf);
        prop_assert_eq!(buf, data);
    }

    #[test]
    fn prop_apply_is_positional_xor(pad in any::<[u8; 8]>(), data in proptest::collection::vec(any::<u8>(), 0..64)) {
        let key = ObfuscationKey::new(pad);
        let mut buf = data.clone();
        key.apply(&mut buf);
        for (i, (out, inp)) in buf.iter().zip(data.iter()).enumerate() {
            prop_assert_eq!(*out, inp ^ pad[i % 8]);
        }
    }
}

// =============================================================================
// Store Tests
// =============================================================================

#[test]
fn test_pad_is_stored_raw_under_reserved_record() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("index");

    let key = {
        let db = open(&path, true);
        let key = db.obfuscation_key();
        assert!(!key.is_identity());

        let raw = db.engine().get(OBFUSCATION_KEY_RECORD).unwrap().unwrap();
        assert_eq!(raw.as_slice(), key.as_bytes());
        db.close().unwrap();
        key
    };

    // Still readable through the bare engine after reopening
    let engine = Engine::open(&Config::builder().data_dir(&path).build()).unwrap();
    let raw = engine.get(OBFUSCATION_KEY_RECORD).unwrap().unwrap();
    assert_eq!(raw.as_slice(), key.as_bytes());
}

#[test]
fn test_keys_plain_values_masked() {
    let temp = TempDir::new().unwrap();
    let db = open(&temp.path().join("index"), true);
    let pad = db.obfuscation_key();

    db.write("plainkey", "secretvalue", false).unwrap();

    let raw = db.engine().get(b"plainkey").unwrap().unwrap();
    assert_ne!(raw, b"secretvalue");

    let mut unmasked = raw.clone();
    pad.apply(&mut unmasked);
    assert_eq!(unmasked, b"secretvalue");

    assert_eq!(db.read::<_, String>("plainkey").unwrap().as_deref(), Some("secretvalue"));
}

#[test]
fn test_unobfuscated_store_has_no_record() {
    let temp = TempDir::new().unwrap();
    let db = open(&temp.path().join("index"), false);

    assert!(db.obfuscation_key().is_identity());
    assert_eq!(db.engine().get(OBFUSCATION_KEY_RECORD).unwrap(), None);

    db.write("k", "v", false).unwrap();
    assert_eq!(db.engine().get(b"k").unwrap(), Some(b"v".to_vec()));
}

#[test]
fn test_malformed_pad_record_is_corruption() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("index");

    {
        let engine = Engine::open(&Config::builder().data_dir(&path).build()).unwrap();
        engine.put(OBFUSCATION_KEY_RECORD, b"short", true).unwrap();
        engine.close().unwrap();
    }

    let err = DbWrapper::open(Config::builder().data_dir(&path).build()).err().unwrap();
    assert!(matches!(err, DbError::Corruption(_)));
}
