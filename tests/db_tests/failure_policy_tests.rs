//! Tests for FailurePolicy
//!
//! These tests verify:
//! - Which errors each policy treats as fatal
//! - Corrupted tables and logs surfacing through DbWrapper
//! - Process termination on corruption under the default policy

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;

use indexdb::codec::CodecError;
use indexdb::engine::{SSTABLE_DIR, WAL_FILENAME};
use indexdb::{Config, DbError, DbWrapper, FailurePolicy};
use tempfile::TempDir;

/// Set in the child process spawned by the termination test
const CHILD_DB_ENV: &str = "INDEXDB_CORRUPT_DB_DIR";

// =============================================================================
// Helper Functions
// =============================================================================

fn config(path: &Path, policy: FailurePolicy, paranoid: bool) -> Config {
    Config::builder()
        .data_dir(path)
        .paranoid_checks(paranoid)
        .failure_policy(policy)
        .build()
}

/// Store holding `1u32 -> 42u32` in a single table, with an empty log.
///
/// Table layout: header 14, lengths 8, key bytes 22..26, value 26..30.
fn setup_single_table_db() -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("index");

    let db = DbWrapper::open(config(&path, FailurePolicy::Propagate, true)).unwrap();
    db.write(&1u32, &42u32, true).unwrap();
    db.close().unwrap();

    (temp_dir, path)
}

fn flip_byte(path: &Path, at: usize) {
    let mut bytes = fs::read(path).unwrap();
    bytes[at] ^= 0xff;
    fs::write(path, &bytes).unwrap();
}

fn first_table(path: &Path) -> PathBuf {
    path.join(SSTABLE_DIR).join("sstable_000001.sst")
}

// =============================================================================
// Policy Decision Tests
// =============================================================================

#[test]
fn test_is_fatal_matrix() {
    let corruption = DbError::Corruption("bad block".to_string());
    let io = DbError::Io(io::Error::new(io::ErrorKind::Other, "disk gone"));
    let wal = DbError::WalWrite("short write".to_string());
    let storage = DbError::Storage("table build failed".to_string());
    let decode = DbError::Codec(CodecError::UnexpectedEnd {
        needed: 4,
        available: 2,
    });
    let reserved = DbError::ReservedKey;

    // (error, on read, on write) for each policy
    let abort_on_corruption = [
        (&corruption, true, true),
        (&io, false, false),
        (&wal, false, false),
        (&storage, false, false),
        (&decode, false, false),
        (&reserved, false, false),
    ];
    let abort_on_any = [
        (&corruption, true, true),
        (&io, false, true),
        (&wal, false, true),
        (&storage, false, true),
        (&decode, false, false),
        (&reserved, false, false),
    ];

    for (err, on_read, on_write) in abort_on_corruption {
        let policy = FailurePolicy::AbortOnCorruption;
        assert_eq!(policy.is_fatal(err, false), on_read, "{:?} on read", err);
        assert_eq!(policy.is_fatal(err, true), on_write, "{:?} on write", err);
    }
    for (err, on_read, on_write) in abort_on_any {
        let policy = FailurePolicy::AbortOnAnyFailure;
        assert_eq!(policy.is_fatal(err, false), on_read, "{:?} on read", err);
        assert_eq!(policy.is_fatal(err, true), on_write, "{:?} on write", err);
    }
    for err in [&corruption, &io, &wal, &storage, &decode, &reserved] {
        assert!(!FailurePolicy::Propagate.is_fatal(err, false));
        assert!(!FailurePolicy::Propagate.is_fatal(err, true));
    }
}

#[test]
fn test_default_policy_aborts_on_corruption() {
    assert_eq!(FailurePolicy::default(), FailurePolicy::AbortOnCorruption);
    assert_eq!(Config::default().failure_policy, FailurePolicy::AbortOnCorruption);
}

// =============================================================================
// Corruption Through DbWrapper
// =============================================================================

#[test]
fn test_corrupt_table_fails_open() {
    let (_temp, path) = setup_single_table_db();
    flip_byte(&first_table(&path), 29);

    // Open failures are returned whatever the policy
    let err = DbWrapper::open(config(&path, FailurePolicy::AbortOnAnyFailure, true))
        .err()
        .unwrap();
    assert!(err.is_corruption());
}

#[test]
fn test_corrupt_log_fails_open() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("index");

    {
        let db = DbWrapper::open(config(&path, FailurePolicy::Propagate, true)).unwrap();
        db.write(&1u32, &42u32, true).unwrap();
    }

    let wal = path.join(WAL_FILENAME);
    let len = fs::metadata(&wal).unwrap().len() as usize;
    flip_byte(&wal, len - 1);

    let err = DbWrapper::open(config(&path, FailurePolicy::Propagate, true))
        .err()
        .unwrap();
    assert!(err.is_corruption());
}

#[test]
fn test_corrupt_entry_surfaces_on_read() {
    let (_temp, path) = setup_single_table_db();
    flip_byte(&first_table(&path), 25);

    // Without checksum verification the damage is only seen by the read
    let db = DbWrapper::open(config(&path, FailurePolicy::Propagate, false)).unwrap();
    let err = db.read::<u32, u32>(&1u32).unwrap_err();
    assert!(err.is_corruption());

    // Keys the damaged entry does not hold are unaffected
    assert_eq!(db.read::<u32, u32>(&2u32).unwrap(), None);
}

#[test]
fn test_abort_on_corruption_terminates() {
    if let Ok(dir) = std::env::var(CHILD_DB_ENV) {
        let db = DbWrapper::open(config(Path::new(&dir), FailurePolicy::default(), false)).unwrap();
        let _ = db.read::<u32, u32>(&1u32);
        // Only reached if the read did not terminate the process
        std::process::exit(0);
    }

    let (_temp, path) = setup_single_table_db();
    flip_byte(&first_table(&path), 25);

    let status = Command::new(std::env::current_exe().unwrap())
        .args(["test_abort_on_corruption_terminates", "--exact", "--nocapture"])
        .env(CHILD_DB_ENV, &path)
        .status()
        .unwrap();
    assert_eq!(status.code(), Some(1));
}
