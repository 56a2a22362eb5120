#![allow(dead_code)]

use std::fs;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use tempfile::{tempdir, TempDir};
use timelock_core::chain::Ledger;
use timelock_core::clock::ManualClock;
use timelock_core::{sha256_hex, Transaction};
use timelock_storage::JsonFileStore;

pub const TEST_DIFFICULTY: usize = 2;

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 5, 1, 9, 0, 0).unwrap()
}

pub fn create_temp_dir() -> (TempDir, std::path::PathBuf) {
    // Create a temporary directory for the ledger files
    let temp_dir = tempdir().expect("Failed to create temp dir");
    let path = temp_dir.path().to_path_buf();
    (temp_dir, path)
}

pub fn remove_temp_dir(temp_dir: TempDir) {
    let path = temp_dir.path().to_path_buf();
    temp_dir.close().expect("Failed to delete temp dir");
    let _ = fs::remove_dir_all(&path);
    // Verify the directory is removed
    assert!(!path.exists(), "Data directory should be removed");
}

pub fn open_ledger(
    dir: &std::path::Path,
    clock: Arc<ManualClock>,
) -> anyhow::Result<Ledger<JsonFileStore>> {
    let store = Arc::new(JsonFileStore::new(dir.join(timelock_storage::LEDGER_FILE)));
    Ok(Ledger::open(store, TEST_DIFFICULTY, clock)?)
}

pub fn tx(id: u64) -> Transaction {
    Transaction::new(id, t0(), sha256_hex(format!("message {id}").as_bytes()))
        .with_field("sender", "alice")
        .with_field("receiver", "bob")
        .with_field("message_type", "text")
}
