//! Shared fixtures for the verifier integration tests.
//!
//! Chains are written through the real pipeline into a `FileLedgerStore`;
//! tampering is done by editing `entries.jsonl` on disk and reopening the
//! store, exactly as an attacker with file access would.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ledgerseal_contracts::{
    config::{LedgerConfig, StoreConfig},
    entry::{Action, AuditEntry, Outcome},
};
use ledgerseal_core::{AuditLedger, KeyRing};
use ledgerseal_store::FileLedgerStore;

pub fn store_config() -> StoreConfig {
    StoreConfig {
        page_size: 4,
        reservation_timeout_ms: 60_000,
        ..StoreConfig::default()
    }
}

pub fn open(dir: &Path) -> Arc<FileLedgerStore> {
    Arc::new(FileLedgerStore::open_at(dir, &store_config()).unwrap())
}

pub fn ledger(store: &Arc<FileLedgerStore>, keys: KeyRing) -> AuditLedger {
    ledger_with(store, keys, &LedgerConfig::default())
}

pub fn ledger_with(store: &Arc<FileLedgerStore>, keys: KeyRing, config: &LedgerConfig) -> AuditLedger {
    AuditLedger::new(store.clone(), Arc::new(keys), config)
}

pub fn record(ledger: &AuditLedger, tenant: &str, action: Action, outcome: Outcome) -> AuditEntry {
    let event = ledger
        .event(tenant)
        .actor("user-17")
        .action(action)
        .resource("matter", "m-204")
        .outcome(outcome)
        .build()
        .unwrap();
    ledger.record(event).unwrap()
}

/// Append `n` VIEW entries to `tenant`.
pub fn fill(ledger: &AuditLedger, tenant: &str, n: usize) -> Vec<AuditEntry> {
    (0..n)
        .map(|_| record(ledger, tenant, Action::View, Outcome::Success))
        .collect()
}

pub fn entries_path(dir: &Path, tenant: &str) -> PathBuf {
    dir.join(tenant).join("entries.jsonl")
}

/// Rewrite the stored line of `sequence` through `edit`.
pub fn edit_line(dir: &Path, tenant: &str, sequence: u64, edit: impl FnOnce(&mut serde_json::Value)) {
    let path = entries_path(dir, tenant);
    let mut edit = Some(edit);
    let lines: Vec<String> = fs::read_to_string(&path)
        .unwrap()
        .lines()
        .map(|line| {
            let mut value: serde_json::Value = serde_json::from_str(line).unwrap();
            if value["sequence"].as_u64() == Some(sequence) {
                if let Some(edit) = edit.take() {
                    edit(&mut value);
                }
            }
            serde_json::to_string(&value).unwrap()
        })
        .collect();
    assert!(edit.is_none(), "sequence {} not found on disk", sequence);
    fs::write(&path, lines.join("\n") + "\n").unwrap();
}

/// Delete the stored line of `sequence`.
pub fn drop_line(dir: &Path, tenant: &str, sequence: u64) {
    let path = entries_path(dir, tenant);
    let kept: Vec<String> = fs::read_to_string(&path)
        .unwrap()
        .lines()
        .filter(|line| {
            let value: serde_json::Value = serde_json::from_str(line).unwrap();
            value["sequence"].as_u64() != Some(sequence)
        })
        .map(str::to_string)
        .collect();
    fs::write(&path, kept.join("\n") + "\n").unwrap();
}
