//! # ledgerseal-core
//!
//! The write side of the LedgerSeal audit ledger.
//!
//! This crate provides:
//! - The store and key traits (`LedgerStore`, `PurgeStore`, `KeyResolver`)
//! - `EntryBuilder` and the canonical entry encoding
//! - Chained SHA-256 hashing and the versioned ed25519 `KeyRing`
//! - `AuditLedger`, the explicit build → hash → sign → append pipeline
//!
//! ## Usage
//!
//! ```rust,ignore
//! use ledgerseal_core::AuditLedger;
//!
//! let ledger = AuditLedger::new(store, keys, &config);
//! let event = ledger.event("acme-legal")
//!     .actor("user-42")
//!     .action(Action::View)
//!     .resource("document", "doc-77")
//!     .build()?;
//! ledger.record(event)?; // fail-closed: abort the action on Err
//! ```

pub mod assess;
pub mod builder;
pub mod hasher;
pub mod pipeline;
pub mod signer;
pub mod stream;
pub mod traits;

pub use builder::{AuditEvent, EntryBuilder};
pub use pipeline::AuditLedger;
pub use signer::KeyRing;
pub use traits::{EntryRecord, KeyResolver, LedgerStore, PurgeStore};

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use ed25519_dalek::SigningKey;

    use ledgerseal_contracts::{
        chain::{ChainCheckpoint, ChainHead, SequenceReservation},
        config::LedgerConfig,
        entry::{Action, AuditEntry, Outcome, TenantId},
        error::{LedgerError, LedgerResult},
    };

    use super::*;
    use crate::hasher::hash_entry;

    // ── Mock store ────────────────────────────────────────────────────────────

    #[derive(Default)]
    struct MockState {
        entries: Vec<AuditEntry>,
        releases: usize,
        conflicts_to_inject: usize,
        fail_appends: bool,
        page_reads: usize,
    }

    #[derive(Default)]
    struct MockStore {
        state: Mutex<MockState>,
    }

    impl MockStore {
        fn head(state: &MockState, tenant: &TenantId) -> ChainHead {
            let mut head = ChainHead::genesis(tenant.clone());
            if let Some(last) = state.entries.iter().filter(|e| e.tenant() == tenant).last() {
                head.advance_to(last);
            }
            head
        }
    }

    impl LedgerStore for MockStore {
        fn reserve_sequence(&self, tenant: &TenantId) -> LedgerResult<SequenceReservation> {
            let state = self.state.lock().unwrap();
            let head = Self::head(&state, tenant);
            Ok(SequenceReservation {
                tenant: tenant.clone(),
                sequence: head.sequence + 1,
                previous_hash: head.entry_hash,
            })
        }

        fn release_sequence(&self, _reservation: &SequenceReservation) {
            self.state.lock().unwrap().releases += 1;
        }

        fn append(&self, entry: AuditEntry) -> LedgerResult<AuditEntry> {
            let mut state = self.state.lock().unwrap();
            if state.fail_appends {
                return Err(LedgerError::store("disk full"));
            }
            if state.conflicts_to_inject > 0 {
                state.conflicts_to_inject -= 1;
                return Err(LedgerError::SequenceConflict {
                    tenant: entry.tenant().to_string(),
                    sequence: entry.sequence(),
                    reason: "injected".to_string(),
                });
            }
            state.entries.push(entry.clone());
            Ok(entry)
        }

        fn chain_head(&self, tenant: &TenantId) -> LedgerResult<ChainHead> {
            Ok(Self::head(&self.state.lock().unwrap(), tenant))
        }

        fn latest_checkpoint(&self, _tenant: &TenantId) -> LedgerResult<Option<ChainCheckpoint>> {
            Ok(None)
        }

        fn read_page(
            &self,
            tenant: &TenantId,
            from: u64,
            through: u64,
            limit: usize,
        ) -> LedgerResult<Vec<AuditEntry>> {
            let mut state = self.state.lock().unwrap();
            state.page_reads += 1;
            Ok(state
                .entries
                .iter()
                .filter(|e| e.tenant() == tenant && e.sequence() >= from && e.sequence() <= through)
                .take(limit)
                .cloned()
                .collect())
        }

        fn tenants(&self) -> LedgerResult<Vec<TenantId>> {
            let state = self.state.lock().unwrap();
            let mut tenants: Vec<TenantId> = state.entries.iter().map(|e| e.tenant().clone()).collect();
            tenants.sort();
            tenants.dedup();
            Ok(tenants)
        }

        fn page_size(&self) -> usize {
            2
        }
    }

    // ── Helpers ───────────────────────────────────────────────────────────────

    fn ledger_with(store: Arc<MockStore>, keys: KeyRing, config: &LedgerConfig) -> AuditLedger {
        AuditLedger::new(store, Arc::new(keys), config)
    }

    fn view(ledger: &AuditLedger, tenant: &str, doc: &str) -> AuditEvent {
        ledger
            .event(tenant)
            .actor("user-1")
            .action(Action::View)
            .resource("document", doc)
            .build()
            .unwrap()
    }

    // ── Pipeline ──────────────────────────────────────────────────────────────

    #[test]
    fn record_builds_a_linked_chain() {
        let store = Arc::new(MockStore::default());
        let ledger = ledger_with(store.clone(), KeyRing::new(), &LedgerConfig::default());

        let first = ledger.record(view(&ledger, "t1", "a")).unwrap();
        let second = ledger.record(view(&ledger, "t1", "b")).unwrap();

        assert_eq!(first.sequence(), 1);
        assert_eq!(first.previous_hash, AuditEntry::GENESIS_HASH);
        assert_eq!(second.sequence(), 2);
        assert_eq!(second.previous_hash, first.entry_hash);
        assert_eq!(
            second.entry_hash,
            hash_entry(&second.body, &first.entry_hash).unwrap()
        );
        assert_eq!(second.body.retention_policy, "retain-forever");
        assert!(second.signature.is_none());
    }

    #[test]
    fn conflicts_are_retried_and_released() {
        let store = Arc::new(MockStore::default());
        store.state.lock().unwrap().conflicts_to_inject = 2;
        let ledger = ledger_with(store.clone(), KeyRing::new(), &LedgerConfig::default());

        let entry = ledger.record(view(&ledger, "t1", "a")).unwrap();
        assert_eq!(entry.sequence(), 1);

        let state = store.state.lock().unwrap();
        assert_eq!(state.entries.len(), 1);
        assert_eq!(state.releases, 2);
    }

    #[test]
    fn exhausted_attempts_surface_sequence_conflict() {
        let store = Arc::new(MockStore::default());
        store.state.lock().unwrap().conflicts_to_inject = 10;
        let mut config = LedgerConfig::default();
        config.append.max_attempts = 3;
        let ledger = ledger_with(store.clone(), KeyRing::new(), &config);

        let result = ledger.record(view(&ledger, "t1", "a"));
        assert!(matches!(result, Err(LedgerError::SequenceConflict { .. })));
        assert_eq!(store.state.lock().unwrap().releases, 3);
    }

    #[test]
    fn store_failure_is_fatal_and_not_retried() {
        let store = Arc::new(MockStore::default());
        store.state.lock().unwrap().fail_appends = true;
        let ledger = ledger_with(store.clone(), KeyRing::new(), &LedgerConfig::default());

        match ledger.record(view(&ledger, "t1", "a")) {
            Err(LedgerError::Store { reason }) => assert!(reason.contains("disk full")),
            other => panic!("expected Store error, got {:?}", other),
        }
        assert_eq!(store.state.lock().unwrap().releases, 1);
    }

    #[test]
    fn unknown_explicit_policy_is_rejected_before_reserving() {
        let store = Arc::new(MockStore::default());
        let ledger = ledger_with(store.clone(), KeyRing::new(), &LedgerConfig::default());
        let event = ledger
            .event("t1")
            .actor("u")
            .action(Action::Create)
            .resource("matter", "m-1")
            .retention_policy("shred-daily")
            .build()
            .unwrap();

        match ledger.record(event) {
            Err(LedgerError::Validation { field, .. }) => assert_eq!(field, "retention_policy"),
            other => panic!("expected Validation error, got {:?}", other),
        }
        assert!(store.state.lock().unwrap().entries.is_empty());
    }

    #[test]
    fn active_key_signs_entries() {
        let store = Arc::new(MockStore::default());
        let mut keys = KeyRing::new();
        keys.insert_signing_key(3, SigningKey::from_bytes(&[9u8; 32]));
        keys.set_active(3).unwrap();
        let ledger = ledger_with(store, keys, &LedgerConfig::default());

        let entry = ledger
            .record(
                ledger
                    .event("t1")
                    .actor("u")
                    .action(Action::Delete)
                    .resource("document", "d-1")
                    .outcome(Outcome::Denied)
                    .build()
                    .unwrap(),
            )
            .unwrap();
        assert_eq!(entry.key_version, Some(3));
        assert_eq!(entry.signature.as_ref().map(String::len), Some(128));
    }

    #[test]
    fn seal_rejects_foreign_reservation() {
        let store = Arc::new(MockStore::default());
        let ledger = ledger_with(store, KeyRing::new(), &LedgerConfig::default());
        let reservation = SequenceReservation {
            tenant: TenantId::new("other"),
            sequence: 1,
            previous_hash: AuditEntry::GENESIS_HASH.to_string(),
        };
        let result = ledger.seal(view(&ledger, "t1", "a"), "retain-forever".to_string(), &reservation);
        assert!(matches!(result, Err(LedgerError::Validation { .. })));
    }

    // ── Streaming ─────────────────────────────────────────────────────────────

    #[test]
    fn iterate_pages_lazily_and_restarts() {
        let store = Arc::new(MockStore::default());
        let ledger = ledger_with(store.clone(), KeyRing::new(), &LedgerConfig::default());
        for doc in ["a", "b", "c", "d", "e"] {
            ledger.record(view(&ledger, "t1", doc)).unwrap();
        }
        ledger.record(view(&ledger, "t2", "x")).unwrap();

        let tenant = TenantId::new("t1");
        let mut stream = store.iterate(&tenant, 1).unwrap();
        assert_eq!(store.state.lock().unwrap().page_reads, 0, "iterate must not read eagerly");

        let first_two: Vec<u64> = stream
            .by_ref()
            .take(2)
            .map(|e| e.unwrap().sequence())
            .collect();
        assert_eq!(first_two, vec![1, 2]);
        assert_eq!(stream.next_sequence(), 3);

        let resumed: Vec<u64> = store
            .iterate(&tenant, stream.next_sequence())
            .unwrap()
            .map(|e| e.unwrap().sequence())
            .collect();
        assert_eq!(resumed, vec![3, 4, 5]);
    }

    #[test]
    fn iterate_is_bounded_by_head_at_open() {
        let store = Arc::new(MockStore::default());
        let ledger = ledger_with(store.clone(), KeyRing::new(), &LedgerConfig::default());
        ledger.record(view(&ledger, "t1", "a")).unwrap();
        ledger.record(view(&ledger, "t1", "b")).unwrap();

        let stream = store.iterate(&TenantId::new("t1"), 1).unwrap();
        ledger.record(view(&ledger, "t1", "c")).unwrap();

        assert_eq!(stream.through(), 2);
        assert_eq!(stream.count(), 2);
    }

    #[test]
    fn record_stream_wraps_decoded_entries() {
        let store = Arc::new(MockStore::default());
        let ledger = ledger_with(store.clone(), KeyRing::new(), &LedgerConfig::default());
        for doc in ["a", "b", "c"] {
            ledger.record(view(&ledger, "t1", doc)).unwrap();
        }

        let records: Vec<EntryRecord> = stream::EntryStream::records(store.as_ref(), TenantId::new("t1"), 2, 3, 1)
            .collect::<LedgerResult<_>>()
            .unwrap();
        assert_eq!(records.len(), 2);
        assert!(matches!(&records[0], EntryRecord::Entry(e) if e.sequence() == 2));
        assert_eq!(records[1].sequence(), 3);
    }

    #[test]
    fn tenants_lists_each_chain_once() {
        let store = Arc::new(MockStore::default());
        let ledger = ledger_with(store, KeyRing::new(), &LedgerConfig::default());
        ledger.record(view(&ledger, "b-firm", "1")).unwrap();
        ledger.record(view(&ledger, "a-firm", "1")).unwrap();
        ledger.record(view(&ledger, "b-firm", "2")).unwrap();
        assert_eq!(
            ledger.tenants().unwrap(),
            vec![TenantId::new("a-firm"), TenantId::new("b-firm")]
        );
    }
}
