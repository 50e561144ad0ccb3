//! Chain verifier for LedgerSeal tenant ledgers.
//!
//! `ChainVerifier` replays one tenant's entries in ascending sequence against
//! a running "expected previous hash".  Each entry's `previous_hash` must
//! equal it, and its `entry_hash` must recompute from it.  The running hash
//! advances to each entry's *stored* `entry_hash`, so one corrupted entry is
//! reported once instead of poisoning the rest of the chain.  An entry the
//! store can no longer decode is reported and skipped; the next readable
//! entry picks the chain up again from its own `previous_hash`.  All
//! findings are collected before returning.
//!
//! The verifier only reads from the store.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info, warn};

use ledgerseal_contracts::{
    entry::{AuditEntry, TenantId},
    error::LedgerResult,
    report::{BrokenLink, ChainReport, FindingKind},
};
use ledgerseal_core::{
    hasher::hash_entry,
    signer::{check_signature, SignatureFault},
    stream::EntryStream,
    EntryRecord, KeyResolver, LedgerStore,
};

/// Cooperative cancellation shared between a running scan and its owner.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask every scan holding a clone of this flag to stop.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Knobs for a verification run.
#[derive(Debug, Clone, Default)]
pub struct VerifyOptions {
    /// Treat an unsigned entry as `SIGNATURE_INVALID`.
    pub require_signatures: bool,
    /// Stop after this many entries; the report is then `truncated`.
    pub max_entries: Option<u64>,
    pub cancel: CancelFlag,
}

/// Replays tenant chains from a store.
pub struct ChainVerifier<'a, S: LedgerStore + ?Sized> {
    store: &'a S,
    keys: Option<&'a dyn KeyResolver>,
    options: VerifyOptions,
}

impl<'a, S: LedgerStore + ?Sized> ChainVerifier<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self {
            store,
            keys: None,
            options: VerifyOptions::default(),
        }
    }

    /// Resolve signature key versions through `keys`.  Without a resolver
    /// every signed entry is `SIGNATURE_UNVERIFIABLE`.
    pub fn with_keys(mut self, keys: &'a dyn KeyResolver) -> Self {
        self.keys = Some(keys);
        self
    }

    pub fn with_options(mut self, options: VerifyOptions) -> Self {
        self.options = options;
        self
    }

    /// Verify one tenant's chain.
    ///
    /// Returns `Err` only when the store itself cannot be read; every
    /// integrity problem is a `BrokenLink` in the report.
    pub fn verify_chain(&self, tenant: &TenantId) -> LedgerResult<ChainReport> {
        let head = self.store.chain_head(tenant)?;
        let checkpoint = self.store.latest_checkpoint(tenant)?;
        let (start, seed) = match &checkpoint {
            Some(cp) => (cp.sequence + 1, cp.entry_hash.clone()),
            None => (1, AuditEntry::GENESIS_HASH.to_string()),
        };
        // `None` after an undecodable entry: the next link cannot be checked.
        let mut running = Some(seed);

        debug!(
            tenant = %tenant,
            from = start,
            through = head.sequence,
            "chain verification started"
        );

        let mut report = ChainReport {
            tenant: tenant.clone(),
            verified: false,
            entry_count: 0,
            first_sequence: None,
            last_sequence: None,
            checkpoint_sequence: checkpoint.as_ref().map(|cp| cp.sequence),
            broken_links: Vec::new(),
            truncated: false,
        };

        let mut expected = start;
        let stream = EntryStream::records(
            self.store,
            tenant.clone(),
            start,
            head.sequence,
            self.store.page_size(),
        );
        for item in stream {
            if self.options.cancel.is_cancelled()
                || self.options.max_entries.is_some_and(|max| report.entry_count >= max)
            {
                report.truncated = true;
                break;
            }
            let record = item?;
            let sequence = record.sequence();

            if sequence < expected {
                Self::record(
                    &mut report,
                    sequence,
                    FindingKind::HashMismatch,
                    format!("entry out of order, expected sequence {}", expected),
                );
                continue;
            }
            if sequence > expected {
                Self::record(
                    &mut report,
                    expected,
                    FindingKind::SequenceGap,
                    gap_reason(expected, sequence - 1),
                );
                running = None;
            }

            match record {
                EntryRecord::Entry(entry) => {
                    self.check_hash(&mut report, &entry, running.as_deref())?;
                    self.check_signature(&mut report, &entry);
                    running = Some(entry.entry_hash);
                }
                EntryRecord::Unreadable { reason, .. } => {
                    Self::record(
                        &mut report,
                        sequence,
                        FindingKind::HashMismatch,
                        format!("entry cannot be decoded: {}", reason),
                    );
                    running = None;
                }
            }

            expected = sequence + 1;
            report.entry_count += 1;
            report.first_sequence.get_or_insert(sequence);
            report.last_sequence = Some(sequence);
        }

        if !report.truncated && head.sequence >= start {
            if expected <= head.sequence {
                Self::record(
                    &mut report,
                    expected,
                    FindingKind::SequenceGap,
                    format!("{} (chain head is {})", gap_reason(expected, head.sequence), head.sequence),
                );
            } else if running.as_ref().is_some_and(|hash| *hash != head.entry_hash) {
                Self::record(
                    &mut report,
                    head.sequence,
                    FindingKind::HashMismatch,
                    "chain head hash does not match the last stored entry".to_string(),
                );
            }
        }

        report.verified = !report.truncated && report.broken_links.is_empty();
        info!(
            tenant = %tenant,
            verified = report.verified,
            entries = report.entry_count,
            breaks = report.broken_links.len(),
            truncated = report.truncated,
            "chain verification finished"
        );
        Ok(report)
    }

    /// Verify several tenants independently, in the order given.
    ///
    /// A tenant whose store cannot be read gets an `Err` in its slot; the
    /// remaining tenants are still scanned.
    pub fn verify_tenants(&self, tenants: &[TenantId]) -> Vec<LedgerResult<ChainReport>> {
        tenants
            .iter()
            .map(|tenant| {
                let result = self.verify_chain(tenant);
                if let Err(e) = &result {
                    warn!(tenant = %tenant, error = %e, "chain could not be scanned");
                }
                result
            })
            .collect()
    }

    // ── Internal helpers ──────────────────────────────────────────────────────

    /// One finding at most per entry: a broken link first, else a hash that
    /// does not recompute.  Without a running hash the entry is checked
    /// against its own `previous_hash`.
    fn check_hash(
        &self,
        report: &mut ChainReport,
        entry: &AuditEntry,
        running: Option<&str>,
    ) -> LedgerResult<()> {
        if let Some(running) = running {
            if entry.previous_hash != running {
                let reason = format!(
                    "previous_hash {} does not link to the preceding entry {}",
                    short(&entry.previous_hash),
                    short(running)
                );
                Self::record(report, entry.sequence(), FindingKind::HashMismatch, reason);
                return Ok(());
            }
        }
        let recomputed = hash_entry(&entry.body, &entry.previous_hash)?;
        if recomputed != entry.entry_hash {
            let reason = format!(
                "stored entry_hash {} does not match recomputed {}",
                short(&entry.entry_hash),
                short(&recomputed)
            );
            Self::record(report, entry.sequence(), FindingKind::HashMismatch, reason);
        }
        Ok(())
    }

    fn check_signature(&self, report: &mut ChainReport, entry: &AuditEntry) {
        let sequence = entry.sequence();
        let Some(signature) = &entry.signature else {
            if self.options.require_signatures {
                Self::record(
                    report,
                    sequence,
                    FindingKind::SignatureInvalid,
                    "entry is unsigned".to_string(),
                );
            }
            return;
        };
        let Some(version) = entry.key_version else {
            Self::record(
                report,
                sequence,
                FindingKind::SignatureUnverifiable,
                "signature carries no key version".to_string(),
            );
            return;
        };
        let Some(key) = self.keys.and_then(|keys| keys.resolve_key(version)) else {
            Self::record(
                report,
                sequence,
                FindingKind::SignatureUnverifiable,
                format!("key version {} cannot be resolved", version),
            );
            return;
        };
        match check_signature(&key, &entry.entry_hash, signature) {
            Ok(()) => {}
            Err(SignatureFault::Malformed(e)) => Self::record(
                report,
                sequence,
                FindingKind::SignatureInvalid,
                format!("malformed signature: {}", e),
            ),
            Err(SignatureFault::Mismatch) => Self::record(
                report,
                sequence,
                FindingKind::SignatureInvalid,
                format!("signature does not verify under key version {}", version),
            ),
        }
    }

    fn record(report: &mut ChainReport, sequence: u64, kind: FindingKind, reason: String) {
        warn!(tenant = %report.tenant, sequence, kind = %kind, reason = %reason, "broken link");
        report.broken_links.push(BrokenLink {
            sequence,
            kind,
            reason,
        });
    }
}

fn gap_reason(first: u64, last: u64) -> String {
    if first == last {
        format!("sequence {} is missing", first)
    } else {
        format!("sequences {}..={} are missing", first, last)
    }
}

fn short(hash: &str) -> &str {
    hash.get(..12).unwrap_or(hash)
}

/// Verify `tenant` on `store` with `keys` and default options.
pub fn verify_chain<S: LedgerStore + ?Sized>(
    store: &S,
    keys: &dyn KeyResolver,
    tenant: &TenantId,
) -> LedgerResult<ChainReport> {
    ChainVerifier::new(store).with_keys(keys).verify_chain(tenant)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use ed25519_dalek::SigningKey;

    use ledgerseal_contracts::{
        chain::{ChainCheckpoint, ChainHead, SequenceReservation},
        entry::Action,
        error::LedgerError,
    };
    use ledgerseal_core::{EntryBuilder, KeyRing};

    use super::*;

    /// A store over a fixed list of entries that tests may edit directly.
    #[derive(Default)]
    struct FixedStore {
        entries: Mutex<Vec<AuditEntry>>,
        head: Mutex<Option<ChainHead>>,
        checkpoint: Option<ChainCheckpoint>,
        failing: Option<TenantId>,
        undecodable: Mutex<Vec<u64>>,
    }

    impl FixedStore {
        fn with_chain(n: u64, keys: &KeyRing) -> Self {
            let store = Self::default();
            let mut previous = AuditEntry::GENESIS_HASH.to_string();
            for sequence in 1..=n {
                let body = EntryBuilder::new("t1")
                    .actor("u")
                    .action(Action::View)
                    .resource("document", format!("d-{}", sequence))
                    .build()
                    .unwrap()
                    .into_body(sequence, "retain-forever".to_string());
                let entry_hash = hash_entry(&body, &previous).unwrap();
                let seal = keys.sign(&entry_hash).unwrap();
                store.entries.lock().unwrap().push(AuditEntry {
                    body,
                    previous_hash: previous.clone(),
                    entry_hash: entry_hash.clone(),
                    signature: seal.as_ref().map(|s| s.signature.clone()),
                    key_version: seal.map(|s| s.key_version),
                });
                previous = entry_hash;
            }
            store
        }

        fn edit(&self, sequence: u64, f: impl FnOnce(&mut AuditEntry)) {
            let mut entries = self.entries.lock().unwrap();
            let entry = entries.iter_mut().find(|e| e.sequence() == sequence).unwrap();
            f(entry);
        }

        fn remove(&self, sequence: u64) {
            self.entries.lock().unwrap().retain(|e| e.sequence() != sequence);
        }

        fn spoil(&self, sequence: u64) {
            self.undecodable.lock().unwrap().push(sequence);
        }
    }

    impl LedgerStore for FixedStore {
        fn reserve_sequence(&self, _tenant: &TenantId) -> LedgerResult<SequenceReservation> {
            unreachable!("the verifier never reserves")
        }

        fn release_sequence(&self, _reservation: &SequenceReservation) {}

        fn append(&self, _entry: AuditEntry) -> LedgerResult<AuditEntry> {
            unreachable!("the verifier never appends")
        }

        fn chain_head(&self, tenant: &TenantId) -> LedgerResult<ChainHead> {
            if let Some(head) = self.head.lock().unwrap().clone() {
                return Ok(head);
            }
            let mut head = ChainHead::genesis(tenant.clone());
            if let Some(last) = self.entries.lock().unwrap().last() {
                head.advance_to(last);
            }
            Ok(head)
        }

        fn latest_checkpoint(&self, _tenant: &TenantId) -> LedgerResult<Option<ChainCheckpoint>> {
            Ok(self.checkpoint.clone())
        }

        fn read_page(
            &self,
            tenant: &TenantId,
            from: u64,
            through: u64,
            limit: usize,
        ) -> LedgerResult<Vec<AuditEntry>> {
            if self.failing.as_ref() == Some(tenant) {
                return Err(LedgerError::store("disk unreadable"));
            }
            Ok(self
                .entries
                .lock()
                .unwrap()
                .iter()
                .filter(|e| e.sequence() >= from && e.sequence() <= through)
                .take(limit)
                .cloned()
                .collect())
        }

        fn read_records(
            &self,
            tenant: &TenantId,
            from: u64,
            through: u64,
            limit: usize,
        ) -> LedgerResult<Vec<EntryRecord>> {
            let undecodable = self.undecodable.lock().unwrap().clone();
            Ok(self
                .read_page(tenant, from, through, limit)?
                .into_iter()
                .map(|entry| {
                    if undecodable.contains(&entry.sequence()) {
                        EntryRecord::Unreadable {
                            sequence: entry.sequence(),
                            reason: "garbled".to_string(),
                        }
                    } else {
                        EntryRecord::Entry(entry)
                    }
                })
                .collect())
        }

        fn tenants(&self) -> LedgerResult<Vec<TenantId>> {
            Ok(vec![TenantId::new("t1")])
        }

        fn page_size(&self) -> usize {
            3
        }
    }

    fn t1() -> TenantId {
        TenantId::new("t1")
    }

    fn signing_ring() -> KeyRing {
        let mut keys = KeyRing::new();
        keys.insert_signing_key(1, SigningKey::from_bytes(&[5u8; 32]));
        keys.set_active(1).unwrap();
        keys
    }

    fn kinds(report: &ChainReport) -> Vec<(u64, FindingKind)> {
        report.broken_links.iter().map(|b| (b.sequence, b.kind)).collect()
    }

    #[test]
    fn intact_chain_verifies() {
        let keys = signing_ring();
        let store = FixedStore::with_chain(7, &keys);
        let report = verify_chain(&store, &keys, &t1()).unwrap();

        assert!(report.verified, "{:?}", report.broken_links);
        assert_eq!(report.entry_count, 7);
        assert_eq!(report.first_sequence, Some(1));
        assert_eq!(report.last_sequence, Some(7));
        assert_eq!(report.checkpoint_sequence, None);
    }

    #[test]
    fn empty_chain_verifies() {
        let store = FixedStore::default();
        let report = verify_chain(&store, &KeyRing::new(), &t1()).unwrap();
        assert!(report.verified);
        assert_eq!(report.entry_count, 0);
        assert_eq!(report.first_sequence, None);
    }

    #[test]
    fn edited_field_breaks_only_that_entry() {
        let keys = KeyRing::new();
        let store = FixedStore::with_chain(6, &keys);
        store.edit(3, |e| e.body.actor.0 = "someone-else".to_string());

        let report = verify_chain(&store, &keys, &t1()).unwrap();
        assert!(!report.verified);
        assert_eq!(kinds(&report), vec![(3, FindingKind::HashMismatch)]);
        assert_eq!(report.entry_count, 6);
    }

    #[test]
    fn rewritten_hash_is_caught_at_the_next_link() {
        let keys = KeyRing::new();
        let store = FixedStore::with_chain(4, &keys);
        // Recompute entry 2 consistently after editing it; entry 3 no longer links.
        store.edit(2, |e| {
            e.body.resource.id = "forged".to_string();
            e.entry_hash = hash_entry(&e.body, &e.previous_hash).unwrap();
        });

        let report = verify_chain(&store, &keys, &t1()).unwrap();
        assert_eq!(kinds(&report), vec![(3, FindingKind::HashMismatch)]);
        assert!(report.broken_links[0].reason.contains("does not link"));
    }

    #[test]
    fn previous_hash_edit_alone_is_a_single_finding() {
        let keys = KeyRing::new();
        let store = FixedStore::with_chain(5, &keys);
        store.edit(3, |e| e.previous_hash = "ab".repeat(32));

        let report = verify_chain(&store, &keys, &t1()).unwrap();
        assert_eq!(kinds(&report), vec![(3, FindingKind::HashMismatch)]);
        assert!(report.broken_links[0].reason.contains("does not link"));
        assert_eq!(report.entry_count, 5);
    }

    #[test]
    fn undecodable_entry_is_reported_and_scan_continues() {
        let keys = KeyRing::new();
        let store = FixedStore::with_chain(6, &keys);
        store.spoil(3);
        store.edit(5, |e| e.body.actor.0 = "mallory".to_string());

        let report = verify_chain(&store, &keys, &t1()).unwrap();
        assert!(!report.verified);
        assert_eq!(
            kinds(&report),
            vec![(3, FindingKind::HashMismatch), (5, FindingKind::HashMismatch)]
        );
        assert!(report.broken_links[0].reason.contains("cannot be decoded"));
        assert_eq!(report.entry_count, 6);
        assert_eq!(report.last_sequence, Some(6));
    }

    #[test]
    fn undecodable_last_entry_skips_head_hash_check() {
        let keys = KeyRing::new();
        let store = FixedStore::with_chain(3, &keys);
        store.spoil(3);

        let report = verify_chain(&store, &keys, &t1()).unwrap();
        assert_eq!(kinds(&report), vec![(3, FindingKind::HashMismatch)]);
    }

    #[test]
    fn missing_entry_is_a_single_gap() {
        let keys = KeyRing::new();
        let store = FixedStore::with_chain(6, &keys);
        store.remove(4);

        let report = verify_chain(&store, &keys, &t1()).unwrap();
        assert_eq!(kinds(&report), vec![(4, FindingKind::SequenceGap)]);
        assert_eq!(report.entry_count, 5);
    }

    #[test]
    fn truncated_tail_is_a_gap_against_the_head() {
        let keys = KeyRing::new();
        let store = FixedStore::with_chain(5, &keys);
        let head = store.chain_head(&t1()).unwrap();
        *store.head.lock().unwrap() = Some(head);
        store.remove(5);
        store.remove(4);

        let report = verify_chain(&store, &keys, &t1()).unwrap();
        assert_eq!(kinds(&report), vec![(4, FindingKind::SequenceGap)]);
    }

    #[test]
    fn forged_head_hash_is_reported() {
        let keys = KeyRing::new();
        let store = FixedStore::with_chain(3, &keys);
        let mut head = store.chain_head(&t1()).unwrap();
        head.entry_hash = "e".repeat(64);
        *store.head.lock().unwrap() = Some(head);

        let report = verify_chain(&store, &keys, &t1()).unwrap();
        assert_eq!(kinds(&report), vec![(3, FindingKind::HashMismatch)]);
    }

    #[test]
    fn signature_findings() {
        let keys = signing_ring();
        let store = FixedStore::with_chain(4, &keys);
        store.edit(1, |e| e.signature = Some("00".repeat(64)));
        store.edit(2, |e| e.key_version = Some(9));
        store.edit(3, |e| e.key_version = None);
        store.edit(4, |e| {
            e.signature = None;
            e.key_version = None;
        });

        let options = VerifyOptions {
            require_signatures: true,
            ..VerifyOptions::default()
        };
        let report = ChainVerifier::new(&store)
            .with_keys(&keys)
            .with_options(options)
            .verify_chain(&t1())
            .unwrap();
        assert_eq!(
            kinds(&report),
            vec![
                (1, FindingKind::SignatureInvalid),
                (2, FindingKind::SignatureUnverifiable),
                (3, FindingKind::SignatureUnverifiable),
                (4, FindingKind::SignatureInvalid),
            ]
        );
    }

    #[test]
    fn signed_entries_without_resolver_are_unverifiable() {
        let keys = signing_ring();
        let store = FixedStore::with_chain(2, &keys);
        let report = ChainVerifier::new(&store).verify_chain(&t1()).unwrap();
        assert_eq!(report.count(FindingKind::SignatureUnverifiable), 2);
        assert_eq!(report.count(FindingKind::HashMismatch), 0);
    }

    #[test]
    fn max_entries_truncates_and_never_verifies() {
        let keys = KeyRing::new();
        let store = FixedStore::with_chain(10, &keys);
        let options = VerifyOptions {
            max_entries: Some(4),
            ..VerifyOptions::default()
        };
        let report = ChainVerifier::new(&store)
            .with_options(options)
            .verify_chain(&t1())
            .unwrap();
        assert!(report.truncated);
        assert!(!report.verified);
        assert_eq!(report.entry_count, 4);
        assert_eq!(report.last_sequence, Some(4));
        assert!(report.broken_links.is_empty());
    }

    #[test]
    fn cancelled_scan_is_truncated() {
        let store = FixedStore::with_chain(3, &KeyRing::new());
        let cancel = CancelFlag::new();
        cancel.cancel();
        let report = ChainVerifier::new(&store)
            .with_options(VerifyOptions {
                cancel,
                ..VerifyOptions::default()
            })
            .verify_chain(&t1())
            .unwrap();
        assert!(report.truncated);
        assert_eq!(report.entry_count, 0);
        assert!(!report.verified);
    }

    #[test]
    fn checkpoint_seeds_the_running_hash() {
        let keys = KeyRing::new();
        let mut store = FixedStore::with_chain(5, &keys);
        let anchor = store.entries.lock().unwrap()[1].clone();
        store.remove(1);
        store.remove(2);
        store.checkpoint = Some(ChainCheckpoint {
            tenant: t1(),
            sequence: 2,
            entry_hash: anchor.entry_hash.clone(),
            purged_count: 2,
            created_at: chrono::Utc::now(),
        });

        let report = verify_chain(&store, &keys, &t1()).unwrap();
        assert!(report.verified, "{:?}", report.broken_links);
        assert_eq!(report.checkpoint_sequence, Some(2));
        assert_eq!(report.first_sequence, Some(3));

        // A checkpoint carrying the wrong hash breaks the first retained link.
        store.checkpoint.as_mut().unwrap().entry_hash = "1".repeat(64);
        let report = verify_chain(&store, &keys, &t1()).unwrap();
        assert_eq!(kinds(&report), vec![(3, FindingKind::HashMismatch)]);
    }

    #[test]
    fn unreadable_store_is_an_error() {
        let store = FixedStore {
            failing: Some(t1()),
            ..FixedStore::with_chain(2, &KeyRing::new())
        };
        assert!(matches!(
            verify_chain(&store, &KeyRing::new(), &t1()),
            Err(LedgerError::Store { .. })
        ));
    }

    #[test]
    fn verify_tenants_keeps_going_past_an_unreadable_tenant() {
        let store = FixedStore {
            failing: Some(TenantId::new("t0")),
            ..FixedStore::with_chain(2, &KeyRing::new())
        };
        let results = ChainVerifier::new(&store).verify_tenants(&[TenantId::new("t0"), t1()]);
        assert_eq!(results.len(), 2);
        assert!(matches!(results[0], Err(LedgerError::Store { .. })));
        assert!(results[1].as_ref().unwrap().verified);
    }
}
