//! Trait seams of the ledger.
//!
//! - `LedgerStore`: append-only, per-tenant sequenced persistence
//! - `PurgeStore`: the single, checkpointed deletion path
//! - `KeyResolver`: historical key lookup for signature verification
//!
//! There is no update or delete method for entries; the only removal is
//! `PurgeStore::purge_prefix`.

use ed25519_dalek::VerifyingKey;

use ledgerseal_contracts::{
    chain::{ChainCheckpoint, ChainHead, SequenceReservation},
    entry::{AuditEntry, TenantId},
    error::LedgerResult,
};

use crate::stream::EntryStream;

/// One stored entry as the store could decode it.
#[derive(Debug, Clone, PartialEq)]
pub enum EntryRecord {
    Entry(AuditEntry),
    /// Stored under `sequence` but no longer decodes as an `AuditEntry`.
    Unreadable { sequence: u64, reason: String },
}

impl EntryRecord {
    pub fn sequence(&self) -> u64 {
        match self {
            EntryRecord::Entry(entry) => entry.sequence(),
            EntryRecord::Unreadable { sequence, .. } => *sequence,
        }
    }
}

/// Page size used by `iterate` when a store does not override it.
pub const DEFAULT_PAGE_SIZE: usize = 256;

/// Durable, append-only storage for every tenant's chain.
pub trait LedgerStore: Send + Sync {
    /// Take the tenant's write lease and return the next sequence together
    /// with the hash it must link to.
    ///
    /// Never hands the same sequence to two callers at once.  Blocks while
    /// another reservation for the same tenant is outstanding and fails with
    /// `LedgerError::Timeout` if that takes too long.  Tenants never wait on
    /// each other.
    fn reserve_sequence(&self, tenant: &TenantId) -> LedgerResult<SequenceReservation>;

    /// Give back a reservation that will not be appended.  Idempotent.
    fn release_sequence(&self, reservation: &SequenceReservation);

    /// Persist `entry` and advance the chain head in one atomic step.
    ///
    /// Fails with `SequenceConflict` if the sequence is occupied or does not
    /// extend the current head, and with `ImmutabilityViolation` if it falls
    /// inside a purged prefix.  Releases the matching reservation on success.
    fn append(&self, entry: AuditEntry) -> LedgerResult<AuditEntry>;

    /// Latest sequence and hash for `tenant` (genesis if nothing appended).
    fn chain_head(&self, tenant: &TenantId) -> LedgerResult<ChainHead>;

    /// The most recent purge checkpoint, if the tenant was ever truncated.
    fn latest_checkpoint(&self, tenant: &TenantId) -> LedgerResult<Option<ChainCheckpoint>>;

    /// Up to `limit` entries with `from <= sequence <= through`, ascending.
    fn read_page(
        &self,
        tenant: &TenantId,
        from: u64,
        through: u64,
        limit: usize,
    ) -> LedgerResult<Vec<AuditEntry>>;

    /// Like `read_page`, but a stored entry that cannot be decoded comes back
    /// as `EntryRecord::Unreadable` instead of failing the whole page.
    ///
    /// Stores that cannot hold undecodable data keep the default.
    fn read_records(
        &self,
        tenant: &TenantId,
        from: u64,
        through: u64,
        limit: usize,
    ) -> LedgerResult<Vec<EntryRecord>> {
        Ok(self
            .read_page(tenant, from, through, limit)?
            .into_iter()
            .map(EntryRecord::Entry)
            .collect())
    }

    /// Every tenant that has a chain.
    fn tenants(&self) -> LedgerResult<Vec<TenantId>>;

    /// Entries fetched per `read_page` call while streaming.
    fn page_size(&self) -> usize {
        DEFAULT_PAGE_SIZE
    }

    /// Lazily stream `tenant`'s entries from `from` upwards.
    ///
    /// The stream is bounded by the head observed now: entries appended
    /// afterwards are not yielded.  Restart from any point with a new call.
    fn iterate(&self, tenant: &TenantId, from: u64) -> LedgerResult<EntryStream<'_, Self>>
    where
        Self: Sized,
    {
        let head = self.chain_head(tenant)?;
        Ok(EntryStream::new(
            self,
            tenant.clone(),
            from.max(1),
            head.sequence,
            self.page_size(),
        ))
    }
}

/// The checkpointed-truncation path used by the retention manager.
pub trait PurgeStore: LedgerStore {
    /// Remove every entry with `sequence <= checkpoint.sequence` and record
    /// the checkpoint as the tenant's new trusted genesis.
    ///
    /// Rejected with `ImmutabilityViolation` unless the checkpoint names a
    /// currently stored entry by sequence and exact `entry_hash`.  Returns
    /// the number of entries removed.
    fn purge_prefix(&self, checkpoint: &ChainCheckpoint) -> LedgerResult<u64>;
}

/// Resolves a key version to the public key that verifies its signatures.
///
/// Backed by external secret management in production.  Unknown versions
/// return `None`, which the verifier reports as `SIGNATURE_UNVERIFIABLE`.
pub trait KeyResolver: Send + Sync {
    fn resolve_key(&self, key_version: u32) -> Option<VerifyingKey>;
}
