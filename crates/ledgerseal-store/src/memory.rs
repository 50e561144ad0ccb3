//! In-memory implementation of `LedgerStore` and `PurgeStore`.
//!
//! Each tenant gets its own slot (chain mutex + sequence gate).  The tenant
//! map lock is held only long enough to find or create a slot, so appends
//! for different tenants never wait on each other.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use tracing::{info, warn};

use ledgerseal_contracts::{
    chain::{ChainCheckpoint, ChainHead, SequenceReservation},
    config::StoreConfig,
    entry::{AuditEntry, TenantId},
    error::{LedgerError, LedgerResult},
};
use ledgerseal_core::{builder::validate_tenant, LedgerStore, PurgeStore};

use crate::tenant::{check_append, next_reservation, SequenceGate};

pub(crate) struct TenantChain {
    pub(crate) head: ChainHead,
    pub(crate) entries: BTreeMap<u64, AuditEntry>,
    pub(crate) checkpoint: Option<ChainCheckpoint>,
}

struct TenantSlot {
    chain: Mutex<TenantChain>,
    gate: SequenceGate,
}

/// A volatile ledger store.  Suitable for tests and single-process use.
pub struct MemoryLedgerStore {
    tenants: RwLock<HashMap<TenantId, Arc<TenantSlot>>>,
    page_size: usize,
    reservation_timeout: Duration,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::with_config(&StoreConfig::default())
    }

    pub fn with_config(config: &StoreConfig) -> Self {
        Self {
            tenants: RwLock::new(HashMap::new()),
            page_size: config.page_size.max(1),
            reservation_timeout: Duration::from_millis(config.reservation_timeout_ms),
        }
    }

    fn existing(&self, tenant: &TenantId) -> LedgerResult<Option<Arc<TenantSlot>>> {
        let map = self
            .tenants
            .read()
            .map_err(|e| LedgerError::store(format!("tenant map lock poisoned: {}", e)))?;
        Ok(map.get(tenant).cloned())
    }

    fn slot(&self, tenant: &TenantId) -> LedgerResult<Arc<TenantSlot>> {
        if let Some(slot) = self.existing(tenant)? {
            return Ok(slot);
        }
        validate_tenant(tenant.as_str())?;
        let mut map = self
            .tenants
            .write()
            .map_err(|e| LedgerError::store(format!("tenant map lock poisoned: {}", e)))?;
        let slot = map.entry(tenant.clone()).or_insert_with(|| {
            Arc::new(TenantSlot {
                chain: Mutex::new(TenantChain {
                    head: ChainHead::genesis(tenant.clone()),
                    entries: BTreeMap::new(),
                    checkpoint: None,
                }),
                gate: SequenceGate::new(self.reservation_timeout),
            })
        });
        Ok(Arc::clone(slot))
    }

    /// Run `f` against a tenant's raw chain state.
    #[cfg(test)]
    pub(crate) fn with_chain<R>(&self, tenant: &TenantId, f: impl FnOnce(&mut TenantChain) -> R) -> R {
        let slot = self.slot(tenant).unwrap();
        let mut chain = slot.chain.lock().unwrap();
        f(&mut chain)
    }
}

impl Default for MemoryLedgerStore {
    fn default() -> Self {
        Self::new()
    }
}

fn lock_chain(slot: &TenantSlot) -> LedgerResult<std::sync::MutexGuard<'_, TenantChain>> {
    slot.chain
        .lock()
        .map_err(|e| LedgerError::store(format!("tenant chain lock poisoned: {}", e)))
}

impl LedgerStore for MemoryLedgerStore {
    fn reserve_sequence(&self, tenant: &TenantId) -> LedgerResult<SequenceReservation> {
        let slot = self.slot(tenant)?;
        slot.gate
            .acquire(tenant, || Ok(next_reservation(&lock_chain(&slot)?.head)))
    }

    fn release_sequence(&self, reservation: &SequenceReservation) {
        if let Ok(Some(slot)) = self.existing(&reservation.tenant) {
            slot.gate.release(reservation.sequence);
        }
    }

    fn append(&self, entry: AuditEntry) -> LedgerResult<AuditEntry> {
        let slot = self.slot(entry.tenant())?;
        let sequence = entry.sequence();
        {
            let mut chain = lock_chain(&slot)?;
            if let Err(e) = check_append(&chain.head, chain.checkpoint.as_ref(), &entry) {
                warn!(tenant = %entry.tenant(), sequence, error = %e, "append rejected");
                return Err(e);
            }
            chain.head.advance_to(&entry);
            chain.entries.insert(sequence, entry.clone());
        }
        slot.gate.release(sequence);
        Ok(entry)
    }

    fn chain_head(&self, tenant: &TenantId) -> LedgerResult<ChainHead> {
        match self.existing(tenant)? {
            Some(slot) => Ok(lock_chain(&slot)?.head.clone()),
            None => Ok(ChainHead::genesis(tenant.clone())),
        }
    }

    fn latest_checkpoint(&self, tenant: &TenantId) -> LedgerResult<Option<ChainCheckpoint>> {
        match self.existing(tenant)? {
            Some(slot) => Ok(lock_chain(&slot)?.checkpoint.clone()),
            None => Ok(None),
        }
    }

    fn read_page(
        &self,
        tenant: &TenantId,
        from: u64,
        through: u64,
        limit: usize,
    ) -> LedgerResult<Vec<AuditEntry>> {
        if from > through {
            return Ok(Vec::new());
        }
        let Some(slot) = self.existing(tenant)? else {
            return Ok(Vec::new());
        };
        let chain = lock_chain(&slot)?;
        Ok(chain
            .entries
            .range(from..=through)
            .take(limit)
            .map(|(_, entry)| entry.clone())
            .collect())
    }

    fn tenants(&self) -> LedgerResult<Vec<TenantId>> {
        let map = self
            .tenants
            .read()
            .map_err(|e| LedgerError::store(format!("tenant map lock poisoned: {}", e)))?;
        let mut tenants = Vec::new();
        for (tenant, slot) in map.iter() {
            if !lock_chain(slot)?.head.is_empty() {
                tenants.push(tenant.clone());
            }
        }
        tenants.sort();
        Ok(tenants)
    }

    fn page_size(&self) -> usize {
        self.page_size
    }
}

impl PurgeStore for MemoryLedgerStore {
    fn purge_prefix(&self, checkpoint: &ChainCheckpoint) -> LedgerResult<u64> {
        let violation = |reason: String| LedgerError::ImmutabilityViolation {
            tenant: checkpoint.tenant.to_string(),
            sequence: checkpoint.sequence,
            reason,
        };
        let slot = self
            .existing(&checkpoint.tenant)?
            .ok_or_else(|| violation("tenant has no chain".to_string()))?;
        let mut chain = lock_chain(&slot)?;

        match chain.entries.get(&checkpoint.sequence) {
            Some(entry) if entry.entry_hash == checkpoint.entry_hash => {}
            Some(_) => return Err(violation("checkpoint hash does not match the stored entry".to_string())),
            None => return Err(violation("checkpoint names no stored entry".to_string())),
        }

        let retained = chain.entries.split_off(&(checkpoint.sequence + 1));
        let removed = chain.entries.len() as u64;
        chain.entries = retained;
        chain.checkpoint = Some(ChainCheckpoint {
            purged_count: removed,
            ..checkpoint.clone()
        });

        info!(
            tenant = %checkpoint.tenant,
            through = checkpoint.sequence,
            removed,
            "prefix purged behind checkpoint"
        );
        Ok(removed)
    }
}
