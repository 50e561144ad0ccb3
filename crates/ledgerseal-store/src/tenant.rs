//! Per-tenant write lease and append admission rules shared by the stores.

use std::sync::{Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tracing::debug;

use ledgerseal_contracts::{
    chain::{ChainCheckpoint, ChainHead, SequenceReservation},
    entry::{AuditEntry, TenantId},
    error::{LedgerError, LedgerResult},
};
use ledgerseal_core::hasher::is_hash_hex;

/// Single-writer lease for one tenant.
///
/// At most one `SequenceReservation` per tenant is outstanding.  Other
/// reservers wait on the condvar until it is appended or released.
pub(crate) struct SequenceGate {
    reserved: Mutex<Option<u64>>,
    freed: Condvar,
    timeout: Duration,
}

impl SequenceGate {
    pub(crate) fn new(timeout: Duration) -> Self {
        Self {
            reserved: Mutex::new(None),
            freed: Condvar::new(),
            timeout,
        }
    }

    /// Wait for the lease, then let `next` compute the reservation while the
    /// lease is held.
    pub(crate) fn acquire<F>(&self, tenant: &TenantId, next: F) -> LedgerResult<SequenceReservation>
    where
        F: FnOnce() -> LedgerResult<SequenceReservation>,
    {
        let started = Instant::now();
        let guard = self.reserved.lock().map_err(|e| {
            LedgerError::store(format!("sequence gate lock poisoned: {}", e))
        })?;
        let (mut guard, wait) = self
            .freed
            .wait_timeout_while(guard, self.timeout, |reserved| reserved.is_some())
            .map_err(|e| LedgerError::store(format!("sequence gate lock poisoned: {}", e)))?;

        if wait.timed_out() && guard.is_some() {
            return Err(LedgerError::Timeout {
                tenant: tenant.to_string(),
                waited_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            });
        }

        let reservation = next()?;
        *guard = Some(reservation.sequence);
        debug!(tenant = %tenant, sequence = reservation.sequence, "sequence lease taken");
        Ok(reservation)
    }

    /// Free the lease if it is still held for `sequence`.
    pub(crate) fn release(&self, sequence: u64) {
        let mut guard = self.reserved.lock().unwrap_or_else(PoisonError::into_inner);
        if *guard == Some(sequence) {
            *guard = None;
            self.freed.notify_one();
        }
    }
}

/// Decide whether `entry` may extend a chain whose head is `head`.
pub(crate) fn check_append(
    head: &ChainHead,
    checkpoint: Option<&ChainCheckpoint>,
    entry: &AuditEntry,
) -> LedgerResult<()> {
    let tenant = entry.tenant().to_string();
    let sequence = entry.sequence();

    if let Some(cp) = checkpoint {
        if sequence <= cp.sequence {
            return Err(LedgerError::ImmutabilityViolation {
                tenant,
                sequence,
                reason: format!("sequence lies inside the prefix purged at checkpoint {}", cp.sequence),
            });
        }
    }
    if sequence == 0 {
        return Err(LedgerError::validation("sequence", "sequences start at 1"));
    }
    if !is_hash_hex(&entry.entry_hash) {
        return Err(LedgerError::validation("entry_hash", "must be 64 lowercase hex characters"));
    }
    if sequence <= head.sequence {
        return Err(LedgerError::SequenceConflict {
            tenant,
            sequence,
            reason: "sequence is already occupied".to_string(),
        });
    }
    if sequence != head.sequence + 1 {
        return Err(LedgerError::SequenceConflict {
            tenant,
            sequence,
            reason: format!("sequence does not follow chain head {}", head.sequence),
        });
    }
    if entry.previous_hash != head.entry_hash {
        return Err(LedgerError::SequenceConflict {
            tenant,
            sequence,
            reason: "previous_hash does not match the chain head".to_string(),
        });
    }
    Ok(())
}

/// Reservation for the slot after `head`.
pub(crate) fn next_reservation(head: &ChainHead) -> SequenceReservation {
    SequenceReservation {
        tenant: head.tenant.clone(),
        sequence: head.sequence + 1,
        previous_hash: head.entry_hash.clone(),
    }
}
