//! The append pipeline.
//!
//! Every audited action goes through the same explicit steps:
//!
//!   EntryBuilder → reserve_sequence → hash → sign → append
//!
//! `AuditLedger::record` returns only after the entry is durably appended.
//! Callers must treat an `Err` as failure of the action being audited: no
//! compliance-relevant action completes without its evidence.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use ledgerseal_contracts::{
    chain::SequenceReservation,
    config::{AppendConfig, LedgerConfig, RetentionConfig},
    entry::{AuditEntry, TenantId},
    error::{LedgerError, LedgerResult},
};

use crate::{
    builder::{AuditEvent, EntryBuilder},
    hasher::hash_entry,
    signer::KeyRing,
    traits::LedgerStore,
};

/// Writes audit events to a store as hashed, signed chain entries.
///
/// Cheap to share: clone the `Arc`s or wrap the ledger itself in one.
pub struct AuditLedger {
    store: Arc<dyn LedgerStore>,
    keys: Arc<KeyRing>,
    append: AppendConfig,
    retention: RetentionConfig,
}

impl AuditLedger {
    pub fn new(store: Arc<dyn LedgerStore>, keys: Arc<KeyRing>, config: &LedgerConfig) -> Self {
        Self {
            store,
            keys,
            append: config.append.clone(),
            retention: config.retention.clone(),
        }
    }

    /// A builder for `tenant` using this ledger's clock-skew limit.
    pub fn event(&self, tenant: impl Into<String>) -> EntryBuilder {
        EntryBuilder::new(tenant).max_clock_skew(self.append.max_clock_skew())
    }

    /// Append `event` to its tenant's chain.
    ///
    /// # Pipeline
    ///
    /// 1. Resolve the retention policy (explicit, else routed by action)
    /// 2. Reserve the next sequence (takes the tenant's write lease)
    /// 3. Hash the body against the reserved `previous_hash`
    /// 4. Sign the hash with the active key, if any
    /// 5. Append; on `SequenceConflict` release and go back to step 2
    ///
    /// Every failure path releases the reservation.
    pub fn record(&self, event: AuditEvent) -> LedgerResult<AuditEntry> {
        let policy = self.resolve_policy(&event)?;
        let tenant = event.tenant.clone();
        let mut last_conflict = None;

        for attempt in 1..=self.append.max_attempts {
            let reservation = self.store.reserve_sequence(&tenant)?;
            debug!(
                tenant = %tenant,
                sequence = reservation.sequence,
                attempt,
                "sequence reserved"
            );

            let entry = match self.seal(event.clone(), policy.clone(), &reservation) {
                Ok(entry) => entry,
                Err(e) => {
                    self.store.release_sequence(&reservation);
                    error!(tenant = %tenant, error = %e, "failed to seal audit entry");
                    return Err(e);
                }
            };

            match self.store.append(entry) {
                Ok(stored) => {
                    info!(
                        tenant = %tenant,
                        sequence = stored.sequence(),
                        action = %stored.body.action,
                        outcome = %stored.body.outcome,
                        entry_hash = %stored.entry_hash,
                        "audit entry appended"
                    );
                    return Ok(stored);
                }
                Err(e) if e.is_retryable() => {
                    self.store.release_sequence(&reservation);
                    warn!(tenant = %tenant, attempt, error = %e, "append lost a sequence race, retrying");
                    last_conflict = Some(e);
                }
                Err(e) => {
                    self.store.release_sequence(&reservation);
                    error!(tenant = %tenant, error = %e, "audit append failed");
                    return Err(e);
                }
            }
        }

        Err(last_conflict.unwrap_or_else(|| LedgerError::SequenceConflict {
            tenant: tenant.to_string(),
            sequence: 0,
            reason: "no append attempts were made".to_string(),
        }))
    }

    /// Turn `event` into a sealed entry at `reservation`.  No I/O.
    pub fn seal(
        &self,
        event: AuditEvent,
        retention_policy: String,
        reservation: &SequenceReservation,
    ) -> LedgerResult<AuditEntry> {
        if event.tenant != reservation.tenant {
            return Err(LedgerError::validation(
                "tenant",
                format!(
                    "event for '{}' cannot use a reservation for '{}'",
                    event.tenant, reservation.tenant
                ),
            ));
        }

        let body = event.into_body(reservation.sequence, retention_policy);
        let entry_hash = hash_entry(&body, &reservation.previous_hash)?;
        let seal = self.keys.sign(&entry_hash)?;

        Ok(AuditEntry {
            body,
            previous_hash: reservation.previous_hash.clone(),
            entry_hash,
            signature: seal.as_ref().map(|s| s.signature.clone()),
            key_version: seal.map(|s| s.key_version),
        })
    }

    /// The store this ledger appends to.
    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    /// Tenants with at least one chain in the store.
    pub fn tenants(&self) -> LedgerResult<Vec<TenantId>> {
        self.store.tenants()
    }

    fn resolve_policy(&self, event: &AuditEvent) -> LedgerResult<String> {
        match &event.retention_policy {
            Some(name) => {
                let known = self
                    .retention
                    .all_policies()
                    .iter()
                    .any(|p| &p.name == name);
                if known {
                    Ok(name.clone())
                } else {
                    Err(LedgerError::validation(
                        "retention_policy",
                        format!("'{}' is not a configured policy", name),
                    ))
                }
            }
            None => Ok(self.retention.policy_for(event.action).to_string()),
        }
    }
}
