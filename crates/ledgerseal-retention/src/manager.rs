//! Retention manager: checkpointed prefix purge.
//!
//! Deleting an interior entry would break the chain for every later entry,
//! so only a prefix `first..=k` is ever removed.  Before removal the manager
//! recomputes the prefix's hashes; entry `k`'s hash becomes the
//! `ChainCheckpoint` the verifier uses as the new genesis.
//!
//! Default behaviour is to purge nothing: an entry is only eligible when its
//! policy allows purge, its retention period is over, and neither the policy
//! nor the tenant is under legal hold.  Eligibility is checked again when a
//! plan is applied, against the holds in force at that moment.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use ledgerseal_contracts::{
    chain::ChainCheckpoint,
    config::RetentionConfig,
    entry::{AuditEntry, TenantId},
    error::{LedgerError, LedgerResult},
};
use ledgerseal_core::{hasher::hash_entry, stream::EntryStream, EntryRecord, PurgeStore};

use crate::policy::PolicyRegistry;

/// A purge the manager has checked and is ready to apply.
///
/// Only `RetentionManager::plan` creates one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurgePlan {
    checkpoint: ChainCheckpoint,
}

impl PurgePlan {
    /// The checkpoint the purge will leave behind.
    pub fn checkpoint(&self) -> &ChainCheckpoint {
        &self.checkpoint
    }

    pub fn into_checkpoint(self) -> ChainCheckpoint {
        self.checkpoint
    }
}

/// What a sweep did for one tenant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurgeOutcome {
    pub tenant: TenantId,
    /// Entries removed.  Zero when nothing was eligible.
    pub purged: u64,
    pub checkpoint: Option<ChainCheckpoint>,
    /// Set when the tenant was skipped because its prefix failed integrity checks.
    pub skipped: Option<String>,
}

/// How an ineligible entry ends a prefix walk.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Walk {
    /// Stop quietly before it (scheduled sweeps).
    StopAtBlocked,
    /// Refuse the whole purge (explicit operator requests).
    RejectBlocked,
}

/// Plans and applies retention purges against a `PurgeStore`.
pub struct RetentionManager {
    store: Arc<dyn PurgeStore>,
    registry: RwLock<PolicyRegistry>,
}

impl RetentionManager {
    pub fn new(store: Arc<dyn PurgeStore>, registry: PolicyRegistry) -> Self {
        Self {
            store,
            registry: RwLock::new(registry),
        }
    }

    pub fn from_config(store: Arc<dyn PurgeStore>, config: &RetentionConfig) -> LedgerResult<Self> {
        Ok(Self::new(store, PolicyRegistry::from_config(config)?))
    }

    /// Find the longest purgeable prefix of `tenant` at `now`.
    ///
    /// `Ok(None)` when the first retained entry is not eligible.  Fails with
    /// `IntegrityFailure` if the prefix is not hash-consistent: a broken
    /// prefix is never destroyed.
    pub fn plan(&self, tenant: &TenantId, now: DateTime<Utc>) -> LedgerResult<Option<PurgePlan>> {
        if self.registry()?.is_tenant_held(tenant) {
            debug!(tenant = %tenant, "tenant under legal hold, nothing to plan");
            return Ok(None);
        }
        let through = self.store.chain_head(tenant)?.sequence;
        self.walk(tenant, through, now, Walk::StopAtBlocked)
    }

    /// Apply a plan produced by `plan`.  Returns the number of entries removed.
    ///
    /// The prefix is walked again first, at the plan's time but under the
    /// holds in force now.  If any entry is no longer eligible, or the chain
    /// no longer ends the prefix at the planned hash, the purge is an
    /// `ImmutabilityViolation` and nothing is removed.
    pub fn apply(&self, plan: &PurgePlan) -> LedgerResult<u64> {
        let planned = &plan.checkpoint;
        let fresh = self.checked_prefix(&planned.tenant, planned.sequence, planned.created_at)?;
        if fresh.checkpoint.entry_hash != planned.entry_hash
            || fresh.checkpoint.purged_count != planned.purged_count
        {
            warn!(tenant = %planned.tenant, through = planned.sequence, "stale purge plan refused");
            return Err(LedgerError::ImmutabilityViolation {
                tenant: planned.tenant.to_string(),
                sequence: planned.sequence,
                reason: "plan no longer matches the stored chain".to_string(),
            });
        }
        self.commit(plan)
    }

    /// Plan and apply for every tenant in the store.
    ///
    /// A tenant whose prefix fails integrity checks is skipped and reported;
    /// other tenants are still swept.
    pub fn sweep(&self, now: DateTime<Utc>) -> LedgerResult<Vec<PurgeOutcome>> {
        let mut outcomes = Vec::new();
        for tenant in self.store.tenants()? {
            let outcome = match self.plan(&tenant, now) {
                Ok(Some(plan)) => {
                    let purged = self.apply(&plan)?;
                    PurgeOutcome {
                        tenant,
                        purged,
                        checkpoint: Some(plan.checkpoint),
                        skipped: None,
                    }
                }
                Ok(None) => PurgeOutcome {
                    tenant,
                    purged: 0,
                    checkpoint: None,
                    skipped: None,
                },
                Err(e @ LedgerError::IntegrityFailure { .. }) => {
                    error!(tenant = %tenant, error = %e, "retention sweep skipped tenant");
                    PurgeOutcome {
                        tenant,
                        purged: 0,
                        checkpoint: None,
                        skipped: Some(e.to_string()),
                    }
                }
                Err(e) => return Err(e),
            };
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    /// Operator-initiated purge of exactly `first..=through`.
    ///
    /// Every entry in the range must be eligible; otherwise the request is an
    /// `ImmutabilityViolation` and nothing is removed.
    pub fn purge_through(
        &self,
        tenant: &TenantId,
        through: u64,
        now: DateTime<Utc>,
    ) -> LedgerResult<PurgeOutcome> {
        let plan = self.checked_prefix(tenant, through, now)?;
        let purged = self.commit(&plan)?;
        Ok(PurgeOutcome {
            tenant: tenant.clone(),
            purged,
            checkpoint: Some(plan.checkpoint),
            skipped: None,
        })
    }

    pub fn place_tenant_hold(&self, tenant: TenantId) -> LedgerResult<()> {
        self.registry_mut()?.place_tenant_hold(tenant);
        Ok(())
    }

    pub fn lift_tenant_hold(&self, tenant: &TenantId) -> LedgerResult<bool> {
        Ok(self.registry_mut()?.lift_tenant_hold(tenant))
    }

    pub fn set_legal_hold(&self, policy: &str, hold: bool) -> LedgerResult<()> {
        self.registry_mut()?.set_legal_hold(policy, hold)
    }

    /// Snapshot of the registry as it stands now.
    pub fn registry_snapshot(&self) -> LedgerResult<PolicyRegistry> {
        Ok(self.registry()?.clone())
    }

    // ── Internal helpers ──────────────────────────────────────────────────────

    /// Plan exactly `first..=through`, refusing if any entry in it may not go.
    fn checked_prefix(&self, tenant: &TenantId, through: u64, now: DateTime<Utc>) -> LedgerResult<PurgePlan> {
        let violation = |reason: String| LedgerError::ImmutabilityViolation {
            tenant: tenant.to_string(),
            sequence: through,
            reason,
        };
        if self.registry()?.is_tenant_held(tenant) {
            return Err(violation("tenant is under legal hold".to_string()));
        }
        let head = self.store.chain_head(tenant)?;
        if through > head.sequence {
            return Err(violation(format!("chain head is {}", head.sequence)));
        }
        if let Some(cp) = self.store.latest_checkpoint(tenant)? {
            if through <= cp.sequence {
                return Err(violation(format!("already purged through {}", cp.sequence)));
            }
        }
        self.walk(tenant, through, now, Walk::RejectBlocked)?
            .ok_or_else(|| violation("nothing to purge".to_string()))
    }

    fn commit(&self, plan: &PurgePlan) -> LedgerResult<u64> {
        let removed = self.store.purge_prefix(&plan.checkpoint)?;
        info!(
            tenant = %plan.checkpoint.tenant,
            through = plan.checkpoint.sequence,
            removed,
            "retention purge applied"
        );
        Ok(removed)
    }

    fn registry(&self) -> LedgerResult<RwLockReadGuard<'_, PolicyRegistry>> {
        self.registry
            .read()
            .map_err(|e| LedgerError::store(format!("policy registry lock poisoned: {}", e)))
    }

    fn registry_mut(&self) -> LedgerResult<RwLockWriteGuard<'_, PolicyRegistry>> {
        self.registry
            .write()
            .map_err(|e| LedgerError::store(format!("policy registry lock poisoned: {}", e)))
    }

    /// Walk the retained prefix up to `through`, checking eligibility and
    /// hash consistency, and turn the eligible part into a plan.
    fn walk(
        &self,
        tenant: &TenantId,
        through: u64,
        now: DateTime<Utc>,
        mode: Walk,
    ) -> LedgerResult<Option<PurgePlan>> {
        let checkpoint = self.store.latest_checkpoint(tenant)?;
        let (start, mut running) = match &checkpoint {
            Some(cp) => (cp.sequence + 1, cp.entry_hash.clone()),
            None => (1, AuditEntry::GENESIS_HASH.to_string()),
        };
        let integrity = |sequence: u64, reason: String| LedgerError::IntegrityFailure {
            tenant: tenant.to_string(),
            sequence,
            reason,
        };

        let registry = self.registry()?;
        let store: &dyn PurgeStore = self.store.as_ref();
        let mut expected = start;
        let mut last: Option<(u64, String)> = None;

        for item in EntryStream::records(store, tenant.clone(), start, through, store.page_size()) {
            let entry = match item? {
                EntryRecord::Entry(entry) => entry,
                EntryRecord::Unreadable { sequence, reason } => {
                    return Err(integrity(sequence, format!("entry cannot be decoded: {}", reason)));
                }
            };
            let sequence = entry.sequence();
            if sequence != expected {
                return Err(integrity(expected, format!("sequence {} is missing", expected)));
            }
            if let Err(reason) = registry.purge_block(&entry.body, now) {
                match mode {
                    Walk::StopAtBlocked => {
                        debug!(tenant = %tenant, sequence, reason = %reason, "purge prefix ends");
                        break;
                    }
                    Walk::RejectBlocked => {
                        warn!(tenant = %tenant, sequence, reason = %reason, "purge refused");
                        return Err(LedgerError::ImmutabilityViolation {
                            tenant: tenant.to_string(),
                            sequence,
                            reason,
                        });
                    }
                }
            }
            if entry.previous_hash != running {
                return Err(integrity(
                    sequence,
                    "previous_hash does not link to the preceding entry; refusing to purge".to_string(),
                ));
            }
            let recomputed = hash_entry(&entry.body, &running)?;
            if recomputed != entry.entry_hash {
                return Err(integrity(
                    sequence,
                    "stored hash does not match the chain; refusing to purge".to_string(),
                ));
            }
            running = entry.entry_hash;
            expected = sequence + 1;
            last = Some((sequence, running.clone()));
        }

        if mode == Walk::RejectBlocked && expected <= through {
            return Err(integrity(expected, format!("sequence {} is missing", expected)));
        }

        Ok(last.map(|(sequence, entry_hash)| {
            let checkpoint = ChainCheckpoint {
                tenant: tenant.clone(),
                sequence,
                entry_hash,
                purged_count: sequence - start + 1,
                created_at: now,
            };
            debug!(tenant = %tenant, through = sequence, count = checkpoint.purged_count, "purge planned");
            PurgePlan { checkpoint }
        }))
    }
}
