//! Per-tenant chain bookkeeping: head pointer, sequence reservations, and
//! checkpoints left behind by prefix purges.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entry::{AuditEntry, TenantId};

/// The latest sequence and `entry_hash` of a tenant's chain.
///
/// An empty chain has `sequence == 0` and `entry_hash == GENESIS_HASH`.
/// Stores advance the head in the same atomic step as the append.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainHead {
    pub tenant: TenantId,
    pub sequence: u64,
    pub entry_hash: String,
}

impl ChainHead {
    /// The head of a tenant that has never appended anything.
    pub fn genesis(tenant: TenantId) -> Self {
        Self {
            tenant,
            sequence: 0,
            entry_hash: AuditEntry::GENESIS_HASH.to_string(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.sequence == 0
    }

    /// Move the head to a freshly appended entry.
    pub fn advance_to(&mut self, entry: &AuditEntry) {
        self.sequence = entry.sequence();
        self.entry_hash = entry.entry_hash.clone();
    }
}

/// A sequence handed out by `reserve_sequence`, together with the hash the
/// new entry must link to.
///
/// Holding a reservation holds the tenant's write lease: no other caller
/// receives a sequence for that tenant until this one is appended or
/// released.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceReservation {
    pub tenant: TenantId,
    pub sequence: u64,
    pub previous_hash: String,
}

/// Trusted stand-in for a purged prefix.
///
/// Records the `entry_hash` of the last purged entry.  The verifier starts
/// the remaining suffix at `sequence + 1` with `entry_hash` as its genesis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainCheckpoint {
    pub tenant: TenantId,
    /// Sequence of the last purged entry.
    pub sequence: u64,
    /// `entry_hash` of the last purged entry.
    pub entry_hash: String,
    /// How many entries this purge removed.
    pub purged_count: u64,
    pub created_at: DateTime<Utc>,
}
