//! Verification report types.
//!
//! A `ChainReport` is the aggregate result of scanning one tenant's chain.
//! Every problem found is a `BrokenLink`; the scan never stops at the first.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::entry::TenantId;

/// The class of problem found at a sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FindingKind {
    /// The recomputed hash or the stored link disagrees with the chain.
    HashMismatch,
    /// A sequence number is missing from the store.
    SequenceGap,
    /// The signature does not verify under the resolved key.
    SignatureInvalid,
    /// The signature's key version cannot be resolved.
    SignatureUnverifiable,
}

impl FindingKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FindingKind::HashMismatch => "HASH_MISMATCH",
            FindingKind::SequenceGap => "SEQUENCE_GAP",
            FindingKind::SignatureInvalid => "SIGNATURE_INVALID",
            FindingKind::SignatureUnverifiable => "SIGNATURE_UNVERIFIABLE",
        }
    }
}

impl fmt::Display for FindingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single verification finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokenLink {
    pub sequence: u64,
    pub kind: FindingKind,
    pub reason: String,
}

/// The result of `verify_chain` for one tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainReport {
    pub tenant: TenantId,

    /// True only if the full chain was scanned and nothing was found.
    pub verified: bool,

    /// Number of entries actually scanned.
    pub entry_count: u64,

    pub first_sequence: Option<u64>,
    pub last_sequence: Option<u64>,

    /// Set when the scan started from a purge checkpoint instead of genesis.
    pub checkpoint_sequence: Option<u64>,

    pub broken_links: Vec<BrokenLink>,

    /// The scan was cancelled or hit its entry limit before the head.
    pub truncated: bool,
}

impl ChainReport {
    /// Count of findings of one kind.
    pub fn count(&self, kind: FindingKind) -> usize {
        self.broken_links.iter().filter(|b| b.kind == kind).count()
    }
}
