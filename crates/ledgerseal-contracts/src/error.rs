//! Error taxonomy for the LedgerSeal write and maintenance paths.
//!
//! Verification findings (hash mismatches, gaps, bad signatures) are NOT
//! errors: they are reported as data in a `ChainReport` so that one corrupted
//! tenant never stops a scan.  Everything here aborts the operation that
//! raised it.

use thiserror::Error;

/// The unified error type for LedgerSeal.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Entry input was missing or malformed and was rejected before hashing.
    #[error("validation error on '{field}': {reason}")]
    Validation { field: String, reason: String },

    /// The sequence was already taken or no longer follows the chain head.
    ///
    /// The append pipeline retries with a freshly reserved sequence.
    #[error("sequence conflict for tenant '{tenant}' at sequence {sequence}: {reason}")]
    SequenceConflict {
        tenant: String,
        sequence: u64,
        reason: String,
    },

    /// An operation would have changed or removed an existing entry outside
    /// the checkpointed purge path.  Always fatal.
    #[error("immutability violation for tenant '{tenant}' at sequence {sequence}: {reason}")]
    ImmutabilityViolation {
        tenant: String,
        sequence: u64,
        reason: String,
    },

    /// Waiting for a tenant's sequence lease took longer than configured.
    #[error("timed out after {waited_ms}ms waiting for a sequence on tenant '{tenant}'")]
    Timeout { tenant: String, waited_ms: u64 },

    /// The persistence backend failed or holds unreadable data.
    #[error("store error: {reason}")]
    Store { reason: String },

    /// A value could not be encoded or decoded.
    #[error("serialization error: {reason}")]
    Serialization { reason: String },

    /// Key material was unusable for signing.
    #[error("signing error: {reason}")]
    Signing { reason: String },

    /// A required configuration value is missing or invalid.
    #[error("configuration error: {reason}")]
    Config { reason: String },

    /// Retention refused to checkpoint a prefix whose hashes do not recompute.
    #[error("integrity failure for tenant '{tenant}' at sequence {sequence}: {reason}")]
    IntegrityFailure {
        tenant: String,
        sequence: u64,
        reason: String,
    },
}

impl LedgerError {
    /// Shorthand for a `Validation` error.
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Shorthand for a `Store` error.
    pub fn store(reason: impl Into<String>) -> Self {
        Self::Store {
            reason: reason.into(),
        }
    }

    /// True for the error the append pipeline may retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::SequenceConflict { .. })
    }
}

impl From<serde_json::Error> for LedgerError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization {
            reason: e.to_string(),
        }
    }
}

/// Convenience alias used throughout the LedgerSeal crates.
pub type LedgerResult<T> = Result<T, LedgerError>;
