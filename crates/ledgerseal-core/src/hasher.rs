//! Chained content hashing.
//!
//! Hash input layout (bytes, in order):
//!   1. canonical JSON of the entry body (see `builder::canonical_bytes`)
//!   2. previous_hash as UTF-8 bytes (64 ASCII hex chars)
//!
//! Output is lowercase hex SHA-256.

use sha2::{Digest, Sha256};

use ledgerseal_contracts::{entry::EntryBody, error::LedgerResult};

use crate::builder::canonical_bytes;

/// Compute `entry_hash` for `body` linked to `previous_hash`.
///
/// Pure: the same body and previous hash always give the same output.
pub fn hash_entry(body: &EntryBody, previous_hash: &str) -> LedgerResult<String> {
    let canonical = canonical_bytes(body)?;

    let mut hasher = Sha256::new();
    hasher.update(&canonical);
    hasher.update(previous_hash.as_bytes());

    Ok(hex::encode(hasher.finalize()))
}

/// True if `value` looks like an `entry_hash` (64 lowercase hex chars).
pub fn is_hash_hex(value: &str) -> bool {
    value.len() == 64 && value.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}
