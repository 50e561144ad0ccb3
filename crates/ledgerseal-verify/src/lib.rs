//! # ledgerseal-verify
//!
//! Tamper detection for LedgerSeal tenant chains.
//!
//! [`engine::ChainVerifier`] streams a tenant's entries from genesis (or the
//! latest purge checkpoint), recomputes every hash and checks every
//! signature.  It reports four kinds of finding:
//!
//! - `HASH_MISMATCH`: an entry's fields or link disagree with the chain
//! - `SEQUENCE_GAP`: a sequence number is missing
//! - `SIGNATURE_INVALID`: a signature does not verify (or is required and absent)
//! - `SIGNATURE_UNVERIFIABLE`: the signing key version cannot be resolved
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use ledgerseal_verify::{ChainVerifier, VerifyOptions};
//!
//! let report = ChainVerifier::new(&store)
//!     .with_keys(&key_ring)
//!     .with_options(VerifyOptions { require_signatures: true, ..Default::default() })
//!     .verify_chain(&tenant)?;
//! if !report.verified {
//!     for link in &report.broken_links {
//!         eprintln!("{} {} {}", link.sequence, link.kind, link.reason);
//!     }
//! }
//! ```

pub mod engine;

pub use engine::{verify_chain, CancelFlag, ChainVerifier, VerifyOptions};
