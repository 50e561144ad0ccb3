//! # ledgerseal-store
//!
//! Ledger Store implementations for LedgerSeal.
//!
//! - `MemoryLedgerStore` keeps every chain in process memory
//! - `FileLedgerStore` keeps one JSON-lines directory per tenant
//!
//! Both give each tenant a single-writer lease: `reserve_sequence` blocks
//! while another reservation for the same tenant is outstanding, so a
//! sequence is never handed to two writers at once.  Tenants have separate
//! locks and never contend.

pub mod file;
pub mod memory;
mod tenant;

pub use file::FileLedgerStore;
pub use memory::MemoryLedgerStore;

// ── Tests ─────────────────────────────────────────────────────────────────────
