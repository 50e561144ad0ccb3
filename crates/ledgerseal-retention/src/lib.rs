//! # ledgerseal-retention
//!
//! Lifecycle enforcement for LedgerSeal ledgers.
//!
//! - [`policy::PolicyRegistry`] resolves the policy names entries carry and
//!   tracks policy-level and tenant-wide legal holds
//! - [`manager::RetentionManager`] plans, applies and sweeps checkpointed
//!   prefix purges
//!
//! ```rust,ignore
//! let manager = RetentionManager::from_config(store, &config.retention)?;
//! for outcome in manager.sweep(Utc::now())? {
//!     println!("{} purged {}", outcome.tenant, outcome.purged);
//! }
//! ```

pub mod manager;
pub mod policy;

pub use manager::{PurgeOutcome, PurgePlan, RetentionManager};
pub use policy::PolicyRegistry;

// ── Tests ─────────────────────────────────────────────────────────────────────
