//! Retention policy definitions.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// A named lifecycle policy entries are assigned to at creation.
///
/// Example in TOML:
/// ```toml
/// [[retention.policies]]
/// name = "access-logs"
/// retention_days = 2555
/// purge_allowed = true
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    pub name: String,

    /// How long entries must be kept.  `None` keeps them forever.
    #[serde(default)]
    pub retention_days: Option<u32>,

    /// While set, no entry under this policy is ever purged.
    #[serde(default)]
    pub legal_hold: bool,

    /// Physical purge is only performed when explicitly allowed.
    #[serde(default)]
    pub purge_allowed: bool,
}

impl RetentionPolicy {
    /// Name of the built-in policy used when nothing else is configured.
    pub const RETAIN_FOREVER: &'static str = "retain-forever";

    /// The default: keep everything, purge nothing.
    pub fn retain_forever() -> Self {
        Self {
            name: Self::RETAIN_FOREVER.to_string(),
            retention_days: None,
            legal_hold: false,
            purge_allowed: false,
        }
    }

    /// The moment an entry created at `created_at` stops being protected by
    /// its retention period, or `None` if it never expires.
    pub fn expires_at(&self, created_at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.retention_days
            .map(|days| created_at + Duration::days(i64::from(days)))
    }

    /// True when an entry created at `created_at` may be physically removed
    /// at `now` under this policy alone (tenant holds are checked elsewhere).
    pub fn permits_purge(&self, created_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        if self.legal_hold || !self.purge_allowed {
            return false;
        }
        match self.expires_at(created_at) {
            Some(expiry) => expiry <= now,
            None => false,
        }
    }
}
