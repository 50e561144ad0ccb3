//! Ledger configuration.
//!
//! `LedgerConfig` is built once at startup (from TOML or in code), checked
//! with `validate()`, and passed by reference to each component.  Nothing in
//! LedgerSeal reads the environment on its own.
//!
//! ```toml
//! [store]
//! data_dir = "var/ledger"
//! page_size = 256
//! reservation_timeout_ms = 5000
//!
//! [append]
//! max_attempts = 5
//!
//! [signing]
//! active_key_version = 2
//!
//! [[signing.keys]]
//! version = 1
//! public_key_hex = "..."
//!
//! [[signing.keys]]
//! version = 2
//! seed_hex = "..."
//!
//! [retention]
//! default_policy = "retain-forever"
//!
//! [[retention.policies]]
//! name = "access-logs"
//! retention_days = 2555
//! purge_allowed = true
//!
//! [retention.action_policies]
//! VIEW = "access-logs"
//! ```

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{
    entry::{Action, TenantId},
    error::{LedgerError, LedgerResult},
    retention::RetentionPolicy,
};

/// Top-level configuration.  Every section is optional in TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub store: StoreConfig,
    pub append: AppendConfig,
    pub signing: SigningConfig,
    pub verify: VerifyConfig,
    pub retention: RetentionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Root directory of the file store.  `None` selects the in-memory store.
    pub data_dir: Option<PathBuf>,
    /// Entries fetched per read when streaming a chain.
    pub page_size: usize,
    /// How long `reserve_sequence` waits for another writer's lease.
    pub reservation_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            page_size: 256,
            reservation_timeout_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppendConfig {
    /// Attempts per `record()` call before a `SequenceConflict` is surfaced.
    pub max_attempts: u32,
    /// Caller-supplied timestamps further than this in the future are rejected.
    pub max_clock_skew_secs: u64,
}

impl Default for AppendConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            max_clock_skew_secs: 300,
        }
    }
}

impl AppendConfig {
    /// `max_clock_skew_secs` as a duration, saturating at `i64::MAX` seconds.
    pub fn max_clock_skew(&self) -> chrono::Duration {
        let secs = i64::try_from(self.max_clock_skew_secs).unwrap_or(i64::MAX);
        chrono::Duration::try_seconds(secs).unwrap_or(chrono::Duration::MAX)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SigningConfig {
    /// Version used to sign new entries.  `None` disables signing.
    pub active_key_version: Option<u32>,
    pub keys: Vec<KeyConfig>,
}

/// One key version.  Retired versions keep only `public_key_hex`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyConfig {
    pub version: u32,
    /// 32-byte ed25519 seed, hex encoded.
    #[serde(default)]
    pub seed_hex: Option<String>,
    /// 32-byte ed25519 public key, hex encoded.
    #[serde(default)]
    pub public_key_hex: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifyConfig {
    /// Treat unsigned entries as `SIGNATURE_INVALID`.
    pub require_signatures: bool,
    /// Stop scanning a tenant after this many entries (report is truncated).
    pub max_entries: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// Policy assigned to entries whose action has no explicit mapping.
    pub default_policy: String,
    pub policies: Vec<RetentionPolicy>,
    /// Action code (e.g. `"VIEW"`) → policy name.
    pub action_policies: BTreeMap<String, String>,
    /// Tenants under a tenant-wide legal hold from startup.
    pub tenant_holds: Vec<TenantId>,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            default_policy: RetentionPolicy::RETAIN_FOREVER.to_string(),
            policies: Vec::new(),
            action_policies: BTreeMap::new(),
            tenant_holds: Vec::new(),
        }
    }
}

impl RetentionConfig {
    /// Configured policies plus the built-in `retain-forever` policy unless
    /// the configuration overrides it by name.
    pub fn all_policies(&self) -> Vec<RetentionPolicy> {
        let mut policies = self.policies.clone();
        if !policies
            .iter()
            .any(|p| p.name == RetentionPolicy::RETAIN_FOREVER)
        {
            policies.push(RetentionPolicy::retain_forever());
        }
        policies
    }

    /// The policy name an entry with `action` is assigned at creation.
    pub fn policy_for(&self, action: Action) -> &str {
        self.action_policies
            .get(action.as_str())
            .map(String::as_str)
            .unwrap_or(&self.default_policy)
    }
}

impl LedgerConfig {
    /// Parse `s` as TOML and validate the result.
    pub fn from_toml_str(s: &str) -> LedgerResult<Self> {
        let config: LedgerConfig = toml::from_str(s).map_err(|e| LedgerError::Config {
            reason: format!("failed to parse ledger config TOML: {}", e),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse the TOML file at `path`.
    pub fn from_file(path: &Path) -> LedgerResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| LedgerError::Config {
            reason: format!("failed to read config file '{}': {}", path.display(), e),
        })?;
        Self::from_toml_str(&contents)
    }

    /// Check cross-field consistency.
    pub fn validate(&self) -> LedgerResult<()> {
        let config_err = |reason: String| Err(LedgerError::Config { reason });

        if self.store.page_size == 0 {
            return config_err("store.page_size must be greater than zero".to_string());
        }
        if self.append.max_attempts == 0 {
            return config_err("append.max_attempts must be greater than zero".to_string());
        }

        let mut versions = HashSet::new();
        for key in &self.signing.keys {
            if !versions.insert(key.version) {
                return config_err(format!("signing key version {} is declared twice", key.version));
            }
            if key.seed_hex.is_none() && key.public_key_hex.is_none() {
                return config_err(format!(
                    "signing key version {} needs seed_hex or public_key_hex",
                    key.version
                ));
            }
        }
        if let Some(active) = self.signing.active_key_version {
            let signable = self
                .signing
                .keys
                .iter()
                .any(|k| k.version == active && k.seed_hex.is_some());
            if !signable {
                return config_err(format!(
                    "signing.active_key_version {} has no seed_hex to sign with",
                    active
                ));
            }
        }

        let policies = self.retention.all_policies();
        let mut names = HashSet::new();
        for policy in &policies {
            if policy.name.trim().is_empty() {
                return config_err("retention policy name must not be empty".to_string());
            }
            if !names.insert(policy.name.as_str()) {
                return config_err(format!("retention policy '{}' is declared twice", policy.name));
            }
        }
        if !names.contains(self.retention.default_policy.as_str()) {
            return config_err(format!(
                "retention.default_policy '{}' is not a declared policy",
                self.retention.default_policy
            ));
        }
        for (code, policy) in &self.retention.action_policies {
            if Action::from_code(code).is_none() {
                return config_err(format!("retention.action_policies has unknown action '{}'", code));
            }
            if !names.contains(policy.as_str()) {
                return config_err(format!(
                    "retention.action_policies maps '{}' to unknown policy '{}'",
                    code, policy
                ));
            }
        }

        Ok(())
    }
}
