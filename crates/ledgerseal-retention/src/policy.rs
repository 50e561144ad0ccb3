//! Policy registry: the configured retention policies plus legal holds.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use ledgerseal_contracts::{
    config::RetentionConfig,
    entry::{EntryBody, TenantId},
    error::{LedgerError, LedgerResult},
    retention::RetentionPolicy,
};

/// All retention policies known to the ledger, keyed by name.
///
/// Entries carry their policy *name*; the registry is consulted at purge
/// time, so toggling a legal hold here takes effect on the next plan.
#[derive(Debug, Clone)]
pub struct PolicyRegistry {
    policies: BTreeMap<String, RetentionPolicy>,
    default_policy: String,
    tenant_holds: BTreeSet<TenantId>,
}

impl PolicyRegistry {
    /// Build the registry from the `[retention]` config section.
    ///
    /// Returns `LedgerError::Config` if the default policy is not defined.
    pub fn from_config(config: &RetentionConfig) -> LedgerResult<Self> {
        let policies: BTreeMap<String, RetentionPolicy> = config
            .all_policies()
            .into_iter()
            .map(|p| (p.name.clone(), p))
            .collect();
        if !policies.contains_key(&config.default_policy) {
            return Err(LedgerError::Config {
                reason: format!(
                    "default retention policy '{}' is not defined",
                    config.default_policy
                ),
            });
        }
        Ok(Self {
            policies,
            default_policy: config.default_policy.clone(),
            tenant_holds: config.tenant_holds.iter().cloned().collect(),
        })
    }

    pub fn get(&self, name: &str) -> Option<&RetentionPolicy> {
        self.policies.get(name)
    }

    pub fn default_policy(&self) -> &str {
        &self.default_policy
    }

    pub fn policies(&self) -> impl Iterator<Item = &RetentionPolicy> {
        self.policies.values()
    }

    /// Turn the legal hold of policy `name` on or off.
    pub fn set_legal_hold(&mut self, name: &str, hold: bool) -> LedgerResult<()> {
        let policy = self.policies.get_mut(name).ok_or_else(|| {
            LedgerError::validation("retention_policy", format!("'{}' is not a configured policy", name))
        })?;
        policy.legal_hold = hold;
        if hold {
            warn!(policy = name, "legal hold placed on retention policy");
        } else {
            info!(policy = name, "legal hold lifted from retention policy");
        }
        Ok(())
    }

    /// Freeze every entry of `tenant`, whatever its policy says.
    pub fn place_tenant_hold(&mut self, tenant: TenantId) {
        warn!(tenant = %tenant, "tenant-wide legal hold placed");
        self.tenant_holds.insert(tenant);
    }

    pub fn lift_tenant_hold(&mut self, tenant: &TenantId) -> bool {
        let lifted = self.tenant_holds.remove(tenant);
        if lifted {
            info!(tenant = %tenant, "tenant-wide legal hold lifted");
        }
        lifted
    }

    pub fn is_tenant_held(&self, tenant: &TenantId) -> bool {
        self.tenant_holds.contains(tenant)
    }

    /// Why `body` may not be purged at `now`, or `Ok` if it may.
    pub fn purge_block(&self, body: &EntryBody, now: DateTime<Utc>) -> Result<(), String> {
        if self.is_tenant_held(&body.tenant) {
            return Err(format!("tenant '{}' is under legal hold", body.tenant));
        }
        let Some(policy) = self.get(&body.retention_policy) else {
            return Err(format!("policy '{}' is not configured", body.retention_policy));
        };
        if policy.legal_hold {
            return Err(format!("policy '{}' is under legal hold", policy.name));
        }
        if !policy.purge_allowed {
            return Err(format!("policy '{}' does not allow purge", policy.name));
        }
        match policy.expires_at(body.created_at) {
            None => Err(format!("policy '{}' retains entries forever", policy.name)),
            Some(expiry) if expiry > now => Err(format!("retained until {}", expiry.to_rfc3339())),
            Some(_) => Ok(()),
        }
    }
}
