//! Entry Builder: validated audit events and their canonical encoding.
//!
//! `EntryBuilder` collects the fields of one audited action and rejects
//! anything missing or malformed before it gets near a hash.  The result is
//! an `AuditEvent`, which becomes an `EntryBody` once the store has reserved
//! a sequence for it.
//!
//! Canonical encoding (`canonical_bytes`) is compact JSON with this fixed
//! field order:
//!
//!   v, entry_id, tenant, sequence, actor, action, resource{kind,id},
//!   outcome, retention_policy, created_at, metadata
//!
//! - `entry_id` is the lowercase hyphenated UUID
//! - `action` / `outcome` are their SCREAMING_SNAKE_CASE codes
//! - `created_at` is RFC 3339 UTC with microseconds and a `Z` suffix
//! - `metadata` keys are sorted (nested objects too: `serde_json::Map` is
//!   ordered unless `preserve_order` is enabled, which this workspace does not do)

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde::Serialize;
use uuid::Uuid;

use ledgerseal_contracts::{
    config::AppendConfig,
    entry::{Action, ActorId, EntryBody, Outcome, ResourceRef, TenantId},
    error::{LedgerError, LedgerResult},
};

/// Version tag written into every canonical encoding.
pub const CANONICAL_VERSION: u8 = 1;

const MAX_TENANT_LEN: usize = 64;
const MAX_ACTOR_LEN: usize = 256;
const MAX_RESOURCE_LEN: usize = 256;

/// A validated audited action that has not been sequenced yet.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditEvent {
    pub entry_id: Uuid,
    pub tenant: TenantId,
    pub actor: ActorId,
    pub action: Action,
    pub resource: ResourceRef,
    pub outcome: Outcome,
    pub metadata: BTreeMap<String, serde_json::Value>,
    /// Explicit policy; `None` lets the pipeline route by action.
    pub retention_policy: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl AuditEvent {
    /// Attach the reserved `sequence` and the resolved policy name.
    pub fn into_body(self, sequence: u64, retention_policy: String) -> EntryBody {
        EntryBody {
            entry_id: self.entry_id,
            tenant: self.tenant,
            sequence,
            actor: self.actor,
            action: self.action,
            resource: self.resource,
            outcome: self.outcome,
            metadata: self.metadata,
            retention_policy,
            created_at: self.created_at,
        }
    }
}

/// Fluent builder for `AuditEvent`.
///
/// ```rust,ignore
/// let event = EntryBuilder::new("acme-legal")
///     .actor("user-42")
///     .action(Action::Export)
///     .resource("matter", "m-1009")
///     .metadata("format", json!("pdf"))
///     .build()?;
/// ```
#[derive(Debug, Clone)]
pub struct EntryBuilder {
    tenant: String,
    actor: Option<String>,
    action: Option<Action>,
    resource: Option<(String, String)>,
    outcome: Outcome,
    metadata: BTreeMap<String, serde_json::Value>,
    retention_policy: Option<String>,
    occurred_at: Option<DateTime<Utc>>,
    max_clock_skew: Duration,
}

impl EntryBuilder {
    pub fn new(tenant: impl Into<String>) -> Self {
        Self {
            tenant: tenant.into(),
            actor: None,
            action: None,
            resource: None,
            outcome: Outcome::Success,
            metadata: BTreeMap::new(),
            retention_policy: None,
            occurred_at: None,
            max_clock_skew: AppendConfig::default().max_clock_skew(),
        }
    }

    pub fn actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    pub fn action(mut self, action: Action) -> Self {
        self.action = Some(action);
        self
    }

    pub fn resource(mut self, kind: impl Into<String>, id: impl Into<String>) -> Self {
        self.resource = Some((kind.into(), id.into()));
        self
    }

    pub fn outcome(mut self, outcome: Outcome) -> Self {
        self.outcome = outcome;
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn retention_policy(mut self, policy: impl Into<String>) -> Self {
        self.retention_policy = Some(policy.into());
        self
    }

    /// Use a caller-captured timestamp instead of `Utc::now()`.
    pub fn occurred_at(mut self, at: DateTime<Utc>) -> Self {
        self.occurred_at = Some(at);
        self
    }

    pub fn max_clock_skew(mut self, skew: Duration) -> Self {
        self.max_clock_skew = skew;
        self
    }

    /// Validate every field and produce an `AuditEvent`.
    ///
    /// Returns `LedgerError::Validation` naming the first offending field.
    pub fn build(self) -> LedgerResult<AuditEvent> {
        validate_tenant(&self.tenant)?;

        let actor = self
            .actor
            .ok_or_else(|| LedgerError::validation("actor", "is required"))?;
        validate_text("actor", &actor, MAX_ACTOR_LEN)?;

        let action = self
            .action
            .ok_or_else(|| LedgerError::validation("action", "is required"))?;

        let (kind, id) = self
            .resource
            .ok_or_else(|| LedgerError::validation("resource", "is required"))?;
        validate_text("resource.kind", &kind, MAX_RESOURCE_LEN)?;
        validate_text("resource.id", &id, MAX_RESOURCE_LEN)?;

        if self.metadata.keys().any(|k| k.trim().is_empty()) {
            return Err(LedgerError::validation("metadata", "keys must not be empty"));
        }

        if let Some(policy) = &self.retention_policy {
            validate_text("retention_policy", policy, MAX_RESOURCE_LEN)?;
        }

        let now = Utc::now();
        let latest = now.checked_add_signed(self.max_clock_skew);
        let created_at = match self.occurred_at {
            Some(at) if latest.is_some_and(|latest| at > latest) => {
                return Err(LedgerError::validation(
                    "timestamp",
                    format!("{} is in the future beyond the allowed clock skew", at.to_rfc3339()),
                ));
            }
            Some(at) => at,
            None => now,
        };

        Ok(AuditEvent {
            entry_id: Uuid::new_v4(),
            tenant: TenantId(self.tenant),
            actor: ActorId(actor),
            action,
            resource: ResourceRef::new(kind, id),
            outcome: self.outcome,
            metadata: self.metadata,
            retention_policy: self.retention_policy,
            created_at,
        })
    }
}

/// Tenant ids double as directory names in the file store.
pub fn validate_tenant(tenant: &str) -> LedgerResult<()> {
    if tenant.is_empty() {
        return Err(LedgerError::validation("tenant", "is required"));
    }
    if tenant.len() > MAX_TENANT_LEN {
        return Err(LedgerError::validation(
            "tenant",
            format!("longer than {} characters", MAX_TENANT_LEN),
        ));
    }
    if tenant.starts_with('.') {
        return Err(LedgerError::validation("tenant", "must not start with '.'"));
    }
    if let Some(c) = tenant
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
    {
        return Err(LedgerError::validation(
            "tenant",
            format!("contains invalid character {:?}", c),
        ));
    }
    Ok(())
}

fn validate_text(field: &str, value: &str, max_len: usize) -> LedgerResult<()> {
    if value.trim().is_empty() {
        return Err(LedgerError::validation(field, "must not be empty"));
    }
    if value.len() > max_len {
        return Err(LedgerError::validation(
            field,
            format!("longer than {} bytes", max_len),
        ));
    }
    if value.chars().any(char::is_control) {
        return Err(LedgerError::validation(field, "contains control characters"));
    }
    Ok(())
}

// ── Canonical encoding ────────────────────────────────────────────────────────

#[derive(Serialize)]
struct CanonicalResource<'a> {
    kind: &'a str,
    id: &'a str,
}

#[derive(Serialize)]
struct CanonicalBody<'a> {
    v: u8,
    entry_id: String,
    tenant: &'a str,
    sequence: u64,
    actor: &'a str,
    action: &'static str,
    resource: CanonicalResource<'a>,
    outcome: &'static str,
    retention_policy: &'a str,
    created_at: String,
    metadata: &'a BTreeMap<String, serde_json::Value>,
}

/// Format a timestamp the way the canonical encoding does.
pub fn canonical_timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Deterministic bytes for `body`, the hash input alongside `previous_hash`.
pub fn canonical_bytes(body: &EntryBody) -> LedgerResult<Vec<u8>> {
    let canonical = CanonicalBody {
        v: CANONICAL_VERSION,
        entry_id: body.entry_id.hyphenated().to_string(),
        tenant: body.tenant.as_str(),
        sequence: body.sequence,
        actor: &body.actor.0,
        action: body.action.as_str(),
        resource: CanonicalResource {
            kind: &body.resource.kind,
            id: &body.resource.id,
        },
        outcome: body.outcome.as_str(),
        retention_policy: &body.retention_policy,
        created_at: canonical_timestamp(&body.created_at),
        metadata: &body.metadata,
    };
    Ok(serde_json::to_vec(&canonical)?)
}
