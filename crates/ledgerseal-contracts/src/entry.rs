//! Audit entry types.
//!
//! An `AuditEntry` is an `EntryBody` (what happened) sealed with its chain
//! link (`previous_hash`), its own content hash (`entry_hash`) and an
//! optional signature.  Nothing in LedgerSeal mutates an entry once it has
//! been appended; stores hand out copies.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of an isolated customer/organization.  Each tenant owns an
/// independent chain.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TenantId(pub String);

impl TenantId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque actor reference supplied by the identity subsystem.
///
/// The ledger never interprets it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActorId(pub String);

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The kind of consequential action being recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    Create,
    View,
    Update,
    Delete,
    Export,
    Login,
    Logout,
    BillingEvent,
    AdminOverride,
    StatusTransition,
    PermissionChange,
}

impl Action {
    /// Stable wire code, identical to the serde representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Create => "CREATE",
            Action::View => "VIEW",
            Action::Update => "UPDATE",
            Action::Delete => "DELETE",
            Action::Export => "EXPORT",
            Action::Login => "LOGIN",
            Action::Logout => "LOGOUT",
            Action::BillingEvent => "BILLING_EVENT",
            Action::AdminOverride => "ADMIN_OVERRIDE",
            Action::StatusTransition => "STATUS_TRANSITION",
            Action::PermissionChange => "PERMISSION_CHANGE",
        }
    }

    /// Parse a wire code such as `"BILLING_EVENT"`.
    pub fn from_code(code: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|a| a.as_str() == code)
    }

    pub const ALL: [Action; 11] = [
        Action::Create,
        Action::View,
        Action::Update,
        Action::Delete,
        Action::Export,
        Action::Login,
        Action::Logout,
        Action::BillingEvent,
        Action::AdminOverride,
        Action::StatusTransition,
        Action::PermissionChange,
    ];
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether the audited action went through.
///
/// A denied action is still recorded; the entry is the evidence of the
/// denial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Outcome {
    Success,
    Failure,
    Denied,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Success => "SUCCESS",
            Outcome::Failure => "FAILURE",
            Outcome::Denied => "DENIED",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The business object an action touched, e.g. `("invoice", "inv-2291")`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceRef {
    pub kind: String,
    pub id: String,
}

impl ResourceRef {
    pub fn new(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.id)
    }
}

/// The hashed content of one audit entry.
///
/// Every field here feeds the canonical serialization.  `metadata` is a
/// `BTreeMap` so key order is stable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryBody {
    pub entry_id: Uuid,
    pub tenant: TenantId,
    /// Per-tenant position, starting at 1.
    pub sequence: u64,
    pub actor: ActorId,
    pub action: Action,
    pub resource: ResourceRef,
    pub outcome: Outcome,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
    /// Name of the `RetentionPolicy` governing this entry.
    pub retention_policy: String,
    pub created_at: DateTime<Utc>,
}

/// A sealed, stored audit entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    #[serde(flatten)]
    pub body: EntryBody,

    /// `entry_hash` of the previous entry in this tenant's chain, or
    /// `GENESIS_HASH` for sequence 1.
    pub previous_hash: String,

    /// SHA-256 (lowercase hex) over the canonical body followed by
    /// `previous_hash`.
    pub entry_hash: String,

    /// Hex ed25519 signature over `entry_hash`, when signing is enabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,

    /// Version of the key that produced `signature`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_version: Option<u32>,
}

impl AuditEntry {
    /// The sentinel `previous_hash` of every tenant's first entry.
    pub const GENESIS_HASH: &'static str =
        "0000000000000000000000000000000000000000000000000000000000000000";

    pub fn sequence(&self) -> u64 {
        self.body.sequence
    }

    pub fn tenant(&self) -> &TenantId {
        &self.body.tenant
    }

    pub fn is_signed(&self) -> bool {
        self.signature.is_some()
    }
}
