//! Derived views of an entry, computed on demand.

use ledgerseal_contracts::entry::{Action, EntryBody, Outcome};

/// Coarse risk classification used by review tooling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RiskLevel {
    Low,
    Elevated,
    High,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Elevated => "elevated",
            RiskLevel::High => "high",
        }
    }
}

/// Classify an entry by what it did and whether it was allowed.
///
/// Destructive, privilege-changing and override actions are `High`; data
/// leaving the system, billing and state changes are `Elevated`.  Any denied
/// or failed action is raised by one level.
pub fn risk_level(body: &EntryBody) -> RiskLevel {
    let base = match body.action {
        Action::Delete | Action::AdminOverride | Action::PermissionChange => RiskLevel::High,
        Action::Export | Action::BillingEvent | Action::StatusTransition | Action::Update => {
            RiskLevel::Elevated
        }
        Action::Create | Action::View | Action::Login | Action::Logout => RiskLevel::Low,
    };
    match body.outcome {
        Outcome::Success => base,
        Outcome::Failure | Outcome::Denied => match base {
            RiskLevel::Low => RiskLevel::Elevated,
            _ => RiskLevel::High,
        },
    }
}

/// True when a compliance officer should look at the entry.
pub fn requires_review(body: &EntryBody) -> bool {
    risk_level(body) == RiskLevel::High || body.outcome == Outcome::Denied
}
