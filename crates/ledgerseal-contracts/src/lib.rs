//! # ledgerseal-contracts
//!
//! Shared types, errors, and configuration for the LedgerSeal audit ledger.
//!
//! All crates in the workspace import from here.  No hashing, storage, or
//! verification logic lives in this crate, only data definitions.

pub mod chain;
pub mod config;
pub mod entry;
pub mod error;
pub mod report;
pub mod retention;

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use super::*;
    use config::LedgerConfig;
    use entry::{Action, AuditEntry, Outcome};
    use error::LedgerError;
    use report::FindingKind;
    use retention::RetentionPolicy;

    // ── Wire codes ───────────────────────────────────────────────────────────

    #[test]
    fn action_codes_match_serde() {
        for action in Action::ALL {
            let json = serde_json::to_string(&action).unwrap();
            assert_eq!(json, format!("\"{}\"", action.as_str()));
            assert_eq!(Action::from_code(action.as_str()), Some(action));
        }
        assert_eq!(Action::from_code("FROBNICATE"), None);
    }

    #[test]
    fn outcome_and_finding_codes() {
        assert_eq!(serde_json::to_string(&Outcome::Denied).unwrap(), "\"DENIED\"");
        assert_eq!(
            serde_json::to_string(&FindingKind::SignatureUnverifiable).unwrap(),
            "\"SIGNATURE_UNVERIFIABLE\""
        );
        assert_eq!(FindingKind::SequenceGap.to_string(), "SEQUENCE_GAP");
    }

    #[test]
    fn genesis_hash_is_64_zeros() {
        assert_eq!(AuditEntry::GENESIS_HASH.len(), 64);
        assert!(AuditEntry::GENESIS_HASH.chars().all(|c| c == '0'));
    }

    // ── RetentionPolicy ──────────────────────────────────────────────────────

    #[test]
    fn retain_forever_never_permits_purge() {
        let policy = RetentionPolicy::retain_forever();
        let created = Utc.with_ymd_and_hms(2001, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(policy.expires_at(created), None);
        assert!(!policy.permits_purge(created, Utc::now()));
    }

    #[test]
    fn expired_policy_permits_purge_unless_held() {
        let mut policy = RetentionPolicy {
            name: "short".to_string(),
            retention_days: Some(30),
            legal_hold: false,
            purge_allowed: true,
        };
        let created = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

        assert!(!policy.permits_purge(created, created + Duration::days(29)));
        assert!(policy.permits_purge(created, created + Duration::days(30)));

        policy.legal_hold = true;
        assert!(!policy.permits_purge(created, created + Duration::days(365)));

        policy.legal_hold = false;
        policy.purge_allowed = false;
        assert!(!policy.permits_purge(created, created + Duration::days(365)));
    }

    // ── Config ───────────────────────────────────────────────────────────────

    #[test]
    fn empty_config_is_valid_and_retains_forever() {
        let config = LedgerConfig::from_toml_str("").unwrap();
        assert_eq!(config.store.page_size, 256);
        assert_eq!(config.append.max_attempts, 5);
        assert_eq!(config.retention.policy_for(Action::View), "retain-forever");
        assert!(config.signing.active_key_version.is_none());
    }

    #[test]
    fn action_policies_route_to_named_policy() {
        let toml = r#"
            [[retention.policies]]
            name = "access-logs"
            retention_days = 365
            purge_allowed = true

            [retention.action_policies]
            VIEW = "access-logs"
        "#;
        let config = LedgerConfig::from_toml_str(toml).unwrap();
        assert_eq!(config.retention.policy_for(Action::View), "access-logs");
        assert_eq!(config.retention.policy_for(Action::Delete), "retain-forever");
        assert_eq!(config.retention.all_policies().len(), 2);
    }

    #[test]
    fn shipped_sample_config_is_valid() {
        let config =
            LedgerConfig::from_toml_str(include_str!("../../../ledgerseal.toml")).unwrap();
        assert_eq!(config.signing.active_key_version, Some(2));
        assert_eq!(config.signing.keys.len(), 2);
        assert_eq!(config.retention.policy_for(Action::Login), "access-logs");
        assert_eq!(config.retention.policy_for(Action::Export), "retain-forever");
    }

    #[test]
    fn unknown_policy_reference_is_config_error() {
        let toml = r#"
            [retention.action_policies]
            VIEW = "nope"
        "#;
        match LedgerConfig::from_toml_str(toml) {
            Err(LedgerError::Config { reason }) => assert!(reason.contains("nope")),
            other => panic!("expected Config error, got {:?}", other),
        }
    }

    #[test]
    fn active_key_without_seed_is_config_error() {
        let toml = r#"
            [signing]
            active_key_version = 1

            [[signing.keys]]
            version = 1
            public_key_hex = "00"
        "#;
        match LedgerConfig::from_toml_str(toml) {
            Err(LedgerError::Config { reason }) => assert!(reason.contains("no seed_hex")),
            other => panic!("expected Config error, got {:?}", other),
        }
    }

    #[test]
    fn malformed_toml_is_config_error() {
        match LedgerConfig::from_toml_str("this is ][ not toml") {
            Err(LedgerError::Config { reason }) => {
                assert!(reason.contains("failed to parse ledger config TOML"))
            }
            other => panic!("expected Config error, got {:?}", other),
        }
    }

    // ── Error display ────────────────────────────────────────────────────────

    #[test]
    fn error_display_carries_context() {
        let err = LedgerError::SequenceConflict {
            tenant: "t1".to_string(),
            sequence: 7,
            reason: "occupied".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("t1") && msg.contains('7') && msg.contains("occupied"));
        assert!(err.is_retryable());

        let err = LedgerError::ImmutabilityViolation {
            tenant: "t1".to_string(),
            sequence: 3,
            reason: "legal hold".to_string(),
        };
        assert!(err.to_string().contains("immutability violation"));
        assert!(!err.is_retryable());
    }
}
