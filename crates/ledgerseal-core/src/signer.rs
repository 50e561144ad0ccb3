//! Versioned ed25519 signing over `entry_hash`.
//!
//! Each key version holds a public key and, while it is still in service, the
//! signing half.  Rotation adds a new version and makes it active; retiring a
//! version drops only the signing half so entries it signed stay verifiable.

use std::collections::BTreeMap;
use std::fmt;

use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use tracing::info;

use ledgerseal_contracts::{
    config::SigningConfig,
    error::{LedgerError, LedgerResult},
};

use crate::traits::KeyResolver;

/// Signature material attached to an entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Seal {
    /// Hex-encoded 64-byte ed25519 signature.
    pub signature: String,
    pub key_version: u32,
}

struct KeySlot {
    signing: Option<SigningKey>,
    verifying: VerifyingKey,
}

/// All known key versions plus the one used for new entries.
#[derive(Default)]
pub struct KeyRing {
    slots: BTreeMap<u32, KeySlot>,
    active: Option<u32>,
}

impl fmt::Debug for KeyRing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyRing")
            .field("versions", &self.slots.keys().collect::<Vec<_>>())
            .field("active", &self.active)
            .finish_non_exhaustive()
    }
}

impl KeyRing {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a key ring from the `[signing]` config section.
    pub fn from_config(config: &SigningConfig) -> LedgerResult<Self> {
        let mut ring = Self::new();
        for key in &config.keys {
            match (&key.seed_hex, &key.public_key_hex) {
                (Some(seed), _) => {
                    let signing = SigningKey::from_bytes(&decode_32("seed_hex", key.version, seed)?);
                    if let Some(public) = &key.public_key_hex {
                        let declared = decode_32("public_key_hex", key.version, public)?;
                        if declared != signing.verifying_key().to_bytes() {
                            return Err(LedgerError::Config {
                                reason: format!(
                                    "signing key version {} public_key_hex does not match its seed",
                                    key.version
                                ),
                            });
                        }
                    }
                    ring.insert_signing_key(key.version, signing);
                }
                (None, Some(public)) => {
                    let bytes = decode_32("public_key_hex", key.version, public)?;
                    let verifying = VerifyingKey::from_bytes(&bytes).map_err(|e| LedgerError::Config {
                        reason: format!("signing key version {} has an invalid public key: {}", key.version, e),
                    })?;
                    ring.insert_public_key(key.version, verifying);
                }
                (None, None) => {
                    return Err(LedgerError::Config {
                        reason: format!("signing key version {} has no key material", key.version),
                    });
                }
            }
        }
        if let Some(active) = config.active_key_version {
            ring.set_active(active)?;
        }
        Ok(ring)
    }

    /// Register a version that can sign.
    pub fn insert_signing_key(&mut self, version: u32, key: SigningKey) {
        let verifying = key.verifying_key();
        self.slots.insert(
            version,
            KeySlot {
                signing: Some(key),
                verifying,
            },
        );
    }

    /// Register a verify-only version.
    pub fn insert_public_key(&mut self, version: u32, key: VerifyingKey) {
        self.slots.insert(
            version,
            KeySlot {
                signing: None,
                verifying: key,
            },
        );
    }

    /// Sign new entries with `version` from now on.
    pub fn set_active(&mut self, version: u32) -> LedgerResult<()> {
        match self.slots.get(&version) {
            Some(slot) if slot.signing.is_some() => {
                info!(key_version = version, "signing key activated");
                self.active = Some(version);
                Ok(())
            }
            Some(_) => Err(LedgerError::Signing {
                reason: format!("key version {} is verify-only", version),
            }),
            None => Err(LedgerError::Signing {
                reason: format!("key version {} is unknown", version),
            }),
        }
    }

    /// Drop the signing half of `version`, keeping it for verification.
    pub fn retire(&mut self, version: u32) {
        if let Some(slot) = self.slots.get_mut(&version) {
            slot.signing = None;
        }
        if self.active == Some(version) {
            self.active = None;
        }
        info!(key_version = version, "signing key retired");
    }

    pub fn active_version(&self) -> Option<u32> {
        self.active
    }

    /// Sign `entry_hash` with the active key.  `Ok(None)` when signing is off.
    pub fn sign(&self, entry_hash: &str) -> LedgerResult<Option<Seal>> {
        let Some(version) = self.active else {
            return Ok(None);
        };
        let signing = self
            .slots
            .get(&version)
            .and_then(|slot| slot.signing.as_ref())
            .ok_or_else(|| LedgerError::Signing {
                reason: format!("active key version {} has no signing key", version),
            })?;
        let signature: Signature = signing.sign(entry_hash.as_bytes());
        Ok(Some(Seal {
            signature: hex::encode(signature.to_bytes()),
            key_version: version,
        }))
    }
}

impl KeyResolver for KeyRing {
    fn resolve_key(&self, key_version: u32) -> Option<VerifyingKey> {
        self.slots.get(&key_version).map(|slot| slot.verifying)
    }
}

/// Why a signature failed to verify.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignatureFault {
    /// Not 64 bytes of hex.
    Malformed(String),
    /// Well-formed but does not verify.
    Mismatch,
}

/// Check a stored hex signature over `entry_hash` against `key`.
pub fn check_signature(
    key: &VerifyingKey,
    entry_hash: &str,
    signature_hex: &str,
) -> Result<(), SignatureFault> {
    let bytes = hex::decode(signature_hex).map_err(|e| SignatureFault::Malformed(e.to_string()))?;
    let signature =
        Signature::from_slice(&bytes).map_err(|e| SignatureFault::Malformed(e.to_string()))?;
    key.verify_strict(entry_hash.as_bytes(), &signature)
        .map_err(|_| SignatureFault::Mismatch)
}

fn decode_32(field: &str, version: u32, value: &str) -> LedgerResult<[u8; 32]> {
    let bytes = hex::decode(value.trim()).map_err(|e| LedgerError::Config {
        reason: format!("signing key version {} {} is not hex: {}", version, field, e),
    })?;
    bytes.try_into().map_err(|b: Vec<u8>| LedgerError::Config {
        reason: format!(
            "signing key version {} {} must be 32 bytes, got {}",
            version,
            field,
            b.len()
        ),
    })
}
