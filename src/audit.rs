//! Hash-chained audit log for DKG, signing and policy decisions.
//!
//! Provides tamper-evident audit logging with:
//! - Sequential entries linked by SHA-256 hashes
//! - Ed25519 signatures on each entry
//! - Chain verification for integrity checking
//!
//! ## Security Properties
//!
//! - **Tamper-evident**: Modifying any entry breaks the hash chain
//! - **Non-repudiation**: Ed25519 signatures prove entry authenticity
//! - **Ordered**: Sequence numbers prevent reordering attacks
//!
//! A Signing Request's lifecycle (`pending -> blocked|failed|completed`) is
//! captured as one audit entry per transition rather than a mutated row;
//! "current status" for a request is whichever entry was appended last.

use std::sync::{
    Mutex,
    atomic::{AtomicU64, Ordering},
};

use chrono::{DateTime, Utc};
use ed25519_dalek::{SecretKey, Signer, SigningKey, Verifier, VerifyingKey};
use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{WalletError, WalletResult};
use crate::storage::Storage;

pub type SessionId = uuid::Uuid;

/// Types of auditable events.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    DkgInit,
    DkgRound,
    DkgFinalize,
    SigningInit,
    SigningRound,
    SigningFinalize,
    RequestBlocked,
    RequestCompleted,
    RequestFailed,
    SignerCreated,
    SignerStatusChanged,
    PolicyReplaced,
    ServiceStart,
    ServiceStop,
}

impl std::fmt::Display for AuditEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DkgInit => write!(f, "dkg_init"),
            Self::DkgRound => write!(f, "dkg_round"),
            Self::DkgFinalize => write!(f, "dkg_finalize"),
            Self::SigningInit => write!(f, "signing_init"),
            Self::SigningRound => write!(f, "signing_round"),
            Self::SigningFinalize => write!(f, "signing_finalize"),
            Self::RequestBlocked => write!(f, "request_blocked"),
            Self::RequestCompleted => write!(f, "request_completed"),
            Self::RequestFailed => write!(f, "request_failed"),
            Self::SignerCreated => write!(f, "signer_created"),
            Self::SignerStatusChanged => write!(f, "signer_status_changed"),
            Self::PolicyReplaced => write!(f, "policy_replaced"),
            Self::ServiceStart => write!(f, "service_start"),
            Self::ServiceStop => write!(f, "service_stop"),
        }
    }
}

/// Actor that triggered an audit event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditActor {
    /// The signer (account) on whose behalf the event occurred.
    Signer { signer_id: String },
    /// One of the three cooperating protocol parties, by index.
    Party { party_index: u8 },
    /// System action (startup, config, background sweep).
    System,
}

/// Outcome of an audited operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    Failure { reason: String },
    Pending,
}

/// A single audit log entry with hash-chain linking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub event_type: AuditEventType,
    pub actor: AuditActor,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    pub outcome: AuditOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
    pub prev_hash: String,
    pub signature: String,
}

impl AsRef<Self> for AuditEntry {
    fn as_ref(&self) -> &Self {
        self
    }
}

impl AuditEntry {
    /// Compute the canonical bytes for hashing/signing.
    fn canonical_bytes(&self) -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(&self.seq.to_be_bytes());
        data.extend_from_slice(self.timestamp.to_rfc3339().as_bytes());
        data.extend_from_slice(self.event_type.to_string().as_bytes());
        data.extend_from_slice(
            serde_json::to_string(&self.actor)
                .unwrap_or_default()
                .as_bytes(),
        );
        if let Some(ref session_id) = self.session_id {
            data.extend_from_slice(session_id.to_string().as_bytes());
        }
        data.extend_from_slice(
            serde_json::to_string(&self.outcome)
                .unwrap_or_default()
                .as_bytes(),
        );
        if let Some(ref context) = self.context {
            data.extend_from_slice(context.to_string().as_bytes());
        }
        data.extend_from_slice(self.prev_hash.as_bytes());
        data
    }

    /// Compute SHA-256 hash of this entry.
    pub fn hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.canonical_bytes());
        hasher.update(self.signature.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Verify the signature on this entry.
    pub fn verify_signature(&self, verifying_key: &VerifyingKey) -> bool {
        let Ok(signature_bytes) = hex::decode(&self.signature) else {
            return false;
        };

        let Ok(signature) = ed25519_dalek::Signature::from_slice(&signature_bytes) else {
            return false;
        };

        let data = self.canonical_bytes();
        verifying_key.verify(&data, &signature).is_ok()
    }
}

/// Genesis hash for the first entry in the chain.
const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Audit logger with hash-chaining and signing.
pub struct AuditLogger {
    storage: Storage,
    signing_key: SigningKey,
    current_seq: AtomicU64,
    /// Serialize appends to preserve hash chain integrity.
    append_lock: Mutex<()>,
}

impl AuditLogger {
    /// Create a new audit logger.
    ///
    /// Generates a new Ed25519 signing key. For production, the key should be
    /// loaded from secure storage or an HSM.
    pub fn new(storage: Storage) -> WalletResult<Self> {
        let mut secret_key_bytes: SecretKey = [0u8; 32];
        OsRng.fill_bytes(&mut secret_key_bytes);
        let signing_key = SigningKey::from_bytes(&secret_key_bytes);

        let current_seq = storage.get_latest_audit_seq()?.unwrap_or(0);

        Ok(Self {
            storage,
            signing_key,
            current_seq: AtomicU64::new(current_seq),
            append_lock: Mutex::new(()),
        })
    }

    /// Create an audit logger with a specific signing key.
    pub fn with_signing_key(storage: Storage, signing_key: SigningKey) -> WalletResult<Self> {
        let current_seq = storage.get_latest_audit_seq()?.unwrap_or(0);

        Ok(Self {
            storage,
            signing_key,
            current_seq: AtomicU64::new(current_seq),
            append_lock: Mutex::new(()),
        })
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    pub fn verifying_key_hex(&self) -> String {
        hex::encode(self.verifying_key().as_bytes())
    }

    /// Append a new audit entry. Returns the sequence number of the new entry.
    pub fn append(
        &self,
        event_type: AuditEventType,
        actor: AuditActor,
        session_id: Option<SessionId>,
        outcome: AuditOutcome,
        context: Option<serde_json::Value>,
    ) -> WalletResult<u64> {
        let _append_guard = self
            .append_lock
            .lock()
            .map_err(|_e| WalletError::Storage("audit append lock poisoned".to_string()))?;

        let seq = self.current_seq.load(Ordering::SeqCst) + 1;

        let prev_hash = if seq == 1 {
            GENESIS_HASH.to_string()
        } else {
            self.storage
                .get_audit_entry(seq - 1)?
                .map(|entry| entry.hash())
                .ok_or_else(|| WalletError::Storage(format!("missing audit entry {}", seq - 1)))?
        };

        let mut entry = AuditEntry {
            seq,
            timestamp: Utc::now(),
            event_type,
            actor,
            session_id,
            outcome,
            context,
            prev_hash,
            signature: String::new(),
        };

        let data = entry.canonical_bytes();
        let signature = self.signing_key.sign(&data);
        entry.signature = hex::encode(signature.to_bytes());

        self.storage.put_audit_entry(&entry)?;
        self.current_seq.store(seq, Ordering::SeqCst);

        tracing::debug!(seq = seq, event_type = %event_type, "audit entry appended");

        Ok(seq)
    }

    /// Verify the hash chain integrity between two sequence numbers.
    pub fn verify_chain(&self, start: u64, end: u64) -> WalletResult<bool> {
        if start > end {
            return Ok(false);
        }

        let verifying_key = self.verifying_key();
        let mut expected_prev_hash = if start == 1 {
            GENESIS_HASH.to_string()
        } else {
            self.storage
                .get_audit_entry(start - 1)?
                .map(|e| e.hash())
                .ok_or_else(|| WalletError::Storage(format!("missing audit entry {}", start - 1)))?
        };

        for seq in start..=end {
            let entry = self
                .storage
                .get_audit_entry(seq)?
                .ok_or_else(|| WalletError::Storage(format!("missing audit entry {seq}")))?;

            if entry.prev_hash != expected_prev_hash {
                tracing::warn!(seq = seq, "hash chain broken");
                return Ok(false);
            }

            if !entry.verify_signature(&verifying_key) {
                tracing::warn!(seq = seq, "invalid signature on audit entry");
                return Ok(false);
            }

            expected_prev_hash = entry.hash();
        }

        Ok(true)
    }

    pub fn current_seq(&self) -> u64 {
        self.current_seq.load(Ordering::SeqCst)
    }

    pub fn get_entry(&self, seq: u64) -> WalletResult<Option<AuditEntry>> {
        self.storage.get_audit_entry(seq)
    }

    pub fn list_entries(&self, start: u64, end: u64) -> WalletResult<Vec<AuditEntry>> {
        let mut entries = Vec::new();
        for seq in start..=end {
            if let Some(entry) = self.storage.get_audit_entry(seq)? {
                entries.push(entry);
            }
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_logger() -> AuditLogger {
        let storage = Storage::open_memory().expect("failed to create test storage");
        AuditLogger::new(storage).expect("failed to create audit logger")
    }

    #[test]
    fn test_append_and_retrieve() {
        let logger = create_test_logger();

        let seq = logger
            .append(
                AuditEventType::DkgInit,
                AuditActor::Signer {
                    signer_id: "signer-1".to_string(),
                },
                Some(uuid::Uuid::new_v4()),
                AuditOutcome::Success,
                None,
            )
            .unwrap();

        assert_eq!(seq, 1);

        let entry = logger.get_entry(1).unwrap().unwrap();
        assert_eq!(entry.seq, 1);
        assert_eq!(entry.event_type, AuditEventType::DkgInit);
        assert_eq!(entry.prev_hash, GENESIS_HASH);
    }

    #[test]
    fn test_hash_chain() {
        let logger = create_test_logger();

        for i in 0_u8..3 {
            logger
                .append(
                    AuditEventType::DkgRound,
                    AuditActor::Party { party_index: i },
                    Some(uuid::Uuid::new_v4()),
                    AuditOutcome::Success,
                    None,
                )
                .unwrap();
        }

        assert!(logger.verify_chain(1, 3).unwrap());

        let entry1 = logger.get_entry(1).unwrap().unwrap();
        let entry2 = logger.get_entry(2).unwrap().unwrap();
        let entry3 = logger.get_entry(3).unwrap().unwrap();

        assert_eq!(entry1.prev_hash, GENESIS_HASH);
        assert_eq!(entry2.prev_hash, entry1.hash());
        assert_eq!(entry3.prev_hash, entry2.hash());
    }

    #[test]
    fn test_signature_verification() {
        let logger = create_test_logger();

        logger
            .append(
                AuditEventType::ServiceStart,
                AuditActor::System,
                None,
                AuditOutcome::Success,
                None,
            )
            .unwrap();

        let entry = logger.get_entry(1).unwrap().unwrap();
        assert!(entry.verify_signature(&logger.verifying_key()));
    }

    #[test]
    fn test_tampered_entry_fails_verification() {
        let logger = create_test_logger();
        logger
            .append(
                AuditEventType::ServiceStart,
                AuditActor::System,
                None,
                AuditOutcome::Success,
                None,
            )
            .unwrap();

        let mut entry = logger.get_entry(1).unwrap().unwrap();
        entry.outcome = AuditOutcome::Failure {
            reason: "tampered".to_string(),
        };
        assert!(!entry.verify_signature(&logger.verifying_key()));
    }

    #[test]
    fn test_event_type_display() {
        assert_eq!(AuditEventType::DkgInit.to_string(), "dkg_init");
        assert_eq!(
            AuditEventType::SigningFinalize.to_string(),
            "signing_finalize"
        );
    }
}
