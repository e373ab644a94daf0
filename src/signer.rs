//! Signer Record model and caller authentication.
//!
//! A Signer Record is the logical account the rest of the service
//! hangs off of: its Ethereum address (set once, at DKG completion),
//! its hashed API credential, and the storage path its server share
//! lives at. `CredentialVerifier` is split out as its own trait —
//! rather than an inline comparison inside the orchestrator — so a
//! differently-backed verifier (SIWE, passkey) can be substituted later
//! without touching the call site.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{WalletError, WalletResult};

/// A signer's lifecycle status. Transitions form a DAG: `Active` and
/// `Paused` move freely between each other, either can move to
/// `Revoked`, and `Revoked` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignerStatus {
    Active,
    Paused,
    Revoked,
}

impl SignerStatus {
    /// Whether moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(self, next: SignerStatus) -> bool {
        match (self, next) {
            (SignerStatus::Revoked, _) => false,
            (a, b) if a == b => false,
            _ => true,
        }
    }
}

impl fmt::Display for SignerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SignerStatus::Active => "active",
            SignerStatus::Paused => "paused",
            SignerStatus::Revoked => "revoked",
        };
        write!(f, "{s}")
    }
}

/// One signer account. `eth_address` and `server_share_path` are set
/// exactly once, by the DKG coordinator at ceremony completion; every
/// other field may be updated over the record's lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignerRecord {
    pub signer_id: String,
    pub display_name: String,
    pub owner_identity: String,
    /// SHA-256 hex digest of the caller's bearer credential. Never the
    /// plaintext credential itself.
    pub credential_hash: String,
    pub eth_address: Option<String>,
    /// Compressed secp256k1 public key, hex-encoded, from the DKG
    /// ceremony — needed at signing time to pick the correct ECDSA
    /// recovery id.
    pub public_key_hex: Option<String>,
    pub server_share_path: Option<String>,
    pub status: SignerStatus,
    pub dkg_completed: bool,
}

impl SignerRecord {
    pub fn new(signer_id: impl Into<String>, display_name: impl Into<String>, owner_identity: impl Into<String>, credential_hash: String) -> Self {
        Self {
            signer_id: signer_id.into(),
            display_name: display_name.into(),
            owner_identity: owner_identity.into(),
            credential_hash,
            eth_address: None,
            public_key_hex: None,
            server_share_path: None,
            status: SignerStatus::Active,
            dkg_completed: false,
        }
    }

    /// Apply the DAG-checked status transition, returning a conflict
    /// error for a move the DAG forbids (notably, anything out of
    /// `Revoked`).
    pub fn transition_to(&mut self, next: SignerStatus) -> WalletResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(WalletError::InvalidSessionState {
                expected: "active or paused".to_string(),
                actual: self.status.to_string(),
            });
        }
        self.status = next;
        Ok(())
    }

    pub fn mark_dkg_complete(&mut self, eth_address: String, public_key: [u8; 33], server_share_path: String) {
        self.eth_address = Some(eth_address);
        self.public_key_hex = Some(hex::encode(public_key));
        self.server_share_path = Some(server_share_path);
        self.dkg_completed = true;
    }

    /// Decode `public_key_hex` back to the raw compressed point bytes.
    pub fn public_key(&self) -> WalletResult<[u8; 33]> {
        let hex_str = self
            .public_key_hex
            .as_deref()
            .ok_or_else(|| WalletError::DkgNotComplete(self.signer_id.clone()))?;
        let bytes = hex::decode(hex_str)
            .map_err(|_| WalletError::Internal("corrupt public key hex in signer record".to_string()))?;
        bytes
            .try_into()
            .map_err(|_| WalletError::Internal("public key is not 33 bytes".to_string()))
    }
}

/// SHA-256 the plaintext credential to its storable hash. Generating a
/// record's credential (on creation) and verifying one (on every
/// request) both go through this.
pub fn hash_credential(plaintext: &str) -> String {
    let digest = Sha256::digest(plaintext.as_bytes());
    hex::encode(digest)
}

/// Resolves a bearer credential against a Signer Record's stored hash.
/// Kept as a trait rather than inline comparison so a SIWE- or
/// passkey-backed verifier can replace the hashed-secret scheme later
/// without the Signing Orchestrator's call site changing.
pub trait CredentialVerifier: Send + Sync {
    fn verify(&self, record: &SignerRecord, presented: &str) -> bool;
}

/// The hashed-shared-secret verifier: hash the presented credential and
/// compare against the stored hash in constant time.
pub struct HashedCredentialVerifier;

impl CredentialVerifier for HashedCredentialVerifier {
    fn verify(&self, record: &SignerRecord, presented: &str) -> bool {
        let presented_hash = hash_credential(presented);
        constant_time_eq(presented_hash.as_bytes(), record.credential_hash.as_bytes())
    }
}

/// Byte-for-byte comparison that always walks the full length of both
/// slices, so the time taken doesn't leak how many leading bytes
/// matched. Unequal lengths short-circuit (the length itself isn't
/// secret).
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn active_and_paused_transition_freely() {
        let mut record = SignerRecord::new("s1", "alice", "owner-1", hash_credential("secret"));
        assert!(record.transition_to(SignerStatus::Paused).is_ok());
        assert_eq!(record.status, SignerStatus::Paused);
        assert!(record.transition_to(SignerStatus::Active).is_ok());
    }

    #[test]
    fn revoked_is_terminal() {
        let mut record = SignerRecord::new("s1", "alice", "owner-1", hash_credential("secret"));
        record.transition_to(SignerStatus::Revoked).unwrap();
        assert!(record.transition_to(SignerStatus::Active).is_err());
        assert!(record.transition_to(SignerStatus::Paused).is_err());
    }

    #[test]
    fn same_state_transition_is_rejected() {
        let mut record = SignerRecord::new("s1", "alice", "owner-1", hash_credential("secret"));
        assert!(record.transition_to(SignerStatus::Active).is_err());
    }

    #[test]
    fn credential_verifier_accepts_matching_secret() {
        let record = SignerRecord::new("s1", "alice", "owner-1", hash_credential("secret"));
        let verifier = HashedCredentialVerifier;
        assert!(verifier.verify(&record, "secret"));
        assert!(!verifier.verify(&record, "wrong"));
    }

    #[test]
    fn mark_dkg_complete_sets_address_and_path() {
        let mut record = SignerRecord::new("s1", "alice", "owner-1", hash_credential("secret"));
        assert!(!record.dkg_completed);
        record.mark_dkg_complete("0xabc".to_string(), [3u8; 33], "signers/s1/server".to_string());
        assert!(record.dkg_completed);
        assert_eq!(record.eth_address.as_deref(), Some("0xabc"));
        assert_eq!(record.public_key().unwrap(), [3u8; 33]);
    }

    #[test]
    fn public_key_missing_before_dkg_completes() {
        let record = SignerRecord::new("s1", "alice", "owner-1", hash_credential("secret"));
        assert!(matches!(record.public_key(), Err(WalletError::DkgNotComplete(_))));
    }

    #[test]
    fn constant_time_eq_matches_normal_equality() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"abcd"));
    }
}
