//! Envelope Store: AES-256-GCM at-rest encryption of share bytes, keyed by a
//! KMS-wrapped data key and bound to its storage path via AAD.
//!
//! Path-binding is the whole point of this module: the AAD fed to AES-GCM is
//! always re-derived from the caller's query path, never read back out of
//! the stored envelope, so moving a ciphertext row to a different path (or
//! querying it under a different path) makes decryption fail closed.

use std::sync::Arc;

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};

use crate::crypto::kms::KmsProvider;
use crate::crypto::secret::SecretBytes;
use crate::error::{WalletError, WalletResult};
use crate::storage::Storage;

const IV_LEN: usize = 12;
const ALGORITHM: &str = "aes-256-gcm";

/// Persisted envelope layout, one row per storage path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub version: u32,
    pub key_id: String,
    pub encrypted_dek: String,
    pub iv: String,
    pub ciphertext: String,
    pub auth_tag: String,
    pub algorithm: String,
    pub aad_path: String,
}

/// KMS-mediated at-rest encryption layer for share bytes.
#[derive(Clone)]
pub struct EnvelopeStore {
    storage: Storage,
    kms: Arc<dyn KmsProvider>,
}

impl EnvelopeStore {
    pub fn new(storage: Storage, kms: Arc<dyn KmsProvider>) -> Self {
        Self { storage, kms }
    }

    pub fn health_check(&self) -> bool {
        self.kms.health_check()
    }

    /// Encrypt `bytes` under a fresh DEK and persist the envelope at `path`,
    /// upserting any existing row. AAD is the UTF-8 bytes of `path`.
    #[tracing::instrument(skip(self, bytes), fields(path))]
    pub fn store(&self, path: &str, bytes: &[u8]) -> WalletResult<()> {
        let dek = self.kms.generate_dek()?;

        let mut iv = [0u8; IV_LEN];
        OsRng.fill_bytes(&mut iv);
        let nonce = Nonce::from_slice(&iv);

        let cipher = Aes256Gcm::new_from_slice(dek.plaintext.as_bytes())
            .map_err(|_| WalletError::KmsUnavailable)?;

        let sealed = cipher
            .encrypt(
                nonce,
                Payload {
                    msg: bytes,
                    aad: path.as_bytes(),
                },
            )
            .map_err(|_| WalletError::DecryptionFailed)?;

        // AES-GCM appends the 16-byte tag to the ciphertext; split it back
        // out so the envelope's on-wire shape matches the opaque user-share passthrough.
        let tag_start = sealed.len().saturating_sub(16);
        let (ciphertext, auth_tag) = sealed.split_at(tag_start);

        let envelope = Envelope {
            version: 1,
            key_id: dek.key_id.clone(),
            encrypted_dek: BASE64.encode(&dek.wrapped),
            iv: BASE64.encode(iv),
            ciphertext: BASE64.encode(ciphertext),
            auth_tag: BASE64.encode(auth_tag),
            algorithm: ALGORITHM.to_string(),
            aad_path: path.to_string(),
        };

        // dek.plaintext is dropped (and zeroed) here regardless of the
        // storage outcome below.
        self.storage.put_envelope(path, &envelope)?;

        tracing::debug!(path, "stored envelope");
        Ok(())
    }

    /// Decrypt the envelope at `path`. Fails closed if the row is missing,
    /// unwrap fails, the auth tag doesn't verify, or (implicitly) the
    /// envelope was moved: AAD is always the query path, never the stored
    /// `aad_path` field.
    #[tracing::instrument(skip(self), fields(path))]
    pub fn fetch(&self, path: &str) -> WalletResult<SecretBytes> {
        let envelope: Envelope = self
            .storage
            .get_envelope(path)?
            .ok_or_else(|| WalletError::EnvelopeNotFound(path.to_string()))?;

        let wrapped = BASE64
            .decode(&envelope.encrypted_dek)
            .map_err(|_| WalletError::DecryptionFailed)?;
        let dek = self.kms.unwrap_dek(&wrapped, &envelope.key_id)?;

        let iv = BASE64
            .decode(&envelope.iv)
            .map_err(|_| WalletError::DecryptionFailed)?;
        if iv.len() != IV_LEN {
            return Err(WalletError::DecryptionFailed);
        }
        let nonce = Nonce::from_slice(&iv);

        let mut sealed = BASE64
            .decode(&envelope.ciphertext)
            .map_err(|_| WalletError::DecryptionFailed)?;
        let auth_tag = BASE64
            .decode(&envelope.auth_tag)
            .map_err(|_| WalletError::DecryptionFailed)?;
        sealed.extend_from_slice(&auth_tag);

        let cipher = Aes256Gcm::new_from_slice(dek.as_bytes()).map_err(|_| WalletError::DecryptionFailed)?;

        // AAD is re-derived from `path` (the argument to this call), not
        // from `envelope.aad_path` — this is what makes path-binding hold.
        let plaintext = cipher
            .decrypt(
                nonce,
                Payload {
                    msg: &sealed,
                    aad: path.as_bytes(),
                },
            )
            .map_err(|_| WalletError::DecryptionFailed)?;

        Ok(SecretBytes::new(plaintext))
    }

    pub fn delete(&self, path: &str) -> WalletResult<bool> {
        self.storage.delete_envelope(path)
    }

    /// Store an opaque, server-never-decrypts blob (the wallet-encrypted
    /// opaque user-share envelope) verbatim under `path`. The caller is
    /// responsible for well-formedness; this store does not touch the
    /// bytes beyond persisting them.
    pub fn store_opaque(&self, path: &str, json: &serde_json::Value) -> WalletResult<()> {
        self.storage.put_envelope(path, json)?;
        Ok(())
    }

    pub fn fetch_opaque(&self, path: &str) -> WalletResult<serde_json::Value> {
        self.storage
            .get_envelope(path)?
            .ok_or_else(|| WalletError::EnvelopeNotFound(path.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::kms::LocalFileKms;
    use tempfile::TempDir;

    fn store() -> (TempDir, EnvelopeStore) {
        let dir = TempDir::new().unwrap();
        let kms = LocalFileKms::from_file_or_generate(&dir.path().join("master.key"), "v1").unwrap();
        let storage = Storage::open_memory().unwrap();
        (dir, EnvelopeStore::new(storage, Arc::new(kms)))
    }

    #[test]
    fn store_then_fetch_round_trips() {
        let (_dir, store) = store();
        let bytes = vec![7u8; 4096];
        store.store("signers/a/server", &bytes).unwrap();
        let fetched = store.fetch("signers/a/server").unwrap();
        assert_eq!(fetched.as_bytes(), bytes.as_slice());
    }

    #[test]
    fn fetch_under_a_different_path_fails() {
        let (_dir, store) = store();
        store.store("signers/a/server", b"share-bytes").unwrap();

        // Simulate an attacker copying the ciphertext row to another path.
        let envelope: Envelope = store.storage.get_envelope("signers/a/server").unwrap().unwrap();
        store.storage.put_envelope("signers/b/server", &envelope).unwrap();

        assert!(store.fetch("signers/b/server").is_err());
    }

    #[test]
    fn fetch_missing_path_fails() {
        let (_dir, store) = store();
        assert!(store.fetch("signers/missing/server").is_err());
    }
}
