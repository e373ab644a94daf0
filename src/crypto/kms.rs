//! KMS provider capability: mints and unwraps data-encryption keys (DEKs).
//!
//! `LocalFileKms` is the development variant: a 32-byte master key loaded
//! from a hex file, wrapping DEKs with AES-256-GCM. A remote-KMS variant
//! would implement the same `KmsProvider` trait against a cloud provider's
//! key-management API without the Envelope Store noticing the difference.

use std::path::{Path, PathBuf};

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::RngCore;
use rand::rngs::OsRng;
use zeroize::Zeroizing;

use crate::crypto::secret::SecretBytes;
use crate::error::{WalletError, WalletResult};

/// A freshly generated data-encryption key plus its wrapped form.
pub struct GeneratedDek {
    pub plaintext: SecretBytes,
    pub wrapped: Vec<u8>,
    pub key_id: String,
}

/// Capability for generating and unwrapping data-encryption keys.
///
/// A `key_id` is an opaque string the provider controls; the local file
/// variant uses a fixed id (one master key per deployment) but the trait
/// allows a future remote provider to mint a fresh id per rotation.
pub trait KmsProvider: Send + Sync {
    fn generate_dek(&self) -> WalletResult<GeneratedDek>;

    fn unwrap_dek(&self, wrapped: &[u8], key_id: &str) -> WalletResult<SecretBytes>;

    fn health_check(&self) -> bool;

    /// Zero-wipe master key material. Subsequent calls to this provider fail.
    fn destroy(&self);
}

const MASTER_KEY_LEN: usize = 32;
const DEK_LEN: usize = 32;
const IV_LEN: usize = 12;

/// Local file-backed KMS: a 32-byte master key read from a hex file,
/// wrapping DEKs with AES-256-GCM (`IV || ciphertext || tag`).
pub struct LocalFileKms {
    key_id: String,
    master_key: std::sync::RwLock<Option<Zeroizing<[u8; MASTER_KEY_LEN]>>>,
}

impl LocalFileKms {
    /// Load the master key from a hex-encoded file.
    pub fn from_file(path: &Path, key_id: impl Into<String>) -> WalletResult<Self> {
        let hex_contents = std::fs::read_to_string(path)
            .map_err(|e| WalletError::Internal(format!("failed to read KEK file: {e}")))?;
        Self::from_hex(hex_contents.trim(), key_id)
    }

    /// Build from a hex-encoded 32-byte key, or generate and persist a new
    /// one at `path` if no file exists yet (convenience for local dev).
    pub fn from_file_or_generate(path: &Path, key_id: impl Into<String>) -> WalletResult<Self> {
        if path.exists() {
            return Self::from_file(path, key_id);
        }

        let mut raw = [0u8; MASTER_KEY_LEN];
        OsRng.fill_bytes(&mut raw);
        let hex_contents = hex::encode(raw);

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| WalletError::Internal(format!("failed to create KEK dir: {e}")))?;
        }
        std::fs::write(path, &hex_contents)
            .map_err(|e| WalletError::Internal(format!("failed to write KEK file: {e}")))?;

        tracing::info!(path = %path.display(), "generated new local master key");
        Self::from_hex(&hex_contents, key_id)
    }

    fn from_hex(hex_str: &str, key_id: impl Into<String>) -> WalletResult<Self> {
        let bytes = hex::decode(hex_str)
            .map_err(|e| WalletError::Internal(format!("invalid KEK hex: {e}")))?;
        if bytes.len() != MASTER_KEY_LEN {
            return Err(WalletError::Internal(format!(
                "KEK must be {MASTER_KEY_LEN} bytes, got {}",
                bytes.len()
            )));
        }
        let mut key = [0u8; MASTER_KEY_LEN];
        key.copy_from_slice(&bytes);

        Ok(Self {
            key_id: key_id.into(),
            master_key: std::sync::RwLock::new(Some(Zeroizing::new(key))),
        })
    }

    fn cipher(&self) -> WalletResult<Aes256Gcm> {
        let guard = self
            .master_key
            .read()
            .map_err(|_| WalletError::KmsUnavailable)?;
        let key = guard.as_ref().ok_or(WalletError::KmsUnavailable)?;
        Aes256Gcm::new_from_slice(key.as_slice()).map_err(|_| WalletError::KmsUnavailable)
    }
}

impl KmsProvider for LocalFileKms {
    #[tracing::instrument(skip(self))]
    fn generate_dek(&self) -> WalletResult<GeneratedDek> {
        let cipher = self.cipher()?;

        let mut dek = Zeroizing::new([0u8; DEK_LEN]);
        OsRng.fill_bytes(dek.as_mut());

        let mut iv = [0u8; IV_LEN];
        OsRng.fill_bytes(&mut iv);
        let nonce = Nonce::from_slice(&iv);

        let ciphertext = cipher
            .encrypt(nonce, dek.as_slice())
            .map_err(|_| WalletError::KmsUnavailable)?;

        let mut wrapped = Vec::with_capacity(IV_LEN + ciphertext.len());
        wrapped.extend_from_slice(&iv);
        wrapped.extend_from_slice(&ciphertext);

        Ok(GeneratedDek {
            plaintext: SecretBytes::new(dek.to_vec()),
            wrapped,
            key_id: self.key_id.clone(),
        })
    }

    #[tracing::instrument(skip(self, wrapped))]
    fn unwrap_dek(&self, wrapped: &[u8], key_id: &str) -> WalletResult<SecretBytes> {
        if key_id != self.key_id {
            return Err(WalletError::DecryptionFailed);
        }
        if wrapped.len() < IV_LEN {
            return Err(WalletError::DecryptionFailed);
        }

        let cipher = self.cipher()?;
        let (iv, ciphertext) = wrapped.split_at(IV_LEN);
        let nonce = Nonce::from_slice(iv);

        let plaintext = cipher
            .decrypt(
                nonce,
                Payload {
                    msg: ciphertext,
                    aad: &[],
                },
            )
            .map_err(|_| WalletError::DecryptionFailed)?;

        Ok(SecretBytes::new(plaintext))
    }

    fn health_check(&self) -> bool {
        self.master_key
            .read()
            .map(|guard| guard.is_some())
            .unwrap_or(false)
    }

    fn destroy(&self) {
        if let Ok(mut guard) = self.master_key.write() {
            *guard = None;
        }
    }
}

/// Resolve the configured KEK path, defaulting to a dev-only location under
/// the database directory.
pub fn default_kek_path(db_path: &Path) -> PathBuf {
    db_path
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join("master.key")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn kms() -> (TempDir, LocalFileKms) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("master.key");
        let kms = LocalFileKms::from_file_or_generate(&path, "local-v1").unwrap();
        (dir, kms)
    }

    #[test]
    fn generate_and_unwrap_round_trips() {
        let (_dir, kms) = kms();
        let dek = kms.generate_dek().unwrap();
        let unwrapped = kms.unwrap_dek(&dek.wrapped, &dek.key_id).unwrap();
        assert_eq!(unwrapped.as_bytes(), dek.plaintext.as_bytes());
    }

    #[test]
    fn successive_deks_differ() {
        let (_dir, kms) = kms();
        let a = kms.generate_dek().unwrap();
        let b = kms.generate_dek().unwrap();
        assert_ne!(a.plaintext.as_bytes(), b.plaintext.as_bytes());
    }

    #[test]
    fn unwrap_fails_on_unknown_key_id() {
        let (_dir, kms) = kms();
        let dek = kms.generate_dek().unwrap();
        assert!(kms.unwrap_dek(&dek.wrapped, "other-key").is_err());
    }

    #[test]
    fn unwrap_fails_on_tampered_ciphertext() {
        let (_dir, kms) = kms();
        let dek = kms.generate_dek().unwrap();
        let mut tampered = dek.wrapped.clone();
        let last = tampered.len() - 1;
        tampered[last] ^= 0xff;
        assert!(kms.unwrap_dek(&tampered, &dek.key_id).is_err());
    }

    #[test]
    fn destroy_is_idempotent_and_disables_health() {
        let (_dir, kms) = kms();
        assert!(kms.health_check());
        kms.destroy();
        assert!(!kms.health_check());
        kms.destroy();
        assert!(!kms.health_check());
    }
}
