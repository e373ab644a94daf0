//! Service configuration derived from environment variables.
//!
//! Configuration is loaded once at startup and validated before the service starts.
//! This is a single-process service: the server holds one of the three key shares
//! and exposes the DKG/signing/policy surface over HTTP to the other two parties
//! (the on-device signer and the end-user device), which round-trip protocol
//! messages as callers rather than being dialed out to.
//!
//! ## Environment Variables
//!
//! - `WALLET_PORT`: HTTP port (default: 5002)
//! - `WALLET_HOST`: Bind address (default: :: for dual-stack IPv4/IPv6)
//! - `WALLET_DB_PATH`: Path to the ReDB database file
//! - `WALLET_REQUEST_TIMEOUT_MS`: Round-trip timeout for protocol round messages
//! - `WALLET_BODY_LIMIT_MB`: Max JSON request body size
//! - `WALLET_SESSION_TTL_SECS`: DKG/signing session inactivity TTL (default: 60)
//! - `WALLET_KEK_PROVIDER`: "local" or "kms"
//! - `WALLET_KEK_PATH`: path to the local master-key file (local provider only)
//! - `WALLET_KEK_ID`: KMS key id (kms provider only)
//! - `WALLET_ADMIN_TOKEN`: bearer token guarding admin-only routes (unset disables the guard)
//! - `RUST_LOG`: Log level filter

use std::env;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

const DEFAULT_PORT: u16 = 5002;
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_BODY_LIMIT_MB: usize = 16;
const DEFAULT_SESSION_TTL_SECS: u64 = 60;

/// Helper to get trimmed env var or empty string.
fn env_trim(name: &str) -> String {
    env::var(name).unwrap_or_default().trim().to_string()
}

/// Helper to get lowercase env var.
fn env_lower(name: &str) -> String {
    env_trim(name).to_lowercase()
}

/// Check if a string value is truthy.
fn is_truthy(value: &str) -> bool {
    matches!(value.trim(), "1" | "true" | "yes")
}

/// Threshold ECDSA scheme selection. Reserved for a future scheme alongside
/// the shipped CGGMP24-family implementation; see `dkg::scheme::DkgScheme`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    /// CGGMP24 over secp256k1 (two-phase aux-info + keygen DKG).
    #[default]
    Cggmp24,
}

impl FromStr for Scheme {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "cggmp24" => Ok(Self::Cggmp24),
            other => Err(format!("Invalid scheme '{other}'. Must be 'cggmp24'.")),
        }
    }
}

impl std::fmt::Display for Scheme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cggmp24 => write!(f, "cggmp24"),
        }
    }
}

/// Key Encryption Key (KEK) provider for envelope encryption.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum KekProvider {
    /// Local file-based KEK (development only).
    #[default]
    Local,
    /// Remote KMS for production envelope encryption.
    Kms,
}

impl FromStr for KekProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "kms" => Ok(Self::Kms),
            other => Err(format!(
                "Invalid KEK provider '{other}'. Must be 'local' or 'kms'."
            )),
        }
    }
}

/// Service configuration.
#[derive(Debug, Clone)]
pub struct Settings {
    port: u16,
    host: IpAddr,
    db_path: PathBuf,
    request_timeout_ms: u64,
    body_limit_bytes: usize,
    session_ttl_secs: u64,

    scheme: Scheme,
    kek_provider: KekProvider,
    kek_path: Option<PathBuf>,
    kek_id: Option<String>,

    /// Bearer token guarding admin-only routes (signer provisioning,
    /// policy document replacement). Distinct from the per-signer
    /// hashed API credential the Signing Orchestrator checks on every
    /// signing request — this is the one surface still gated the
    /// lineage's way, by a single shared secret.
    admin_token: Option<String>,
}

impl Settings {
    /// Load settings from environment variables.
    pub fn from_env() -> Self {
        let port = env_trim("WALLET_PORT").parse::<u16>().unwrap_or(DEFAULT_PORT);

        // Default to IPv6 unspecified (::) for dual-stack support.
        let host = env_trim("WALLET_HOST")
            .parse::<IpAddr>()
            .unwrap_or(IpAddr::V6(Ipv6Addr::UNSPECIFIED));

        let db_path = env_trim("WALLET_DB_PATH")
            .parse::<PathBuf>()
            .unwrap_or_else(|_| PathBuf::from("./.data/wallet.redb"));

        let request_timeout_ms = env_trim("WALLET_REQUEST_TIMEOUT_MS")
            .parse::<u64>()
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT_MS);

        let body_limit_mb = env_trim("WALLET_BODY_LIMIT_MB")
            .parse::<usize>()
            .unwrap_or(DEFAULT_BODY_LIMIT_MB);
        let body_limit_bytes = body_limit_mb.saturating_mul(1024 * 1024);

        let session_ttl_secs = env_trim("WALLET_SESSION_TTL_SECS")
            .parse::<u64>()
            .unwrap_or(DEFAULT_SESSION_TTL_SECS);

        let scheme = env_trim("WALLET_SCHEME").parse::<Scheme>().unwrap_or_default();

        let kek_provider = env_trim("WALLET_KEK_PROVIDER")
            .parse::<KekProvider>()
            .unwrap_or_default();

        let kek_path = env_trim("WALLET_KEK_PATH")
            .parse::<PathBuf>()
            .ok()
            .filter(|p| !p.as_os_str().is_empty());

        let kek_id = env_trim("WALLET_KEK_ID");
        let kek_id = if kek_id.is_empty() { None } else { Some(kek_id) };

        let _ = is_truthy(&env_lower("WALLET_DEBUG")); // reserved for future verbose-mode toggle

        let admin_token = env_trim("WALLET_ADMIN_TOKEN");
        let admin_token = if admin_token.is_empty() { None } else { Some(admin_token) };

        Self {
            port,
            host,
            db_path,
            request_timeout_ms,
            body_limit_bytes,
            session_ttl_secs,
            scheme,
            kek_provider,
            kek_path,
            kek_id,
            admin_token,
        }
    }

    /// Create settings for tests.
    pub fn for_tests() -> Self {
        Self {
            port: DEFAULT_PORT,
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            db_path: PathBuf::from("./.data/test-wallet.redb"),
            request_timeout_ms: 60_000,
            body_limit_bytes: DEFAULT_BODY_LIMIT_MB * 1024 * 1024,
            session_ttl_secs: DEFAULT_SESSION_TTL_SECS,
            scheme: Scheme::Cggmp24,
            kek_provider: KekProvider::Local,
            kek_path: None,
            kek_id: None,
            admin_token: Some("test-admin-token".to_string()),
        }
    }

    /// Validate settings for the configured role.
    pub fn validate(&self) -> Result<(), String> {
        if self.kek_provider == KekProvider::Kms && self.kek_id.is_none() {
            return Err(
                "WALLET_KEK_ID is required when WALLET_KEK_PROVIDER=kms.".to_string()
            );
        }

        Ok(())
    }

    // Getters

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    pub fn db_path(&self) -> &PathBuf {
        &self.db_path
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn body_limit_bytes(&self) -> usize {
        self.body_limit_bytes
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    pub fn kek_provider(&self) -> &KekProvider {
        &self.kek_provider
    }

    pub fn kek_path(&self) -> Option<&PathBuf> {
        self.kek_path.as_ref()
    }

    pub fn kek_id(&self) -> Option<&str> {
        self.kek_id.as_deref()
    }

    /// Whether admin routes require a bearer token. False only when no
    /// `WALLET_ADMIN_TOKEN` is configured — a development convenience,
    /// not a valid production posture.
    pub fn internal_token_required(&self) -> bool {
        self.admin_token.is_some()
    }

    pub fn internal_token(&self) -> Option<&str> {
        self.admin_token.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheme_parsing() {
        assert_eq!("cggmp24".parse::<Scheme>().unwrap(), Scheme::Cggmp24);
        assert!("invalid".parse::<Scheme>().is_err());
    }

    #[test]
    fn test_kek_provider_parsing() {
        assert_eq!("local".parse::<KekProvider>().unwrap(), KekProvider::Local);
        assert_eq!("kms".parse::<KekProvider>().unwrap(), KekProvider::Kms);
        assert!("invalid".parse::<KekProvider>().is_err());
    }

    #[test]
    fn test_settings_validation() {
        let settings = Settings::for_tests();
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_kms_requires_key_id() {
        let mut settings = Settings::for_tests();
        settings.kek_provider = KekProvider::Kms;
        assert!(settings.validate().is_err());
    }
}
