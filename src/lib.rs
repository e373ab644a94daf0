// Crate-level lint configuration
// Allow noisy pedantic/cargo lints that aren't worth fixing individually
#![allow(clippy::multiple_crate_versions)] // Transitive deps, can't easily fix
#![allow(clippy::missing_errors_doc)] // Would require extensive doc changes
#![allow(clippy::missing_panics_doc)] // Would require extensive doc changes
#![allow(clippy::must_use_candidate)] // Too many false positives for internal APIs
#![allow(clippy::module_name_repetitions)] // Acceptable for clarity (e.g., WalletError in error mod)
#![allow(clippy::doc_markdown)] // Too strict about backticks in docs
#![allow(clippy::missing_const_for_fn)] // Often debatable, runtime doesn't benefit

//! Threshold wallet service.
//!
//! Holds one share of a 2-of-3 threshold ECDSA key per signer account and
//! cooperates in DKG and transaction/message signing ceremonies alongside an
//! on-device signer share and an end-user device share. The other two
//! shares never touch this process; this service only ever sees its own
//! share, envelope-encrypted at rest, and the protocol messages the
//! ceremonies exchange.
//!
//! ## Architecture
//!
//! A single process holds the server's share directly rather than splitting
//! coordination and share custody across separate processes. Two session-keyed
//! coordinators drive the two ceremonies:
//!
//! - [`dkg::coordinator::DkgCoordinator`] drives the three-party DKG ceremony
//!   to establish a signer's key and server share.
//! - [`signing::coordinator::SigningCoordinator`] drives the 2-of-2 interactive
//!   presign/combine ceremony (server share plus whichever counterpart share
//!   the caller is signing with) that produces a recoverable ECDSA signature.
//!
//! Requests are evaluated against a per-signer policy document
//! ([`policy::engine`]) before a signing ceremony is allowed to start, and
//! every ceremony outcome is appended to a hash-chained audit log
//! ([`audit`]).
//!
//! ## Security Model
//!
//! - **2-of-3 threshold**: no single share reconstructs the key; any two
//!   parties can sign.
//! - **Envelope encryption**: the server's share is AES-256-GCM encrypted
//!   with a KMS-wrapped DEK, path-bound via AAD so a copied ciphertext
//!   cannot be decrypted from another storage path.
//! - **Policy enforcement**: signing requests are evaluated against an
//!   ordered, fail-closed rule list before a ceremony is allowed to start.
//! - **Tamper-evident audit log**: every ceremony and policy decision is
//!   appended to a hash-chained, Ed25519-signed log.

pub mod audit;
pub mod config;
pub mod crypto;
pub mod dkg;
pub mod error;
pub mod middleware;
pub mod orchestrator;
pub mod policy;
pub mod routes;
pub mod signer;
pub mod signing;
pub mod storage;

#[cfg(feature = "otel")]
pub mod telemetry;

#[cfg(not(feature = "otel"))]
pub mod telemetry {
    //! Stub telemetry module when OpenTelemetry is disabled.

    use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

    /// Initialize tracing with console output only.
    pub fn init_tracing() {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "wallet_service=info,actix_web=info".into());
        let fmt_layer = tracing_subscriber::fmt::layer();

        tracing_subscriber::registry().with(env_filter).with(fmt_layer).init();
    }

    /// No-op shutdown when OpenTelemetry is disabled.
    pub fn shutdown_tracing() {}
}

// Re-export commonly used types
pub use config::Settings;
pub use error::{WalletError, WalletResult};
pub use orchestrator::SigningOrchestrator;
