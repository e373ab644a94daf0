//! Cryptographic primitives shared across the DKG, signing and envelope-store
//! components: secret hygiene, at-rest encryption, key wrapping and Ethereum
//! address derivation.

pub mod address;
pub mod envelope;
pub mod kms;
pub mod secret;

pub use address::derive_eth_address;
pub use envelope::EnvelopeStore;
pub use kms::{KmsProvider, LocalFileKms};
pub use secret::SecretBytes;
