//! HTTP routes for the wallet service.
//!
//! Routes are organized by functionality:
//! - `health`: Health check and build info
//! - `dkg`: DKG ceremony endpoints (operator/admin-gated)
//! - `signing`: transaction/message signing endpoints (caller-credentialed)
//! - `admin`: signer provisioning, status, policy and user-share endpoints

pub mod admin;
pub mod dkg;
pub mod health;
pub mod signing;

pub use health::{build_info, health};
