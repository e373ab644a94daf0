//! Signing session state: `Init → Round_1 → Presigned → Finalized`, held
//! as a tagged enum rather than a class hierarchy.

use std::time::{Duration, Instant};

use k256::Scalar;
use uuid::Uuid;

use super::party::SignParty;

pub type SessionId = Uuid;

/// The session's phase. `AwaitingPresign` is entered by `create_session`
/// and left by the single `process_round` call this scheme needs;
/// `Presigned` carries the combined nonce and its derived `r` value,
/// both consumed (and discarded) by `finalize`.
pub enum SignPhase {
    AwaitingPresign,
    Presigned { r: Scalar, k: Scalar },
}

pub struct SignSession {
    pub session_id: SessionId,
    pub public_key: [u8; 33],
    pub parties: [SignParty; 2],
    /// Digest recorded at creation time (message signing always supplies
    /// one; transaction signing does once the orchestrator has RLP-encoded
    /// and hashed the unsigned transaction). `finalize` must be called
    /// with exactly this digest when present.
    pub digest: Option<[u8; 32]>,
    pub phase: SignPhase,
    pub last_activity: Instant,
}

impl SignSession {
    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    pub fn is_expired(&self, ttl: Duration, now: Instant) -> bool {
        now.duration_since(self.last_activity) > ttl
    }
}
