//! DKG session state: a tagged sum type over `{NotStarted, InProgress,
//! Terminated}`, held in a single map behind a reader-writer lock rather
//! than as polymorphic session objects.

use std::time::Instant;

use chrono::{DateTime, Utc};

use super::scheme::DkgSchemeState;

pub type SessionId = uuid::Uuid;

/// Fixed ceremony shape: three parties, 2-of-3 threshold, zero-indexed
/// Party 0 is always the server's own local party.
pub const TOTAL_PARTIES: u8 = 3;
pub const THRESHOLD: u8 = 2;
pub const SERVER_PARTY_INDEX: u8 = 0;

/// Per-party in-progress ceremony state; `None` once that party has
/// produced its terminal output for the current round (briefly, during
/// the fan-out/advance pass).
pub struct PartySlot {
    pub state: Option<Box<dyn DkgSchemeState>>,
}

/// One DKG ceremony in flight.
pub struct DkgSession {
    pub session_id: SessionId,
    pub signer_id: String,
    /// The round number that has already completed; the next `round()`
    /// call must name `completed_round + 1`. `0` before round 1 runs.
    pub completed_round: u8,
    pub parties: Vec<PartySlot>,
    pub created_at: DateTime<Utc>,
    pub last_activity: Instant,
}

impl DkgSession {
    pub fn new(session_id: SessionId, signer_id: String) -> Self {
        let parties = (0..TOTAL_PARTIES).map(|_| PartySlot { state: None }).collect();
        Self {
            session_id,
            signer_id,
            completed_round: 0,
            parties,
            created_at: Utc::now(),
            last_activity: Instant::now(),
        }
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    pub fn is_expired(&self, ttl: std::time::Duration, now: Instant) -> bool {
        now.duration_since(self.last_activity) > ttl
    }
}
