//! Session registry and round dispatcher for the DKG ceremony.
//!
//! The underlying `DkgScheme` is party-local: each of the three
//! cooperating parties runs its own `start`/`advance` state machine.
//! Rather than dial out to the on-device signer and end-user device,
//! this coordinator keeps all three parties' states in-process behind
//! one session entry and drives them together — the caller supplies
//! round `N`'s `incoming` as exactly the flat `outgoing` list round
//! `N-1` returned, and the coordinator fans it back out per party
//! (broadcast to every other party, or point-to-point by `to`) before
//! calling `advance` on each.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use uuid::Uuid;

use crate::crypto::EnvelopeStore;
use crate::crypto::address::derive_eth_address;
use crate::error::{WalletError, WalletResult};

use super::scheme::{DkgScheme, DkgStartContext, ProtocolMessage};
use super::session::{DkgSession, SERVER_PARTY_INDEX, SessionId, THRESHOLD, TOTAL_PARTIES};

/// Response to `init`.
pub struct DkgInitOutput {
    pub session_id: SessionId,
    pub signer_id: String,
    pub round: u8,
}

/// Response to `round`.
pub struct DkgRoundResult {
    pub outgoing: Vec<ProtocolMessage>,
    pub finished: bool,
    /// Present only when `finished` is true — the HTTP layer needs it to
    /// persist the completed ceremony onto the right Signer Record.
    pub signer_id: Option<String>,
    pub public_key: Option<[u8; 33]>,
    pub eth_address: Option<String>,
    /// Base64-unencoded opaque share bytes for the two non-server
    /// parties, present only when `finished` is true. Ordered
    /// `[on_device_signer_share, end_user_device_share]`.
    pub signer_share: Option<Vec<u8>>,
    pub user_share: Option<Vec<u8>>,
}

/// Drives DKG ceremonies: one entry in `sessions` per in-flight
/// ceremony, keyed by session id, swept lazily (on every access) and by
/// a periodic background task.
pub struct DkgCoordinator {
    scheme: Arc<dyn DkgScheme>,
    envelopes: EnvelopeStore,
    ttl: Duration,
    sessions: Mutex<HashMap<SessionId, DkgSession>>,
}

impl DkgCoordinator {
    pub fn new(scheme: Arc<dyn DkgScheme>, envelopes: EnvelopeStore, ttl: Duration) -> Self {
        Self {
            scheme,
            envelopes,
            ttl,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Spawn the low-frequency background TTL sweep. Cheap and
    /// idempotent to call more than once; in practice the binary calls
    /// it exactly once at startup.
    pub fn spawn_ttl_sweeper(self: &Arc<Self>) {
        let coordinator = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(30));
            loop {
                interval.tick().await;
                coordinator.sweep_expired();
            }
        });
    }

    fn sweep_expired(&self) {
        let now = Instant::now();
        let mut sessions = self.sessions.lock().expect("dkg session map poisoned");
        let ttl = self.ttl;
        sessions.retain(|id, session| {
            let expired = session.is_expired(ttl, now);
            if expired {
                tracing::debug!(session_id = %id, "dkg session expired, sweeping");
            }
            !expired
        });
    }

    /// Start a fresh ceremony for `signer_id`. Does not yet run round 1
    /// — the caller drives that via `round(session_id, 1, [])`.
    pub fn init(&self, signer_id: &str) -> WalletResult<DkgInitOutput> {
        let session_id = Uuid::new_v4();
        let session = DkgSession::new(session_id, signer_id.to_string());
        self.sessions
            .lock()
            .expect("dkg session map poisoned")
            .insert(session_id, session);

        Ok(DkgInitOutput {
            session_id,
            signer_id: signer_id.to_string(),
            round: 1,
        })
    }

    /// Drive one round. `round_number` must be exactly one past the
    /// session's last completed round; `incoming` must be the previous
    /// round's `outgoing` echoed back verbatim (empty for round 1).
    pub fn round(
        &self,
        session_id: SessionId,
        round_number: u8,
        incoming: Vec<ProtocolMessage>,
    ) -> WalletResult<DkgRoundResult> {
        self.sweep_expired();

        let mut sessions = self.sessions.lock().expect("dkg session map poisoned");
        let session = sessions
            .get_mut(&session_id)
            .ok_or_else(|| WalletError::SessionNotFound(session_id.to_string()))?;

        if session.is_expired(self.ttl, Instant::now()) {
            let signer_id = session.signer_id.clone();
            sessions.remove(&session_id);
            return Err(WalletError::SessionExpired(signer_id));
        }

        let expected = session.completed_round + 1;
        if round_number != expected {
            return Err(WalletError::InvalidRound {
                expected,
                actual: round_number,
            });
        }

        session.touch();

        let mut combined_outgoing = Vec::new();
        let mut finished_output: Option<(
            [u8; 33],
            Vec<Vec<u8>>,
        )> = None;

        for party_index in 0..TOTAL_PARTIES {
            let filtered = fan_in(&incoming, party_index);

            let (next_state, output) = if round_number == 1 {
                let ctx = DkgStartContext {
                    session_id,
                    party_index,
                    total_parties: TOTAL_PARTIES,
                    threshold: THRESHOLD,
                };
                let (state, output) = self.scheme.start(&ctx)?;
                (Some(state), output)
            } else {
                let slot = &mut session.parties[usize::from(party_index)];
                let state = slot
                    .state
                    .take()
                    .ok_or_else(|| WalletError::DkgFailed(format!("party {party_index} has no live state")))?;
                self.scheme.advance(state, round_number, filtered)?
            };

            session.parties[usize::from(party_index)].state = next_state;
            combined_outgoing.extend(output.outgoing);

            if output.finished {
                let public_key = output
                    .public_key
                    .ok_or_else(|| WalletError::DkgFailed("finished round missing public key".to_string()))?;
                let shares = output
                    .shares
                    .ok_or_else(|| WalletError::DkgFailed("finished round missing shares".to_string()))?;
                let own_share = shares
                    .get(usize::from(party_index))
                    .filter(|s| !s.is_empty())
                    .cloned()
                    .ok_or_else(|| WalletError::DkgFailed(format!("party {party_index} produced no share")))?;

                match &mut finished_output {
                    None => finished_output = Some((public_key, vec![Vec::new(); usize::from(TOTAL_PARTIES)])),
                    Some((existing_key, _)) if *existing_key != public_key => {
                        return Err(WalletError::DkgFailed(
                            "parties disagree on the derived public key".to_string(),
                        ));
                    }
                    Some(_) => {}
                }
                finished_output.as_mut().unwrap().1[usize::from(party_index)] = own_share;
            }
        }

        session.completed_round = round_number;

        let Some((public_key, shares)) = finished_output else {
            return Ok(DkgRoundResult {
                outgoing: combined_outgoing,
                finished: false,
                signer_id: None,
                public_key: None,
                eth_address: None,
                signer_share: None,
                user_share: None,
            });
        };

        let signer_id = session.signer_id.clone();
        sessions.remove(&session_id);
        drop(sessions);

        let server_share = shares
            .get(usize::from(SERVER_PARTY_INDEX))
            .filter(|s| !s.is_empty())
            .ok_or_else(|| WalletError::DkgFailed("server share missing at finalize".to_string()))?;
        self.envelopes.store(&server_share_path(&signer_id), server_share)?;

        let eth_address = derive_eth_address(&public_key)?;

        let other_parties: Vec<u8> = (0..TOTAL_PARTIES).filter(|p| *p != SERVER_PARTY_INDEX).collect();
        let signer_share = shares[usize::from(other_parties[0])].clone();
        let user_share = shares[usize::from(other_parties[1])].clone();

        Ok(DkgRoundResult {
            outgoing: combined_outgoing,
            finished: true,
            signer_id: Some(signer_id),
            public_key: Some(public_key),
            eth_address: Some(eth_address),
            signer_share: Some(signer_share),
            user_share: Some(user_share),
        })
    }
}

/// The storage path a signer's server-held share is persisted at.
pub fn server_share_path(signer_id: &str) -> String {
    format!("signers/{signer_id}/server")
}

/// Deliver the messages addressed to `party`: broadcasts (`to: None`)
/// from anyone else, plus anything explicitly targeted at `party`.
fn fan_in(incoming: &[ProtocolMessage], party: u8) -> Vec<ProtocolMessage> {
    incoming
        .iter()
        .filter(|m| m.from != party && (m.to.is_none() || m.to == Some(party)))
        .cloned()
        .collect()
}
