//! Interactive threshold signing: a session-keyed state machine
//! that mirrors the DKG coordinator's texture (`dkg::coordinator`) —
//! one entry in `sessions` per in-flight signing ceremony between the
//! server's local party and one cooperating remote party, swept by the
//! same lazy-plus-periodic TTL strategy.
//!
//! Unlike the DKG ceremony's multi-round `start`/`advance` shape, a
//! 2-of-2 presignature needs exactly one round of nonce-point exchange
//! before `finalize` can run: `create_session` samples both parties'
//! nonces and emits their broadcasts, `process_round` combines the
//! echoed nonce points into a shared `r`, and `finalize` combines the
//! two share scalars via Lagrange interpolation and produces `(r, s, v)`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use k256::ecdsa::{RecoveryId, Signature as EcdsaSignature, VerifyingKey};
use k256::elliptic_curve::point::AffineCoordinates;
use k256::elliptic_curve::sec1::{FromEncodedPoint, ToEncodedPoint};
use k256::elliptic_curve::{Field, PrimeField};
use k256::{AffinePoint, ProjectivePoint, Scalar};
use primitive_types::U256;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::crypto::SecretBytes;
use crate::dkg::scheme::ProtocolMessage;
use crate::error::{WalletError, WalletResult};

use super::party::{SignParty, lagrange_coefficient};
use super::session::{SessionId, SignPhase, SignSession};

/// secp256k1 group order, little-endian limbs (low word first) matching
/// `primitive_types::U256`'s internal representation.
const SECP256K1_ORDER: U256 = U256([
    0xBFD25E8CD0364141,
    0xBAAEDCE6AF48A03B,
    0xFFFFFFFFFFFFFFFE,
    0xFFFFFFFFFFFFFFFF,
]);

/// Wire payload for the single nonce-point broadcast round.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct NoncePointPayload {
    point: [u8; 33],
}

/// Result of `create_session`.
pub struct SignSessionOutput {
    pub session_id: SessionId,
    pub outgoing: Vec<ProtocolMessage>,
}

/// Result of `process_round`: the session becomes presigned after
/// exactly one round, so `outgoing` is always empty here, but the shape
/// is kept symmetric with the DKG coordinator's `round` result.
pub struct SignRoundResult {
    pub outgoing: Vec<ProtocolMessage>,
    pub presigned: bool,
}

/// The final ECDSA signature triple, Ethereum-style (`v` already offset
/// by 27, `normalize_s` already applied).
pub struct SignatureOutput {
    pub r: [u8; 32],
    pub s: [u8; 32],
    pub v: u8,
}

/// Drives 2-party interactive signing ceremonies.
pub struct SigningCoordinator {
    ttl: Duration,
    sessions: Mutex<HashMap<SessionId, SignSession>>,
}

impl SigningCoordinator {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            sessions: Mutex::new(HashMap::new()),
        }
    }

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
        let mut sessions = self.sessions.lock().expect("signing session map poisoned");
        let ttl = self.ttl;
        sessions.retain(|id, session| {
            let expired = session.is_expired(ttl, now);
            if expired {
                tracing::debug!(session_id = %id, "signing session expired, sweeping");
            }
            !expired
        });
    }

    /// Start a presignature ceremony for two cooperating parties holding
    /// `shares[0]`/`shares[1]` at DKG-assigned indices `party_indices[0]`/
    /// `party_indices[1]`. `digest` is recorded now when the caller
    /// already knows it (message signing); transaction signing supplies
    /// it later, at `finalize`, once the unsigned transaction is encoded.
    ///
    /// `shares` arrive as `SecretBytes` so the plaintext share never sits
    /// in a bare `Vec<u8>` between the HTTP layer and `SignParty::new`
    /// decoding it into a scalar; both buffers are wiped when this scope
    /// ends, win or lose.
    pub fn create_session(
        &self,
        shares: [SecretBytes; 2],
        party_indices: [u8; 2],
        public_key: [u8; 33],
        digest: Option<[u8; 32]>,
    ) -> WalletResult<SignSessionOutput> {
        let party0 = SignParty::new(party_indices[0], shares[0].as_bytes())?;
        let party1 = SignParty::new(party_indices[1], shares[1].as_bytes())?;

        let outgoing = vec![
            nonce_message(0, &party0),
            nonce_message(1, &party1),
        ];

        let session = SignSession {
            session_id: Uuid::new_v4(),
            public_key,
            parties: [party0, party1],
            digest,
            phase: SignPhase::AwaitingPresign,
            last_activity: Instant::now(),
        };
        let session_id = session.session_id;

        self.sessions
            .lock()
            .expect("signing session map poisoned")
            .insert(session_id, session);

        Ok(SignSessionOutput { session_id, outgoing })
    }

    /// Consume the echoed nonce-point broadcasts from `create_session`
    /// and derive the shared `r`. This scheme needs exactly one round,
    /// so `round_number` must always be `1`.
    pub fn process_round(
        &self,
        session_id: SessionId,
        round_number: u8,
        incoming: Vec<ProtocolMessage>,
    ) -> WalletResult<SignRoundResult> {
        self.sweep_expired();

        let mut sessions = self.sessions.lock().expect("signing session map poisoned");
        let session = sessions
            .get_mut(&session_id)
            .ok_or_else(|| WalletError::SessionNotFound(session_id.to_string()))?;

        if session.is_expired(self.ttl, Instant::now()) {
            sessions.remove(&session_id);
            return Err(WalletError::SessionExpired(session_id.to_string()));
        }

        if !matches!(session.phase, SignPhase::AwaitingPresign) {
            return Err(WalletError::InvalidSessionState {
                expected: "awaiting_presign".to_string(),
                actual: "presigned".to_string(),
            });
        }

        if round_number != 1 {
            return Err(WalletError::InvalidRound { expected: 1, actual: round_number });
        }

        session.touch();

        let mut points = [None, None];
        for message in &incoming {
            let payload: NoncePointPayload = serde_json::from_slice(&message.payload)?;
            let point = decode_point(&payload.point)?;
            let idx = usize::from(message.from);
            if idx >= points.len() {
                return Err(WalletError::InvalidInput(format!("unknown party index {idx}")));
            }
            points[idx] = Some(point);
        }

        let [Some(r0), Some(r1)] = points else {
            return Err(WalletError::InvalidInput(
                "expected exactly one nonce point from each party".to_string(),
            ));
        };

        let combined_point = r0 + r1;
        let combined_affine = combined_point.to_affine();
        let mut x_bytes = [0u8; 32];
        x_bytes.copy_from_slice(&combined_affine.x());
        let r = reduce_to_scalar(&x_bytes)?;
        let k = session.parties[0].nonce + session.parties[1].nonce;

        session.phase = SignPhase::Presigned { r, k };

        Ok(SignRoundResult { outgoing: Vec::new(), presigned: true })
    }

    /// Combine both parties' shares via Lagrange interpolation against
    /// the presigned `(r, k)` and produce the final ECDSA triple. The
    /// session is consumed on every path, success or failure.
    pub fn finalize(&self, session_id: SessionId, digest: [u8; 32]) -> WalletResult<SignatureOutput> {
        let session = self
            .sessions
            .lock()
            .expect("signing session map poisoned")
            .remove(&session_id)
            .ok_or_else(|| WalletError::SessionNotFound(session_id.to_string()))?;

        if let Some(recorded) = session.digest {
            if recorded != digest {
                return Err(WalletError::InvalidInput(
                    "digest does not match the one recorded at session creation".to_string(),
                ));
            }
        }

        let SignPhase::Presigned { r, k } = session.phase else {
            return Err(WalletError::NotPresigned(session_id.to_string()));
        };

        let party0 = &session.parties[0];
        let party1 = &session.parties[1];
        let l0 = lagrange_coefficient(party0.x_coordinate(), party1.x_coordinate())?;
        let l1 = lagrange_coefficient(party1.x_coordinate(), party0.x_coordinate())?;
        let private_key = party0.share * l0 + party1.share * l1;

        let digest_scalar = reduce_to_scalar(&digest)?;
        let k_inv = Option::<Scalar>::from(k.invert())
            .ok_or_else(|| WalletError::SigningFailed("nonce scalar is zero".to_string()))?;
        let mut s = k_inv * (digest_scalar + r * private_key);

        // Normalize to low-s; negating s is equivalent to negating the
        // nonce, so the recovery id search below still finds a valid bit.
        let s_bytes = scalar_to_u256(&s);
        let half_order = SECP256K1_ORDER >> 1;
        if s_bytes > half_order {
            s = -s;
        }

        let r_bytes = scalar_to_bytes(&r);
        let s_bytes = scalar_to_bytes(&s);

        let signature = EcdsaSignature::from_scalars(r_bytes, s_bytes)
            .map_err(|_| WalletError::SigningFailed("invalid signature scalars".to_string()))?;

        for bit in 0u8..2 {
            let Some(recovery_id) = RecoveryId::from_byte(bit) else { continue };
            let Ok(recovered) = VerifyingKey::recover_from_prehash(&digest, &signature, recovery_id) else {
                continue;
            };
            let recovered_bytes = recovered.to_encoded_point(true);
            if recovered_bytes.as_bytes() == session.public_key {
                return Ok(SignatureOutput { r: r_bytes, s: s_bytes, v: bit + 27 });
            }
        }

        Err(WalletError::RecoveryFailed)
    }
}

fn nonce_message(from: u8, party: &SignParty) -> ProtocolMessage {
    let point = party.nonce_point().to_affine().to_encoded_point(true);
    let mut bytes = [0u8; 33];
    bytes.copy_from_slice(point.as_bytes());
    let payload = serde_json::to_vec(&NoncePointPayload { point: bytes })
        .expect("nonce payload always serializes");
    ProtocolMessage { from, to: None, payload }
}

fn decode_point(bytes: &[u8; 33]) -> WalletResult<ProjectivePoint> {
    let encoded = k256::EncodedPoint::from_bytes(bytes)
        .map_err(|_| WalletError::InvalidInput("malformed nonce point".to_string()))?;
    let affine: AffinePoint = Option::from(AffinePoint::from_encoded_point(&encoded))
        .ok_or_else(|| WalletError::InvalidInput("nonce point is not on the curve".to_string()))?;
    Ok(ProjectivePoint::from(affine))
}

/// Reduce a big-endian 32-byte value mod the curve order, as ECDSA's
/// "bits2int" step requires for both message digests and x-coordinates.
fn reduce_to_scalar(bytes: &[u8; 32]) -> WalletResult<Scalar> {
    let value = U256::from_big_endian(bytes);
    let reduced = if value >= SECP256K1_ORDER { value - SECP256K1_ORDER } else { value };
    let mut out = [0u8; 32];
    reduced.to_big_endian(&mut out);
    Option::<Scalar>::from(Scalar::from_repr(out.into()))
        .ok_or_else(|| WalletError::SigningFailed("scalar reduction failed".to_string()))
}

fn scalar_to_bytes(scalar: &Scalar) -> [u8; 32] {
    let repr = scalar.to_repr();
    let mut out = [0u8; 32];
    out.copy_from_slice(&repr);
    out
}

fn scalar_to_u256(scalar: &Scalar) -> U256 {
    U256::from_big_endian(&scalar_to_bytes(scalar))
}
