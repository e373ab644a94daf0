//! Scheme-agnostic DKG trait (resolves the "mixed schemes" open question):
//! the coordinator drives DKG through capability queries rather than
//! hard-coding the 5-round DKLs23 shape, so a scheme completing in fewer
//! interactive rounds (CGGMP24's aux-info + keygen pair) plugs in without a
//! second coordinator code path.

use std::any::Any;

use serde::{Deserialize, Serialize};

use crate::error::WalletResult;

/// A single on-wire MPC message frame.
///
/// `to` is `None` for a broadcast (delivered to every party other than the
/// sender); `Some(party)` targets exactly one recipient. `payload` is
/// opaque to the coordinator — only the scheme implementation interprets
/// the bytes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolMessage {
    pub from: u8,
    pub to: Option<u8>,
    pub payload: Vec<u8>,
}

/// Parameters needed to start a fresh DKG ceremony.
pub struct DkgStartContext {
    pub session_id: uuid::Uuid,
    pub party_index: u8,
    pub total_parties: u8,
    pub threshold: u8,
}

/// Result of driving one round (or the initial `start`) of a DKG ceremony.
pub struct DkgRoundOutput {
    pub outgoing: Vec<ProtocolMessage>,
    pub finished: bool,
    /// Present only when `finished` is true.
    pub public_key: Option<[u8; 33]>,
    /// Present only when `finished` is true: one opaque share per party,
    /// ordered by party index.
    pub shares: Option<Vec<Vec<u8>>>,
}

/// Opaque, scheme-owned in-progress ceremony state. The coordinator never
/// inspects this; it only threads it between `start`/`advance` calls. `Any`
/// lets a scheme implementation recover its own concrete state out of the
/// trait object via a safe `downcast`.
pub trait DkgSchemeState: Send + Any {}

/// A threshold-ECDSA DKG scheme, abstracted over its number of rounds and
/// whether it supports a presignature split during signing.
pub trait DkgScheme: Send + Sync {
    /// Number of interactive message rounds this scheme's DKG protocol
    /// drives (5 for DKLs23; fewer for a single-call-shaped scheme like the
    /// aux-info + keygen pair CGGMP24 uses).
    fn rounds_per_dkg(&self) -> u8;

    /// Whether signing sessions for keys from this scheme support the
    /// presignature-then-finalize split the Signing Coordinator relies on.
    fn supports_presignature(&self) -> bool;

    /// Round 1: no incoming messages, produces the first round's broadcasts
    /// and the opaque scheme state to carry into `advance`.
    fn start(
        &self,
        ctx: &DkgStartContext,
    ) -> WalletResult<(Box<dyn DkgSchemeState>, DkgRoundOutput)>;

    /// Advance the ceremony by one round, consuming the incoming messages
    /// addressed to this party (already fanned-out and filtered by the
    /// coordinator) and the state produced by the previous call.
    fn advance(
        &self,
        state: Box<dyn DkgSchemeState>,
        round: u8,
        incoming: Vec<ProtocolMessage>,
    ) -> WalletResult<(Option<Box<dyn DkgSchemeState>>, DkgRoundOutput)>;
}
