//! Interactive threshold signing: a session-keyed state machine that
//! runs a single presignature round between the server's local party
//! and one cooperating remote party, then combines shares to finalize
//! an ECDSA signature over a caller-supplied digest.

pub mod coordinator;
pub mod party;
pub mod session;
pub mod tx;

pub use coordinator::{SignRoundResult, SignSessionOutput, SignatureOutput, SigningCoordinator};
pub use session::SessionId;
pub use tx::{GasFees, UnsignedTransaction};
