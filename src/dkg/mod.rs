//! Distributed Key Generation: a multi-round, session-keyed state machine
//! that drives three cooperating parties through a bounded protocol and
//! yields three shares plus a shared public key.

pub mod coordinator;
pub mod scheme;
pub mod session;

pub mod cggmp24_scheme;

pub use coordinator::DkgCoordinator;
pub use scheme::{DkgRoundOutput, DkgScheme, DkgStartContext, ProtocolMessage};
