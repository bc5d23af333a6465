//! Unified error type for the Tether framework.

use tether_protocol::{ObjectId, PeerId, ProtocolError};
use tether_transport::TransportError;

use crate::TransmitterState;

/// Top-level error that wraps all crate-specific errors.
///
/// The `#[from]` attributes let `?` convert transport and protocol errors
/// automatically.
#[derive(Debug, thiserror::Error)]
pub enum TetherError {
    /// A transport-level error (bind, connect, send).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A protocol-level error (framing, encode, decode, registration).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// An operation was attempted in a transmitter state that forbids it,
    /// e.g. sending before connecting or hosting twice.
    #[error("cannot {operation} while {state}")]
    InvalidState {
        /// The operation that was rejected.
        operation: &'static str,
        /// The state the transmitter was in.
        state: TransmitterState,
    },

    /// No connected peer has this identity.
    #[error("unknown peer {0}")]
    UnknownPeer(PeerId),

    /// No shared object with this identity is registered locally.
    #[error("unknown shared object {0}")]
    UnknownObject(ObjectId),
}
