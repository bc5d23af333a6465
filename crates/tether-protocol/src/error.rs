//! Error types for the protocol layer.

use crate::PacketCode;

/// Errors that can occur while framing, encoding, or decoding.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed (turning a Rust value into bytes).
    #[error("encode failed: {0}")]
    Encode(bincode::Error),

    /// Deserialization failed (turning bytes into a Rust value).
    ///
    /// Common causes: truncated payloads or a payload registered under a
    /// different type on the other side.
    #[error("decode failed: {0}")]
    Decode(bincode::Error),

    /// The message is well-formed but violates protocol rules.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// A frame declared a length above the allowed maximum.
    #[error("frame of {len} bytes exceeds maximum of {max}")]
    FrameTooLarge {
        /// Declared length.
        len: usize,
        /// Configured maximum.
        max: usize,
    },

    /// A frame declared a length too short to hold its type code.
    #[error("malformed frame: declared length {0}")]
    MalformedFrame(usize),

    /// A frame carried a code that no packet type is registered under.
    #[error("unknown packet code {0}")]
    UnknownPacketCode(PacketCode),

    /// A packet type was sent without being registered first.
    #[error("packet type {0} is not registered")]
    UnregisteredPacket(&'static str),

    /// Two packet types were registered under the same code.
    #[error("packet code {0} is already registered")]
    DuplicatePacketCode(PacketCode),

    /// The same packet type was registered twice.
    #[error("packet type {0} is already registered")]
    DuplicatePacketType(&'static str),

    /// A shared object arrived with a type name nobody registered.
    #[error("unknown shared object type {0:?}")]
    UnknownObjectType(String),

    /// Two shared object types were registered under the same name.
    #[error("shared object type {0:?} is already registered")]
    DuplicateObjectType(&'static str),

    /// An RPC argument or result did not have the expected shape.
    #[error("argument mismatch: {0}")]
    ArgumentMismatch(String),
}
