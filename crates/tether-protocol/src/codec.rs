//! Codec trait and the binary implementation used on the wire.
//!
//! A "codec" (coder/decoder) converts between Rust types and raw bytes.
//! Everything above this crate only needs something that implements
//! [`Codec`]; the concrete format is picked once per registry.

use serde::{Serialize, de::DeserializeOwned};

use crate::ProtocolError;

/// A codec that can encode Rust types to bytes and decode bytes back.
///
/// `Send + Sync + 'static` lets a codec live inside registries that are
/// moved into background tasks or shared between endpoints.
pub trait Codec: Send + Sync + 'static {
    /// Serializes a value into bytes.
    ///
    /// # Errors
    /// Returns `ProtocolError::Encode` if serialization fails.
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError>;

    /// Deserializes bytes back into a value.
    ///
    /// # Errors
    /// Returns `ProtocolError::Decode` if the bytes are malformed,
    /// truncated, or don't match the expected type.
    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError>;
}

// ---------------------------------------------------------------------------
// BincodeCodec
// ---------------------------------------------------------------------------

/// A [`Codec`] using `bincode`'s default configuration (little-endian,
/// fixed-width integers).
///
/// Struct fields are written in declaration order, so a field's position
/// in the struct is its order tag. Types that need a different encoding
/// override `Serialize`/`Deserialize` by hand; the identity types in this
/// crate do so to stay 16 raw bytes on the wire.
///
/// ```rust
/// use tether_protocol::{BincodeCodec, Codec};
///
/// let codec = BincodeCodec;
/// let bytes = codec.encode(&(7u16, String::from("hi"))).unwrap();
/// let decoded: (u16, String) = codec.decode(&bytes).unwrap();
/// assert_eq!(decoded, (7, "hi".to_string()));
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct BincodeCodec;

impl Codec for BincodeCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError> {
        bincode::serialize(value).map_err(ProtocolError::Encode)
    }

    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError> {
        bincode::deserialize(data).map_err(ProtocolError::Decode)
    }
}
