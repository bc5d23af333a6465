//! Identity types shared by every layer.
//!
//! Peers, shared objects, and RPC requests are all named by random
//! 128-bit identifiers. Each gets its own newtype so a `PeerId` can never
//! be passed where an `ObjectId` is expected, even though both wrap a
//! [`Uuid`].

use std::fmt;

use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use uuid::{Builder, Uuid};

/// A registered packet type's numeric code on the wire.
pub type PacketCode = u16;

/// The order tag of a shared object field targeted by a delta segment.
pub type FieldTag = u16;

// ---------------------------------------------------------------------------
// Identity newtypes
// ---------------------------------------------------------------------------

// The three identities differ only in name and display prefix, so they are
// stamped out by one macro.
//
// Serialization is hand-written: binary formats get the 16 raw bytes,
// human-readable formats get the hyphenated string.
macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(Uuid);

        impl $name {
            /// Generates a fresh random identifier.
            pub fn random() -> Self {
                Self(Builder::from_random_bytes(rand::random()).into_uuid())
            }

            /// The all-zero identifier.
            pub const fn nil() -> Self {
                Self(Uuid::nil())
            }

            /// Wraps an existing [`Uuid`].
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Returns the underlying [`Uuid`].
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }

            /// Returns `true` for the all-zero identifier.
            pub fn is_nil(&self) -> bool {
                self.0.is_nil()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "-{}"), self.0.hyphenated())
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                if serializer.is_human_readable() {
                    serializer.collect_str(&self.0.hyphenated())
                } else {
                    self.0.as_bytes().serialize(serializer)
                }
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                if deserializer.is_human_readable() {
                    let text = String::deserialize(deserializer)?;
                    Uuid::parse_str(&text).map(Self).map_err(de::Error::custom)
                } else {
                    <[u8; 16]>::deserialize(deserializer).map(|bytes| Self(Uuid::from_bytes(bytes)))
                }
            }
        }
    };
}

uuid_id!(
    /// Identity the server assigns to a connected peer.
    ///
    /// Assigned once, when the server accepts the connection, and sent to
    /// the peer inside the `Connect` packet.
    PeerId,
    "peer"
);

uuid_id!(
    /// Identity of a shared object, assigned when the object is created
    /// and identical in every endpoint that holds a copy.
    ObjectId,
    "obj"
);

uuid_id!(
    /// Correlation id pairing an RPC call with its response.
    RequestId,
    "req"
);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BincodeCodec, Codec};

    #[test]
    fn test_random_ids_differ() {
        assert_ne!(PeerId::random(), PeerId::random());
        assert!(!ObjectId::random().is_nil());
    }

    #[test]
    fn test_nil_id() {
        let id = RequestId::nil();
        assert!(id.is_nil());
        assert_eq!(id.as_uuid(), &Uuid::nil());
    }

    #[test]
    fn test_display_uses_prefix() {
        let id = PeerId::nil();
        assert_eq!(id.to_string(), "peer-00000000-0000-0000-0000-000000000000");
        assert!(ObjectId::nil().to_string().starts_with("obj-"));
        assert!(RequestId::nil().to_string().starts_with("req-"));
    }

    // -- Serialization overrides --

    #[test]
    fn test_binary_encoding_is_sixteen_raw_bytes() {
        let id = ObjectId::random();
        let bytes = BincodeCodec.encode(&id).unwrap();
        assert_eq!(bytes.len(), 16);
        assert_eq!(bytes.as_slice(), id.as_uuid().as_bytes());

        let decoded: ObjectId = BincodeCodec.decode(&bytes).unwrap();
        assert_eq!(decoded, id);
    }

    #[test]
    fn test_json_encoding_is_hyphenated_string() {
        let uuid = Uuid::parse_str("67e55044-10b1-426f-9247-bb680e5fe0c8").unwrap();
        let id = PeerId::from_uuid(uuid);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"67e55044-10b1-426f-9247-bb680e5fe0c8\"");

        let decoded: PeerId = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, id);
    }

    #[test]
    fn test_json_rejects_garbage() {
        let result: Result<PeerId, _> = serde_json::from_str("\"not-a-uuid\"");
        assert!(result.is_err());
    }
}
