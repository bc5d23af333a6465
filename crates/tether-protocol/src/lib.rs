//! Wire protocol for Tether.
//!
//! This crate defines everything that is about bytes and nothing that is
//! about connections:
//!
//! - **Framing** ([`FrameBuffer`], [`encode_frame`]): the
//!   `[u32 length][u16 code][payload]` wire format and the reassembly
//!   buffer that turns an arbitrary chunked byte stream back into frames.
//! - **Codec** ([`Codec`] trait, [`BincodeCodec`]): how payloads become
//!   bytes.
//! - **Identities** ([`PeerId`], [`ObjectId`], [`RequestId`]): random
//!   128-bit identifiers for peers, shared objects, and RPC requests.
//! - **Routing** ([`Direction`]): which routes a shared object or RPC
//!   method may travel.
//! - **Deltas** ([`DeltaSegment`], [`coalesce`]): per-field updates.
//! - **Values** ([`Value`], [`RpcArg`], [`RpcReturn`]): the closed set of
//!   shapes RPC arguments and results may take.
//! - **Errors** ([`ProtocolError`]).
//!
//! # Architecture
//!
//! ```text
//! Transport (bytes) → Protocol (frames, values) → Tether (packets, endpoints)
//! ```

// ---------------------------------------------------------------------------
// Module declarations
// ---------------------------------------------------------------------------

mod codec;
mod delta;
mod direction;
mod error;
mod frame;
mod types;
mod value;

// ---------------------------------------------------------------------------
// Re-exports
// ---------------------------------------------------------------------------

pub use codec::{BincodeCodec, Codec};
pub use delta::{DeltaSegment, coalesce};
pub use direction::Direction;
pub use error::ProtocolError;
pub use frame::{CODE_LEN, Frame, FrameBuffer, HEADER_LEN, MAX_FRAME_LEN, Pushed, encode_frame};
pub use types::{FieldTag, ObjectId, PacketCode, PeerId, RequestId};
pub use value::{RpcArg, RpcReturn, Typed, Value, ValueKind, WireType};
