//! Packet registry: codes, framing, and reassembly.
//!
//! A [`Registry`] answers two questions: "what code does this packet type
//! go out under?" and "what type does this incoming code decode to?". It
//! also owns the per-connection reassembly buffer.
//!
//! Codes `0..=2` are taken by the built-in [`Connect`], [`Disconnect`] and
//! [`Ping`] packets; application packets are numbered from 3 upwards in
//! registration order.

use std::any::{self, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use tether_protocol::{
    BincodeCodec, Codec, Frame, FrameBuffer, PacketCode, ProtocolError, Pushed, encode_frame,
};

use crate::object::{AnyObject, SharedObject};
use crate::replication::{DeltaPacket, SharedObjectPacket};
use crate::rpc::{MethodTable, RpcCall, RpcResponse, RpcTable};
use crate::{Connect, Disconnect, Dispatch, Packet, Ping};

/// First code handed out to application packets.
pub const FIRST_CUSTOM_CODE: PacketCode = 3;

type DecodePacket = fn(&[u8]) -> Result<Box<dyn Dispatch>, ProtocolError>;
type DecodeObject = fn(&[u8]) -> Result<Box<dyn AnyObject>, ProtocolError>;

fn decode_packet<P: Packet>(payload: &[u8]) -> Result<Box<dyn Dispatch>, ProtocolError> {
    let packet: P = BincodeCodec.decode(payload)?;
    Ok(Box::new(packet))
}

fn decode_object<T: SharedObject>(bytes: &[u8]) -> Result<Box<dyn AnyObject>, ProtocolError> {
    let object: T = BincodeCodec.decode(bytes)?;
    Ok(Box::new(object))
}

#[derive(Clone)]
struct PacketEntry {
    name: &'static str,
    decode: DecodePacket,
}

/// What one [`Registry::reassemble`] produced.
pub struct Reassembled {
    /// Decoded packets, in receipt order.
    pub packets: Vec<Box<dyn Dispatch>>,
    /// The framing error that stopped reassembly, if any.
    pub error: Option<ProtocolError>,
}

impl std::fmt::Debug for Reassembled {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reassembled")
            .field("packets", &self.packets.len())
            .field("error", &self.error)
            .finish()
    }
}

/// A registered shared object type.
#[derive(Clone)]
pub(crate) struct ObjectType {
    pub(crate) decode: DecodeObject,
    pub(crate) methods: Arc<dyn MethodTable>,
}

/// The immutable-after-setup part of a registry, shared between clones.
#[derive(Clone, Default)]
struct Tables {
    by_code: HashMap<PacketCode, PacketEntry>,
    by_type: HashMap<TypeId, PacketCode>,
    objects: HashMap<&'static str, ObjectType>,
    cursor: PacketCode,
}

/// Maps packet codes to packet types and turns bytes into packets.
///
/// One registry is set up per endpoint. Connections get a clone: the
/// registration tables are shared, the reassembly buffer is copied, so
/// peers never see each other's partial frames.
#[derive(Clone)]
pub struct Registry {
    tables: Arc<Tables>,
    buffer: FrameBuffer,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    /// Creates a registry holding only the built-in packets.
    pub fn new() -> Self {
        let mut tables = Tables::default();
        for (code, builtin, type_id) in [
            (0, entry::<Connect>(), TypeId::of::<Connect>()),
            (1, entry::<Disconnect>(), TypeId::of::<Disconnect>()),
            (2, entry::<Ping>(), TypeId::of::<Ping>()),
        ] {
            tables.by_code.insert(code, builtin);
            tables.by_type.insert(type_id, code);
        }
        tables.cursor = FIRST_CUSTOM_CODE;

        Self {
            tables: Arc::new(tables),
            buffer: FrameBuffer::new(),
        }
    }

    // -----------------------------------------------------------------------
    // Registration
    // -----------------------------------------------------------------------

    /// Registers `P` under the next free code.
    ///
    /// # Errors
    /// Fails if `P` is already registered, or if the next code is taken
    /// (possible after [`force_register`](Self::force_register)).
    pub fn register<P: Packet>(&mut self) -> Result<&mut Self, ProtocolError> {
        let tables = Arc::make_mut(&mut self.tables);
        let code = tables.cursor;
        let name = any::type_name::<P>();

        if tables.by_type.contains_key(&TypeId::of::<P>()) {
            return Err(ProtocolError::DuplicatePacketType(name));
        }
        if tables.by_code.contains_key(&code) {
            return Err(ProtocolError::DuplicatePacketCode(code));
        }

        tables.by_code.insert(code, entry::<P>());
        tables.by_type.insert(TypeId::of::<P>(), code);
        tables.cursor = code.wrapping_add(1);
        tracing::trace!(code, packet = name, "registered packet");
        Ok(self)
    }

    /// Registers `P` under `code`. Later [`register`](Self::register)
    /// calls continue from `code + 1`.
    ///
    /// # Errors
    /// Same as [`register`](Self::register).
    pub fn force_register<P: Packet>(&mut self, code: PacketCode) -> Result<&mut Self, ProtocolError> {
        Arc::make_mut(&mut self.tables).cursor = code;
        self.register::<P>()
    }

    /// Registers the full-object and delta packets.
    ///
    /// # Errors
    /// Same as [`register`](Self::register).
    pub fn register_replication(&mut self) -> Result<&mut Self, ProtocolError> {
        self.register::<SharedObjectPacket>()?
            .register::<DeltaPacket>()
    }

    /// Registers the RPC call and response packets.
    ///
    /// # Errors
    /// Same as [`register`](Self::register).
    pub fn register_rpc(&mut self) -> Result<&mut Self, ProtocolError> {
        self.register::<RpcCall>()?.register::<RpcResponse>()
    }

    /// Registers replication, then RPC packets.
    ///
    /// # Errors
    /// Same as [`register`](Self::register).
    pub fn register_replication_and_rpc(&mut self) -> Result<&mut Self, ProtocolError> {
        self.register_replication()?.register_rpc()
    }

    /// Registers a shared object type so it can be received, and builds
    /// its RPC method table.
    ///
    /// # Errors
    /// Returns `ProtocolError::DuplicateObjectType` if another type already
    /// uses `T::TYPE_NAME`.
    pub fn register_shared<T: SharedObject>(&mut self) -> Result<&mut Self, ProtocolError> {
        let tables = Arc::make_mut(&mut self.tables);
        if tables.objects.contains_key(T::TYPE_NAME) {
            return Err(ProtocolError::DuplicateObjectType(T::TYPE_NAME));
        }

        let mut methods = RpcTable::<T>::new();
        T::register_rpcs(&mut methods);
        tables.objects.insert(
            T::TYPE_NAME,
            ObjectType {
                decode: decode_object::<T>,
                methods: Arc::new(methods),
            },
        );
        Ok(self)
    }

    // -----------------------------------------------------------------------
    // Lookup
    // -----------------------------------------------------------------------

    /// The code `P` is registered under.
    pub fn code_of<P: Packet>(&self) -> Option<PacketCode> {
        self.tables.by_type.get(&TypeId::of::<P>()).copied()
    }

    /// The type name registered under `code`.
    pub fn name_of(&self, code: PacketCode) -> Option<&'static str> {
        self.tables.by_code.get(&code).map(|entry| entry.name)
    }

    pub(crate) fn object_type(&self, type_name: &str) -> Result<&ObjectType, ProtocolError> {
        self.tables
            .objects
            .get(type_name)
            .ok_or_else(|| ProtocolError::UnknownObjectType(type_name.to_string()))
    }

    // -----------------------------------------------------------------------
    // Serialization
    // -----------------------------------------------------------------------

    /// Encodes `packet` as one complete frame.
    ///
    /// # Errors
    /// Fails if `P` isn't registered or its payload can't be encoded.
    pub fn serialize<P: Packet>(&self, packet: &P) -> Result<Vec<u8>, ProtocolError> {
        let code = self
            .code_of::<P>()
            .ok_or(ProtocolError::UnregisteredPacket(any::type_name::<P>()))?;
        let payload = BincodeCodec.encode(packet)?;
        encode_frame(code, &payload)
    }

    /// Decodes one frame's payload into the packet type registered under
    /// its code.
    ///
    /// # Errors
    /// Returns `ProtocolError::UnknownPacketCode` for an unregistered code,
    /// or the codec's error if the payload doesn't decode.
    pub fn decode(&self, frame: &Frame) -> Result<Box<dyn Dispatch>, ProtocolError> {
        let entry = self
            .tables
            .by_code
            .get(&frame.code)
            .ok_or(ProtocolError::UnknownPacketCode(frame.code))?;
        (entry.decode)(&frame.payload)
    }

    /// Feeds received bytes in and returns every packet they complete.
    ///
    /// Frames with an unknown code, or whose payload fails to decode, are
    /// logged and skipped; the frames around them are still delivered. A
    /// framing error is handed back in [`Reassembled::error`] together with
    /// the packets completed before it.
    pub fn reassemble(&mut self, data: &[u8]) -> Reassembled {
        let Pushed { frames, error } = self.buffer.push(data);
        let mut packets = Vec::with_capacity(frames.len());
        for frame in frames {
            match self.decode(&frame) {
                Ok(packet) => packets.push(packet),
                Err(e) => {
                    tracing::warn!(code = frame.code, error = %e, "dropping undecodable frame");
                }
            }
        }
        Reassembled { packets, error }
    }

    /// Discards any partially received frame.
    pub fn reset_buffer(&mut self) {
        self.buffer.reset();
    }

    /// Bytes currently waiting for the rest of their frame.
    pub fn buffered(&self) -> usize {
        self.buffer.buffered()
    }
}

fn entry<P: Packet>() -> PacketEntry {
    PacketEntry {
        name: any::type_name::<P>(),
        decode: decode_packet::<P>,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Alpha {
        n: u32,
    }
    impl Packet for Alpha {}

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Beta {
        text: String,
    }
    impl Packet for Beta {}

    fn registry() -> Registry {
        let mut registry = Registry::new();
        registry.register::<Alpha>().unwrap().register::<Beta>().unwrap();
        registry
    }

    /// Packets from bytes that must frame cleanly.
    fn clean_packets(registry: &mut Registry, data: &[u8]) -> Vec<Box<dyn Dispatch>> {
        let reassembled = registry.reassemble(data);
        assert!(reassembled.error.is_none(), "unexpected {:?}", reassembled.error);
        reassembled.packets
    }

    fn downcast<P: Packet>(packet: Box<dyn Dispatch>) -> P {
        *packet.into_any().downcast::<P>().unwrap()
    }

    // -----------------------------------------------------------------------
    // Registration
    // -----------------------------------------------------------------------

    #[test]
    fn test_builtin_codes_are_reserved() {
        let registry = Registry::new();
        assert_eq!(registry.code_of::<Connect>(), Some(0));
        assert_eq!(registry.code_of::<Disconnect>(), Some(1));
        assert_eq!(registry.code_of::<Ping>(), Some(2));
    }

    #[test]
    fn test_register_assigns_from_three() {
        let registry = registry();
        assert_eq!(registry.code_of::<Alpha>(), Some(3));
        assert_eq!(registry.code_of::<Beta>(), Some(4));
    }

    #[test]
    fn test_force_register_moves_cursor() {
        let mut registry = Registry::new();
        registry.force_register::<Alpha>(10).unwrap();
        registry.register::<Beta>().unwrap();
        assert_eq!(registry.code_of::<Alpha>(), Some(10));
        assert_eq!(registry.code_of::<Beta>(), Some(11));
    }

    #[test]
    fn test_force_register_onto_builtin_fails() {
        let mut registry = Registry::new();
        let result = registry.force_register::<Alpha>(1);
        assert!(matches!(result, Err(ProtocolError::DuplicatePacketCode(1))));
    }

    #[test]
    fn test_register_twice_fails() {
        let mut registry = registry();
        let result = registry.register::<Alpha>();
        assert!(matches!(result, Err(ProtocolError::DuplicatePacketType(_))));
    }

    #[test]
    fn test_register_replication_and_rpc_codes() {
        let mut registry = Registry::new();
        registry.register_replication_and_rpc().unwrap();
        assert_eq!(registry.code_of::<SharedObjectPacket>(), Some(3));
        assert_eq!(registry.code_of::<DeltaPacket>(), Some(4));
        assert_eq!(registry.code_of::<RpcCall>(), Some(5));
        assert_eq!(registry.code_of::<RpcResponse>(), Some(6));
    }

    // -----------------------------------------------------------------------
    // Serialize / reassemble
    // -----------------------------------------------------------------------

    #[test]
    fn test_serialize_wire_layout() {
        let registry = registry();
        let bytes = registry.serialize(&Alpha { n: 7 }).unwrap();
        // len = 2 (code) + 4 (u32 payload)
        assert_eq!(bytes, vec![6, 0, 0, 0, 3, 0, 7, 0, 0, 0]);
    }

    #[test]
    fn test_serialize_unregistered_fails() {
        let registry = Registry::new();
        let result = registry.serialize(&Alpha { n: 1 });
        assert!(matches!(result, Err(ProtocolError::UnregisteredPacket(_))));
    }

    #[test]
    fn test_reassemble_sequence_any_fragmentation() {
        let sender = registry();
        let mut stream = Vec::new();
        stream.extend(sender.serialize(&Alpha { n: 1 }).unwrap());
        stream.extend(sender.serialize(&Beta { text: "two".into() }).unwrap());
        stream.extend(sender.serialize(&Alpha { n: 3 }).unwrap());

        for chunk_size in [1, 2, 5, stream.len()] {
            let mut receiver = registry();
            let mut packets = Vec::new();
            for chunk in stream.chunks(chunk_size) {
                packets.extend(clean_packets(&mut receiver, chunk));
            }
            assert_eq!(packets.len(), 3, "chunk size {chunk_size}");
            let mut packets = packets.into_iter();
            assert_eq!(downcast::<Alpha>(packets.next().unwrap()), Alpha { n: 1 });
            assert_eq!(downcast::<Beta>(packets.next().unwrap()).text, "two");
            assert_eq!(downcast::<Alpha>(packets.next().unwrap()), Alpha { n: 3 });
        }
    }

    #[test]
    fn test_reassemble_skips_unknown_code() {
        let mut receiver = registry();
        let mut stream = encode_frame(99, b"???").unwrap();
        stream.extend(receiver.serialize(&Alpha { n: 5 }).unwrap());

        let packets = clean_packets(&mut receiver, &stream);
        assert_eq!(packets.len(), 1);
        assert_eq!(downcast::<Alpha>(packets.into_iter().next().unwrap()).n, 5);
    }

    #[test]
    fn test_decode_unknown_code_fails() {
        let receiver = registry();
        let frame = Frame {
            code: 99,
            payload: Vec::new(),
        };
        assert!(matches!(
            receiver.decode(&frame),
            Err(ProtocolError::UnknownPacketCode(99))
        ));
    }

    #[test]
    fn test_reassemble_reports_framing_error_after_good_packets() {
        let mut receiver = registry();
        let mut stream = receiver.serialize(&Alpha { n: 4 }).unwrap();
        stream.extend_from_slice(&0u32.to_le_bytes());

        let reassembled = receiver.reassemble(&stream);
        assert_eq!(reassembled.packets.len(), 1);
        assert!(matches!(reassembled.error, Some(ProtocolError::MalformedFrame(0))));
        assert_eq!(receiver.buffered(), 0);
    }

    #[test]
    fn test_object_type_unknown_name_fails() {
        let registry = registry();
        assert!(matches!(
            registry.object_type("nobody"),
            Err(ProtocolError::UnknownObjectType(name)) if name == "nobody"
        ));
    }

    #[test]
    fn test_reassemble_skips_undecodable_payload() {
        let mut receiver = registry();
        // Beta needs a length-prefixed string; one byte is not enough.
        let stream = encode_frame(4, &[1]).unwrap();
        assert!(clean_packets(&mut receiver, &stream).is_empty());
        assert_eq!(receiver.buffered(), 0);
    }

    #[test]
    fn test_clone_has_independent_buffer() {
        let mut original = registry();
        let frame = original.serialize(&Alpha { n: 9 }).unwrap();
        assert!(clean_packets(&mut original, &frame[..5]).is_empty());

        let mut copy = original.clone();
        assert_eq!(clean_packets(&mut copy, &frame[5..]).len(), 1);
        assert_eq!(original.buffered(), 5);
        assert_eq!(clean_packets(&mut original, &frame[5..]).len(), 1);
    }

    #[test]
    fn test_registering_on_clone_leaves_original_untouched() {
        let original = Registry::new();
        let mut copy = original.clone();
        copy.register::<Alpha>().unwrap();
        assert_eq!(copy.code_of::<Alpha>(), Some(3));
        assert_eq!(original.code_of::<Alpha>(), None);
    }
}
