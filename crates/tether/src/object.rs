//! Shared objects and the per-endpoint table that holds them.
//!
//! A shared object is an ordinary serde type that embeds a [`SharedCore`]
//! and implements [`SharedObject`]. Each endpoint owns one
//! [`ObjectTable`]; the same logical object has an independent copy in
//! every endpoint that received it.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tether_protocol::{
    BincodeCodec, Codec, DeltaSegment, Direction, FieldTag, ObjectId, PeerId, ProtocolError,
    RequestId, Value, coalesce,
};

use crate::rpc::RpcTable;

/// Callback waiting for the response to an RPC call.
pub(crate) type ResponseCallback = Box<dyn FnOnce(Value) + Send>;

// ---------------------------------------------------------------------------
// SharedObject
// ---------------------------------------------------------------------------

/// A replicated entity.
///
/// Fields are serialized in declaration order, and that position is the
/// field's order tag in delta updates. [`apply_segment`] maps a tag back
/// to the field it names.
///
/// ```rust
/// use serde::{Deserialize, Serialize};
/// use tether::prelude::*;
///
/// #[derive(Serialize, Deserialize)]
/// struct Note {
///     core: SharedCore,
///     content: String,
/// }
///
/// impl Note {
///     const CONTENT: FieldTag = 0;
///
///     fn set_content(&mut self, content: String) -> Result<(), ProtocolError> {
///         self.core.set_tracked(Self::CONTENT, &mut self.content, content)
///     }
/// }
///
/// impl SharedObject for Note {
///     const TYPE_NAME: &'static str = "note";
///
///     fn core(&self) -> &SharedCore {
///         &self.core
///     }
///
///     fn core_mut(&mut self) -> &mut SharedCore {
///         &mut self.core
///     }
///
///     fn apply_segment(&mut self, tag: FieldTag, bytes: &[u8]) -> Result<(), ProtocolError> {
///         match tag {
///             Self::CONTENT => self.content = BincodeCodec.decode(bytes)?,
///             _ => return Err(unknown_field::<Self>(tag)),
///         }
///         Ok(())
///     }
/// }
/// ```
///
/// [`apply_segment`]: SharedObject::apply_segment
pub trait SharedObject: Serialize + DeserializeOwned + Send + 'static {
    /// Identifies the type on the wire. Must be registered with
    /// [`Registry::register_shared`](crate::Registry::register_shared) on
    /// every endpoint that receives it.
    const TYPE_NAME: &'static str;

    /// The embedded bookkeeping.
    fn core(&self) -> &SharedCore;

    /// The embedded bookkeeping, mutably.
    fn core_mut(&mut self) -> &mut SharedCore;

    /// Which routes this object and its delta updates may travel.
    fn direction(&self) -> Direction {
        Direction::default()
    }

    /// Overwrites the field with order tag `tag` from its serialized
    /// value.
    ///
    /// # Errors
    /// Should fail for tags the type doesn't declare, or bytes that don't
    /// decode. The default knows no fields.
    fn apply_segment(&mut self, tag: FieldTag, bytes: &[u8]) -> Result<(), ProtocolError> {
        let _ = bytes;
        Err(unknown_field::<Self>(tag))
    }

    /// Declares the type's RPC methods. Called once, at registration.
    fn register_rpcs(table: &mut RpcTable<Self>) {
        let _ = table;
    }

    /// Runs after a client registered a received copy.
    fn on_create_client(&mut self) {}

    /// Runs after the server registered a copy sent by `source`.
    fn on_create_server(&mut self, source: PeerId) {
        let _ = source;
    }
}

/// The error for a delta segment naming a field `T` doesn't have.
pub fn unknown_field<T: SharedObject>(tag: FieldTag) -> ProtocolError {
    ProtocolError::InvalidMessage(format!("{} has no field with tag {tag}", T::TYPE_NAME))
}

// ---------------------------------------------------------------------------
// SharedCore
// ---------------------------------------------------------------------------

/// Identity and pending state embedded in every shared object.
///
/// Only the identity is serialized; pending callbacks and delta segments
/// are local to the endpoint that holds this copy.
pub struct SharedCore {
    id: ObjectId,
    pending_calls: HashMap<RequestId, ResponseCallback>,
    pending_segments: Vec<DeltaSegment>,
}

impl SharedCore {
    /// A core with a fresh random identity.
    pub fn new() -> Self {
        Self::with_id(ObjectId::random())
    }

    /// A core with a known identity.
    pub fn with_id(id: ObjectId) -> Self {
        Self {
            id,
            pending_calls: HashMap::new(),
            pending_segments: Vec::new(),
        }
    }

    /// The object's identity.
    pub fn id(&self) -> ObjectId {
        self.id
    }

    /// Assigns `value` to `field` and queues a delta segment for it.
    ///
    /// # Errors
    /// Returns `ProtocolError::Encode` if `value` can't be serialized; the
    /// field is left unchanged in that case.
    pub fn set_tracked<V: Serialize>(
        &mut self,
        tag: FieldTag,
        field: &mut V,
        value: V,
    ) -> Result<(), ProtocolError> {
        let bytes = BincodeCodec.encode(&value)?;
        *field = value;
        self.pending_segments.push(DeltaSegment::new(tag, bytes));
        Ok(())
    }

    /// Queues a delta segment for a field's current value, for fields
    /// changed in place.
    ///
    /// # Errors
    /// Returns `ProtocolError::Encode` if `value` can't be serialized.
    pub fn track<V: Serialize>(&mut self, tag: FieldTag, value: &V) -> Result<(), ProtocolError> {
        let bytes = BincodeCodec.encode(value)?;
        self.pending_segments.push(DeltaSegment::new(tag, bytes));
        Ok(())
    }

    /// Number of queued segments, before coalescing.
    pub fn pending_segment_count(&self) -> usize {
        self.pending_segments.len()
    }

    /// Takes the queued segments, one per tag, last write winning.
    pub fn take_segments(&mut self) -> Vec<DeltaSegment> {
        coalesce(std::mem::take(&mut self.pending_segments))
    }

    /// Puts back segments taken for a send that failed. They go ahead of
    /// anything queued since, so newer writes still win.
    pub(crate) fn restore_segments(&mut self, mut segments: Vec<DeltaSegment>) {
        segments.append(&mut self.pending_segments);
        self.pending_segments = segments;
    }

    /// Number of RPC calls still waiting for a response.
    pub fn pending_call_count(&self) -> usize {
        self.pending_calls.len()
    }

    /// Forgets every pending RPC callback. Responses that arrive later are
    /// dropped.
    pub fn clear_pending_calls(&mut self) {
        self.pending_calls.clear();
    }

    pub(crate) fn register_callback(&mut self, request: RequestId, callback: ResponseCallback) {
        self.pending_calls.insert(request, callback);
    }

    pub(crate) fn take_callback(&mut self, request: RequestId) -> Option<ResponseCallback> {
        self.pending_calls.remove(&request)
    }
}

impl Default for SharedCore {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SharedCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedCore")
            .field("id", &self.id)
            .field("pending_calls", &self.pending_calls.len())
            .field("pending_segments", &self.pending_segments.len())
            .finish()
    }
}

impl Serialize for SharedCore {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.id.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for SharedCore {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        ObjectId::deserialize(deserializer).map(Self::with_id)
    }
}

// ---------------------------------------------------------------------------
// AnyObject: the type-erased view the table stores
// ---------------------------------------------------------------------------

pub(crate) trait AnyObject: Send {
    fn type_name(&self) -> &'static str;
    fn id(&self) -> ObjectId;
    fn direction(&self) -> Direction;
    fn core_mut(&mut self) -> &mut SharedCore;
    fn apply_segment(&mut self, tag: FieldTag, bytes: &[u8]) -> Result<(), ProtocolError>;
    fn encode(&self) -> Result<Vec<u8>, ProtocolError>;
    fn on_create_client(&mut self);
    fn on_create_server(&mut self, source: PeerId);
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: SharedObject> AnyObject for T {
    fn type_name(&self) -> &'static str {
        T::TYPE_NAME
    }

    fn id(&self) -> ObjectId {
        self.core().id()
    }

    fn direction(&self) -> Direction {
        SharedObject::direction(self)
    }

    fn core_mut(&mut self) -> &mut SharedCore {
        SharedObject::core_mut(self)
    }

    fn apply_segment(&mut self, tag: FieldTag, bytes: &[u8]) -> Result<(), ProtocolError> {
        SharedObject::apply_segment(self, tag, bytes)
    }

    fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        BincodeCodec.encode(self)
    }

    fn on_create_client(&mut self) {
        SharedObject::on_create_client(self);
    }

    fn on_create_server(&mut self, source: PeerId) {
        SharedObject::on_create_server(self, source);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

// ---------------------------------------------------------------------------
// ObjectTable
// ---------------------------------------------------------------------------

struct Slot {
    object: Box<dyn AnyObject>,
    /// The peer whose packet created it, on the server.
    owner: Option<PeerId>,
}

/// The shared objects one endpoint holds, keyed by identity.
#[derive(Default)]
pub struct ObjectTable {
    slots: HashMap<ObjectId, Slot>,
}

impl ObjectTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a locally created object, replacing any object with the same
    /// identity. Returns the identity.
    pub fn insert<T: SharedObject>(&mut self, object: T) -> ObjectId {
        self.insert_boxed(Box::new(object), None)
    }

    /// The object with identity `id`, if it exists and is a `T`.
    pub fn get<T: SharedObject>(&self, id: ObjectId) -> Option<&T> {
        self.slots.get(&id)?.object.as_any().downcast_ref::<T>()
    }

    /// The object with identity `id`, mutably, if it exists and is a `T`.
    pub fn get_mut<T: SharedObject>(&mut self, id: ObjectId) -> Option<&mut T> {
        self.slots
            .get_mut(&id)?
            .object
            .as_any_mut()
            .downcast_mut::<T>()
    }

    /// Removes an object. Returns `true` if it was present.
    pub fn remove(&mut self, id: ObjectId) -> bool {
        self.slots.remove(&id).is_some()
    }

    /// Whether an object with identity `id` is registered.
    pub fn contains(&self, id: ObjectId) -> bool {
        self.slots.contains_key(&id)
    }

    /// The registered type name of object `id`.
    pub fn type_name(&self, id: ObjectId) -> Option<&'static str> {
        self.slots.get(&id).map(|slot| slot.object.type_name())
    }

    /// Number of objects.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// `true` if the table holds no objects.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Every identity, in no particular order.
    pub fn ids(&self) -> Vec<ObjectId> {
        self.slots.keys().copied().collect()
    }

    pub(crate) fn insert_boxed(
        &mut self,
        object: Box<dyn AnyObject>,
        owner: Option<PeerId>,
    ) -> ObjectId {
        let id = object.id();
        if self.slots.insert(id, Slot { object, owner }).is_some() {
            tracing::debug!(object = %id, "replaced shared object");
        }
        id
    }

    pub(crate) fn get_dyn(&self, id: ObjectId) -> Option<&dyn AnyObject> {
        self.slots.get(&id).map(|slot| slot.object.as_ref())
    }

    pub(crate) fn get_dyn_mut(&mut self, id: ObjectId) -> Option<&mut (dyn AnyObject + 'static)> {
        self.slots.get_mut(&id).map(|slot| slot.object.as_mut())
    }

    /// Removes every object `peer` created and returns their identities.
    pub(crate) fn remove_owned_by(&mut self, peer: PeerId) -> Vec<ObjectId> {
        let owned: Vec<ObjectId> = self
            .slots
            .iter()
            .filter(|(_, slot)| slot.owner == Some(peer))
            .map(|(id, _)| *id)
            .collect();
        for id in &owned {
            self.slots.remove(id);
        }
        owned
    }
}

impl fmt::Debug for ObjectTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(
                self.slots
                    .iter()
                    .map(|(id, slot)| (id, slot.object.type_name())),
            )
            .finish()
    }
}

// ---------------------------------------------------------------------------
// CreationListeners
// ---------------------------------------------------------------------------

type Listener = Box<dyn FnMut(&mut dyn Any) + Send>;

/// Per-type hooks run whenever a received object is registered.
#[derive(Default)]
pub(crate) struct CreationListeners {
    by_type: HashMap<&'static str, Vec<Listener>>,
}

impl CreationListeners {
    pub(crate) fn on<T, F>(&mut self, mut listener: F)
    where
        T: SharedObject,
        F: FnMut(&mut T) + Send + 'static,
    {
        self.by_type
            .entry(T::TYPE_NAME)
            .or_default()
            .push(Box::new(move |object| {
                if let Some(object) = object.downcast_mut::<T>() {
                    listener(object);
                }
            }));
    }

    pub(crate) fn notify(&mut self, object: &mut dyn AnyObject) {
        let Some(listeners) = self.by_type.get_mut(object.type_name()) else {
            return;
        };
        for listener in listeners {
            listener(object.as_any_mut());
        }
    }
}
