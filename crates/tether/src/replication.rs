//! Full-object and delta replication packets.
//!
//! Both packets are gated by the object's [`Direction`]. A client accepts
//! what the server sent directly only with `SERVER_TO_CLIENT`, and what the
//! server relayed from another client only with `CLIENT_TO_CLIENT`. The
//! server relays a client's packet when `CLIENT_TO_CLIENT` is set and
//! applies it itself when `CLIENT_TO_SERVER` is set; the two are
//! independent.
//!
//! A full object whose id is already registered is dropped on either side.
//! Only deltas change an existing object.

use serde::{Deserialize, Serialize};
use tether_protocol::{DeltaSegment, Direction, ObjectId, PeerId};

use crate::object::AnyObject;
use crate::{ClientContext, ClientEvent, Packet, ServerContext, ServerEvent, Target};

/// Sends a client's packet on to the other clients, and back to the
/// sender too when the policy includes it.
pub(crate) fn relay<P: Packet>(
    ctx: &mut ServerContext<'_>,
    packet: &P,
    source: PeerId,
    direction: Direction,
) {
    let target = if direction.relays_to_sender() {
        Target::All
    } else {
        Target::AllExcept(source)
    };
    tracing::trace!(%source, ?target, "relaying client packet");
    if let Err(e) = ctx.send(target, packet) {
        tracing::debug!(%source, error = %e, "relay failed");
    }
}

// ---------------------------------------------------------------------------
// SharedObjectPacket
// ---------------------------------------------------------------------------

/// Carries a complete shared object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharedObjectPacket {
    /// Set by the server when relaying a client's object.
    pub forwarded: bool,
    /// The object's registered type name.
    pub type_name: String,
    /// The serialized object.
    pub object: Vec<u8>,
}

impl SharedObjectPacket {
    pub(crate) fn from_object(object: &dyn AnyObject) -> Result<Self, tether_protocol::ProtocolError> {
        Ok(Self {
            forwarded: false,
            type_name: object.type_name().to_string(),
            object: object.encode()?,
        })
    }
}

impl Packet for SharedObjectPacket {
    fn process_client(self, ctx: &mut ClientContext<'_>) {
        let object_type = match ctx.transmitter.registry().object_type(&self.type_name) {
            Ok(object_type) => object_type,
            Err(e) => {
                tracing::debug!(error = %e, "shared object dropped");
                return;
            }
        };
        let mut object = match (object_type.decode)(&self.object) {
            Ok(object) => object,
            Err(e) => {
                tracing::warn!(type_name = %self.type_name, error = %e, "undecodable shared object dropped");
                return;
            }
        };
        if !object.direction().accepted_by_client(self.forwarded) {
            tracing::debug!(object = %object.id(), forwarded = self.forwarded, "shared object rejected by direction");
            return;
        }
        if ctx.objects.contains(object.id()) {
            tracing::debug!(object = %object.id(), "shared object already registered; dropped");
            return;
        }

        object.on_create_client();
        ctx.listeners.notify(&mut *object);
        let type_name = object.type_name();
        let id = ctx.objects.insert_boxed(object, None);
        tracing::debug!(object = %id, type_name, "shared object registered");
        ctx.events.push(ClientEvent::ObjectCreated { id, type_name });
    }

    fn process_server(self, ctx: &mut ServerContext<'_>, source: PeerId) {
        let object_type = match ctx.registry.object_type(&self.type_name) {
            Ok(object_type) => object_type,
            Err(e) => {
                tracing::debug!(%source, error = %e, "shared object dropped");
                return;
            }
        };
        let mut object = match (object_type.decode)(&self.object) {
            Ok(object) => object,
            Err(e) => {
                tracing::warn!(type_name = %self.type_name, %source, error = %e, "undecodable shared object dropped");
                return;
            }
        };
        if ctx.objects.contains(object.id()) {
            tracing::debug!(object = %object.id(), %source, "shared object already registered; dropped");
            return;
        }
        let direction = object.direction();

        if direction.relayed() {
            let forwarded = SharedObjectPacket {
                forwarded: true,
                type_name: self.type_name.clone(),
                object: self.object.clone(),
            };
            relay(ctx, &forwarded, source, direction);
        }

        if direction.accepted_by_server() {
            object.on_create_server(source);
            ctx.listeners.notify(&mut *object);
            let type_name = object.type_name();
            let id = ctx.objects.insert_boxed(object, Some(source));
            tracing::debug!(object = %id, type_name, %source, "shared object registered");
            ctx.events.push(ServerEvent::ObjectCreated {
                id,
                type_name,
                source,
            });
        }
    }
}

// ---------------------------------------------------------------------------
// DeltaPacket
// ---------------------------------------------------------------------------

/// Carries field updates for an object the receiver already holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaPacket {
    /// Set by the server when relaying a client's update.
    pub forwarded: bool,
    /// The object being updated.
    pub target: ObjectId,
    /// One segment per changed field.
    pub segments: Vec<DeltaSegment>,
}

fn apply(object: &mut dyn AnyObject, segments: &[DeltaSegment]) {
    for segment in segments {
        if let Err(e) = object.apply_segment(segment.tag, &segment.value) {
            tracing::warn!(object = %object.id(), tag = segment.tag, error = %e, "delta segment not applied");
        }
    }
}

impl Packet for DeltaPacket {
    fn process_client(self, ctx: &mut ClientContext<'_>) {
        let Some(object) = ctx.objects.get_dyn_mut(self.target) else {
            tracing::debug!(object = %self.target, "delta for unknown object dropped");
            return;
        };
        if !object.direction().accepted_by_client(self.forwarded) {
            tracing::debug!(object = %self.target, forwarded = self.forwarded, "delta rejected by direction");
            return;
        }
        tracing::trace!(object = %self.target, segments = self.segments.len(), "applying delta");
        apply(object, &self.segments);
    }

    fn process_server(self, ctx: &mut ServerContext<'_>, source: PeerId) {
        let Some(direction) = ctx.objects.get_dyn(self.target).map(|o| o.direction()) else {
            tracing::debug!(object = %self.target, %source, "delta for unknown object dropped");
            return;
        };

        if direction.relayed() {
            let forwarded = DeltaPacket {
                forwarded: true,
                ..self.clone()
            };
            relay(ctx, &forwarded, source, direction);
        }

        if direction.accepted_by_server() {
            if let Some(object) = ctx.objects.get_dyn_mut(self.target) {
                tracing::trace!(object = %self.target, %source, segments = self.segments.len(), "applying delta");
                apply(object, &self.segments);
            }
        }
    }
}
