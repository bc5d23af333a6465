//! The `Packet` trait and its type-erased counterpart.
//!
//! A packet is one typed wire message. What it *does* on arrival is part
//! of the type: [`Packet::process_client`] runs when a client receives it,
//! [`Packet::process_server`] when the server does. Both default to doing
//! nothing, so a plain data packet only needs the serde derives.

use std::any::{self, Any};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tether_protocol::PeerId;

use crate::{ClientContext, ServerContext};

/// A typed message that can be registered, sent, and dispatched.
///
/// ```rust
/// use serde::{Deserialize, Serialize};
/// use tether::prelude::*;
///
/// #[derive(Serialize, Deserialize)]
/// struct Chat {
///     text: String,
/// }
///
/// impl Packet for Chat {
///     fn process_server(self, ctx: &mut ServerContext<'_>, source: PeerId) {
///         // Echo to everyone else.
///         let _ = ctx.send_to_all_except(&self, source);
///     }
/// }
/// ```
pub trait Packet: Serialize + DeserializeOwned + Send + 'static {
    /// Called when a client endpoint receives this packet.
    fn process_client(self, ctx: &mut ClientContext<'_>) {
        let _ = ctx;
    }

    /// Called when the server endpoint receives this packet from `source`.
    fn process_server(self, ctx: &mut ServerContext<'_>, source: PeerId) {
        let _ = (ctx, source);
    }
}

/// A decoded packet whose concrete type has been erased.
///
/// The registry produces these; endpoints dispatch them. Every [`Packet`]
/// implements it automatically.
pub trait Dispatch: Send {
    /// The packet's Rust type name, for logs.
    fn type_name(&self) -> &'static str;

    /// Runs the client-side behavior.
    fn dispatch_client(self: Box<Self>, ctx: &mut ClientContext<'_>);

    /// Runs the server-side behavior.
    fn dispatch_server(self: Box<Self>, ctx: &mut ServerContext<'_>, source: PeerId);

    /// Recovers the concrete packet, e.g. for `downcast`.
    fn into_any(self: Box<Self>) -> Box<dyn Any + Send>;
}

impl<P: Packet> Dispatch for P {
    fn type_name(&self) -> &'static str {
        any::type_name::<P>()
    }

    fn dispatch_client(self: Box<Self>, ctx: &mut ClientContext<'_>) {
        (*self).process_client(ctx);
    }

    fn dispatch_server(self: Box<Self>, ctx: &mut ServerContext<'_>, source: PeerId) {
        (*self).process_server(ctx, source);
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any + Send> {
        self
    }
}

impl std::fmt::Debug for dyn Dispatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Packet({})", self.type_name())
    }
}
