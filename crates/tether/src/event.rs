//! Notifications produced by `poll()`.
//!
//! Endpoints never call back into application code for connection
//! changes; they return these from each poll instead, so everything still
//! happens synchronously inside the caller's poll loop.

use std::any::Any;
use std::fmt;
use std::net::SocketAddr;

use tether_protocol::{ObjectId, PeerId};

/// Why a peer left the server's table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The peer sent `Disconnect`.
    Requested,
    /// No ping arrived within the timeout.
    TimedOut,
    /// The underlying link failed or was closed.
    TransportClosed,
    /// The server kicked it.
    Kicked,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Requested => write!(f, "requested"),
            Self::TimedOut => write!(f, "timed out"),
            Self::TransportClosed => write!(f, "transport closed"),
            Self::Kicked => write!(f, "kicked"),
        }
    }
}

// ---------------------------------------------------------------------------
// ClientEvent
// ---------------------------------------------------------------------------

/// Something that happened on a client since its last poll.
pub enum ClientEvent {
    /// The link to the server is up. No identity has been assigned yet.
    Linked,
    /// The server assigned this client its identity.
    Connected(PeerId),
    /// The connection ended: the server said so, the link died, or the
    /// server stopped answering pings. Reported once per connection.
    Disconnected,
    /// A shared object arrived from the server and was registered.
    ObjectCreated {
        /// The new object's identity.
        id: ObjectId,
        /// Its registered type name.
        type_name: &'static str,
    },
    /// A value published by a custom packet via
    /// [`ClientContext::emit`](crate::ClientContext::emit).
    Custom(Box<dyn Any + Send>),
}

impl ClientEvent {
    /// The custom value, if this is a `Custom` event holding a `T`.
    pub fn custom<T: Any>(&self) -> Option<&T> {
        match self {
            Self::Custom(value) => value.downcast_ref::<T>(),
            _ => None,
        }
    }
}

impl fmt::Debug for ClientEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Linked => write!(f, "Linked"),
            Self::Connected(id) => f.debug_tuple("Connected").field(id).finish(),
            Self::Disconnected => write!(f, "Disconnected"),
            Self::ObjectCreated { id, type_name } => f
                .debug_struct("ObjectCreated")
                .field("id", id)
                .field("type_name", type_name)
                .finish(),
            Self::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

// ---------------------------------------------------------------------------
// ServerEvent
// ---------------------------------------------------------------------------

/// Something that happened on the server since its last poll.
pub enum ServerEvent {
    /// A peer connected and was sent its identity.
    PeerConnected {
        /// The assigned identity.
        peer: PeerId,
        /// Its remote address.
        addr: SocketAddr,
    },
    /// A peer was evicted from the table.
    PeerDisconnected {
        /// The evicted peer.
        peer: PeerId,
        /// Why it left.
        reason: DisconnectReason,
    },
    /// A peer shared an object and the server registered it.
    ObjectCreated {
        /// The object's identity.
        id: ObjectId,
        /// Its registered type name.
        type_name: &'static str,
        /// The peer that sent it.
        source: PeerId,
    },
    /// A value published by a custom packet via
    /// [`ServerContext::emit`](crate::ServerContext::emit).
    Custom {
        /// The peer whose packet produced it.
        source: PeerId,
        /// The published value.
        value: Box<dyn Any + Send>,
    },
}

impl ServerEvent {
    /// The custom value, if this is a `Custom` event holding a `T`.
    pub fn custom<T: Any>(&self) -> Option<&T> {
        match self {
            Self::Custom { value, .. } => value.downcast_ref::<T>(),
            _ => None,
        }
    }
}

impl fmt::Debug for ServerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PeerConnected { peer, addr } => f
                .debug_struct("PeerConnected")
                .field("peer", peer)
                .field("addr", addr)
                .finish(),
            Self::PeerDisconnected { peer, reason } => f
                .debug_struct("PeerDisconnected")
                .field("peer", peer)
                .field("reason", reason)
                .finish(),
            Self::ObjectCreated {
                id,
                type_name,
                source,
            } => f
                .debug_struct("ObjectCreated")
                .field("id", id)
                .field("type_name", type_name)
                .field("source", source)
                .finish(),
            Self::Custom { source, .. } => f
                .debug_struct("Custom")
                .field("source", source)
                .finish_non_exhaustive(),
        }
    }
}
