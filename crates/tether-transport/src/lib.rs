//! Byte-level links for Tether.
//!
//! Provides the [`Link`] trait that transmitters drive, plus concrete
//! implementations over TCP ([`TcpLink`]), UDP ([`UdpLink`]) and
//! WebSocket ([`WebSocketLink`]).
//!
//! Links do their socket I/O on background Tokio tasks and hand results
//! back through a queue, so every method on [`Link`] is synchronous and
//! non-blocking. The owner drains the queue with [`Link::drain`] whenever
//! it polls.
//!
//! # Feature Flags
//!
//! - `websocket` (default): WebSocket link via `tokio-tungstenite`

mod addr;
mod error;
mod status;
mod tcp;
mod udp;
#[cfg(feature = "websocket")]
mod websocket;

pub use addr::{host_addr, resolve_endpoint};
pub use error::TransportError;
pub use tcp::TcpLink;
pub use udp::UdpLink;
#[cfg(feature = "websocket")]
pub use websocket::WebSocketLink;

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counter for generating unique link IDs.
static NEXT_LINK_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque identifier for a link, used in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LinkId(u64);

impl LinkId {
    /// Creates a new `LinkId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Allocates the next process-unique `LinkId`.
    pub fn next() -> Self {
        Self(NEXT_LINK_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "link-{}", self.0)
    }
}

/// How a link delimits the bytes it delivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    /// An ordered byte stream. Chunks may split or merge frames.
    Stream,
    /// Independent datagrams. Each chunk stands alone and may be lost.
    Datagram,
}

/// Something a link observed since the last [`Link::drain`].
pub enum LinkEvent {
    /// An outgoing connection finished its handshake.
    Connected,
    /// A hosting link accepted a new remote peer.
    Incoming {
        /// Remote address of the peer.
        addr: SocketAddr,
        /// An already-established link to that peer.
        link: Box<dyn Link>,
    },
    /// Bytes arrived from the remote side.
    Data(Vec<u8>),
    /// The underlying connection ended.
    Closed,
}

impl fmt::Debug for LinkEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connected => write!(f, "Connected"),
            Self::Incoming { addr, link } => f
                .debug_struct("Incoming")
                .field("addr", addr)
                .field("link", &link.id())
                .finish(),
            Self::Data(data) => write!(f, "Data({} bytes)", data.len()),
            Self::Closed => write!(f, "Closed"),
        }
    }
}

/// A raw, bidirectional byte link.
///
/// A fresh link is idle. It becomes an outgoing connection through
/// [`connect`](Link::connect), a listener through [`host`](Link::host), or
/// arrives already established inside a [`LinkEvent::Incoming`].
pub trait Link: Send + 'static {
    /// Returns the unique identifier for this link.
    fn id(&self) -> LinkId;

    /// Whether chunks are stream fragments or whole datagrams.
    fn kind(&self) -> LinkKind;

    /// Starts connecting to `addr`. Completion is reported later as
    /// [`LinkEvent::Connected`].
    fn connect(&mut self, addr: SocketAddr) -> Result<(), TransportError>;

    /// Starts listening on `addr` and returns the bound address.
    fn host(&mut self, addr: SocketAddr) -> Result<SocketAddr, TransportError>;

    /// Queues bytes for delivery to the remote side.
    fn send(&mut self, data: &[u8]) -> Result<(), TransportError>;

    /// Takes every event observed since the previous call, in order.
    fn drain(&mut self) -> Vec<LinkEvent>;

    /// Returns `true` once the link can carry data.
    fn is_connected(&self) -> bool;

    /// Returns `true` while an outgoing connection is still pending.
    fn is_connecting(&self) -> bool;

    /// Returns `true` once the link has failed or been closed.
    fn is_dead(&self) -> bool;

    /// The local address, once bound.
    fn local_addr(&self) -> Option<SocketAddr>;

    /// Closes the link. Already-queued sends are still flushed.
    fn close(&mut self);
}
