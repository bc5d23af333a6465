//! # Tether
//!
//! Networked packets, replicated objects, and remote calls over pluggable
//! links.
//!
//! A [`NetworkServer`] accepts connections and assigns each peer an
//! identity; a [`NetworkClient`] connects to it. Both sides share a
//! [`Registry`] that maps packet types to small integer codes and frames
//! them on the wire. A packet type decides what happens when it arrives
//! through its [`Packet`] impl.
//!
//! On top of plain packets, [`SharedObject`]s replicate whole or as field
//! deltas, and expose methods callable from the other side through an
//! [`RpcTable`]. A [`Direction`](protocol::Direction) policy on each object and method decides
//! which routes are allowed.
//!
//! Everything runs inside `poll()`: the caller drives both endpoints from
//! its own loop, and connection changes come back as events.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tether::prelude::*;
//!
//! # async fn run() -> Result<(), TetherError> {
//! let mut registry = Registry::new();
//! registry.register_replication_and_rpc()?;
//!
//! let mut server = NetworkServer::new(TcpLink::new(), registry.clone());
//! server.start("127.0.0.1:1337")?;
//!
//! let mut client = NetworkClient::new(TcpLink::new(), registry);
//! client.connect("127.0.0.1:1337")?;
//!
//! loop {
//!     for event in server.poll()? {
//!         println!("server: {event:?}");
//!     }
//!     for event in client.poll()? {
//!         println!("client: {event:?}");
//!     }
//!     tokio::time::sleep(std::time::Duration::from_millis(10)).await;
//! }
//! # }
//! ```

mod builtin;
mod client;
mod config;
mod error;
mod event;
mod object;
mod packet;
mod peer;
mod registry;
mod replication;
mod rpc;
mod server;
mod transmitter;

pub use builtin::{Connect, Disconnect, Ping};
pub use client::{ClientContext, NetworkClient};
pub use config::{ClientConfig, DEFAULT_PING_INTERVAL, ServerConfig};
pub use error::TetherError;
pub use event::{ClientEvent, DisconnectReason, ServerEvent};
pub use object::{ObjectTable, SharedCore, SharedObject, unknown_field};
pub use packet::{Dispatch, Packet};
pub use peer::{PeerHandle, Target};
pub use registry::{FIRST_CUSTOM_CODE, Reassembled, Registry};
pub use replication::{DeltaPacket, SharedObjectPacket};
pub use rpc::{RpcCall, RpcResponse, RpcTable};
pub use server::{NetworkServer, NetworkServerBuilder, ServerContext};
pub use transmitter::{DEFAULT_TIMEOUT, Transmitter, TransmitterEvent, TransmitterState};

pub use tether_protocol as protocol;
pub use tether_transport as transport;

/// Convenient re-exports for common usage.
///
/// ```rust
/// use tether::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        ClientConfig, ClientContext, ClientEvent, DisconnectReason, NetworkClient, NetworkServer,
        ObjectTable, Packet, PeerHandle, Registry, ServerConfig, ServerContext, ServerEvent,
        RpcTable, SharedCore, SharedObject, Target, TetherError, unknown_field,
    };
    pub use tether_protocol::{
        BincodeCodec, Codec, Direction, FieldTag, ObjectId, PeerId, ProtocolError, RequestId,
        RpcArg, RpcReturn, Typed, Value, ValueKind, WireType,
    };
    #[cfg(feature = "websocket")]
    pub use tether_transport::WebSocketLink;
    pub use tether_transport::{Link, TcpLink, UdpLink};
}
