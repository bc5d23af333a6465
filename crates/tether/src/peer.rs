//! Server-side handles for connected peers.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use tether_protocol::PeerId;

use crate::{DisconnectReason, Packet, TetherError, Transmitter};

/// One connected peer, as seen by the server.
#[derive(Debug)]
pub struct PeerHandle {
    id: PeerId,
    addr: SocketAddr,
    pub(crate) transmitter: Transmitter,
    /// Set when the peer should be evicted at the end of the current poll.
    pub(crate) leaving: Option<DisconnectReason>,
}

impl PeerHandle {
    pub(crate) fn new(id: PeerId, addr: SocketAddr, transmitter: Transmitter) -> Self {
        Self {
            id,
            addr,
            transmitter,
            leaving: None,
        }
    }

    /// The identity assigned at accept time.
    pub fn id(&self) -> PeerId {
        self.id
    }

    /// The peer's remote address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Last measured latency to this peer.
    pub fn latency(&self) -> Option<Duration> {
        self.transmitter.latency()
    }

    /// The peer's transmitter.
    pub fn transmitter(&self) -> &Transmitter {
        &self.transmitter
    }

    /// Sends a packet to this peer only.
    ///
    /// # Errors
    /// See [`Transmitter::send`].
    pub fn send<P: Packet>(&mut self, packet: &P) -> Result<(), TetherError> {
        self.transmitter.send(packet)
    }
}

// ---------------------------------------------------------------------------
// Target
// ---------------------------------------------------------------------------

/// Which peers a server-originated message goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// Every connected peer.
    All,
    /// One peer.
    Peer(PeerId),
    /// Every peer except one.
    AllExcept(PeerId),
}

// ---------------------------------------------------------------------------
// PeerTable
// ---------------------------------------------------------------------------

/// Peers keyed by identity, remembering the order they connected in.
#[derive(Debug, Default)]
pub(crate) struct PeerTable {
    peers: HashMap<PeerId, PeerHandle>,
    order: Vec<PeerId>,
}

impl PeerTable {
    pub(crate) fn insert(&mut self, peer: PeerHandle) {
        let id = peer.id;
        if self.peers.insert(id, peer).is_none() {
            self.order.push(id);
        }
    }

    pub(crate) fn remove(&mut self, id: PeerId) -> Option<PeerHandle> {
        self.order.retain(|other| *other != id);
        self.peers.remove(&id)
    }

    pub(crate) fn get(&self, id: PeerId) -> Option<&PeerHandle> {
        self.peers.get(&id)
    }

    pub(crate) fn get_mut(&mut self, id: PeerId) -> Option<&mut PeerHandle> {
        self.peers.get_mut(&id)
    }

    pub(crate) fn contains(&self, id: PeerId) -> bool {
        self.peers.contains_key(&id)
    }

    pub(crate) fn len(&self) -> usize {
        self.peers.len()
    }

    /// Identities in connection order.
    pub(crate) fn ids(&self) -> Vec<PeerId> {
        self.order.clone()
    }

    /// Handles in connection order.
    pub(crate) fn iter(&self) -> impl Iterator<Item = &PeerHandle> {
        self.order.iter().filter_map(|id| self.peers.get(id))
    }

    /// Sends an already framed message to `target`.
    ///
    /// A single named peer that's missing is an error. Broadcast delivery
    /// failures are only logged: a broken peer will be evicted by the
    /// liveness checks.
    pub(crate) fn send_frame(&mut self, target: Target, frame: &[u8]) -> Result<(), TetherError> {
        match target {
            Target::Peer(id) => {
                let peer = self.peers.get_mut(&id).ok_or(TetherError::UnknownPeer(id))?;
                peer.transmitter.send_frame(frame)
            }
            Target::All | Target::AllExcept(_) => {
                for id in &self.order {
                    if target == Target::AllExcept(*id) {
                        continue;
                    }
                    let Some(peer) = self.peers.get_mut(id) else {
                        continue;
                    };
                    if let Err(e) = peer.transmitter.send_frame(frame) {
                        tracing::debug!(peer = %id, error = %e, "broadcast to peer failed");
                    }
                }
                Ok(())
            }
        }
    }
}
