//! The server endpoint.

use std::any::Any;
use std::net::SocketAddr;
use std::time::Duration;

use tether_protocol::{ObjectId, PeerId, RequestId, RpcArg, Value};
use tether_transport::{Link, host_addr, resolve_endpoint};

use crate::object::{CreationListeners, ObjectTable, SharedObject};
use crate::peer::PeerTable;
use crate::replication::{DeltaPacket, SharedObjectPacket};
use crate::rpc::{RpcCall, typed_callback};
use crate::{
    Connect, DisconnectReason, Packet, PeerHandle, Registry, ServerConfig, ServerEvent, Target,
    TetherError, Transmitter, TransmitterEvent,
};

// ---------------------------------------------------------------------------
// ServerContext
// ---------------------------------------------------------------------------

/// What a packet's server-side behavior can reach while it's dispatched.
pub struct ServerContext<'a> {
    pub(crate) registry: &'a Registry,
    pub(crate) peers: &'a mut PeerTable,
    pub(crate) objects: &'a mut ObjectTable,
    pub(crate) listeners: &'a mut CreationListeners,
    pub(crate) events: &'a mut Vec<ServerEvent>,
}

impl ServerContext<'_> {
    /// Sends a packet to `target`.
    ///
    /// # Errors
    /// Fails if `P` isn't registered, or if `target` names a single peer
    /// that isn't connected or can't be sent to.
    pub fn send<P: Packet>(&mut self, target: Target, packet: &P) -> Result<(), TetherError> {
        let frame = self.registry.serialize(packet)?;
        self.peers.send_frame(target, &frame)
    }

    /// Sends a packet to one peer.
    ///
    /// # Errors
    /// See [`send`](Self::send).
    pub fn send_to<P: Packet>(&mut self, peer: PeerId, packet: &P) -> Result<(), TetherError> {
        self.send(Target::Peer(peer), packet)
    }

    /// Sends a packet to every peer.
    ///
    /// # Errors
    /// See [`send`](Self::send).
    pub fn send_to_all<P: Packet>(&mut self, packet: &P) -> Result<(), TetherError> {
        self.send(Target::All, packet)
    }

    /// Sends a packet to every peer except `peer`.
    ///
    /// # Errors
    /// See [`send`](Self::send).
    pub fn send_to_all_except<P: Packet>(
        &mut self,
        packet: &P,
        peer: PeerId,
    ) -> Result<(), TetherError> {
        self.send(Target::AllExcept(peer), packet)
    }

    /// A connected peer.
    pub fn peer(&self, id: PeerId) -> Option<&PeerHandle> {
        self.peers.get(id)
    }

    /// The server's shared objects.
    pub fn objects(&self) -> &ObjectTable {
        &*self.objects
    }

    /// The server's shared objects, mutably.
    pub fn objects_mut(&mut self) -> &mut ObjectTable {
        self.objects
    }

    /// The server's registry.
    pub fn registry(&self) -> &Registry {
        self.registry
    }

    /// Hands a value to the caller as [`ServerEvent::Custom`] from the
    /// current [`NetworkServer::poll`].
    pub fn emit<T: Any + Send>(&mut self, source: PeerId, value: T) {
        self.events.push(ServerEvent::Custom {
            source,
            value: Box::new(value),
        });
    }

    /// Schedules `peer` for eviction at the end of the current poll.
    pub(crate) fn mark_leaving(&mut self, peer: PeerId, reason: DisconnectReason) {
        if let Some(handle) = self.peers.get_mut(peer) {
            handle.leaving.get_or_insert(reason);
        }
    }
}

// ---------------------------------------------------------------------------
// NetworkServerBuilder
// ---------------------------------------------------------------------------

/// Builder for [`NetworkServer`].
///
/// ```rust,no_run
/// use std::time::Duration;
/// use tether::prelude::*;
///
/// let mut registry = Registry::new();
/// registry.register_replication_and_rpc().unwrap();
///
/// let server = NetworkServer::builder()
///     .timeout(Duration::from_secs(5))
///     .drop_orphaned_objects(false)
///     .build(TcpLink::new(), registry);
/// ```
#[derive(Debug, Clone, Default)]
pub struct NetworkServerBuilder {
    config: ServerConfig,
}

impl NetworkServerBuilder {
    /// Time without a ping before a peer is evicted.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Whether a leaving peer's objects are removed.
    pub fn drop_orphaned_objects(mut self, drop: bool) -> Self {
        self.config.drop_orphaned_objects = drop;
        self
    }

    /// Creates the server. It isn't listening yet.
    pub fn build(self, link: impl Link, registry: Registry) -> NetworkServer {
        NetworkServer::with_config(link, registry, self.config)
    }
}

// ---------------------------------------------------------------------------
// NetworkServer
// ---------------------------------------------------------------------------

/// Accepts peers, assigns their identities, and dispatches their packets.
///
/// Like the client, the server only does work inside
/// [`poll`](Self::poll): accepted connections wait in the listener's queue
/// and peers' packets in theirs until the next call.
pub struct NetworkServer {
    registry: Registry,
    listener: Transmitter,
    peers: PeerTable,
    objects: ObjectTable,
    listeners: CreationListeners,
    config: ServerConfig,
}

impl NetworkServer {
    /// Starts building a server.
    pub fn builder() -> NetworkServerBuilder {
        NetworkServerBuilder::default()
    }

    /// Creates a server with the default configuration.
    pub fn new(link: impl Link, registry: Registry) -> Self {
        Self::with_config(link, registry, ServerConfig::default())
    }

    /// Creates a server with an explicit configuration.
    pub fn with_config(link: impl Link, registry: Registry, config: ServerConfig) -> Self {
        let config = config.validated();
        Self {
            listener: Transmitter::new(link, registry.clone(), config.timeout),
            registry,
            peers: PeerTable::default(),
            objects: ObjectTable::new(),
            listeners: CreationListeners::default(),
            config,
        }
    }

    /// Starts listening on `endpoint` (`"host:port"`) and returns the bound
    /// address.
    ///
    /// # Errors
    /// Fails if the address doesn't resolve or binding fails.
    pub fn start(&mut self, endpoint: &str) -> Result<SocketAddr, TetherError> {
        let addr = resolve_endpoint(endpoint)?;
        self.start_addr(addr)
    }

    /// Starts listening on `port`, on every interface if `share_local` is
    /// set and on loopback otherwise.
    ///
    /// # Errors
    /// Fails if binding fails.
    pub fn start_on_port(&mut self, port: u16, share_local: bool) -> Result<SocketAddr, TetherError> {
        self.start_addr(host_addr(port, share_local))
    }

    /// Starts listening on `addr` and returns the bound address.
    ///
    /// # Errors
    /// See [`Transmitter::host`].
    pub fn start_addr(&mut self, addr: SocketAddr) -> Result<SocketAddr, TetherError> {
        let local = self.listener.host(addr)?;
        tracing::info!(%local, "server listening");
        Ok(local)
    }

    /// Disconnects every peer and stops listening.
    pub fn stop(&mut self) {
        for id in self.peers.ids() {
            if let Some(mut peer) = self.peers.remove(id) {
                if let Err(e) = peer.transmitter.disconnect() {
                    tracing::debug!(peer = %id, error = %e, "peer already disconnected");
                }
            }
        }
        self.listener.dispose();
        tracing::info!("server stopped");
    }

    /// Accepts new peers, dispatches every peer's packets, and evicts
    /// peers that left or went silent.
    ///
    /// Peers are polled in the order they connected. Eviction happens
    /// only after every peer was polled.
    ///
    /// # Errors
    /// Fails if the server isn't listening.
    pub fn poll(&mut self) -> Result<Vec<ServerEvent>, TetherError> {
        let mut events = Vec::new();

        for event in self.listener.poll()? {
            match event {
                TransmitterEvent::Incoming { addr, transmitter } => {
                    self.accept(addr, transmitter, &mut events);
                }
                TransmitterEvent::Connected | TransmitterEvent::Packet(_) => {
                    tracing::trace!("ignoring listener traffic");
                }
            }
        }

        for id in self.peers.ids() {
            let Some(peer) = self.peers.get_mut(id) else {
                continue;
            };
            let packets = match peer.transmitter.poll() {
                Ok(packets) => packets,
                Err(e) => {
                    tracing::debug!(peer = %id, error = %e, "peer poll failed");
                    peer.leaving.get_or_insert(DisconnectReason::TransportClosed);
                    continue;
                }
            };

            for event in packets {
                let TransmitterEvent::Packet(packet) = event else {
                    continue;
                };
                tracing::trace!(peer = %id, packet = packet.type_name(), "server dispatching");
                let mut ctx = ServerContext {
                    registry: &self.registry,
                    peers: &mut self.peers,
                    objects: &mut self.objects,
                    listeners: &mut self.listeners,
                    events: &mut events,
                };
                packet.dispatch_server(&mut ctx, id);
            }
        }

        self.evict(&mut events);
        Ok(events)
    }

    fn accept(&mut self, addr: SocketAddr, transmitter: Transmitter, events: &mut Vec<ServerEvent>) {
        let id = PeerId::random();
        let mut peer = PeerHandle::new(id, addr, transmitter);
        if let Err(e) = peer.send(&Connect { peer_id: id }) {
            tracing::warn!(peer = %id, %addr, error = %e, "could not send identity; dropping peer");
            return;
        }
        self.peers.insert(peer);
        tracing::info!(peer = %id, %addr, "peer connected");
        events.push(ServerEvent::PeerConnected { peer: id, addr });
    }

    fn evict(&mut self, events: &mut Vec<ServerEvent>) {
        let leaving: Vec<(PeerId, DisconnectReason)> = self
            .peers
            .iter()
            .filter_map(|peer| {
                let reason = peer.leaving.or_else(|| {
                    let transmitter = &peer.transmitter;
                    if transmitter.is_dead() {
                        Some(DisconnectReason::TransportClosed)
                    } else if transmitter.should_be_removed() {
                        Some(DisconnectReason::TimedOut)
                    } else {
                        None
                    }
                })?;
                Some((peer.id(), reason))
            })
            .collect();

        for (id, reason) in leaving {
            let Some(mut peer) = self.peers.remove(id) else {
                continue;
            };
            peer.transmitter.dispose();
            if self.config.drop_orphaned_objects {
                let dropped = self.objects.remove_owned_by(id);
                if !dropped.is_empty() {
                    tracing::debug!(peer = %id, objects = dropped.len(), "dropped orphaned objects");
                }
            }
            tracing::info!(peer = %id, %reason, "peer disconnected");
            events.push(ServerEvent::PeerDisconnected { peer: id, reason });
        }
    }

    // -----------------------------------------------------------------------
    // Sending
    // -----------------------------------------------------------------------

    /// Sends a packet to `target`, serializing it once.
    ///
    /// # Errors
    /// Fails if `P` isn't registered, or if `target` names a single peer
    /// that isn't connected or can't be sent to. Failed deliveries to
    /// individual peers of a broadcast are only logged.
    pub fn send<P: Packet>(&mut self, target: Target, packet: &P) -> Result<(), TetherError> {
        let frame = self.registry.serialize(packet)?;
        self.peers.send_frame(target, &frame)
    }

    /// Sends a packet to every peer.
    ///
    /// # Errors
    /// See [`send`](Self::send).
    pub fn send_to_all<P: Packet>(&mut self, packet: &P) -> Result<(), TetherError> {
        self.send(Target::All, packet)
    }

    /// Sends a packet to one peer.
    ///
    /// # Errors
    /// Returns `TetherError::UnknownPeer` if `peer` isn't connected.
    pub fn send_to_one<P: Packet>(&mut self, packet: &P, peer: PeerId) -> Result<(), TetherError> {
        self.send(Target::Peer(peer), packet)
    }

    /// Sends a packet to every peer except `peer`.
    ///
    /// # Errors
    /// See [`send`](Self::send).
    pub fn send_to_all_except<P: Packet>(
        &mut self,
        packet: &P,
        peer: PeerId,
    ) -> Result<(), TetherError> {
        self.send(Target::AllExcept(peer), packet)
    }

    /// Sends `peer` a courtesy `Disconnect` and evicts it on the next
    /// poll.
    ///
    /// # Errors
    /// Returns `TetherError::UnknownPeer` if `peer` isn't connected.
    pub fn kick(&mut self, peer: PeerId) -> Result<(), TetherError> {
        let handle = self.peers.get_mut(peer).ok_or(TetherError::UnknownPeer(peer))?;
        if let Err(e) = handle.transmitter.disconnect() {
            tracing::debug!(%peer, error = %e, "kicked peer already disconnected");
        }
        handle.leaving = Some(DisconnectReason::Kicked);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // State
    // -----------------------------------------------------------------------

    /// A connected peer.
    pub fn peer(&self, id: PeerId) -> Option<&PeerHandle> {
        self.peers.get(id)
    }

    /// Connected peers, in connection order.
    pub fn peers(&self) -> impl Iterator<Item = &PeerHandle> {
        self.peers.iter()
    }

    /// Number of connected peers.
    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Whether `id` is connected.
    pub fn has_peer(&self, id: PeerId) -> bool {
        self.peers.contains(id)
    }

    /// The address the server is listening on.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.local_addr()
    }

    /// The server's registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// The active configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    // -----------------------------------------------------------------------
    // Shared objects
    // -----------------------------------------------------------------------

    /// The server's shared objects.
    pub fn objects(&self) -> &ObjectTable {
        &self.objects
    }

    /// The server's shared objects, mutably.
    pub fn objects_mut(&mut self) -> &mut ObjectTable {
        &mut self.objects
    }

    /// Sends the complete object `id` to `target`.
    ///
    /// # Errors
    /// Fails if `id` isn't in the table, or as [`send`](Self::send).
    pub fn share(&mut self, id: ObjectId, target: Target) -> Result<(), TetherError> {
        let object = self.objects.get_dyn(id).ok_or(TetherError::UnknownObject(id))?;
        let packet = SharedObjectPacket::from_object(object)?;
        self.send(target, &packet)
    }

    /// Flushes the pending delta segments of object `id` to `target`.
    /// Nothing is sent if no field changed. If the send fails the segments
    /// stay queued for the next call.
    ///
    /// # Errors
    /// Fails if `id` isn't in the table, or as [`send`](Self::send).
    pub fn send_updates(&mut self, id: ObjectId, target: Target) -> Result<(), TetherError> {
        let object = self
            .objects
            .get_dyn_mut(id)
            .ok_or(TetherError::UnknownObject(id))?;
        let segments = object.core_mut().take_segments();
        if segments.is_empty() {
            return Ok(());
        }
        let packet = DeltaPacket {
            forwarded: false,
            target: id,
            segments,
        };
        if let Err(e) = self.send(target, &packet) {
            if let Some(object) = self.objects.get_dyn_mut(id) {
                object.core_mut().restore_segments(packet.segments);
            }
            return Err(e);
        }
        Ok(())
    }

    /// Calls method `method` of object `id` on `target`.
    ///
    /// # Errors
    /// Fails if `id` isn't in the table, or as [`send`](Self::send).
    pub fn call_rpc(
        &mut self,
        id: ObjectId,
        method: &str,
        args: Vec<Value>,
        target: Target,
    ) -> Result<(), TetherError> {
        if !self.objects.contains(id) {
            return Err(TetherError::UnknownObject(id));
        }
        self.send(target, &RpcCall::new(id, method, args))
    }

    /// Like [`call_rpc`](Self::call_rpc), running `callback` with the first
    /// result that comes back. Returns the call's correlation id.
    ///
    /// # Errors
    /// Fails if `id` isn't in the table, or as [`send`](Self::send). The
    /// callback is not kept in that case.
    pub fn call_rpc_with<R, F>(
        &mut self,
        id: ObjectId,
        method: &str,
        args: Vec<Value>,
        target: Target,
        callback: F,
    ) -> Result<RequestId, TetherError>
    where
        R: RpcArg,
        F: FnOnce(R) + Send + 'static,
    {
        let call = RpcCall::new(id, method, args);
        let request = call.request;
        let object = self
            .objects
            .get_dyn_mut(id)
            .ok_or(TetherError::UnknownObject(id))?;
        object
            .core_mut()
            .register_callback(request, typed_callback(callback));

        if let Err(e) = self.send(target, &call) {
            if let Some(object) = self.objects.get_dyn_mut(id) {
                object.core_mut().take_callback(request);
            }
            return Err(e);
        }
        Ok(request)
    }

    /// Runs `listener` for every `T` a peer shares from now on.
    pub fn on_object_created<T, F>(&mut self, listener: F)
    where
        T: SharedObject,
        F: FnMut(&mut T) + Send + 'static,
    {
        self.listeners.on::<T, F>(listener);
    }
}

impl std::fmt::Debug for NetworkServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkServer")
            .field("listener", &self.listener)
            .field("peers", &self.peers.len())
            .field("objects", &self.objects.len())
            .finish()
    }
}
