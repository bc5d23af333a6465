//! The client endpoint.

use std::any::Any;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use tether_protocol::{ObjectId, PeerId, RequestId, RpcArg, Value};
use tether_transport::{Link, resolve_endpoint};

use crate::object::{CreationListeners, ObjectTable, SharedObject};
use crate::replication::{DeltaPacket, SharedObjectPacket};
use crate::rpc::{RpcCall, typed_callback};
use crate::{
    ClientConfig, ClientEvent, Packet, Ping, Registry, TetherError, Transmitter, TransmitterEvent,
};

// ---------------------------------------------------------------------------
// ClientContext
// ---------------------------------------------------------------------------

/// What a packet's client-side behavior can reach while it's dispatched.
pub struct ClientContext<'a> {
    pub(crate) transmitter: &'a mut Transmitter,
    pub(crate) peer_id: &'a mut Option<PeerId>,
    pub(crate) objects: &'a mut ObjectTable,
    pub(crate) listeners: &'a mut CreationListeners,
    pub(crate) events: &'a mut Vec<ClientEvent>,
    pub(crate) disconnected: &'a mut bool,
}

impl ClientContext<'_> {
    /// Sends a packet to the server.
    ///
    /// # Errors
    /// See [`Transmitter::send`].
    pub fn send<P: Packet>(&mut self, packet: &P) -> Result<(), TetherError> {
        self.transmitter.send(packet)
    }

    /// The identity the server assigned, once known.
    pub fn peer_id(&self) -> Option<PeerId> {
        *self.peer_id
    }

    /// The client's shared objects.
    pub fn objects(&self) -> &ObjectTable {
        &*self.objects
    }

    /// The client's shared objects, mutably.
    pub fn objects_mut(&mut self) -> &mut ObjectTable {
        self.objects
    }

    /// The registry framing the connection.
    pub fn registry(&self) -> &Registry {
        self.transmitter.registry()
    }

    /// Hands a value to the caller as [`ClientEvent::Custom`] from the
    /// current [`NetworkClient::poll`].
    pub fn emit<T: Any + Send>(&mut self, value: T) {
        self.events.push(ClientEvent::Custom(Box::new(value)));
    }

    pub(crate) fn assign_identity(&mut self, id: PeerId) {
        tracing::info!(peer = %id, "identity assigned by server");
        *self.peer_id = Some(id);
        self.transmitter.touch();
        self.events.push(ClientEvent::Connected(id));
    }

    pub(crate) fn notify_disconnected(&mut self) {
        if !*self.disconnected {
            *self.disconnected = true;
            self.events.push(ClientEvent::Disconnected);
        }
    }
}

// ---------------------------------------------------------------------------
// NetworkClient
// ---------------------------------------------------------------------------

/// One connection to a [`NetworkServer`](crate::NetworkServer).
///
/// Nothing happens in the background beyond socket I/O: packets are
/// dispatched, pings sent, and liveness checked only inside
/// [`poll`](Self::poll), which the caller drives.
pub struct NetworkClient {
    transmitter: Transmitter,
    config: ClientConfig,
    peer_id: Option<PeerId>,
    objects: ObjectTable,
    listeners: CreationListeners,
    /// When the last ping went out. `None` until the first poll.
    last_ping_sent: Option<Instant>,
    disconnected: bool,
}

impl NetworkClient {
    /// Creates a client with the default configuration.
    pub fn new(link: impl Link, registry: Registry) -> Self {
        Self::with_config(link, registry, ClientConfig::default())
    }

    /// Creates a client with an explicit configuration.
    pub fn with_config(link: impl Link, registry: Registry, config: ClientConfig) -> Self {
        let config = config.validated();
        Self {
            transmitter: Transmitter::new(link, registry, config.timeout),
            config,
            peer_id: None,
            objects: ObjectTable::new(),
            listeners: CreationListeners::default(),
            last_ping_sent: None,
            disconnected: false,
        }
    }

    /// Starts connecting to `endpoint` (`"host:port"`).
    ///
    /// # Errors
    /// Fails if the address doesn't resolve or the transmitter can't start
    /// connecting.
    pub fn connect(&mut self, endpoint: &str) -> Result<(), TetherError> {
        let addr = resolve_endpoint(endpoint)?;
        self.connect_addr(addr)
    }

    /// Starts connecting to `addr`.
    ///
    /// # Errors
    /// See [`Transmitter::connect`].
    pub fn connect_addr(&mut self, addr: SocketAddr) -> Result<(), TetherError> {
        self.transmitter.connect(addr)?;
        self.disconnected = false;
        self.last_ping_sent = None;
        tracing::info!(%addr, "client connecting");
        Ok(())
    }

    /// Sends a courtesy `Disconnect` and closes the connection. The
    /// assigned identity is forgotten.
    ///
    /// # Errors
    /// Fails if the client isn't connected.
    pub fn disconnect(&mut self) -> Result<(), TetherError> {
        self.transmitter.disconnect()?;
        self.peer_id = None;
        self.disconnected = true;
        tracing::info!("client disconnected");
        Ok(())
    }

    /// Drives the connection: pings, drains the link, dispatches packets.
    ///
    /// Returns what happened since the previous call, in order.
    ///
    /// # Errors
    /// Fails if the client was never connected or has disconnected.
    pub fn poll(&mut self) -> Result<Vec<ClientEvent>, TetherError> {
        let now = Instant::now();
        match self.last_ping_sent {
            None => {
                // The time before the first poll doesn't count against the
                // connection.
                self.last_ping_sent = Some(now);
                self.transmitter.touch();
            }
            Some(last)
                if self.peer_id.is_some()
                    && now.duration_since(last) >= self.config.ping_interval =>
            {
                self.last_ping_sent = Some(now);
                if let Err(e) = self.transmitter.send(&Ping::now()) {
                    tracing::debug!(error = %e, "ping not sent");
                }
            }
            Some(_) => {}
        }

        let mut events = Vec::new();
        for event in self.transmitter.poll()? {
            match event {
                TransmitterEvent::Connected => events.push(ClientEvent::Linked),
                TransmitterEvent::Incoming { addr, .. } => {
                    tracing::debug!(%addr, "client link offered an incoming connection; ignored");
                }
                TransmitterEvent::Packet(packet) => {
                    tracing::trace!(packet = packet.type_name(), "client dispatching");
                    let mut ctx = ClientContext {
                        transmitter: &mut self.transmitter,
                        peer_id: &mut self.peer_id,
                        objects: &mut self.objects,
                        listeners: &mut self.listeners,
                        events: &mut events,
                        disconnected: &mut self.disconnected,
                    };
                    packet.dispatch_client(&mut ctx);
                }
            }
        }

        if !self.disconnected && self.transmitter.should_be_removed() {
            tracing::info!(
                timed_out = self.transmitter.timed_out(),
                "connection to server lost"
            );
            self.disconnected = true;
            events.push(ClientEvent::Disconnected);
        }
        Ok(events)
    }

    /// Sends a packet to the server.
    ///
    /// # Errors
    /// See [`Transmitter::send`].
    pub fn send<P: Packet>(&mut self, packet: &P) -> Result<(), TetherError> {
        self.transmitter.send(packet)
    }

    // -----------------------------------------------------------------------
    // State
    // -----------------------------------------------------------------------

    /// The identity the server assigned, once known.
    pub fn peer_id(&self) -> Option<PeerId> {
        self.peer_id
    }

    /// Last measured round-trip latency.
    pub fn latency(&self) -> Option<Duration> {
        self.transmitter.latency()
    }

    /// `true` once the link is up.
    pub fn is_connected(&self) -> bool {
        self.transmitter.is_connected()
    }

    /// `true` while the link is still connecting.
    pub fn is_connecting(&self) -> bool {
        self.transmitter.is_connecting()
    }

    /// Local address, once bound.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.transmitter.local_addr()
    }

    /// The active configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    // -----------------------------------------------------------------------
    // Shared objects
    // -----------------------------------------------------------------------

    /// The client's shared objects.
    pub fn objects(&self) -> &ObjectTable {
        &self.objects
    }

    /// The client's shared objects, mutably. Objects created locally are
    /// inserted here before being shared.
    pub fn objects_mut(&mut self) -> &mut ObjectTable {
        &mut self.objects
    }

    /// Sends the complete object `id` to the server.
    ///
    /// # Errors
    /// Fails if `id` isn't in the table or the send fails.
    pub fn share(&mut self, id: ObjectId) -> Result<(), TetherError> {
        let object = self.objects.get_dyn(id).ok_or(TetherError::UnknownObject(id))?;
        let packet = SharedObjectPacket::from_object(object)?;
        self.transmitter.send(&packet)
    }

    /// Flushes the pending delta segments of object `id` to the server.
    /// Nothing is sent if no field changed. If the send fails the segments
    /// stay queued for the next call.
    ///
    /// # Errors
    /// Fails if `id` isn't in the table or the send fails.
    pub fn send_updates(&mut self, id: ObjectId) -> Result<(), TetherError> {
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
        if let Err(e) = self.transmitter.send(&packet) {
            if let Some(object) = self.objects.get_dyn_mut(id) {
                object.core_mut().restore_segments(packet.segments);
            }
            return Err(e);
        }
        Ok(())
    }

    /// Calls method `method` of object `id` on the server.
    ///
    /// # Errors
    /// Fails if `id` isn't in the table or the send fails.
    pub fn call_rpc(
        &mut self,
        id: ObjectId,
        method: &str,
        args: Vec<Value>,
    ) -> Result<(), TetherError> {
        if !self.objects.contains(id) {
            return Err(TetherError::UnknownObject(id));
        }
        self.transmitter.send(&RpcCall::new(id, method, args))
    }

    /// Like [`call_rpc`](Self::call_rpc), running `callback` with the
    /// result once the response arrives. Returns the call's correlation
    /// id.
    ///
    /// # Errors
    /// Fails if `id` isn't in the table or the send fails. The callback
    /// is not kept in that case.
    pub fn call_rpc_with<R, F>(
        &mut self,
        id: ObjectId,
        method: &str,
        args: Vec<Value>,
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

        if let Err(e) = self.transmitter.send(&call) {
            if let Some(object) = self.objects.get_dyn_mut(id) {
                object.core_mut().take_callback(request);
            }
            return Err(e);
        }
        Ok(request)
    }

    /// Runs `listener` for every `T` received and registered from now on.
    pub fn on_object_created<T, F>(&mut self, listener: F)
    where
        T: SharedObject,
        F: FnMut(&mut T) + Send + 'static,
    {
        self.listeners.on::<T, F>(listener);
    }
}

impl std::fmt::Debug for NetworkClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkClient")
            .field("transmitter", &self.transmitter)
            .field("peer_id", &self.peer_id)
            .field("objects", &self.objects.len())
            .finish()
    }
}
