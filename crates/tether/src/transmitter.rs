//! The per-connection state machine.
//!
//! A [`Transmitter`] wraps one [`Link`] together with the [`Registry`] that
//! frames its traffic, and tracks whether it is a client connection, a
//! listening server, or not yet in use:
//!
//! ```text
//!            connect / init_as_peer
//!   Inactive ─────────────────────→ Client
//!       │
//!       └──────── host ───────────→ Server
//! ```
//!
//! `disconnect` and `dispose` return it to `Inactive`; nothing else does.
//! Every operation checks the state first and fails with
//! [`TetherError::InvalidState`] instead of acting on a link that isn't in
//! the right shape.

use std::fmt;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use tether_protocol::PeerId;
use tether_transport::{Link, LinkEvent, LinkKind};

use crate::{Connect, Disconnect, Dispatch, Packet, Registry, TetherError};

/// Default time without a ping before a connection counts as lost.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// TransmitterState
// ---------------------------------------------------------------------------

/// What a transmitter is currently used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransmitterState {
    /// Not connected or hosting.
    Inactive,
    /// One end of a connection: a client's link to the server, or the
    /// server's link to one peer.
    Client,
    /// A listener accepting new connections.
    Server,
}

impl fmt::Display for TransmitterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inactive => write!(f, "inactive"),
            Self::Client => write!(f, "client"),
            Self::Server => write!(f, "server"),
        }
    }
}

/// Something a [`Transmitter::poll`] produced.
#[derive(Debug)]
pub enum TransmitterEvent {
    /// An outgoing connection finished its handshake.
    Connected,
    /// A listener accepted a connection, already wrapped as a peer.
    Incoming {
        /// Remote address.
        addr: SocketAddr,
        /// The new peer's transmitter, in `Client` state.
        transmitter: Transmitter,
    },
    /// A complete packet arrived.
    Packet(Box<dyn Dispatch>),
}

// ---------------------------------------------------------------------------
// Transmitter
// ---------------------------------------------------------------------------

/// A link plus its framing, state, and liveness bookkeeping.
pub struct Transmitter {
    link: Box<dyn Link>,
    registry: Registry,
    state: TransmitterState,
    /// Last time the other side proved it's alive.
    last_ping: Instant,
    latency: Option<Duration>,
    timeout: Duration,
    disposed: bool,
    /// Set when a stream's framing broke; nothing after that can be trusted.
    corrupt: bool,
}

impl fmt::Debug for Transmitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transmitter")
            .field("link", &self.link.id())
            .field("state", &self.state)
            .field("latency", &self.latency)
            .finish()
    }
}

impl Transmitter {
    /// Creates an inactive transmitter over an idle link.
    pub fn new(link: impl Link, registry: Registry, timeout: Duration) -> Self {
        Self::from_boxed(Box::new(link), registry, timeout)
    }

    /// Like [`new`](Self::new), for a link that's already boxed.
    pub fn from_boxed(link: Box<dyn Link>, registry: Registry, timeout: Duration) -> Self {
        Self {
            link,
            registry,
            state: TransmitterState::Inactive,
            last_ping: Instant::now(),
            latency: None,
            timeout,
            disposed: false,
            corrupt: false,
        }
    }

    /// Wraps a link a listener just accepted. The result is already in
    /// `Client` state.
    pub fn init_as_peer(link: Box<dyn Link>, registry: Registry, timeout: Duration) -> Self {
        let mut transmitter = Self::from_boxed(link, registry, timeout);
        transmitter.state = TransmitterState::Client;
        transmitter
    }

    fn require(&self, operation: &'static str, allowed: bool) -> Result<(), TetherError> {
        if allowed {
            Ok(())
        } else {
            Err(TetherError::InvalidState {
                operation,
                state: self.state,
            })
        }
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Starts connecting to `addr`. Completion shows up as
    /// [`TransmitterEvent::Connected`] from a later [`poll`](Self::poll).
    ///
    /// Datagram links have no handshake, so a `Connect` packet is sent
    /// right away to introduce this address to the server.
    ///
    /// # Errors
    /// Fails unless `Inactive`, or if the link can't start connecting.
    pub fn connect(&mut self, addr: SocketAddr) -> Result<(), TetherError> {
        self.require("connect", self.state == TransmitterState::Inactive && !self.disposed)?;
        self.link.connect(addr)?;
        self.state = TransmitterState::Client;
        self.touch();
        tracing::debug!(link = %self.link.id(), %addr, "transmitter connecting");

        if self.link.kind() == LinkKind::Datagram {
            self.send(&Connect {
                peer_id: PeerId::nil(),
            })?;
        }
        Ok(())
    }

    /// Starts accepting connections on `addr` and returns the bound
    /// address.
    ///
    /// # Errors
    /// Fails unless `Inactive`, or if binding fails.
    pub fn host(&mut self, addr: SocketAddr) -> Result<SocketAddr, TetherError> {
        self.require("host", self.state == TransmitterState::Inactive && !self.disposed)?;
        let local = self.link.host(addr)?;
        self.state = TransmitterState::Server;
        Ok(local)
    }

    /// Sends a `Disconnect` as a courtesy, closes the link, and returns to
    /// `Inactive`.
    ///
    /// # Errors
    /// Fails if already `Inactive`.
    pub fn disconnect(&mut self) -> Result<(), TetherError> {
        self.require("disconnect", self.state != TransmitterState::Inactive)?;
        if self.state == TransmitterState::Client {
            if let Err(e) = self.send(&Disconnect) {
                tracing::debug!(link = %self.link.id(), error = %e, "courtesy disconnect not sent");
            }
        }
        self.link.close();
        self.state = TransmitterState::Inactive;
        Ok(())
    }

    /// Closes the link for good. Safe to call in any state, and more than
    /// once.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.link.close();
        self.state = TransmitterState::Inactive;
        self.disposed = true;
    }

    // -----------------------------------------------------------------------
    // Traffic
    // -----------------------------------------------------------------------

    /// Serializes `packet` and sends it.
    ///
    /// # Errors
    /// Fails if `Inactive`, if `P` isn't registered, or if the link
    /// rejects the bytes.
    pub fn send<P: Packet>(&mut self, packet: &P) -> Result<(), TetherError> {
        self.require("send", self.state != TransmitterState::Inactive)?;
        let frame = self.registry.serialize(packet)?;
        self.link.send(&frame)?;
        Ok(())
    }

    /// Sends an already framed message, e.g. one serialized once for a
    /// broadcast.
    ///
    /// # Errors
    /// Fails if `Inactive` or if the link rejects the bytes.
    pub fn send_frame(&mut self, frame: &[u8]) -> Result<(), TetherError> {
        self.require("send", self.state != TransmitterState::Inactive)?;
        self.link.send(frame)?;
        Ok(())
    }

    /// Drains everything the link produced since the last call.
    ///
    /// Packets come out in the order their bytes arrived, including those
    /// completed just before a framing error. On a stream link a framing
    /// error is fatal: the link is closed and the transmitter reports itself
    /// dead from then on. A datagram only loses its own bytes.
    ///
    /// # Errors
    /// Fails if `Inactive`.
    pub fn poll(&mut self) -> Result<Vec<TransmitterEvent>, TetherError> {
        self.require("poll", self.state != TransmitterState::Inactive)?;

        let datagram = self.link.kind() == LinkKind::Datagram;
        let mut events = Vec::new();
        for event in self.link.drain() {
            match event {
                LinkEvent::Connected => events.push(TransmitterEvent::Connected),
                LinkEvent::Incoming { addr, link } => {
                    let transmitter =
                        Transmitter::init_as_peer(link, self.registry.clone(), self.timeout);
                    events.push(TransmitterEvent::Incoming { addr, transmitter });
                }
                LinkEvent::Data(_) if self.corrupt => {}
                LinkEvent::Data(data) => {
                    let reassembled = self.registry.reassemble(&data);
                    events.extend(reassembled.packets.into_iter().map(TransmitterEvent::Packet));
                    if datagram {
                        if let Some(e) = reassembled.error {
                            tracing::debug!(link = %self.link.id(), error = %e, "discarding malformed datagram");
                        }
                        // Each datagram stands alone.
                        self.registry.reset_buffer();
                    } else if let Some(e) = reassembled.error {
                        tracing::warn!(link = %self.link.id(), error = %e, "closing stream after framing error");
                        self.corrupt = true;
                        self.link.close();
                    }
                }
                LinkEvent::Closed => {
                    tracing::debug!(link = %self.link.id(), "link closed");
                }
            }
        }
        Ok(events)
    }

    // -----------------------------------------------------------------------
    // Liveness
    // -----------------------------------------------------------------------

    /// Records a ping round trip and marks the other side alive.
    pub fn record_ping(&mut self, latency: Duration) {
        self.latency = Some(latency);
        self.touch();
    }

    /// Marks the other side alive without changing the measured latency.
    pub fn touch(&mut self) {
        self.last_ping = Instant::now();
    }

    /// `true` once the link died, the transmitter was disposed, or (for
    /// connections) no ping arrived within the timeout. Checked lazily,
    /// whenever it's called.
    pub fn should_be_removed(&self) -> bool {
        if self.disposed || self.is_dead() {
            return true;
        }
        self.state == TransmitterState::Client && self.timed_out()
    }

    /// `true` if the last ping is older than the timeout.
    pub fn timed_out(&self) -> bool {
        self.last_ping.elapsed() > self.timeout
    }

    /// Last measured round-trip latency, `None` until a ping came back.
    pub fn latency(&self) -> Option<Duration> {
        self.latency
    }

    /// Time of the last ping from the other side.
    pub fn last_ping(&self) -> Instant {
        self.last_ping
    }

    /// The configured timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    /// Current state.
    pub fn state(&self) -> TransmitterState {
        self.state
    }

    /// `true` once the link can carry data.
    pub fn is_connected(&self) -> bool {
        self.state != TransmitterState::Inactive && self.link.is_connected()
    }

    /// `true` while an outgoing connection is pending.
    pub fn is_connecting(&self) -> bool {
        self.state == TransmitterState::Client && self.link.is_connecting()
    }

    /// `true` if the underlying link died, or its stream could no longer
    /// be framed.
    pub fn is_dead(&self) -> bool {
        self.corrupt || self.link.is_dead()
    }

    /// Local address of the link, once bound.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.link.local_addr()
    }

    /// The registry framing this connection.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

impl Drop for Transmitter {
    fn drop(&mut self) {
        self.dispose();
    }
}
