//! UDP link implementation using `tokio::net::UdpSocket`.
//!
//! A hosting link owns the only socket. Remote addresses are turned into
//! virtual peer links the first time a datagram arrives from them; those
//! peers share the hosting socket for sending and receive their datagrams
//! through a channel fed by the hosting link's receive loop.

use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::status::{LinkStatus, runtime};
use crate::{Link, LinkEvent, LinkId, LinkKind, TransportError};

const MAX_DATAGRAM_SIZE: usize = 64 * 1024;

/// An unreliable, unordered datagram [`Link`] over UDP.
///
/// Delivery and ordering are not guaranteed. The link always reports
/// itself as connected; liveness has to come from the layer above.
pub struct UdpLink {
    id: LinkId,
    status: Arc<LinkStatus>,
    events_tx: mpsc::UnboundedSender<LinkEvent>,
    events_rx: mpsc::UnboundedReceiver<LinkEvent>,
    socket: Option<Arc<UdpSocket>>,
    remote: Option<SocketAddr>,
    /// For virtual peers: the status of the hosting link that owns the socket.
    host_status: Option<Arc<LinkStatus>>,
    tasks: Vec<JoinHandle<()>>,
}

impl UdpLink {
    /// Creates an idle link.
    pub fn new() -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            id: LinkId::next(),
            status: Arc::new(LinkStatus::default()),
            events_tx,
            events_rx,
            socket: None,
            remote: None,
            host_status: None,
            tasks: Vec::new(),
        }
    }

    /// Creates a virtual peer on a hosting socket, returning the sender
    /// that feeds its datagrams.
    fn peer(
        socket: Arc<UdpSocket>,
        remote: SocketAddr,
        host_status: Arc<LinkStatus>,
    ) -> (Self, mpsc::UnboundedSender<LinkEvent>) {
        let mut link = Self::new();
        link.status = Arc::new(LinkStatus::established());
        if let Some(local) = host_status.local_addr() {
            link.status.set_local_addr(local);
        }
        link.socket = Some(socket);
        link.remote = Some(remote);
        link.host_status = Some(host_status);
        let feed = link.events_tx.clone();
        (link, feed)
    }

    fn is_active(&self) -> bool {
        self.socket.is_some()
    }
}

impl Default for UdpLink {
    fn default() -> Self {
        Self::new()
    }
}

/// Binds a non-blocking socket and registers it with the runtime.
fn bind(handle: &Handle, addr: SocketAddr) -> Result<UdpSocket, TransportError> {
    let socket = std::net::UdpSocket::bind(addr).map_err(TransportError::BindFailed)?;
    socket
        .set_nonblocking(true)
        .map_err(TransportError::BindFailed)?;
    let _guard = handle.enter();
    UdpSocket::from_std(socket).map_err(TransportError::BindFailed)
}

impl Link for UdpLink {
    fn id(&self) -> LinkId {
        self.id
    }

    fn kind(&self) -> LinkKind {
        LinkKind::Datagram
    }

    fn connect(&mut self, addr: SocketAddr) -> Result<(), TransportError> {
        if self.is_active() {
            return Err(TransportError::AlreadyActive);
        }
        let handle = runtime()?;

        let unspecified = match addr.ip() {
            IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        };
        let socket = Arc::new(bind(&handle, SocketAddr::new(unspecified, 0))?);
        if let Ok(local) = socket.local_addr() {
            self.status.set_local_addr(local);
        }

        self.socket = Some(Arc::clone(&socket));
        self.remote = Some(addr);
        self.status.set_connected();
        let _ = self.events_tx.send(LinkEvent::Connected);
        tracing::debug!(id = %self.id, %addr, "UDP link bound for remote");

        let id = self.id;
        let events = self.events_tx.clone();
        let status = Arc::clone(&self.status);
        self.tasks.push(handle.spawn(async move {
            let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
            loop {
                match socket.recv_from(&mut buf).await {
                    Ok((n, from)) if from == addr => {
                        if events.send(LinkEvent::Data(buf[..n].to_vec())).is_err() {
                            break;
                        }
                    }
                    Ok((_, from)) => {
                        tracing::trace!(%id, %from, "ignoring datagram from unknown sender");
                    }
                    Err(e) => {
                        tracing::debug!(%id, error = %e, "UDP receive failed");
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
            status.set_closed();
        }));
        Ok(())
    }

    fn host(&mut self, addr: SocketAddr) -> Result<SocketAddr, TransportError> {
        if self.is_active() {
            return Err(TransportError::AlreadyActive);
        }
        let handle = runtime()?;

        let socket = Arc::new(bind(&handle, addr)?);
        let local = socket.local_addr().map_err(TransportError::BindFailed)?;
        self.status.set_local_addr(local);
        self.socket = Some(Arc::clone(&socket));
        tracing::info!(id = %self.id, %local, "UDP link listening");

        let id = self.id;
        let events = self.events_tx.clone();
        let status = Arc::clone(&self.status);
        self.tasks.push(handle.spawn(async move {
            let mut peers: HashMap<SocketAddr, mpsc::UnboundedSender<LinkEvent>> =
                HashMap::new();
            let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
            loop {
                let (n, from) = match socket.recv_from(&mut buf).await {
                    Ok(received) => received,
                    Err(e) => {
                        tracing::debug!(%id, error = %e, "UDP receive failed");
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        continue;
                    }
                };

                let mut event = LinkEvent::Data(buf[..n].to_vec());
                if let Some(feed) = peers.get(&from) {
                    match feed.send(event) {
                        Ok(()) => continue,
                        // The peer was dropped; treat the sender as new.
                        Err(mpsc::error::SendError(returned)) => {
                            peers.remove(&from);
                            event = returned;
                        }
                    }
                }

                let (peer, feed) = UdpLink::peer(Arc::clone(&socket), from, Arc::clone(&status));
                tracing::debug!(%id, peer_link = %peer.id, %from, "new UDP peer");
                let _ = feed.send(event);
                peers.insert(from, feed);
                let incoming = LinkEvent::Incoming {
                    addr: from,
                    link: Box::new(peer),
                };
                if events.send(incoming).is_err() {
                    break;
                }
            }
        }));
        Ok(local)
    }

    fn send(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let (Some(socket), Some(remote)) = (self.socket.as_ref(), self.remote) else {
            return Err(TransportError::NotConnected);
        };
        if self.is_dead() {
            return Err(TransportError::ConnectionClosed(self.id.to_string()));
        }
        match socket.try_send_to(data, remote) {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                tracing::trace!(id = %self.id, "UDP send buffer full, datagram dropped");
                Ok(())
            }
            Err(e) => Err(TransportError::SendFailed(e)),
        }
    }

    fn drain(&mut self) -> Vec<LinkEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events_rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn is_connected(&self) -> bool {
        true
    }

    fn is_connecting(&self) -> bool {
        false
    }

    fn is_dead(&self) -> bool {
        self.status.is_closed()
            || self
                .host_status
                .as_ref()
                .is_some_and(|host| host.is_closed())
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.status.local_addr()
    }

    fn close(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        if self.is_active() {
            self.status.set_closed();
        }
    }
}

impl Drop for UdpLink {
    fn drop(&mut self) {
        self.close();
    }
}
