//! TCP link implementation using `tokio::net`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::status::{LinkStatus, runtime};
use crate::{Link, LinkEvent, LinkId, LinkKind, TransportError};

const READ_BUFFER_SIZE: usize = 8 * 1024;

/// A reliable, ordered byte-stream [`Link`] over TCP.
///
/// Hosting spawns an accept loop; every accepted socket is handed out as
/// a new, already-connected `TcpLink` inside [`LinkEvent::Incoming`].
pub struct TcpLink {
    id: LinkId,
    status: Arc<LinkStatus>,
    events_tx: mpsc::UnboundedSender<LinkEvent>,
    events_rx: mpsc::UnboundedReceiver<LinkEvent>,
    outbound: Option<mpsc::UnboundedSender<Vec<u8>>>,
    tasks: Vec<JoinHandle<()>>,
    active: bool,
}

impl TcpLink {
    /// Creates an idle link.
    pub fn new() -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            id: LinkId::next(),
            status: Arc::new(LinkStatus::default()),
            events_tx,
            events_rx,
            outbound: None,
            tasks: Vec::new(),
            active: false,
        }
    }

    /// Wraps an accepted socket. Must run inside the runtime.
    fn from_stream(stream: TcpStream) -> Self {
        let mut link = Self::new();
        link.active = true;
        link.status = Arc::new(LinkStatus::established());
        if let Ok(local) = stream.local_addr() {
            link.status.set_local_addr(local);
        }

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        link.outbound = Some(out_tx);
        link.tasks.push(tokio::spawn(run_stream(
            link.id,
            stream,
            out_rx,
            link.events_tx.clone(),
            Arc::clone(&link.status),
        )));
        link
    }
}

impl Default for TcpLink {
    fn default() -> Self {
        Self::new()
    }
}

impl Link for TcpLink {
    fn id(&self) -> LinkId {
        self.id
    }

    fn kind(&self) -> LinkKind {
        LinkKind::Stream
    }

    fn connect(&mut self, addr: SocketAddr) -> Result<(), TransportError> {
        if self.active {
            return Err(TransportError::AlreadyActive);
        }
        let handle = runtime()?;
        self.active = true;
        self.status.set_connecting();

        // Sends issued before the handshake finishes wait in this channel.
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        self.outbound = Some(out_tx);

        let id = self.id;
        let events = self.events_tx.clone();
        let status = Arc::clone(&self.status);
        self.tasks.push(handle.spawn(async move {
            match TcpStream::connect(addr).await {
                Ok(stream) => {
                    let _ = stream.set_nodelay(true);
                    if let Ok(local) = stream.local_addr() {
                        status.set_local_addr(local);
                    }
                    tracing::debug!(%id, %addr, "TCP link connected");
                    status.set_connected();
                    let _ = events.send(LinkEvent::Connected);
                    run_stream(id, stream, out_rx, events, status).await;
                }
                Err(e) => {
                    tracing::debug!(%id, %addr, error = %e, "TCP connect failed");
                    status.set_closed();
                    let _ = events.send(LinkEvent::Closed);
                }
            }
        }));
        Ok(())
    }

    fn host(&mut self, addr: SocketAddr) -> Result<SocketAddr, TransportError> {
        if self.active {
            return Err(TransportError::AlreadyActive);
        }
        let handle = runtime()?;

        let std_listener =
            std::net::TcpListener::bind(addr).map_err(TransportError::BindFailed)?;
        std_listener
            .set_nonblocking(true)
            .map_err(TransportError::BindFailed)?;
        let local = std_listener
            .local_addr()
            .map_err(TransportError::BindFailed)?;
        let listener = {
            let _guard = handle.enter();
            TcpListener::from_std(std_listener).map_err(TransportError::BindFailed)?
        };

        self.active = true;
        self.status.set_local_addr(local);
        tracing::info!(id = %self.id, %local, "TCP link listening");

        let id = self.id;
        let events = self.events_tx.clone();
        self.tasks.push(handle.spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        let _ = stream.set_nodelay(true);
                        let link = TcpLink::from_stream(stream);
                        tracing::debug!(%id, peer_link = %link.id, %peer, "accepted TCP connection");
                        let incoming = LinkEvent::Incoming {
                            addr: peer,
                            link: Box::new(link),
                        };
                        if events.send(incoming).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(%id, error = %e, "TCP accept failed");
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                }
            }
        }));
        Ok(local)
    }

    fn send(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let outbound = self.outbound.as_ref().ok_or(TransportError::NotConnected)?;
        outbound
            .send(data.to_vec())
            .map_err(|_| TransportError::ConnectionClosed(self.id.to_string()))
    }

    fn drain(&mut self) -> Vec<LinkEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events_rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn is_connected(&self) -> bool {
        self.status.is_connected()
    }

    fn is_connecting(&self) -> bool {
        self.status.is_connecting()
    }

    fn is_dead(&self) -> bool {
        self.status.is_closed()
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.status.local_addr()
    }

    fn close(&mut self) {
        // Dropping the sender lets the writer flush what is queued and
        // then shut down its half of the socket.
        self.outbound = None;
        for task in self.tasks.drain(..) {
            task.abort();
        }
        if self.active {
            self.status.set_closed();
        }
    }
}

impl Drop for TcpLink {
    fn drop(&mut self) {
        self.close();
    }
}

/// Pumps one established socket until either side gives up.
async fn run_stream(
    id: LinkId,
    stream: TcpStream,
    outbound: mpsc::UnboundedReceiver<Vec<u8>>,
    events: mpsc::UnboundedSender<LinkEvent>,
    status: Arc<LinkStatus>,
) {
    let (mut reader, writer) = stream.into_split();
    tokio::spawn(write_loop(id, writer, outbound));

    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => {
                tracing::debug!(%id, "TCP link closed by peer");
                break;
            }
            Ok(n) => {
                if events.send(LinkEvent::Data(buf[..n].to_vec())).is_err() {
                    break;
                }
            }
            Err(e) => {
                tracing::debug!(%id, error = %e, "TCP read failed");
                break;
            }
        }
    }

    status.set_closed();
    let _ = events.send(LinkEvent::Closed);
}

async fn write_loop(
    id: LinkId,
    mut writer: OwnedWriteHalf,
    mut outbound: mpsc::UnboundedReceiver<Vec<u8>>,
) {
    while let Some(data) = outbound.recv().await {
        if let Err(e) = writer.write_all(&data).await {
            tracing::debug!(%id, error = %e, "TCP write failed");
            return;
        }
    }
    let _ = writer.shutdown().await;
}
