//! WebSocket link implementation using `tokio-tungstenite`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;

use crate::status::{LinkStatus, runtime};
use crate::{Link, LinkEvent, LinkId, LinkKind, TransportError};

/// A [`Link`] that carries bytes as binary WebSocket messages.
///
/// Message boundaries are not significant: the link behaves like a byte
/// stream, so frames are reassembled above it exactly as for TCP.
pub struct WebSocketLink {
    id: LinkId,
    status: Arc<LinkStatus>,
    events_tx: mpsc::UnboundedSender<LinkEvent>,
    events_rx: mpsc::UnboundedReceiver<LinkEvent>,
    outbound: Option<mpsc::UnboundedSender<Vec<u8>>>,
    tasks: Vec<JoinHandle<()>>,
    active: bool,
}

impl WebSocketLink {
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

    /// Wraps a socket that finished its handshake. Must run inside the runtime.
    fn established<S>(ws: WebSocketStream<S>, local: Option<SocketAddr>) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let mut link = Self::new();
        link.active = true;
        link.status = Arc::new(LinkStatus::established());
        if let Some(local) = local {
            link.status.set_local_addr(local);
        }

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        link.outbound = Some(out_tx);
        link.tasks.push(tokio::spawn(run_socket(
            link.id,
            ws,
            out_rx,
            link.events_tx.clone(),
            Arc::clone(&link.status),
        )));
        link
    }
}

impl Default for WebSocketLink {
    fn default() -> Self {
        Self::new()
    }
}

impl Link for WebSocketLink {
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

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        self.outbound = Some(out_tx);

        let id = self.id;
        let events = self.events_tx.clone();
        let status = Arc::clone(&self.status);
        self.tasks.push(handle.spawn(async move {
            match tokio_tungstenite::connect_async(format!("ws://{addr}")).await {
                Ok((ws, _)) => {
                    tracing::debug!(%id, %addr, "WebSocket link connected");
                    status.set_connected();
                    let _ = events.send(LinkEvent::Connected);
                    run_socket(id, ws, out_rx, events, status).await;
                }
                Err(e) => {
                    tracing::debug!(%id, %addr, error = %e, "WebSocket connect failed");
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
        tracing::info!(id = %self.id, %local, "WebSocket link listening");

        let id = self.id;
        let events = self.events_tx.clone();
        self.tasks.push(handle.spawn(async move {
            loop {
                let (stream, peer) = match listener.accept().await {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        tracing::warn!(%id, error = %e, "WebSocket accept failed");
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        continue;
                    }
                };

                // The upgrade handshake runs on its own task so a slow
                // client cannot stall the accept loop.
                let events = events.clone();
                tokio::spawn(async move {
                    match tokio_tungstenite::accept_async(stream).await {
                        Ok(ws) => {
                            let link = WebSocketLink::established(ws, Some(local));
                            tracing::debug!(%id, peer_link = %link.id, %peer, "accepted WebSocket connection");
                            let _ = events.send(LinkEvent::Incoming {
                                addr: peer,
                                link: Box::new(link),
                            });
                        }
                        Err(e) => {
                            tracing::debug!(%id, %peer, error = %e, "WebSocket handshake failed");
                        }
                    }
                });
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
        self.outbound = None;
        for task in self.tasks.drain(..) {
            task.abort();
        }
        if self.active {
            self.status.set_closed();
        }
    }
}

impl Drop for WebSocketLink {
    fn drop(&mut self) {
        self.close();
    }
}

async fn run_socket<S>(
    id: LinkId,
    ws: WebSocketStream<S>,
    mut outbound: mpsc::UnboundedReceiver<Vec<u8>>,
    events: mpsc::UnboundedSender<LinkEvent>,
    status: Arc<LinkStatus>,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut sink, mut stream) = ws.split();

    tokio::spawn(async move {
        while let Some(data) = outbound.recv().await {
            if let Err(e) = sink.send(Message::Binary(data.into())).await {
                tracing::debug!(%id, error = %e, "WebSocket send failed");
                return;
            }
        }
        let _ = sink.close().await;
    });

    while let Some(msg) = stream.next().await {
        let data = match msg {
            Ok(Message::Binary(data)) => data.to_vec(),
            Ok(Message::Text(text)) => text.as_bytes().to_vec(),
            Ok(Message::Close(_)) => break,
            Ok(_) => continue, // skip ping/pong/frame
            Err(e) => {
                tracing::debug!(%id, error = %e, "WebSocket receive failed");
                break;
            }
        };
        if events.send(LinkEvent::Data(data)).is_err() {
            break;
        }
    }

    status.set_closed();
    let _ = events.send(LinkEvent::Closed);
}
