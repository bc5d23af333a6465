//! Shared fixtures for the endpoint integration tests.
//!
//! Endpoints only make progress inside `poll()`, so every test drives them
//! in rounds: poll the server, poll each client, sleep briefly so the
//! background socket tasks can run.

#![allow(dead_code)]

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tether::prelude::*;

pub const STEP: Duration = Duration::from_millis(10);
pub const MAX_ROUNDS: usize = 300;

// ---------------------------------------------------------------------------
// Fixture types
// ---------------------------------------------------------------------------

/// A custom packet: the server publishes it and passes it on, clients
/// publish it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chat {
    pub text: String,
}

impl Chat {
    pub fn new(text: &str) -> Self {
        Self {
            text: text.to_string(),
        }
    }
}

impl Packet for Chat {
    fn process_client(self, ctx: &mut ClientContext<'_>) {
        ctx.emit(self.text);
    }

    fn process_server(self, ctx: &mut ServerContext<'_>, source: PeerId) {
        let _ = ctx.send_to_all_except(&self, source);
        ctx.emit(source, self.text);
    }
}

/// A shared object whose direction policy travels with it.
#[derive(Debug, Serialize, Deserialize)]
pub struct Note {
    core: SharedCore,
    direction: u8,
    pub content: String,
}

impl Note {
    pub const CONTENT: FieldTag = 2;

    pub fn new(direction: Direction, content: &str) -> Self {
        Self {
            core: SharedCore::new(),
            direction: direction.bits(),
            content: content.to_string(),
        }
    }

    pub fn id(&self) -> ObjectId {
        self.core.id()
    }

    pub fn set_content(&mut self, content: &str) -> Result<(), ProtocolError> {
        self.core
            .set_tracked(Self::CONTENT, &mut self.content, content.to_string())
    }

    pub fn pending_calls(&self) -> usize {
        self.core.pending_call_count()
    }

    pub fn pending_updates(&self) -> usize {
        self.core.pending_segment_count()
    }
}

impl SharedObject for Note {
    const TYPE_NAME: &'static str = "note";

    fn core(&self) -> &SharedCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut SharedCore {
        &mut self.core
    }

    fn direction(&self) -> Direction {
        Direction::from_bits_truncate(self.direction)
    }

    fn apply_segment(&mut self, tag: FieldTag, bytes: &[u8]) -> Result<(), ProtocolError> {
        match tag {
            Self::CONTENT => self.content = BincodeCodec.decode(bytes)?,
            _ => return Err(unknown_field::<Self>(tag)),
        }
        Ok(())
    }

    fn register_rpcs(table: &mut RpcTable<Self>) {
        table
            .method0("content", Direction::CLIENT_TO_SERVER, |note: &mut Note| {
                note.content.clone()
            })
            .method1(
                "set_content",
                Direction::CLIENT_TO_SERVER | Direction::SERVER_TO_CLIENT,
                |note: &mut Note, content: String| {
                    note.content = content;
                },
            )
            .method1(
                "secret",
                Direction::SERVER_TO_CLIENT,
                |note: &mut Note, content: String| {
                    note.content = content;
                },
            )
            .method1(
                "relay",
                Direction::CLIENT_TO_CLIENT,
                |note: &mut Note, content: String| {
                    note.content = content;
                },
            );
    }
}

pub fn registry() -> Registry {
    let mut registry = Registry::new();
    registry
        .register_replication_and_rpc()
        .unwrap()
        .register::<Chat>()
        .unwrap()
        .register_shared::<Note>()
        .unwrap();
    registry
}

// ---------------------------------------------------------------------------
// Pumping
// ---------------------------------------------------------------------------

/// Everything the endpoints reported over some rounds.
pub struct Events {
    pub server: Vec<ServerEvent>,
    pub clients: Vec<Vec<ClientEvent>>,
}

impl Events {
    fn new(clients: usize) -> Self {
        Self {
            server: Vec::new(),
            clients: (0..clients).map(|_| Vec::new()).collect(),
        }
    }

    fn extend(&mut self, other: Events) {
        self.server.extend(other.server);
        for (mine, theirs) in self.clients.iter_mut().zip(other.clients) {
            mine.extend(theirs);
        }
    }

    /// Custom string values the server published.
    pub fn server_texts(&self) -> Vec<String> {
        self.server
            .iter()
            .filter_map(|e| e.custom::<String>().cloned())
            .collect()
    }

    /// Custom string values client `i` published.
    pub fn client_texts(&self, i: usize) -> Vec<String> {
        self.clients[i]
            .iter()
            .filter_map(|e| e.custom::<String>().cloned())
            .collect()
    }

    /// Objects client `i` registered.
    pub fn client_created(&self, i: usize) -> Vec<ObjectId> {
        self.clients[i]
            .iter()
            .filter_map(|e| match e {
                ClientEvent::ObjectCreated { id, .. } => Some(*id),
                _ => None,
            })
            .collect()
    }

    /// Objects the server registered.
    pub fn server_created(&self) -> Vec<ObjectId> {
        self.server
            .iter()
            .filter_map(|e| match e {
                ServerEvent::ObjectCreated { id, .. } => Some(*id),
                _ => None,
            })
            .collect()
    }
}

/// One round: poll the server, then every client, then sleep.
pub async fn pump(server: &mut NetworkServer, clients: &mut [&mut NetworkClient]) -> Events {
    let mut events = Events::new(clients.len());
    events.server = server.poll().unwrap();
    for (i, client) in clients.iter_mut().enumerate() {
        events.clients[i] = client.poll().unwrap();
    }
    tokio::time::sleep(STEP).await;
    events
}

/// Pumps a fixed number of rounds.
pub async fn settle(
    server: &mut NetworkServer,
    clients: &mut [&mut NetworkClient],
    rounds: usize,
) -> Events {
    let mut all = Events::new(clients.len());
    for _ in 0..rounds {
        all.extend(pump(server, clients).await);
    }
    all
}

/// Pumps until `done` holds for everything reported so far.
pub async fn pump_until(
    server: &mut NetworkServer,
    clients: &mut [&mut NetworkClient],
    mut done: impl FnMut(&Events) -> bool,
) -> Events {
    let mut all = Events::new(clients.len());
    for _ in 0..MAX_ROUNDS {
        all.extend(pump(server, clients).await);
        if done(&all) {
            return all;
        }
    }
    panic!("endpoints never reached the expected state");
}

/// Pumps until `done` holds for the endpoints' state.
pub async fn wait_for(
    server: &mut NetworkServer,
    clients: &mut [&mut NetworkClient],
    mut done: impl FnMut(&NetworkServer, &[&mut NetworkClient]) -> bool,
) -> Events {
    let mut all = Events::new(clients.len());
    for _ in 0..MAX_ROUNDS {
        all.extend(pump(server, clients).await);
        if done(server, clients) {
            return all;
        }
    }
    panic!("endpoints never reached the expected state");
}

// ---------------------------------------------------------------------------
// Connecting
// ---------------------------------------------------------------------------

/// A TCP server listening on an ephemeral loopback port.
pub fn tcp_server() -> NetworkServer {
    let mut server = NetworkServer::new(TcpLink::new(), registry());
    server.start("127.0.0.1:0").unwrap();
    server
}

/// Connects a new TCP client and pumps until it has its identity.
pub async fn join_tcp(server: &mut NetworkServer) -> (NetworkClient, PeerId) {
    join_tcp_with(server, ClientConfig::default()).await
}

/// Like [`join_tcp`], with an explicit client configuration.
pub async fn join_tcp_with(
    server: &mut NetworkServer,
    config: ClientConfig,
) -> (NetworkClient, PeerId) {
    let addr = server.local_addr().unwrap();
    let mut client = NetworkClient::with_config(TcpLink::new(), registry(), config);
    client.connect_addr(addr).unwrap();
    let id = join(server, &mut client).await;
    (client, id)
}

/// Pumps until `client` has been assigned an identity, and returns it.
pub async fn join(server: &mut NetworkServer, client: &mut NetworkClient) -> PeerId {
    let events = pump_until(server, &mut [&mut *client], |events| {
        events.clients[0]
            .iter()
            .any(|e| matches!(e, ClientEvent::Connected(_)))
    })
    .await;
    let id = events.clients[0]
        .iter()
        .find_map(|e| match e {
            ClientEvent::Connected(id) => Some(*id),
            _ => None,
        })
        .unwrap();
    assert_eq!(client.peer_id(), Some(id));
    id
}
