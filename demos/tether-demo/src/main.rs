use std::error::Error;
use std::sync::mpsc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tether::prelude::*;
use tracing_subscriber::EnvFilter;

const ENDPOINT: &str = "127.0.0.1:1337";
const STEP: Duration = Duration::from_millis(10);
const DEADLINE: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Packets and objects
// ---------------------------------------------------------------------------

/// A line of text the client sends; the server publishes it.
#[derive(Debug, Serialize, Deserialize)]
struct PingTest {
    text: String,
}

impl Packet for PingTest {
    fn process_server(self, ctx: &mut ServerContext<'_>, source: PeerId) {
        tracing::info!(%source, text = %self.text, "server received custom packet");
        ctx.emit(source, self.text);
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Note {
    core: SharedCore,
    content: String,
}

impl Note {
    const CONTENT: FieldTag = 1;

    fn new(content: &str) -> Self {
        Self {
            core: SharedCore::new(),
            content: content.to_string(),
        }
    }

    fn set_content(&mut self, content: &str) -> Result<(), ProtocolError> {
        self.core
            .set_tracked(Self::CONTENT, &mut self.content, content.to_string())
    }
}

impl SharedObject for Note {
    const TYPE_NAME: &'static str = "demo.Note";

    fn core(&self) -> &SharedCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut SharedCore {
        &mut self.core
    }

    fn direction(&self) -> Direction {
        Direction::CLIENT_TO_SERVER | Direction::SERVER_TO_CLIENT
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
            .method1(
                "client_print",
                Direction::SERVER_TO_CLIENT,
                |note: &mut Note, line: String| {
                    tracing::info!(note = %note.core.id(), %line, "client_print");
                },
            )
            .method0(
                "get_message_from_server",
                Direction::CLIENT_TO_SERVER,
                |note: &mut Note| format!("server says: {}", note.content),
            );
    }

    fn on_create_client(&mut self) {
        tracing::info!(note = %self.core.id(), content = %self.content, "note arrived on client");
    }
}

fn registry() -> Result<Registry, ProtocolError> {
    let mut registry = Registry::new();
    registry
        .register_replication_and_rpc()?
        .register::<PingTest>()?
        .register_shared::<Note>()?;
    Ok(registry)
}

// ---------------------------------------------------------------------------
// Driving both endpoints
// ---------------------------------------------------------------------------

struct Demo {
    server: NetworkServer,
    client: NetworkClient,
}

impl Demo {
    /// Polls both endpoints until `done` accepts an event pair, or gives up
    /// after the deadline.
    async fn run_until(
        &mut self,
        what: &str,
        mut done: impl FnMut(&mut Self, &[ServerEvent], &[ClientEvent]) -> bool,
    ) -> Result<(), Box<dyn Error>> {
        let start = Instant::now();
        while start.elapsed() < DEADLINE {
            let server_events = self.server.poll()?;
            let client_events = self.client.poll()?;
            for event in &server_events {
                tracing::debug!(?event, "server event");
            }
            for event in &client_events {
                tracing::debug!(?event, "client event");
            }
            if done(self, &server_events, &client_events) {
                return Ok(());
            }
            tokio::time::sleep(STEP).await;
        }
        Err(format!("timed out waiting for {what}").into())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let mut server = NetworkServer::new(TcpLink::new(), registry()?);
    let addr = server.start(ENDPOINT)?;
    let mut client = NetworkClient::new(TcpLink::new(), registry()?);
    client.connect(ENDPOINT)?;
    tracing::info!(%addr, "demo started");

    let mut demo = Demo { server, client };

    // --- Handshake ---
    let mut assigned = None;
    let mut announced = None;
    demo.run_until("identity", |_, server_events, client_events| {
        for event in server_events {
            if let ServerEvent::PeerConnected { peer, .. } = event {
                assigned = Some(*peer);
            }
        }
        for event in client_events {
            if let ClientEvent::Connected(peer) = event {
                announced = Some(*peer);
            }
        }
        announced.is_some()
    })
    .await?;
    let Some(peer) = announced else {
        return Err("client never learned its identity".into());
    };
    tracing::info!(%peer, matches_server = (assigned == Some(peer)), "client connected");

    // --- Custom packet ---
    demo.client.send(&PingTest {
        text: "ping-test".to_string(),
    })?;
    demo.run_until("ping-test", |_, server_events, _| {
        server_events
            .iter()
            .any(|e| e.custom::<String>().is_some_and(|text| text == "ping-test"))
    })
    .await?;

    // --- Latency ---
    tokio::time::sleep(demo.client.config().ping_interval).await;
    demo.run_until("latency", |demo, _, _| {
        demo.client.latency().is_some()
            && demo.server.peer(peer).and_then(PeerHandle::latency).is_some()
    })
    .await?;
    tracing::info!(
        client = ?demo.client.latency(),
        server = ?demo.server.peer(peer).and_then(PeerHandle::latency),
        "latency measured"
    );

    // --- Shared object, then a delta ---
    let note = demo.server.objects_mut().insert(Note::new("first draft"));
    demo.server.share(note, Target::All)?;
    demo.run_until("shared note", |demo, _, _| demo.client.objects().contains(note))
        .await?;

    if let Some(server_note) = demo.server.objects_mut().get_mut::<Note>(note) {
        server_note.set_content("second draft")?;
    }
    demo.server.send_updates(note, Target::All)?;
    demo.run_until("delta", |demo, _, _| {
        demo.client
            .objects()
            .get::<Note>(note)
            .is_some_and(|n| n.content == "second draft")
    })
    .await?;
    tracing::info!(%note, "client copy updated");

    // --- RPC both ways ---
    demo.server.call_rpc(
        note,
        "client_print",
        vec![Value::from("hello from the server")],
        Target::Peer(peer),
    )?;

    let (tx, rx) = mpsc::channel();
    demo.client
        .call_rpc_with(note, "get_message_from_server", vec![], move |reply: String| {
            let _ = tx.send(reply);
        })?;
    let mut reply = None;
    demo.run_until("rpc reply", |_, _, _| {
        if let Ok(text) = rx.try_recv() {
            reply = Some(text);
        }
        reply.is_some()
    })
    .await?;
    tracing::info!(reply = ?reply, "rpc answered");

    // --- Teardown ---
    demo.client.disconnect()?;
    let start = Instant::now();
    while demo.server.peer_count() > 0 && start.elapsed() < DEADLINE {
        for event in demo.server.poll()? {
            tracing::info!(?event, "server event");
        }
        tokio::time::sleep(STEP).await;
    }
    demo.server.stop();
    Ok(())
}
