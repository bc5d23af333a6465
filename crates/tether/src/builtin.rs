//! The three packets every registry carries under codes 0, 1 and 2.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tether_protocol::PeerId;

use crate::{ClientContext, DisconnectReason, Packet, ServerContext};

// ---------------------------------------------------------------------------
// Connect
// ---------------------------------------------------------------------------

/// Hands a client its identity and confirms the connection.
///
/// The server sends it to every new peer. Clients on datagram links also
/// send one (with a nil id) when they connect, so the server learns their
/// address; the server ignores its contents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connect {
    /// The identity the server assigned.
    pub peer_id: PeerId,
}

impl Packet for Connect {
    fn process_client(self, ctx: &mut ClientContext<'_>) {
        ctx.assign_identity(self.peer_id);
    }
}

// ---------------------------------------------------------------------------
// Disconnect
// ---------------------------------------------------------------------------

/// Announces that the sender is closing the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Disconnect;

impl Packet for Disconnect {
    fn process_client(self, ctx: &mut ClientContext<'_>) {
        ctx.notify_disconnected();
    }

    fn process_server(self, ctx: &mut ServerContext<'_>, source: PeerId) {
        ctx.mark_leaving(source, DisconnectReason::Requested);
    }
}

// ---------------------------------------------------------------------------
// Ping
// ---------------------------------------------------------------------------

/// A timestamp used to measure latency and prove liveness.
///
/// Clients send one every ping interval; the server records the delay and
/// answers with a fresh one, from which the client records its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ping {
    /// Milliseconds since the Unix epoch when the ping was created.
    pub time: i64,
}

impl Ping {
    /// A ping stamped with the current time.
    pub fn now() -> Self {
        Self {
            time: unix_millis(),
        }
    }

    /// Time since the ping was stamped. Clock skew that would make it
    /// negative is clamped to zero.
    pub fn elapsed(&self) -> Duration {
        let millis = unix_millis().saturating_sub(self.time);
        Duration::from_millis(u64::try_from(millis).unwrap_or(0))
    }
}

impl Packet for Ping {
    fn process_client(self, ctx: &mut ClientContext<'_>) {
        ctx.transmitter.record_ping(self.elapsed());
    }

    fn process_server(self, ctx: &mut ServerContext<'_>, source: PeerId) {
        let Some(peer) = ctx.peers.get_mut(source) else {
            return;
        };
        peer.transmitter.record_ping(self.elapsed());
        if let Err(e) = peer.transmitter.send(&Ping::now()) {
            tracing::debug!(%source, error = %e, "ping reply not sent");
        }
    }
}

fn unix_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}
