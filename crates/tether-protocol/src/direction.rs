//! Routing policy for shared objects and RPC methods.

use bitflags::bitflags;

bitflags! {
    /// Which routes a shared object, or an RPC method on one, may travel.
    ///
    /// # Flags
    ///
    /// - `CLIENT_TO_SERVER`: a client may send it to the server, which
    ///   applies it locally.
    /// - `SERVER_TO_CLIENT`: the server may send it to clients.
    /// - `CLIENT_TO_CLIENT`: the server relays a client's copy to the other
    ///   clients.
    /// - `INCLUDE_SELF`: the relay also goes back to the original sender.
    ///   Only meaningful together with `CLIENT_TO_CLIENT`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Direction: u8 {
        /// Client to server.
        const CLIENT_TO_SERVER = 1 << 0;
        /// Server to client.
        const SERVER_TO_CLIENT = 1 << 1;
        /// Client to the other clients, relayed by the server.
        const CLIENT_TO_CLIENT = 1 << 2;
        /// Relay back to the sender as well.
        const INCLUDE_SELF = 1 << 3;
    }
}

impl Default for Direction {
    /// Every route allowed.
    fn default() -> Self {
        Self::all()
    }
}

impl Direction {
    /// Whether a client accepts a packet with this policy.
    ///
    /// Packets straight from the server need `SERVER_TO_CLIENT`; packets
    /// the server relayed from another client need `CLIENT_TO_CLIENT`.
    pub fn accepted_by_client(self, forwarded: bool) -> bool {
        if forwarded {
            self.contains(Self::CLIENT_TO_CLIENT)
        } else {
            self.contains(Self::SERVER_TO_CLIENT)
        }
    }

    /// Whether the server applies a client's packet locally.
    pub fn accepted_by_server(self) -> bool {
        self.contains(Self::CLIENT_TO_SERVER)
    }

    /// Whether the server relays a client's packet to other clients.
    pub fn relayed(self) -> bool {
        self.contains(Self::CLIENT_TO_CLIENT)
    }

    /// Whether a relay also reaches the original sender.
    pub fn relays_to_sender(self) -> bool {
        self.contains(Self::CLIENT_TO_CLIENT | Self::INCLUDE_SELF)
    }
}
