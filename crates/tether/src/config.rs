//! Endpoint configuration.

use std::time::Duration;

use crate::transmitter::DEFAULT_TIMEOUT;

/// Default interval between client pings.
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(1);

// ---------------------------------------------------------------------------
// ClientConfig
// ---------------------------------------------------------------------------

/// Configuration for a [`NetworkClient`](crate::NetworkClient).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// How often a connected client pings the server.
    pub ping_interval: Duration,

    /// How long without a ping reply before the connection counts as lost.
    /// Must be longer than `ping_interval`.
    pub timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            ping_interval: DEFAULT_PING_INTERVAL,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl ClientConfig {
    /// Replaces values that can't work with usable ones, warning about
    /// each change.
    pub fn validated(mut self) -> Self {
        if self.ping_interval.is_zero() {
            tracing::warn!(
                default = ?DEFAULT_PING_INTERVAL,
                "ping interval of zero replaced with default"
            );
            self.ping_interval = DEFAULT_PING_INTERVAL;
        }
        if self.timeout.is_zero() {
            tracing::warn!(default = ?DEFAULT_TIMEOUT, "timeout of zero replaced with default");
            self.timeout = DEFAULT_TIMEOUT;
        }
        if self.timeout <= self.ping_interval {
            let timeout = self.ping_interval * 2;
            tracing::warn!(
                ping_interval = ?self.ping_interval,
                configured = ?self.timeout,
                adjusted = ?timeout,
                "timeout must exceed the ping interval"
            );
            self.timeout = timeout;
        }
        self
    }
}

// ---------------------------------------------------------------------------
// ServerConfig
// ---------------------------------------------------------------------------

/// Configuration for a [`NetworkServer`](crate::NetworkServer).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// How long a peer may go without pinging before it's evicted.
    pub timeout: Duration,

    /// Whether shared objects a peer created are removed when it leaves.
    pub drop_orphaned_objects: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            drop_orphaned_objects: true,
        }
    }
}

impl ServerConfig {
    /// Replaces values that can't work with usable ones, warning about
    /// each change.
    pub fn validated(mut self) -> Self {
        if self.timeout.is_zero() {
            tracing::warn!(default = ?DEFAULT_TIMEOUT, "timeout of zero replaced with default");
            self.timeout = DEFAULT_TIMEOUT;
        }
        self
    }
}
