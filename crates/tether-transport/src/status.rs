//! Shared connection flags and runtime lookup used by every link.

use std::net::SocketAddr;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::runtime::Handle;

use crate::TransportError;

/// Connection flags shared between a link and its I/O tasks.
#[derive(Debug, Default)]
pub(crate) struct LinkStatus {
    connecting: AtomicBool,
    connected: AtomicBool,
    closed: AtomicBool,
    local_addr: OnceLock<SocketAddr>,
}

impl LinkStatus {
    /// Status of a link that is established from the start.
    pub(crate) fn established() -> Self {
        let status = Self::default();
        status.connected.store(true, Ordering::Release);
        status
    }

    pub(crate) fn set_connecting(&self) {
        self.connecting.store(true, Ordering::Release);
    }

    pub(crate) fn set_connected(&self) {
        self.connecting.store(false, Ordering::Release);
        self.connected.store(true, Ordering::Release);
    }

    pub(crate) fn set_closed(&self) {
        self.connecting.store(false, Ordering::Release);
        self.connected.store(false, Ordering::Release);
        self.closed.store(true, Ordering::Release);
    }

    pub(crate) fn is_connecting(&self) -> bool {
        self.connecting.load(Ordering::Acquire)
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Records the bound local address. Only the first call has an effect.
    pub(crate) fn set_local_addr(&self, addr: SocketAddr) {
        let _ = self.local_addr.set(addr);
    }

    pub(crate) fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr.get().copied()
    }
}

/// Returns the runtime the caller is running inside.
pub(crate) fn runtime() -> Result<Handle, TransportError> {
    Handle::try_current().map_err(|_| TransportError::NoRuntime)
}
