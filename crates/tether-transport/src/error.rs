/// Errors that can occur in the transport layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The connection was closed.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// The link has not been connected or hosted yet.
    #[error("link is not connected")]
    NotConnected,

    /// The link was already connected or hosting.
    #[error("link is already active")]
    AlreadyActive,

    /// Sending data failed.
    #[error("send failed: {0}")]
    SendFailed(#[source] std::io::Error),

    /// Binding a socket failed.
    #[error("bind failed: {0}")]
    BindFailed(#[source] std::io::Error),

    /// The address could not be parsed or resolved.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// Link operations need a Tokio runtime to spawn their I/O tasks.
    #[error("no tokio runtime available")]
    NoRuntime,
}
