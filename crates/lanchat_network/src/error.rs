//! Network error types.

use std::net::SocketAddr;
use std::time::Duration;

/// Errors that can occur in the lanchat_network crate.
#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    /// A required listening socket could not be bound. Always fatal at startup.
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// No peer with the given nickname is in the directory.
    #[error("Peer not found: {0}")]
    PeerNotFound(String),

    /// The outgoing message does not fit in a single receive buffer.
    #[error("Message is {len} bytes, the limit is {max}")]
    MessageTooLarge { len: usize, max: usize },

    /// The node's outbound address could not be determined.
    #[error("Cannot determine outbound address: {0}")]
    IdentityResolution(String),

    /// A setting is out of range.
    #[error("Invalid network config: {0}")]
    InvalidConfig(String),

    /// `start()` was called on a node that is already running.
    #[error("Node already running")]
    AlreadyRunning,

    /// An operation timed out.
    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
