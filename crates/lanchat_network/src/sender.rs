//! Outbound direct messages.
//!
//! Sending is split in two so the interactive layer can warn about a stale
//! peer and prompt for text between the lookup and the network write.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{debug, info};

use crate::config::NetworkConfig;
use crate::directory::ChatState;
use crate::error::NetworkError;
use crate::server::MAX_MESSAGE_LEN;

/// A nickname resolved to an address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipient {
    pub nickname: String,
    pub ip: IpAddr,
    /// The peer has not announced itself within the staleness threshold.
    /// Advisory only; delivery is still attempted.
    pub stale: bool,
}

/// Fire-and-forget delivery to peers in the directory.
#[derive(Debug, Clone)]
pub struct MessageSender {
    state: Arc<ChatState>,
    message_port: u16,
    stale_threshold: Duration,
    connect_timeout: Duration,
}

impl MessageSender {
    pub fn new(state: Arc<ChatState>, config: &NetworkConfig) -> Self {
        Self {
            state,
            message_port: config.message_port,
            stale_threshold: config.stale_threshold,
            connect_timeout: config.connect_timeout,
        }
    }

    /// Look `nickname` up in the directory. Does no network I/O.
    pub fn resolve(&self, nickname: &str) -> Result<Recipient, NetworkError> {
        let ip = self
            .state
            .lookup_by_nickname(nickname)
            .ok_or_else(|| NetworkError::PeerNotFound(nickname.to_string()))?;
        Ok(Recipient {
            nickname: nickname.to_string(),
            ip,
            stale: self.state.is_stale(ip, self.stale_threshold),
        })
    }

    /// Open a connection to the recipient, write `text` in one go and close.
    ///
    /// Success only means the bytes were handed to the kernel; the peer
    /// never acknowledges.
    pub async fn deliver(&self, recipient: &Recipient, text: &str) -> Result<(), NetworkError> {
        if text.len() > MAX_MESSAGE_LEN {
            return Err(NetworkError::MessageTooLarge {
                len: text.len(),
                max: MAX_MESSAGE_LEN,
            });
        }

        let addr = SocketAddr::new(recipient.ip, self.message_port);
        debug!("Connecting to {} at {addr}", recipient.nickname);
        let mut stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| NetworkError::Timeout(self.connect_timeout))??;

        stream.write_all(text.as_bytes()).await?;
        stream.shutdown().await?;

        info!("Sent {} bytes to {} at {addr}", text.len(), recipient.nickname);
        Ok(())
    }

    /// Resolve and deliver in one call.
    pub async fn send(&self, nickname: &str, text: &str) -> Result<Recipient, NetworkError> {
        let recipient = self.resolve(nickname)?;
        self.deliver(&recipient, text).await?;
        Ok(recipient)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
