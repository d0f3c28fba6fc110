//! ChatNode: top-level coordinator for discovery and messaging.
//!
//! [`ChatNode`] owns the shared [`ChatState`] and the node's identity, and
//! wires up:
//! - the message server (one task per inbound connection)
//! - the discovery broadcaster and listener
//! - optional eviction of long-silent peers
//!
//! All tasks stop when [`stop()`](ChatNode::stop) is called. Without that the
//! process simply exits around them.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tracing::info;

use crate::config::NetworkConfig;
use crate::directory::{ChatState, InboxEntry, PeerSnapshot};
use crate::discovery::{self, DiscoveryConfig, DiscoveryEvent, DiscoveryService};
use crate::error::NetworkError;
use crate::identity::SelfIdentity;
use crate::sender::MessageSender;
use crate::server::MessageServer;

/// Channels the interactive layer listens on once the node is running.
pub struct NodeEvents {
    pub discovery: mpsc::Receiver<DiscoveryEvent>,
    pub inbox: mpsc::Receiver<InboxEntry>,
}

/// A running (or ready to run) chat node.
pub struct ChatNode {
    identity: Arc<SelfIdentity>,
    config: NetworkConfig,
    state: Arc<ChatState>,
    shutdown_tx: Option<broadcast::Sender<()>>,
    message_addr: Option<SocketAddr>,
    discovery_addr: Option<SocketAddr>,
}

impl ChatNode {
    pub fn new(identity: SelfIdentity, config: NetworkConfig) -> Self {
        Self {
            identity: Arc::new(identity),
            config,
            state: Arc::new(ChatState::new()),
            shutdown_tx: None,
            message_addr: None,
            discovery_addr: None,
        }
    }

    /// Resolve this node's outbound address, then build the node.
    pub async fn resolve(
        nickname: impl Into<String>,
        config: NetworkConfig,
    ) -> Result<Self, NetworkError> {
        let identity = SelfIdentity::resolve(nickname, &config).await?;
        Ok(Self::new(identity, config))
    }

    pub fn identity(&self) -> &SelfIdentity {
        &self.identity
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    pub fn state(&self) -> Arc<ChatState> {
        Arc::clone(&self.state)
    }

    pub fn is_running(&self) -> bool {
        self.shutdown_tx.is_some()
    }

    /// Where the message server actually listens, once started.
    pub fn local_message_addr(&self) -> Option<SocketAddr> {
        self.message_addr
    }

    /// Where the discovery listener actually listens, once started.
    pub fn local_discovery_addr(&self) -> Option<SocketAddr> {
        self.discovery_addr
    }

    pub fn peers(&self) -> Vec<PeerSnapshot> {
        self.state.snapshot()
    }

    pub fn inbox(&self) -> Vec<InboxEntry> {
        self.state.inbox()
    }

    pub fn sender(&self) -> MessageSender {
        MessageSender::new(Arc::clone(&self.state), &self.config)
    }

    /// Bind every socket and spawn the background tasks.
    ///
    /// An invalid config or a bind failure is returned before anything is
    /// spawned for the failing component; the caller should treat it as fatal.
    /// Event channels are bounded; events are dropped, never waited on, when
    /// the caller stops draining them.
    pub async fn start(&mut self) -> Result<NodeEvents, NetworkError> {
        if self.is_running() {
            return Err(NetworkError::AlreadyRunning);
        }
        self.config.validate()?;

        let (shutdown_tx, _) = broadcast::channel(8);
        let (discovery_tx, discovery_rx) = mpsc::channel(64);
        let (inbox_tx, inbox_rx) = mpsc::channel(64);

        let server = MessageServer::bind(self.config.message_bind_addr(), Arc::clone(&self.state))
            .await?
            .with_notifications(inbox_tx);
        let message_addr = server.local_addr()?;

        let discovery_addr = match DiscoveryService::start(
            DiscoveryConfig::from(&self.config),
            Arc::clone(&self.state),
            Arc::clone(&self.identity),
            discovery_tx.clone(),
            shutdown_tx.subscribe(),
        )
        .await
        {
            Ok(addr) => addr,
            Err(e) => {
                let _ = shutdown_tx.send(());
                return Err(e);
            }
        };

        tokio::spawn(server.run(shutdown_tx.subscribe()));

        if let Some(max_age) = self.config.evict_after {
            tokio::spawn(discovery::eviction_loop(
                Arc::clone(&self.state),
                max_age,
                self.config.broadcast_interval,
                discovery_tx,
                shutdown_tx.subscribe(),
            ));
        }

        self.shutdown_tx = Some(shutdown_tx);
        self.message_addr = Some(message_addr);
        self.discovery_addr = Some(discovery_addr);

        info!(
            "Node '{}' started (outbound {}, messages on {message_addr}, \
             discovery on {discovery_addr})",
            self.identity.nickname, self.identity.outbound_ip
        );
        Ok(NodeEvents {
            discovery: discovery_rx,
            inbox: inbox_rx,
        })
    }

    /// Signal every background task to stop.
    pub fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
            info!("Node '{}' stopped", self.identity.nickname);
        }
    }
}

impl Drop for ChatNode {
    fn drop(&mut self) {
        self.stop();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
