//! LAN Chat Network: serverless peer discovery and direct messaging.
//!
//! Processes on the same LAN find each other by nickname and exchange
//! one-shot text messages without any central server.
//!
//! # Architecture
//!
//! - **Directory**: [`ChatState`] holds the peer table (address → nickname,
//!   last seen) and the inbox behind a single lock.
//! - **Discovery**: every node broadcasts `IP: <addr>, Name: <nickname>` over
//!   UDP at a fixed interval and records what it hears.
//! - **Messaging**: one TCP connection per message, no framing, no reply.
//! - **Node**: [`ChatNode`] binds everything and runs the background tasks.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use lanchat_network::{ChatNode, NetworkConfig};
//!
//! # async fn example() -> Result<(), lanchat_network::NetworkError> {
//! let mut node = ChatNode::resolve("alice", NetworkConfig::default()).await?;
//! let mut events = node.start().await?;
//!
//! while let Some(event) = events.discovery.recv().await {
//!     println!("{event:?}");
//! }
//! node.sender().send("bob", "hi bob").await?;
//! # Ok(())
//! # }
//! ```

pub mod announcement;
pub mod config;
pub mod directory;
pub mod discovery;
pub mod error;
pub mod identity;
pub mod node;
pub mod sender;
pub mod server;

// ── Re-exports for convenience ──────────────────────────────────────────

pub use announcement::{Announcement, DecodeError};
pub use config::NetworkConfig;
pub use directory::{ChatState, InboxEntry, PeerSnapshot};
pub use discovery::DiscoveryEvent;
pub use error::NetworkError;
pub use identity::SelfIdentity;
pub use node::{ChatNode, NodeEvents};
pub use sender::{MessageSender, Recipient};
pub use server::{MAX_MESSAGE_LEN, MessageServer};
