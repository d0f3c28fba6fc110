//! Inbound message server.
//!
//! Every accepted TCP connection carries exactly one message: whatever a
//! single read of up to [`MAX_MESSAGE_LEN`] bytes returns. There is no
//! framing and no reply. Each connection is handled on its own task, so a
//! peer that connects and never writes only stalls its own handler.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use crate::directory::{ChatState, InboxEntry};
use crate::error::NetworkError;

/// Size of the single read that makes up one message.
pub const MAX_MESSAGE_LEN: usize = 1024;

/// Accepts message connections and appends them to the inbox.
pub struct MessageServer {
    listener: TcpListener,
    state: Arc<ChatState>,
    inbox_tx: Option<mpsc::Sender<InboxEntry>>,
}

impl MessageServer {
    /// Bind the listening socket. Failing here is fatal for the node.
    pub async fn bind(addr: SocketAddr, state: Arc<ChatState>) -> Result<Self, NetworkError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| NetworkError::Bind { addr, source })?;
        Ok(Self {
            listener,
            state,
            inbox_tx: None,
        })
    }

    /// Also report each stored message on `tx`.
    pub fn with_notifications(mut self, tx: mpsc::Sender<InboxEntry>) -> Self {
        self.inbox_tx = Some(tx);
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr, NetworkError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until `shutdown` fires.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        if let Ok(addr) = self.listener.local_addr() {
            info!("Message server listening on {addr}");
        }

        loop {
            tokio::select! {
                accept_result = self.listener.accept() => {
                    match accept_result {
                        Ok((stream, peer_addr)) => {
                            let state = Arc::clone(&self.state);
                            let inbox_tx = self.inbox_tx.clone();
                            tokio::spawn(async move {
                                let result =
                                    handle_connection(stream, peer_addr, &state, inbox_tx).await;
                                if let Err(e) = result {
                                    warn!("Dropped message from {peer_addr}: {e}");
                                }
                            });
                        }
                        Err(e) => {
                            error!("TCP accept failed: {e}");
                        }
                    }
                }
                _ = shutdown.recv() => {
                    info!("Message server shutting down");
                    break;
                }
            }
        }
    }
}

/// Read one message from `stream` and store it.
async fn handle_connection(
    mut stream: TcpStream,
    peer_addr: SocketAddr,
    state: &ChatState,
    inbox_tx: Option<mpsc::Sender<InboxEntry>>,
) -> Result<(), NetworkError> {
    let mut buf = vec![0u8; MAX_MESSAGE_LEN];
    let n = stream.read(&mut buf).await?;
    drop(stream);

    if n == 0 {
        debug!("Connection from {peer_addr} closed without a message");
        return Ok(());
    }

    let content = String::from_utf8_lossy(&buf[..n]).into_owned();
    let entry = state.receive(peer_addr.ip(), content);
    info!(
        "Message from {} ({} bytes)",
        entry.sender_nickname.as_deref().unwrap_or("unknown"),
        n
    );

    if let Some(tx) = inbox_tx {
        if let Err(TrySendError::Full(_)) = tx.try_send(entry) {
            debug!("Inbox notifications full, message from {peer_addr} stored without notice");
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;

    async fn start() -> (Arc<ChatState>, SocketAddr, broadcast::Sender<()>) {
        let state = Arc::new(ChatState::new());
        let server = MessageServer::bind("127.0.0.1:0".parse().unwrap(), Arc::clone(&state))
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        tokio::spawn(server.run(shutdown_rx));
        (state, addr, shutdown_tx)
    }

    async fn wait_for_inbox(state: &ChatState, len: usize) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while state.inbox_len() < len {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("inbox did not fill in time");
    }

    #[tokio::test]
    async fn test_bind_conflict_is_reported() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = taken.local_addr().unwrap();
        let result = MessageServer::bind(addr, Arc::new(ChatState::new())).await;
        assert!(matches!(result, Err(NetworkError::Bind { .. })));
    }

    #[tokio::test]
    async fn test_single_message_attributed_to_known_peer() {
        let (state, addr, shutdown_tx) = start().await;
        state.upsert("127.0.0.1".parse().unwrap(), "alice");

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"hello there").await.unwrap();
        drop(client);

        wait_for_inbox(&state, 1).await;
        let inbox = state.inbox();
        assert_eq!(inbox[0].content, "hello there");
        assert_eq!(inbox[0].sender_nickname.as_deref(), Some("alice"));
        assert!(inbox[0].sender_addr.is_loopback());

        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn test_unknown_sender_has_no_nickname() {
        let (state, addr, shutdown_tx) = start().await;

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"anon").await.unwrap();
        drop(client);

        wait_for_inbox(&state, 1).await;
        assert_eq!(state.inbox()[0].sender_nickname, None);

        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn test_silent_connection_does_not_block_others() {
        let (state, addr, shutdown_tx) = start().await;

        let _idle = TcpStream::connect(addr).await.unwrap();

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"still works").await.unwrap();
        drop(client);

        wait_for_inbox(&state, 1).await;
        assert_eq!(state.inbox()[0].content, "still works");

        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn test_empty_connection_adds_nothing() {
        let (state, addr, shutdown_tx) = start().await;

        drop(TcpStream::connect(addr).await.unwrap());

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"after").await.unwrap();
        drop(client);

        wait_for_inbox(&state, 1).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(state.inbox_len(), 1);

        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn test_notifications_channel() {
        let state = Arc::new(ChatState::new());
        let (tx, mut rx) = mpsc::channel(4);
        let server = MessageServer::bind("127.0.0.1:0".parse().unwrap(), Arc::clone(&state))
            .await
            .unwrap()
            .with_notifications(tx);
        let addr = server.local_addr().unwrap();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        tokio::spawn(server.run(shutdown_rx));

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"ping").await.unwrap();
        drop(client);

        let entry = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.content, "ping");

        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn test_reset_connection_does_not_affect_others() {
        let (state, addr, shutdown_tx) = start().await;

        let aborted = TcpStream::connect(addr).await.unwrap();
        aborted.set_linger(Some(Duration::ZERO)).unwrap();
        drop(aborted);

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"after the reset").await.unwrap();
        drop(client);

        wait_for_inbox(&state, 1).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        let inbox = state.inbox();
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].content, "after the reset");

        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn test_undrained_notifications_keep_storing() {
        let state = Arc::new(ChatState::new());
        let (tx, _rx) = mpsc::channel(1);
        let server = MessageServer::bind("127.0.0.1:0".parse().unwrap(), Arc::clone(&state))
            .await
            .unwrap()
            .with_notifications(tx);
        let addr = server.local_addr().unwrap();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        tokio::spawn(server.run(shutdown_rx));

        for i in 0..10 {
            let mut client = TcpStream::connect(addr).await.unwrap();
            client.write_all(format!("msg {i}").as_bytes()).await.unwrap();
        }

        wait_for_inbox(&state, 10).await;
        let _ = shutdown_tx.send(());
    }
}
