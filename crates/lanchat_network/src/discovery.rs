//! LAN peer discovery via UDP broadcast.
//!
//! The broadcaster announces this node at a fixed interval; the listener
//! records every valid announcement it hears in the [`ChatState`] and reports
//! addresses it has not seen before through an mpsc channel.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::net::UdpSocket;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

use crate::announcement::Announcement;
use crate::config::NetworkConfig;
use crate::directory::{ChatState, Upsert};
use crate::error::NetworkError;
use crate::identity::SelfIdentity;

/// Largest datagram the listener will read.
const RECV_BUFFER: usize = 1024;

/// Something the interactive layer may want to tell the user about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryEvent {
    /// An address announced itself for the first time.
    PeerDiscovered { ip: IpAddr, nickname: String },
    /// A known address started announcing a different nickname.
    PeerRenamed {
        ip: IpAddr,
        previous: String,
        nickname: String,
    },
    /// A peer was dropped after going quiet for too long.
    PeerExpired { ip: IpAddr, nickname: String },
}

/// Configuration for the discovery service.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Where the listener binds.
    pub listen_addr: SocketAddr,
    /// Where announcements are sent.
    pub broadcast_target: SocketAddr,
    /// How often to announce.
    pub interval: Duration,
}

impl From<&NetworkConfig> for DiscoveryConfig {
    fn from(config: &NetworkConfig) -> Self {
        Self {
            listen_addr: config.discovery_bind_addr(),
            broadcast_target: config.broadcast_target(),
            interval: config.broadcast_interval,
        }
    }
}

/// Apply one received datagram to the directory.
///
/// Malformed payloads are dropped without touching the directory. Our own
/// announcements are recorded like any other but never reported.
pub fn handle_datagram(
    state: &ChatState,
    me: &SelfIdentity,
    payload: &[u8],
    now: DateTime<Utc>,
) -> Option<DiscoveryEvent> {
    let announcement = match Announcement::decode(payload) {
        Ok(a) => a,
        Err(e) => {
            trace!("Ignoring datagram: {e}");
            return None;
        }
    };

    let ip = IpAddr::V4(announcement.ip);
    let outcome = state.upsert_at(ip, &announcement.nickname, now);
    if me.is_self(ip) {
        return None;
    }

    match outcome {
        Upsert::New => Some(DiscoveryEvent::PeerDiscovered {
            ip,
            nickname: announcement.nickname,
        }),
        Upsert::Renamed { previous } => Some(DiscoveryEvent::PeerRenamed {
            ip,
            previous,
            nickname: announcement.nickname,
        }),
        Upsert::Refreshed => None,
    }
}

/// LAN discovery service using UDP broadcast.
pub struct DiscoveryService;

impl DiscoveryService {
    /// Bind both sockets and start the broadcaster and listener tasks.
    ///
    /// Binding is the only fatal step. Once running, send and receive errors
    /// are logged and the tasks carry on until `shutdown` fires. Returns the
    /// address the listener is bound to.
    pub async fn start(
        config: DiscoveryConfig,
        state: Arc<ChatState>,
        me: Arc<SelfIdentity>,
        events_tx: mpsc::Sender<DiscoveryEvent>,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<SocketAddr, NetworkError> {
        if config.interval.is_zero() {
            return Err(NetworkError::InvalidConfig(
                "broadcast interval must be non-zero".into(),
            ));
        }

        let listener_socket = UdpSocket::bind(config.listen_addr)
            .await
            .map_err(|source| NetworkError::Bind {
                addr: config.listen_addr,
                source,
            })?;
        listener_socket.set_broadcast(true)?;
        let local_addr = listener_socket.local_addr()?;
        info!("Discovery listening on {local_addr}");

        let sender_addr = SocketAddr::from(([0, 0, 0, 0], 0));
        let sender_socket = UdpSocket::bind(sender_addr)
            .await
            .map_err(|source| NetworkError::Bind {
                addr: sender_addr,
                source,
            })?;
        sender_socket.set_broadcast(true)?;

        let payload = me.announcement().encode().into_bytes();
        tokio::spawn(broadcast_loop(
            sender_socket,
            config.broadcast_target,
            payload,
            config.interval,
            shutdown.resubscribe(),
        ));
        tokio::spawn(listen_loop(listener_socket, state, me, events_tx, shutdown));

        Ok(local_addr)
    }
}

/// Announce immediately, then once per `interval`.
pub async fn broadcast_loop(
    socket: UdpSocket,
    target: SocketAddr,
    payload: Vec<u8>,
    interval: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match socket.send_to(&payload, target).await {
                    Ok(_) => trace!("Announcement sent to {target}"),
                    Err(e) => warn!("Announcement to {target} failed, retrying next tick: {e}"),
                }
            }
            _ = shutdown.recv() => {
                debug!("Discovery broadcaster shutting down");
                break;
            }
        }
    }
}

/// Receive announcements until shutdown.
pub async fn listen_loop(
    socket: UdpSocket,
    state: Arc<ChatState>,
    me: Arc<SelfIdentity>,
    events_tx: mpsc::Sender<DiscoveryEvent>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut buf = vec![0u8; RECV_BUFFER];
    loop {
        tokio::select! {
            result = socket.recv_from(&mut buf) => {
                match result {
                    Ok((len, src_addr)) => {
                        let event = handle_datagram(&state, &me, &buf[..len], Utc::now());
                        if let Some(event) = event {
                            debug!("Discovery event from {src_addr}: {event:?}");
                            notify(&events_tx, event);
                        }
                    }
                    Err(e) => {
                        warn!("Discovery recv error: {e}");
                    }
                }
            }
            _ = shutdown.recv() => {
                debug!("Discovery listener shutting down");
                break;
            }
        }
    }
}

/// Hand an event to the interactive layer without waiting on it. The
/// directory is already updated, so a full or closed channel only costs the
/// notification.
fn notify(events_tx: &mpsc::Sender<DiscoveryEvent>, event: DiscoveryEvent) {
    match events_tx.try_send(event) {
        Ok(()) => {}
        Err(TrySendError::Full(event)) => debug!("Event channel full, dropping {event:?}"),
        Err(TrySendError::Closed(_)) => {}
    }
}

/// Periodically drop peers not heard from within `max_age`.
pub async fn eviction_loop(
    state: Arc<ChatState>,
    max_age: Duration,
    every: Duration,
    events_tx: mpsc::Sender<DiscoveryEvent>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                for peer in state.evict_older_than(max_age, Utc::now()) {
                    info!(
                        "Evicting peer '{}' at {} (last seen {})",
                        peer.nickname, peer.ip, peer.last_seen
                    );
                    notify(
                        &events_tx,
                        DiscoveryEvent::PeerExpired {
                            ip: peer.ip,
                            nickname: peer.nickname,
                        },
                    );
                }
            }
            _ = shutdown.recv() => {
                debug!("Peer eviction shutting down");
                break;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn me() -> SelfIdentity {
        SelfIdentity::new("me", "10.0.0.1".parse().unwrap())
    }

    #[test]
    fn test_new_peer_reported_once() {
        let state = ChatState::new();
        let now = Utc::now();

        let first = handle_datagram(&state, &me(), b"IP: 10.0.0.5, Name: Alice", now);
        assert_eq!(
            first,
            Some(DiscoveryEvent::PeerDiscovered {
                ip: "10.0.0.5".parse().unwrap(),
                nickname: "Alice".to_string(),
            })
        );

        let again = handle_datagram(&state, &me(), b"IP: 10.0.0.5, Name: Alice", now);
        assert_eq!(again, None);
        assert_eq!(state.peer_count(), 1);
    }

    #[test]
    fn test_self_recorded_but_not_reported() {
        let state = ChatState::new();
        let event = handle_datagram(&state, &me(), b"IP: 10.0.0.1, Name: me", Utc::now());
        assert_eq!(event, None);
        assert_eq!(state.lookup_by_nickname("me"), Some("10.0.0.1".parse().unwrap()));

        let renamed = handle_datagram(&state, &me(), b"IP: 10.0.0.1, Name: still me", Utc::now());
        assert_eq!(renamed, None);
    }

    #[test]
    fn test_malformed_leaves_directory_untouched() {
        let state = ChatState::new();
        assert_eq!(handle_datagram(&state, &me(), b"IP: 10.0.0.5", Utc::now()), None);
        assert_eq!(
            handle_datagram(&state, &me(), br#"{"peer_id":"x"}"#, Utc::now()),
            None
        );
        assert_eq!(state.peer_count(), 0);
    }

    #[test]
    fn test_rename_reported() {
        let state = ChatState::new();
        handle_datagram(&state, &me(), b"IP: 10.0.0.5, Name: Alice", Utc::now());
        let event = handle_datagram(&state, &me(), b"IP: 10.0.0.5, Name: Alicia", Utc::now());
        assert_eq!(
            event,
            Some(DiscoveryEvent::PeerRenamed {
                ip: "10.0.0.5".parse().unwrap(),
                previous: "Alice".to_string(),
                nickname: "Alicia".to_string(),
            })
        );
    }

    #[tokio::test]
    async fn test_listener_reports_over_udp() {
        let state = Arc::new(ChatState::new());
        let (events_tx, mut events_rx) = mpsc::channel(8);
        let (shutdown_tx, _) = broadcast::channel(1);

        let config = DiscoveryConfig {
            listen_addr: "127.0.0.1:0".parse().unwrap(),
            broadcast_target: "127.0.0.1:9".parse().unwrap(),
            interval: Duration::from_secs(3600),
        };
        let listen_addr = DiscoveryService::start(
            config,
            Arc::clone(&state),
            Arc::new(me()),
            events_tx,
            shutdown_tx.subscribe(),
        )
        .await
        .unwrap();

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.send_to(b"garbage", listen_addr).await.unwrap();
        client
            .send_to(b"IP: 10.0.0.8, Name: Carol", listen_addr)
            .await
            .unwrap();

        let event = tokio::time::timeout(Duration::from_secs(2), events_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            event,
            DiscoveryEvent::PeerDiscovered {
                ip: "10.0.0.8".parse().unwrap(),
                nickname: "Carol".to_string(),
            }
        );
        assert_eq!(state.peer_count(), 1);

        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn test_broadcaster_announces_immediately() {
        let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let target = receiver.local_addr().unwrap();
        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let payload = me().announcement().encode().into_bytes();
        let task = tokio::spawn(broadcast_loop(
            sender,
            target,
            payload,
            Duration::from_secs(3600),
            shutdown_rx,
        ));

        let mut buf = vec![0u8; RECV_BUFFER];
        let (len, _) = tokio::time::timeout(Duration::from_secs(2), receiver.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        let announcement = Announcement::decode(&buf[..len]).unwrap();
        assert_eq!(announcement.nickname, "me");

        let _ = shutdown_tx.send(());
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_eviction_loop_reports_expired() {
        let state = Arc::new(ChatState::new());
        state.upsert_at(
            "10.0.0.9".parse().unwrap(),
            "ghost",
            Utc::now() - chrono::Duration::seconds(600),
        );
        let (events_tx, mut events_rx) = mpsc::channel(8);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        tokio::spawn(eviction_loop(
            Arc::clone(&state),
            Duration::from_secs(300),
            Duration::from_millis(10),
            events_tx,
            shutdown_rx,
        ));

        let event = tokio::time::timeout(Duration::from_secs(2), events_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(
            event,
            DiscoveryEvent::PeerExpired { ref nickname, .. } if nickname == "ghost"
        ));
        assert_eq!(state.peer_count(), 0);

        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn test_undrained_events_do_not_stall_listener() {
        let state = Arc::new(ChatState::new());
        let (events_tx, _events_rx) = mpsc::channel(4);
        let (shutdown_tx, _) = broadcast::channel(1);

        let config = DiscoveryConfig {
            listen_addr: "127.0.0.1:0".parse().unwrap(),
            broadcast_target: "127.0.0.1:9".parse().unwrap(),
            interval: Duration::from_secs(3600),
        };
        let listen_addr = DiscoveryService::start(
            config,
            Arc::clone(&state),
            Arc::new(me()),
            events_tx,
            shutdown_tx.subscribe(),
        )
        .await
        .unwrap();

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        for i in 0..100 {
            let payload = format!("IP: 10.0.1.{i}, Name: peer{i}");
            client.send_to(payload.as_bytes(), listen_addr).await.unwrap();
            // Pace the sends so the loopback receive buffer never overflows.
            if i % 10 == 9 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        }

        tokio::time::timeout(Duration::from_secs(2), async {
            while state.peer_count() < 100 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("listener stopped recording peers");

        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn test_zero_interval_rejected_at_start() {
        let (events_tx, _events_rx) = mpsc::channel(1);
        let (shutdown_tx, _) = broadcast::channel(1);
        let config = DiscoveryConfig {
            listen_addr: "127.0.0.1:0".parse().unwrap(),
            broadcast_target: "127.0.0.1:9".parse().unwrap(),
            interval: Duration::ZERO,
        };

        let result = DiscoveryService::start(
            config,
            Arc::new(ChatState::new()),
            Arc::new(me()),
            events_tx,
            shutdown_tx.subscribe(),
        )
        .await;
        assert!(matches!(result, Err(NetworkError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_broadcaster_survives_failed_sends() {
        // Without SO_BROADCAST every send to the limited broadcast address
        // is refused by the kernel.
        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let target: SocketAddr = "255.255.255.255:9".parse().unwrap();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let task = tokio::spawn(broadcast_loop(
            sender,
            target,
            me().announcement().encode().into_bytes(),
            Duration::from_millis(10),
            shutdown_rx,
        ));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!task.is_finished());

        let _ = shutdown_tx.send(());
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();
    }
}
