//! Peer directory and inbox: the node's shared mutable state.
//!
//! Both collections live behind one [`parking_lot::Mutex`]. Every operation
//! takes the lock for a single short map or vector operation and releases it
//! before returning, so callers never hold it across an `.await`.

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

/// What the directory knows about one address.
#[derive(Debug, Clone)]
struct PeerEntry {
    nickname: String,
    last_seen: DateTime<Utc>,
}

/// A copy of one directory entry, for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeerSnapshot {
    pub ip: IpAddr,
    pub nickname: String,
    pub last_seen: DateTime<Utc>,
}

/// A message delivered to this node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InboxEntry {
    pub content: String,
    pub sender_addr: IpAddr,
    /// Nickname known for `sender_addr` when the message arrived.
    pub sender_nickname: Option<String>,
    pub received_at: DateTime<Utc>,
}

/// Result of recording an announcement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Upsert {
    /// First announcement from this address.
    New,
    /// Known address, same nickname.
    Refreshed,
    /// Known address announcing a different nickname.
    Renamed { previous: String },
}

impl Upsert {
    pub fn is_new(&self) -> bool {
        matches!(self, Self::New)
    }
}

#[derive(Debug, Default)]
struct Inner {
    peers: HashMap<IpAddr, PeerEntry>,
    inbox: Vec<InboxEntry>,
}

/// Shared peer table plus inbox.
#[derive(Debug, Default)]
pub struct ChatState {
    inner: Mutex<Inner>,
}

fn to_chrono(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or(chrono::Duration::MAX)
}

impl ChatState {
    pub fn new() -> Self {
        Self::default()
    }

    // -- Peers --------------------------------------------------------------

    /// Record an announcement, stamping it with the current time. Returns
    /// `true` if the address was previously unknown.
    pub fn upsert(&self, ip: IpAddr, nickname: &str) -> bool {
        self.upsert_at(ip, nickname, Utc::now()).is_new()
    }

    /// Record an announcement seen at `now`.
    pub fn upsert_at(&self, ip: IpAddr, nickname: &str, now: DateTime<Utc>) -> Upsert {
        let mut inner = self.inner.lock();
        let peers = &mut inner.peers;
        match peers.get_mut(&ip) {
            Some(entry) => {
                entry.last_seen = now;
                if entry.nickname == nickname {
                    Upsert::Refreshed
                } else {
                    let previous = std::mem::replace(&mut entry.nickname, nickname.to_string());
                    Upsert::Renamed { previous }
                }
            }
            None => {
                peers.insert(
                    ip,
                    PeerEntry {
                        nickname: nickname.to_string(),
                        last_seen: now,
                    },
                );
                Upsert::New
            }
        }
    }

    /// Find the address currently announcing `nickname`.
    ///
    /// If several addresses share the nickname, whichever the map yields
    /// first wins; that order is unspecified.
    pub fn lookup_by_nickname(&self, nickname: &str) -> Option<IpAddr> {
        let inner = self.inner.lock();
        inner
            .peers
            .iter()
            .find(|(_, entry)| entry.nickname == nickname)
            .map(|(ip, _)| *ip)
    }

    pub fn snapshot(&self) -> Vec<PeerSnapshot> {
        let inner = self.inner.lock();
        inner
            .peers
            .iter()
            .map(|(ip, entry)| PeerSnapshot {
                ip: *ip,
                nickname: entry.nickname.clone(),
                last_seen: entry.last_seen,
            })
            .collect()
    }

    pub fn peer_count(&self) -> usize {
        self.inner.lock().peers.len()
    }

    /// Whether `ip` has gone quiet for longer than `threshold`. Unknown
    /// addresses are never stale.
    pub fn is_stale(&self, ip: IpAddr, threshold: Duration) -> bool {
        self.is_stale_at(ip, threshold, Utc::now())
    }

    pub fn is_stale_at(&self, ip: IpAddr, threshold: Duration, now: DateTime<Utc>) -> bool {
        let inner = self.inner.lock();
        inner
            .peers
            .get(&ip)
            .is_some_and(|entry| now - entry.last_seen > to_chrono(threshold))
    }

    /// Remove every peer whose last announcement is older than `max_age`.
    pub fn evict_older_than(&self, max_age: Duration, now: DateTime<Utc>) -> Vec<PeerSnapshot> {
        let max_age = to_chrono(max_age);
        let mut inner = self.inner.lock();
        let expired: Vec<IpAddr> = inner
            .peers
            .iter()
            .filter(|(_, entry)| now - entry.last_seen > max_age)
            .map(|(ip, _)| *ip)
            .collect();

        expired
            .into_iter()
            .filter_map(|ip| {
                inner.peers.remove(&ip).map(|entry| PeerSnapshot {
                    ip,
                    nickname: entry.nickname,
                    last_seen: entry.last_seen,
                })
            })
            .collect()
    }

    // -- Inbox --------------------------------------------------------------

    /// Append a message from `sender_addr`, attributing it to whatever
    /// nickname that address has right now.
    pub fn receive(&self, sender_addr: IpAddr, content: String) -> InboxEntry {
        let mut inner = self.inner.lock();
        let entry = InboxEntry {
            content,
            sender_addr,
            sender_nickname: inner.peers.get(&sender_addr).map(|e| e.nickname.clone()),
            received_at: Utc::now(),
        };
        inner.inbox.push(entry.clone());
        entry
    }

    pub fn inbox(&self) -> Vec<InboxEntry> {
        self.inner.lock().inbox.clone()
    }

    pub fn inbox_len(&self) -> usize {
        self.inner.lock().inbox.len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
