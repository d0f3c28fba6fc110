//! Text rendering for the interactive surface.

use lanchat_network::{DiscoveryEvent, InboxEntry, PeerSnapshot};

pub fn peers(peers: &[PeerSnapshot]) -> String {
    let mut out = String::from("Peers:\n");
    for peer in peers {
        out.push_str(&format!("Name: {}, IP: {}\n", peer.nickname, peer.ip));
    }
    out
}

pub fn inbox(entries: &[InboxEntry]) -> String {
    let mut out = String::from("Inbox:\n");
    for entry in entries {
        out.push_str(&format!(
            "{}\nFrom: IP={}, Name={}\n|\n",
            entry.content,
            entry.sender_addr,
            entry.sender_nickname.as_deref().unwrap_or("")
        ));
    }
    out
}

pub fn discovery_event(event: &DiscoveryEvent) -> String {
    match event {
        DiscoveryEvent::PeerDiscovered { ip, nickname } => {
            format!("Peer discovered: IP={ip}, Name={nickname}")
        }
        DiscoveryEvent::PeerRenamed {
            ip,
            previous,
            nickname,
        } => format!("Peer renamed: IP={ip}, Name={previous} -> {nickname}"),
        DiscoveryEvent::PeerExpired { ip, nickname } => {
            format!("Peer gone quiet and removed: IP={ip}, Name={nickname}")
        }
    }
}

pub fn new_message(entry: &InboxEntry) -> String {
    match &entry.sender_nickname {
        Some(name) => format!("New message from {name} (type 'inbox' to read)"),
        None => format!("New message from {} (type 'inbox' to read)", entry.sender_addr),
    }
}
