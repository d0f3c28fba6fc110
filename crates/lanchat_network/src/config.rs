//! Network configuration for a chat node.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::NetworkError;

/// Default UDP port for discovery announcements.
pub const DEFAULT_DISCOVERY_PORT: u16 = 8888;

/// Default TCP port for direct messages.
pub const DEFAULT_MESSAGE_PORT: u16 = 1234;

/// Configuration for the discovery and messaging layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Local interface both listeners bind to.
    pub bind_ip: IpAddr,

    /// UDP port announcements are broadcast to and received on.
    pub discovery_port: u16,

    /// TCP port the message server listens on and the sender connects to.
    pub message_port: u16,

    /// Destination address for announcements.
    pub broadcast_addr: Ipv4Addr,

    /// How often this node announces itself.
    #[serde(with = "duration_serde")]
    pub broadcast_interval: Duration,

    /// A peer not heard from within this window is reported as stale.
    #[serde(with = "duration_serde")]
    pub stale_threshold: Duration,

    /// Upper bound on establishing an outbound message connection.
    #[serde(with = "duration_serde")]
    pub connect_timeout: Duration,

    /// External endpoint used to find which local address the routing table
    /// would pick. Nothing is sent to it.
    #[serde(with = "socket_addr_serde")]
    pub route_probe_addr: SocketAddr,

    /// Announce this address instead of probing the routing table.
    pub advertise_ip: Option<IpAddr>,

    /// Drop peers not heard from for this long. `None` keeps them forever.
    #[serde(with = "opt_duration_serde")]
    pub evict_after: Option<Duration>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            discovery_port: DEFAULT_DISCOVERY_PORT,
            message_port: DEFAULT_MESSAGE_PORT,
            broadcast_addr: Ipv4Addr::BROADCAST,
            broadcast_interval: Duration::from_secs(10),
            stale_threshold: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(10),
            route_probe_addr: SocketAddr::from(([8, 8, 8, 8], 80)),
            advertise_ip: None,
            evict_after: None,
        }
    }
}

impl NetworkConfig {
    /// Address the discovery listener binds to.
    pub fn discovery_bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_ip, self.discovery_port)
    }

    /// Address the message server binds to.
    pub fn message_bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_ip, self.message_port)
    }

    /// Destination of outgoing announcements.
    pub fn broadcast_target(&self) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(self.broadcast_addr), self.discovery_port)
    }

    /// Reject settings the background tasks cannot run with.
    pub fn validate(&self) -> Result<(), NetworkError> {
        if self.broadcast_interval.is_zero() {
            return Err(NetworkError::InvalidConfig(
                "broadcast_interval must be at least 1 second".into(),
            ));
        }
        if self.connect_timeout.is_zero() {
            return Err(NetworkError::InvalidConfig(
                "connect_timeout must be at least 1 second".into(),
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Serde helpers
// ---------------------------------------------------------------------------

mod socket_addr_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::net::SocketAddr;

    pub fn serialize<S: Serializer>(addr: &SocketAddr, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&addr.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<SocketAddr, D::Error> {
        let s = String::deserialize(d)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(dur: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(dur.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(d)?;
        Ok(Duration::from_secs(secs))
    }
}

mod opt_duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(dur: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match dur {
            Some(d) => s.serialize_some(&d.as_secs()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        let secs = Option::<u64>::deserialize(d)?;
        Ok(secs.map(Duration::from_secs))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
