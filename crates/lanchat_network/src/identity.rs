//! Self identity: this node's nickname and the address it announces.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use serde::Serialize;
use tokio::net::UdpSocket;
use tracing::debug;

use crate::announcement::Announcement;
use crate::config::NetworkConfig;
use crate::error::NetworkError;

/// Who this node is. Resolved once at startup and never changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SelfIdentity {
    pub nickname: String,
    pub outbound_ip: IpAddr,
}

impl SelfIdentity {
    pub fn new(nickname: impl Into<String>, outbound_ip: IpAddr) -> Self {
        Self {
            nickname: nickname.into(),
            outbound_ip,
        }
    }

    /// Build the identity for `nickname`, using the configured
    /// `advertise_ip` or else asking the routing table.
    pub async fn resolve(
        nickname: impl Into<String>,
        config: &NetworkConfig,
    ) -> Result<Self, NetworkError> {
        let outbound_ip = match config.advertise_ip {
            Some(ip) => ip,
            None => outbound_ip(config.route_probe_addr).await?,
        };
        Ok(Self::new(nickname, outbound_ip))
    }

    /// The announcement this node broadcasts. Announcements carry IPv4 only;
    /// an IPv6 outbound address is announced as unspecified.
    pub fn announcement(&self) -> Announcement {
        let ip = match self.outbound_ip {
            IpAddr::V4(v4) => v4,
            IpAddr::V6(v6) => v6.to_ipv4_mapped().unwrap_or(Ipv4Addr::UNSPECIFIED),
        };
        Announcement::new(ip, self.nickname.clone())
    }

    pub fn is_self(&self, ip: IpAddr) -> bool {
        self.outbound_ip == ip
    }
}

/// Find the local address used to reach `probe`.
///
/// Connecting a UDP socket only selects a route; no datagram is sent.
pub async fn outbound_ip(probe: SocketAddr) -> Result<IpAddr, NetworkError> {
    let bind: SocketAddr = if probe.is_ipv4() {
        SocketAddr::from(([0, 0, 0, 0], 0))
    } else {
        SocketAddr::from(([0u16; 8], 0))
    };
    let socket = UdpSocket::bind(bind)
        .await
        .map_err(|e| NetworkError::IdentityResolution(format!("bind: {e}")))?;
    socket
        .connect(probe)
        .await
        .map_err(|e| NetworkError::IdentityResolution(format!("no route to {probe}: {e}")))?;
    let local = socket
        .local_addr()
        .map_err(|e| NetworkError::IdentityResolution(e.to_string()))?;

    debug!("Outbound address via {probe} is {}", local.ip());
    Ok(local.ip())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
