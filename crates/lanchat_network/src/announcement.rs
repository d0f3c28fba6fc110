//! Discovery announcement wire format.
//!
//! An announcement is a single line of text:
//!
//! ```text
//! IP: 192.168.1.11, Name: Ada Lovelace
//! ```
//!
//! The nickname runs to the end of the payload and is carried verbatim.

use std::fmt;
use std::net::Ipv4Addr;
use std::sync::LazyLock;

use regex::Regex;

static ANNOUNCEMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^IP: (\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}), Name: ([^\r\n]+)(?:\r?\n)?$")
        .expect("valid regex")
});

/// Why a datagram was not a valid announcement.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("payload is not UTF-8")]
    NotUtf8,
    #[error("payload does not match the announcement shape")]
    Shape,
    #[error("invalid address {0:?}")]
    Address(String),
}

/// A node advertising its address and nickname.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Announcement {
    pub ip: Ipv4Addr,
    pub nickname: String,
}

impl Announcement {
    pub fn new(ip: Ipv4Addr, nickname: impl Into<String>) -> Self {
        Self {
            ip,
            nickname: nickname.into(),
        }
    }

    /// Render the announcement as sent on the wire.
    pub fn encode(&self) -> String {
        self.to_string()
    }

    /// Parse a received datagram.
    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        let text = std::str::from_utf8(payload).map_err(|_| DecodeError::NotUtf8)?;
        let caps = ANNOUNCEMENT.captures(text).ok_or(DecodeError::Shape)?;

        let ip_text = &caps[1];
        let ip = ip_text
            .parse::<Ipv4Addr>()
            .map_err(|_| DecodeError::Address(ip_text.to_string()))?;

        Ok(Self {
            ip,
            nickname: caps[2].to_string(),
        })
    }
}

impl fmt::Display for Announcement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IP: {}, Name: {}", self.ip, self.nickname)
    }
}
