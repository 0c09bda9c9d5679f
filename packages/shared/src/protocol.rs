//! Wire protocol shared by the chat server and client.
//!
//! ## TCP chat stream
//!
//! Every payload is a single UTF-8 line terminated by `\n` (a trailing `\r`
//! is stripped on decode). The exchange is:
//!
//! 1. server → client: [`WELCOME_MESSAGE`]
//! 2. client → server: the username, once
//! 3. both directions: chat lines. The server relays them as
//!    `"<username>: <text>"` and marks its own announcements with
//!    [`SYSTEM_MARKER`].
//!
//! ## UDP discovery
//!
//! Servers advertise themselves with a `CHAT_SERVER|<ip>|<port>` datagram,
//! see [`ServerAdvert`].

use std::net::IpAddr;

use thiserror::Error;
use tokio_util::codec::LinesCodec;

/// Greeting sent by the server right after accepting a connection.
pub const WELCOME_MESSAGE: &str = "Welcome! Please enter your username";

/// Leading marker of server-generated announcements.
pub const SYSTEM_MARKER: &str = "[SYSTEM]";

/// Prefix the client puts in front of the welcome text when surfacing it.
pub const SERVER_MARKER: &str = "[SERVER]";

/// Sent to a connection rejected by the admission cap.
pub const SERVER_FULL_MESSAGE: &str = "[SYSTEM] Server is full";

/// Literal first field of a discovery datagram.
pub const DISCOVERY_TAG: &str = "CHAT_SERVER";

/// Field separator of a discovery datagram.
pub const DISCOVERY_SEPARATOR: char = '|';

pub const DEFAULT_CHAT_PORT: u16 = 10000;
pub const DEFAULT_DISCOVERY_PORT: u16 = 10001;

/// Longest accepted line, excluding the terminator.
pub const DEFAULT_MAX_LINE_LENGTH: usize = 8 * 1024;

/// Build the line codec used on both ends of a chat connection.
pub fn line_codec(max_line_length: usize) -> LinesCodec {
    LinesCodec::new_with_max_length(max_line_length)
}

/// Whether `text` can travel as a single line without breaking framing.
pub fn is_valid_payload(text: &str) -> bool {
    !text.contains(['\n', '\r'])
}

/// Format a relayed chat line.
pub fn chat_line(username: &str, text: &str) -> String {
    format!("{}: {}", username, text)
}

pub fn join_announcement(username: &str) -> String {
    format!("{} {} joined the chat", SYSTEM_MARKER, username)
}

pub fn leave_announcement(username: &str) -> String {
    format!("{} {} left the chat", SYSTEM_MARKER, username)
}

/// Whether a received line is a server announcement rather than a peer's chat line.
pub fn is_system_message(line: &str) -> bool {
    line.starts_with(SYSTEM_MARKER)
}

/// Reasons a discovery datagram is rejected.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AdvertParseError {
    #[error("datagram is not valid UTF-8")]
    NotUtf8,

    #[error("expected 3 fields, found {0}")]
    FieldCount(usize),

    #[error("unknown tag '{0}'")]
    UnknownTag(String),

    #[error("invalid server address '{0}'")]
    InvalidAddress(String),

    #[error("invalid port '{0}'")]
    InvalidPort(String),
}

/// A server advertisement carried by one discovery datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServerAdvert {
    pub ip: IpAddr,
    pub port: u16,
}

impl ServerAdvert {
    pub fn new(ip: IpAddr, port: u16) -> Self {
        Self { ip, port }
    }

    /// Render the datagram payload, e.g. `CHAT_SERVER|192.168.1.20|10000`.
    pub fn encode(&self) -> String {
        format!(
            "{tag}{sep}{ip}{sep}{port}",
            tag = DISCOVERY_TAG,
            sep = DISCOVERY_SEPARATOR,
            ip = self.ip,
            port = self.port
        )
    }

    /// Parse a received datagram payload.
    pub fn parse(payload: &[u8]) -> Result<Self, AdvertParseError> {
        let text = std::str::from_utf8(payload).map_err(|_| AdvertParseError::NotUtf8)?;
        let fields: Vec<&str> = text.trim().split(DISCOVERY_SEPARATOR).collect();

        let [tag, ip, port] = fields.as_slice() else {
            return Err(AdvertParseError::FieldCount(fields.len()));
        };

        if *tag != DISCOVERY_TAG {
            return Err(AdvertParseError::UnknownTag(tag.to_string()));
        }

        let ip = ip
            .parse::<IpAddr>()
            .map_err(|_| AdvertParseError::InvalidAddress(ip.to_string()))?;
        let port = port
            .parse::<u16>()
            .map_err(|_| AdvertParseError::InvalidPort(port.to_string()))?;

        Ok(Self { ip, port })
    }
}
