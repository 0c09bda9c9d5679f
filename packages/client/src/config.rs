//! Client configuration values.

use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    time::Duration,
};

use hiroba_shared::protocol::{DEFAULT_CHAT_PORT, DEFAULT_DISCOVERY_PORT, DEFAULT_MAX_LINE_LENGTH};

/// Configuration of a [`ClientSession`](crate::ClientSession).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server host name or address
    pub host: String,
    /// Server chat port
    pub port: u16,
    /// Name to register with; required before connecting
    pub username: Option<String>,
    /// Bound on connecting and receiving the welcome line
    pub connect_timeout: Duration,
    /// Longest accepted line, excluding the terminator
    pub max_line_length: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_CHAT_PORT,
            username: None,
            connect_timeout: Duration::from_secs(5),
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
        }
    }
}

/// Configuration of a discovery listener.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Local address to listen on
    pub bind_host: IpAddr,
    /// Port servers advertise to; 0 picks an ephemeral port
    pub port: u16,
    /// Length of the listen window
    pub timeout: Duration,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            bind_host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_DISCOVERY_PORT,
            timeout: Duration::from_secs(3),
        }
    }
}

impl DiscoveryConfig {
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_host, self.port)
    }
}
