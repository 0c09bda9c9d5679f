//! Server configuration values.

use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    time::Duration,
};

use hiroba_shared::protocol::{DEFAULT_CHAT_PORT, DEFAULT_DISCOVERY_PORT, DEFAULT_MAX_LINE_LENGTH};

/// Configuration of a [`ChatServer`](crate::ChatServer).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host address to bind to (e.g. "0.0.0.0")
    pub host: String,
    /// Port to bind to; 0 lets the OS choose
    pub port: u16,
    /// Longest accepted line, excluding the terminator
    pub max_line_length: usize,
    /// Cap on concurrently registered participants; `None` means unbounded
    pub max_connections: Option<usize>,
    /// UDP advertisement settings; `None` disables the beacon
    pub discovery: Option<AdvertiseConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_CHAT_PORT,
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
            max_connections: None,
            discovery: None,
        }
    }
}

impl ServerConfig {
    /// `host:port` string handed to the resolver when binding.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Settings of the UDP discovery beacon.
#[derive(Debug, Clone)]
pub struct AdvertiseConfig {
    /// Port discovering clients listen on
    pub discovery_port: u16,
    /// Destination of the datagrams, usually the broadcast address
    pub target: IpAddr,
    /// Address put in the datagram; detected when `None`
    pub advertise_ip: Option<IpAddr>,
    /// Time between two datagrams
    pub interval: Duration,
}

impl Default for AdvertiseConfig {
    fn default() -> Self {
        Self {
            discovery_port: DEFAULT_DISCOVERY_PORT,
            target: IpAddr::V4(Ipv4Addr::BROADCAST),
            advertise_ip: None,
            interval: Duration::from_secs(2),
        }
    }
}

impl AdvertiseConfig {
    pub fn target_addr(&self) -> SocketAddr {
        SocketAddr::new(self.target, self.discovery_port)
    }
}
