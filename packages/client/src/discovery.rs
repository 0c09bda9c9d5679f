//! Discovery of chat servers advertising themselves over UDP.

use std::{
    collections::BTreeMap,
    io,
    net::{IpAddr, SocketAddr},
};

use hiroba_shared::protocol::ServerAdvert;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::{
    net::UdpSocket,
    time::{Instant, timeout_at},
};

use crate::{config::DiscoveryConfig, error::ClientError};

/// Largest datagram we read; adverts are far smaller
const DATAGRAM_BUFFER_SIZE: usize = 1024;

/// Servers found during one listen window: advertised IP to chat port
pub type DiscoveredServers = BTreeMap<IpAddr, u16>;

/// A bound discovery socket.
pub struct DiscoveryListener {
    socket: UdpSocket,
    config: DiscoveryConfig,
}

impl DiscoveryListener {
    /// Bind the discovery socket.
    ///
    /// The port is shared: several clients on one host can listen for
    /// adverts at the same time.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::DiscoveryError`] if the address cannot be bound.
    pub async fn bind(config: &DiscoveryConfig) -> Result<Self, ClientError> {
        let socket = bind_shared_socket(config.bind_addr())
            .and_then(UdpSocket::from_std)
            .map_err(ClientError::DiscoveryError)?;

        Ok(Self {
            socket,
            config: config.clone(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ClientError> {
        self.socket.local_addr().map_err(ClientError::DiscoveryError)
    }

    /// Listen for adverts until the configured timeout elapses.
    ///
    /// A server advertising several times is reported once with the most
    /// recent port. Malformed datagrams are skipped.
    pub async fn collect(&self) -> DiscoveredServers {
        let deadline = Instant::now() + self.config.timeout;
        let mut servers = DiscoveredServers::new();
        let mut buf = [0u8; DATAGRAM_BUFFER_SIZE];

        loop {
            let received = match timeout_at(deadline, self.socket.recv_from(&mut buf)).await {
                Ok(received) => received,
                Err(_) => break,
            };

            match received {
                Ok((len, src)) => match ServerAdvert::parse(&buf[..len]) {
                    Ok(advert) => {
                        tracing::debug!("Discovered server {}:{} (from {})", advert.ip, advert.port, src);
                        servers.insert(advert.ip, advert.port);
                    }
                    Err(e) => {
                        tracing::debug!("Ignoring datagram from {}: {}", src, e);
                    }
                },
                Err(e) => {
                    tracing::warn!("Failed to receive discovery datagram: {}", e);
                }
            }
        }

        tracing::info!("Discovery finished, found {} server(s)", servers.len());
        servers
    }
}

/// UDP socket with address reuse and broadcast reception enabled
fn bind_shared_socket(addr: SocketAddr) -> io::Result<std::net::UdpSocket> {
    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    #[cfg(all(unix, not(any(target_os = "solaris", target_os = "illumos"))))]
    socket.set_reuse_port(true)?;
    socket.set_broadcast(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    Ok(socket.into())
}

/// Bind a listener and wait out one window.
///
/// # Errors
///
/// Returns [`ClientError::DiscoveryError`] if the socket cannot be bound.
/// Hearing nothing is not an error.
pub async fn discover_servers(config: &DiscoveryConfig) -> Result<DiscoveredServers, ClientError> {
    let listener = DiscoveryListener::bind(config).await?;
    tracing::info!("Listening for chat servers on {}", listener.local_addr()?);
    Ok(listener.collect().await)
}
