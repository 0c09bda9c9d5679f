//! Network helpers shared by the server and client.

use std::{
    io,
    net::{IpAddr, Ipv4Addr},
};

use tokio::net::UdpSocket;

/// Whether an I/O error only says the peer is already gone.
///
/// Cleanup paths (closing a socket, writing to a departed participant) expect
/// these and log them quietly; anything else is worth a warning.
pub fn is_disconnect(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::UnexpectedEof
    )
}

/// Best-effort detection of the address other hosts reach this machine on.
///
/// Connecting a UDP socket sends nothing; it only makes the OS pick the
/// outbound interface. Falls back to loopback when there is no route.
pub async fn local_ip() -> IpAddr {
    match outbound_ip().await {
        Ok(ip) => ip,
        Err(e) => {
            tracing::debug!("Could not detect local address, using loopback: {}", e);
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        }
    }
}

async fn outbound_ip() -> io::Result<IpAddr> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
    socket.connect((Ipv4Addr::new(8, 8, 8, 8), 80)).await?;
    Ok(socket.local_addr()?.ip())
}
