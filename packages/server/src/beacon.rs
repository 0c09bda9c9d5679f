//! UDP discovery beacon.
//!
//! Periodically sends a `CHAT_SERVER|<ip>|<port>` datagram so that clients
//! listening on the discovery port can find this server.

use std::net::{IpAddr, Ipv4Addr};

use hiroba_shared::{net::local_ip, protocol::ServerAdvert};
use tokio::{net::UdpSocket, time};
use tokio_util::sync::CancellationToken;

use crate::config::AdvertiseConfig;

/// Advertise `chat_port` until `shutdown` is cancelled.
///
/// Bind failures end the beacon with a log line; the chat server keeps
/// running without it. Individual send failures are logged and retried on
/// the next tick.
pub async fn run_beacon(config: AdvertiseConfig, chat_port: u16, shutdown: CancellationToken) {
    let socket = match bind_broadcast_socket().await {
        Ok(socket) => socket,
        Err(e) => {
            tracing::error!("Failed to set up discovery beacon: {}", e);
            return;
        }
    };

    let ip = match config.advertise_ip {
        Some(ip) => ip,
        None => local_ip().await,
    };
    let payload = ServerAdvert::new(ip, chat_port).encode();
    let target = config.target_addr();
    tracing::info!("Advertising '{}' to {} every {:?}", payload, target, config.interval);

    let mut tick = time::interval(config.interval);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                tracing::debug!("Discovery beacon stopped");
                return;
            }
            _ = tick.tick() => {
                if let Err(e) = socket.send_to(payload.as_bytes(), target).await {
                    tracing::warn!("Failed to send discovery datagram to {}: {}", target, e);
                }
            }
        }
    }
}

async fn bind_broadcast_socket() -> std::io::Result<UdpSocket> {
    let socket = UdpSocket::bind((IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0)).await?;
    socket.set_broadcast(true)?;
    Ok(socket)
}
