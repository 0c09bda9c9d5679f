//! Hiroba chat server.
//!
//! Relays each participant's lines to all other connected participants and,
//! optionally, advertises itself over UDP broadcast for discovery.
//!
//! Run with:
//! ```not_rust
//! cargo run --bin hiroba-server
//! cargo run --bin hiroba-server -- --host 0.0.0.0 --port 10000 --advertise
//! ```

use std::{net::IpAddr, sync::Arc, time::Duration};

use clap::Parser;

use hiroba_server::{AdvertiseConfig, ChatServer, ServerConfig, signal::shutdown_signal};
use hiroba_shared::{
    logger::setup_logger,
    protocol::{DEFAULT_CHAT_PORT, DEFAULT_DISCOVERY_PORT, DEFAULT_MAX_LINE_LENGTH},
};

#[derive(Parser, Debug)]
#[command(name = "hiroba-server")]
#[command(about = "TCP chat server with broadcast relay and UDP discovery", long_about = None)]
struct Args {
    /// Host address to bind the server to
    #[arg(short = 'H', long, default_value = "0.0.0.0")]
    host: String,

    /// Port number to bind the server to
    #[arg(short = 'p', long, default_value_t = DEFAULT_CHAT_PORT)]
    port: u16,

    /// Maximum number of registered participants (unbounded when omitted)
    #[arg(long)]
    max_connections: Option<usize>,

    /// Longest accepted line in bytes
    #[arg(long, default_value_t = DEFAULT_MAX_LINE_LENGTH)]
    max_line_length: usize,

    /// Advertise this server on the discovery port
    #[arg(long)]
    advertise: bool,

    /// UDP port discovering clients listen on
    #[arg(long, default_value_t = DEFAULT_DISCOVERY_PORT)]
    discovery_port: u16,

    /// Address to put in discovery datagrams (detected when omitted)
    #[arg(long)]
    advertise_ip: Option<IpAddr>,

    /// Seconds between two discovery datagrams
    #[arg(long, default_value_t = 2)]
    advertise_interval: u64,
}

impl Args {
    fn into_config(self) -> ServerConfig {
        let discovery = self.advertise.then(|| AdvertiseConfig {
            discovery_port: self.discovery_port,
            advertise_ip: self.advertise_ip,
            interval: Duration::from_secs(self.advertise_interval.max(1)),
            ..AdvertiseConfig::default()
        });

        ServerConfig {
            host: self.host,
            port: self.port,
            max_line_length: self.max_line_length,
            max_connections: self.max_connections,
            discovery,
        }
    }
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    setup_logger(env!("CARGO_BIN_NAME"), "info");

    let config = Args::parse().into_config();

    let server = match ChatServer::bind(config).await {
        Ok(server) => Arc::new(server),
        Err(e) => {
            tracing::error!("Server error: {}", e);
            std::process::exit(1);
        }
    };
    tracing::info!("Press Ctrl+C to shutdown gracefully");

    let runner = tokio::spawn({
        let server = server.clone();
        async move { server.run().await }
    });

    shutdown_signal().await;
    server.shutdown().await;

    match runner.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            tracing::error!("Server error: {}", e);
            std::process::exit(1);
        }
        Err(e) => {
            tracing::error!("Accept loop panicked: {}", e);
            std::process::exit(1);
        }
    }
}
