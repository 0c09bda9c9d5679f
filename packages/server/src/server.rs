//! Server lifecycle: bind, accept loop and coordinated shutdown.

use std::{
    io,
    net::SocketAddr,
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

use futures_util::SinkExt;
use hiroba_shared::protocol::{self, SERVER_FULL_MESSAGE};
use tokio::{
    net::{TcpListener, TcpSocket, TcpStream},
    sync::Mutex,
};
use tokio_util::{codec::Framed, sync::CancellationToken, task::TaskTracker};

use crate::{
    beacon::run_beacon, config::ServerConfig, error::ServerError, handler::handle_connection,
    registry::Registry,
};

const LISTEN_BACKLOG: u32 = 1024;

/// Pause after a failed `accept`, so resource exhaustion does not spin the loop
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// TCP chat server
///
/// # Example
///
/// ```no_run
/// # async fn example() -> Result<(), hiroba_server::ServerError> {
/// use std::sync::Arc;
/// use hiroba_server::{ChatServer, ServerConfig};
///
/// let server = Arc::new(ChatServer::bind(ServerConfig::default()).await?);
/// let runner = tokio::spawn({
///     let server = server.clone();
///     async move { server.run().await }
/// });
///
/// // ... later
/// server.shutdown().await;
/// # let _ = runner.await;
/// # Ok(())
/// # }
/// ```
pub struct ChatServer {
    config: ServerConfig,
    local_addr: SocketAddr,
    /// Taken by the accept loop; whoever holds it owns the listening socket
    listener: Mutex<Option<TcpListener>>,
    registry: Registry,
    /// Root token; every connection and the beacon hold a child of it
    shutdown: CancellationToken,
    tasks: TaskTracker,
    running: AtomicBool,
}

impl ChatServer {
    /// Bind the listening socket (with address reuse) on the configured address.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if the address cannot be resolved or bound.
    pub async fn bind(config: ServerConfig) -> Result<Self, ServerError> {
        let addr = config.bind_addr();
        let listener = bind_listener(&addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local_addr = listener.local_addr()?;

        Ok(Self {
            config,
            local_addr,
            listener: Mutex::new(Some(listener)),
            registry: Registry::new(),
            shutdown: CancellationToken::new(),
            tasks: TaskTracker::new(),
            running: AtomicBool::new(true),
        })
    }

    /// Address the server actually listens on.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Accept connections until [`shutdown`](Self::shutdown) is called.
    ///
    /// Each connection is served by its own task. Also starts the discovery
    /// beacon when configured.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::NotRunnable`] if the accept loop is already
    /// running or the server has been shut down.
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = self
            .listener
            .lock()
            .await
            .take()
            .ok_or(ServerError::NotRunnable)?;

        if let Some(advertise) = &self.config.discovery {
            self.tasks.spawn(run_beacon(
                advertise.clone(),
                self.local_addr.port(),
                self.shutdown.child_token(),
            ));
        }

        tracing::info!("Chat server listening on {}", self.local_addr);
        self.tasks.track_future(self.accept_loop(listener)).await;
        Ok(())
    }

    async fn accept_loop(&self, listener: TcpListener) {
        loop {
            let (stream, peer) = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok(connection) => connection,
                    Err(e) => {
                        tracing::warn!("Failed to accept connection: {}", e);
                        tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                        continue;
                    }
                },
            };
            tracing::info!("New connection from {}", peer);

            if self.at_capacity().await {
                tracing::warn!("Rejecting {}: connection limit reached", peer);
                self.tasks
                    .spawn(reject(stream, peer, self.config.max_line_length));
                continue;
            }

            self.tasks.spawn(handle_connection(
                stream,
                peer,
                self.registry.clone(),
                self.shutdown.child_token(),
                self.config.max_line_length,
            ));
        }

        drop(listener);
        tracing::info!("Stopped accepting connections on {}", self.local_addr);
    }

    async fn at_capacity(&self) -> bool {
        match self.config.max_connections {
            Some(max) => self.registry.len().await >= max,
            None => false,
        }
    }

    /// Close every registered connection and the listening socket.
    ///
    /// Waits until the accept loop and all connection tasks have finished.
    /// Calling it again is a no-op.
    pub async fn shutdown(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            tracing::debug!("Shutdown already requested");
            return;
        }

        let closed = self.registry.close_all().await;
        self.shutdown.cancel();
        // Only present when `run` was never called.
        drop(self.listener.lock().await.take());

        self.tasks.close();
        self.tasks.wait().await;
        tracing::info!("Server shutdown complete, closed {} connection(s)", closed);
    }
}

async fn bind_listener(addr: &str) -> io::Result<TcpListener> {
    let addr = tokio::net::lookup_host(addr).await?.next().ok_or_else(|| {
        io::Error::new(io::ErrorKind::AddrNotAvailable, "address did not resolve")
    })?;

    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;
    socket.listen(LISTEN_BACKLOG)
}

/// Tell a connection over the admission cap that the server is full, then close it.
async fn reject(stream: TcpStream, peer: SocketAddr, max_line_length: usize) {
    let mut framed = Framed::new(stream, protocol::line_codec(max_line_length));
    if let Err(e) = framed.send(SERVER_FULL_MESSAGE).await {
        tracing::debug!("Failed to notify {} of rejection: {}", peer, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bind_reports_os_assigned_port() {
        // テスト項目: ポート 0 で起動すると OS が割り当てたポートが取得できる
        // given (前提条件):
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            ..ServerConfig::default()
        };

        // when (操作):
        let server = ChatServer::bind(config).await.unwrap();

        // then (期待する結果):
        assert_ne!(server.local_addr().port(), 0);
        assert!(server.is_running());
    }

    #[tokio::test]
    async fn test_bind_fails_for_unresolvable_host() {
        // テスト項目: 解決できないホストへのバインドは Bind エラーになる
        // given (前提条件):
        let config = ServerConfig {
            host: "256.256.256.256".to_string(),
            port: 0,
            ..ServerConfig::default()
        };

        // when (操作):
        let result = ChatServer::bind(config).await;

        // then (期待する結果):
        assert!(matches!(result, Err(ServerError::Bind { .. })));
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent_and_prevents_run() {
        // テスト項目: shutdown を 2 回呼んでも問題なく、その後 run はできない
        // given (前提条件):
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            ..ServerConfig::default()
        };
        let server = ChatServer::bind(config).await.unwrap();

        // when (操作):
        server.shutdown().await;
        server.shutdown().await;
        let result = server.run().await;

        // then (期待する結果):
        assert!(!server.is_running());
        assert!(matches!(result, Err(ServerError::NotRunnable)));
    }
}
