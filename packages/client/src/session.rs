//! Client session: one connection to a chat server.
//!
//! ## State machine
//!
//! ```text
//! Disconnected ──connect──▶ Connecting ──handshake ok──▶ Connected
//!       ▲                        │                           │
//!       └──────── failure ───────┘        disconnect / read or write failure
//!       ▲                                                    │
//!       └──────────────────── Disconnecting ◀────────────────┘
//! ```
//!
//! A session is single-use: once it has tried to connect, reconnecting
//! requires a new session.
//!
//! Closing the connection is the only way the receive loop is stopped: the
//! session's token drops the read half and the write half is shut down.

use std::{
    io,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use futures_util::{SinkExt, StreamExt};
use hiroba_shared::{
    net::is_disconnect,
    protocol::{self, SERVER_MARKER},
};
use tokio::{
    io::{AsyncWriteExt, ReadHalf, WriteHalf},
    sync::{Mutex, mpsc, watch},
    task::JoinHandle,
    time::timeout,
};
use tokio_util::{
    codec::{FramedRead, FramedWrite, LinesCodec},
    sync::CancellationToken,
};

use crate::{
    config::ClientConfig,
    connector::{BoxedStream, Connector, TcpConnector},
    error::ClientError,
    event::{SessionEvent, SessionStatus},
};

type LineReader = FramedRead<ReadHalf<BoxedStream>, LinesCodec>;
type LineWriter = FramedWrite<WriteHalf<BoxedStream>, LinesCodec>;
type EventSender = mpsc::UnboundedSender<SessionEvent>;

/// Connection state of a [`ClientSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

/// Client side of one chat connection.
///
/// All methods take `&self`, so a session can be shared (e.g. in an `Arc`)
/// between an input loop and whatever decides to disconnect.
pub struct ClientSession {
    config: ClientConfig,
    connector: Arc<dyn Connector>,
    events: EventSender,
    state: Arc<watch::Sender<SessionState>>,
    writer: Arc<Mutex<Option<LineWriter>>>,
    /// Parked here between `connect` and `start_listening`
    reader: Mutex<Option<LineReader>>,
    listener: Mutex<Option<JoinHandle<()>>>,
    closer: CancellationToken,
    used: AtomicBool,
}

impl ClientSession {
    /// Create a TCP session and the receiver its events are delivered to.
    pub fn new(config: ClientConfig) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        Self::with_connector(config, Arc::new(TcpConnector))
    }

    /// Create a session over a custom transport.
    pub fn with_connector(
        config: ClientConfig,
        connector: Arc<dyn Connector>,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(SessionState::Disconnected);
        let session = Self {
            config,
            connector,
            events,
            state: Arc::new(state),
            writer: Arc::new(Mutex::new(None)),
            reader: Mutex::new(None),
            listener: Mutex::new(None),
            closer: CancellationToken::new(),
            used: AtomicBool::new(false),
        };
        (session, receiver)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Current connection state.
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Watch state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == SessionState::Connected
    }

    /// Connect, receive the welcome line and register the username.
    ///
    /// Connecting and the handshake are bounded by
    /// [`ClientConfig::connect_timeout`]; once connected, reads block until
    /// the connection closes. Failures are reported as a
    /// [`SessionStatus::ConnectFailed`] event as well as returned.
    ///
    /// # Errors
    ///
    /// * [`ClientError::SessionClosed`] - the session was already used
    /// * [`ClientError::MissingUsername`] / [`ClientError::InvalidUsername`]
    /// * [`ClientError::ConnectTimeout`] / [`ClientError::ConnectionError`]
    /// * [`ClientError::HandshakeFailed`] - the server closed early or the
    ///   username could not be sent
    pub async fn connect(&self) -> Result<(), ClientError> {
        if self.used.swap(true, Ordering::SeqCst) {
            return Err(ClientError::SessionClosed);
        }

        let username = match validate_username(self.config.username.as_deref()) {
            Ok(username) => username,
            Err(e) => return Err(self.fail_connect(e)),
        };

        let (host, port) = (self.config.host.clone(), self.config.port);
        self.state.send_replace(SessionState::Connecting);
        self.emit_status(SessionStatus::Connecting {
            host: host.clone(),
            port,
        });

        let handshake = timeout(self.config.connect_timeout, self.handshake(&username));
        let handshake = tokio::select! {
            // `disconnect` ran while the handshake was in flight; it reports itself.
            _ = self.closer.cancelled() => return Err(ClientError::SessionClosed),
            handshake = handshake => handshake,
        };
        let (reader, writer) = match handshake {
            Ok(Ok(halves)) => halves,
            Ok(Err(e)) => return Err(self.fail_connect(e)),
            Err(_) => {
                return Err(self.fail_connect(ClientError::ConnectTimeout {
                    addr: format!("{}:{}", host, port),
                    timeout: self.config.connect_timeout,
                }));
            }
        };

        *self.reader.lock().await = Some(reader);
        *self.writer.lock().await = Some(writer);

        // Only a session still connecting may become connected.
        let connected = self.state.send_if_modified(|state| {
            if *state == SessionState::Connecting {
                *state = SessionState::Connected;
                true
            } else {
                false
            }
        });
        if !connected || self.closer.is_cancelled() {
            if connected {
                self.state.send_replace(SessionState::Disconnected);
            }
            drop(self.reader.lock().await.take());
            drop(self.writer.lock().await.take());
            return Err(ClientError::SessionClosed);
        }

        tracing::info!("Connected to {}:{} as '{}'", host, port, username);
        self.emit_status(SessionStatus::Connected {
            host,
            port,
            username,
        });
        Ok(())
    }

    async fn handshake(&self, username: &str) -> Result<(LineReader, LineWriter), ClientError> {
        let stream = self
            .connector
            .connect(&self.config.host, self.config.port)
            .await
            .map_err(ClientError::ConnectionError)?;

        let (read_half, write_half) = tokio::io::split(stream);
        let mut reader = FramedRead::new(
            read_half,
            protocol::line_codec(self.config.max_line_length),
        );
        let mut writer = FramedWrite::new(
            write_half,
            protocol::line_codec(self.config.max_line_length),
        );

        let welcome = match reader.next().await {
            Some(Ok(line)) => line,
            Some(Err(e)) => return Err(ClientError::HandshakeFailed(e.to_string())),
            None => {
                return Err(ClientError::HandshakeFailed(
                    "server closed the connection before the welcome".to_string(),
                ));
            }
        };
        emit(
            &self.events,
            SessionEvent::Message(format!("{} {}", SERVER_MARKER, welcome)),
        );

        writer.send(username).await.map_err(|e| {
            ClientError::HandshakeFailed(format!("failed to send username: {}", e))
        })?;

        Ok((reader, writer))
    }

    fn fail_connect(&self, err: ClientError) -> ClientError {
        tracing::warn!("Connection failed: {}", err);
        self.state.send_replace(SessionState::Disconnected);
        self.emit_status(SessionStatus::ConnectFailed(err.to_string()));
        err
    }

    /// Start the background receive loop.
    ///
    /// Calling it while a loop is active is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::NotConnected`] if the session never connected
    /// or its connection has already ended.
    pub async fn start_listening(&self) -> Result<(), ClientError> {
        let mut listener = self.listener.lock().await;
        if listener.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return Ok(());
        }

        let reader = self
            .reader
            .lock()
            .await
            .take()
            .ok_or(ClientError::NotConnected)?;

        *listener = Some(tokio::spawn(receive_loop(
            reader,
            self.state.clone(),
            self.writer.clone(),
            self.events.clone(),
            self.closer.clone(),
        )));
        Ok(())
    }

    /// Send one chat line.
    ///
    /// Nothing touches the socket unless the session is connected and the
    /// line is acceptable. The whole line is written and flushed before this
    /// returns `Ok`. A concurrent [`disconnect`](Self::disconnect) aborts a
    /// write the server is not draining.
    ///
    /// # Errors
    ///
    /// * [`ClientError::NotConnected`] - nothing was sent, or the session was
    ///   disconnected mid-write
    /// * [`ClientError::InvalidMessage`] - `text` contains a line break or is
    ///   longer than [`ClientConfig::max_line_length`]
    /// * [`ClientError::SendFailed`] - the write failed; the session is now
    ///   disconnected
    pub async fn send_message(&self, text: &str) -> Result<(), ClientError> {
        if !self.is_connected() {
            return Err(ClientError::NotConnected);
        }
        if !protocol::is_valid_payload(text) || text.len() > self.config.max_line_length {
            return Err(ClientError::InvalidMessage);
        }

        let mut writer = self.writer.lock().await;
        let Some(sink) = writer.as_mut() else {
            return Err(ClientError::NotConnected);
        };

        let sent = tokio::select! {
            _ = self.closer.cancelled() => return Err(ClientError::NotConnected),
            sent = sink.send(text) => sent,
        };
        let Err(e) = sent else {
            return Ok(());
        };

        writer.take();
        drop(writer);
        self.state.send_replace(SessionState::Disconnected);
        self.closer.cancel();

        let reason = e.to_string();
        tracing::warn!("Send failed: {}", reason);
        self.emit_status(SessionStatus::SendFailed(reason.clone()));
        Err(ClientError::SendFailed(reason))
    }

    /// Close the connection. Safe to call in any state, any number of times.
    ///
    /// Waits for the receive loop to stop, then reports
    /// [`SessionStatus::Disconnected`].
    pub async fn disconnect(&self) {
        self.used.store(true, Ordering::SeqCst);
        let previous = self.state.send_replace(SessionState::Disconnecting);
        self.closer.cancel();

        // Shut down without flushing: a line the server never drained is dropped.
        let writer = self.writer.lock().await.take();
        if let Some(writer) = writer
            && let Err(e) = writer.into_inner().shutdown().await
        {
            log_close_error(&e);
        }
        drop(self.reader.lock().await.take());

        let listener = self.listener.lock().await.take();
        if let Some(handle) = listener
            && let Err(e) = handle.await
        {
            tracing::warn!("Receive loop ended abnormally: {}", e);
        }

        self.state.send_replace(SessionState::Disconnected);
        if previous == SessionState::Connected {
            tracing::info!("Disconnected from {}:{}", self.config.host, self.config.port);
        }
        self.emit_status(SessionStatus::Disconnected);
    }

    fn emit_status(&self, status: SessionStatus) {
        emit(&self.events, SessionEvent::Status(status));
    }
}

impl Drop for ClientSession {
    fn drop(&mut self) {
        self.closer.cancel();
    }
}

/// Trimmed username, or why it cannot be used.
fn validate_username(username: Option<&str>) -> Result<String, ClientError> {
    let username = username.map(str::trim).unwrap_or_default();
    if username.is_empty() {
        return Err(ClientError::MissingUsername);
    }
    if !protocol::is_valid_payload(username) {
        return Err(ClientError::InvalidUsername);
    }
    Ok(username.to_string())
}

/// Deliver each received line as a message event until the connection ends.
async fn receive_loop(
    mut reader: LineReader,
    state: Arc<watch::Sender<SessionState>>,
    writer: Arc<Mutex<Option<LineWriter>>>,
    events: EventSender,
    closer: CancellationToken,
) {
    let status = loop {
        let connected = *state.borrow() == SessionState::Connected;
        if !connected {
            return;
        }

        let next = tokio::select! {
            _ = closer.cancelled() => return,
            next = reader.next() => next,
        };

        match next {
            Some(Ok(line)) => {
                if !line.is_empty() {
                    emit(&events, SessionEvent::Message(line));
                }
            }
            Some(Err(e)) => {
                tracing::warn!("Receive failed: {}", e);
                break SessionStatus::ConnectionLost(e.to_string());
            }
            None => {
                tracing::info!("Server closed the connection");
                break SessionStatus::ServerClosed;
            }
        }
    };

    // A local disconnect or failed send has already reported itself.
    let was_connected = state.send_if_modified(|current| {
        if *current == SessionState::Connected {
            *current = SessionState::Disconnected;
            true
        } else {
            false
        }
    });
    if !was_connected {
        return;
    }

    closer.cancel();
    drop(writer.lock().await.take());
    emit(&events, SessionEvent::Status(status));
}

fn emit(events: &EventSender, event: SessionEvent) {
    if events.send(event).is_err() {
        tracing::trace!("Event receiver dropped, discarding event");
    }
}

fn log_close_error(err: &io::Error) {
    if is_disconnect(err) {
        tracing::debug!("Connection already closed: {}", err);
    } else {
        tracing::warn!("Failed to close connection: {}", err);
    }
}
