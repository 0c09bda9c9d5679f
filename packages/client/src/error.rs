//! Error types for the chat client.

use std::time::Duration;

use thiserror::Error;

/// Client-specific errors
#[derive(Debug, Error)]
pub enum ClientError {
    /// No usable username was supplied
    #[error("Username must be provided")]
    MissingUsername,

    /// The username would break line framing
    #[error("Username must be a single line")]
    InvalidUsername,

    /// Connecting or receiving the welcome line took too long
    #[error("Timed out after {timeout:?} connecting to {addr}")]
    ConnectTimeout { addr: String, timeout: Duration },

    /// Connection refused, host unreachable, name resolution failed, ...
    #[error("Connection error: {0}")]
    ConnectionError(#[source] std::io::Error),

    /// The server broke the handshake
    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),

    /// The operation needs a connected session
    #[error("Not connected")]
    NotConnected,

    /// `connect` was called on a session that already connected once
    #[error("Session already used; create a new session to reconnect")]
    SessionClosed,

    /// The message would break line framing
    #[error("Message must be a single line")]
    InvalidMessage,

    /// Writing to the server failed; the session is now disconnected
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// The discovery socket could not be set up
    #[error("Discovery error: {0}")]
    DiscoveryError(#[source] std::io::Error),
}
