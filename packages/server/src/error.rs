//! Error types for the chat server.

use thiserror::Error;

/// Server-specific errors
#[derive(Debug, Error)]
pub enum ServerError {
    /// The listening socket could not be set up
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// `run` was called while the accept loop already owns the listener,
    /// or after shutdown
    #[error("Server is already running or has been shut down")]
    NotRunnable,

    /// Other I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
