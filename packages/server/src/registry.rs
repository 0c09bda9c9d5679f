//! Participant registry.
//!
//! The authoritative map of live connections to usernames. Join, leave and
//! broadcast share one lock, which is only held for a map mutation or a
//! snapshot. Delivery goes through each participant's outbound channel, so
//! the lock is never held across network I/O; the connection's own handler
//! performs the socket write.

use std::{collections::HashMap, fmt, sync::Arc};

use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Outbound channel feeding one connection's handler
pub type Outbox = mpsc::UnboundedSender<String>;

/// Opaque identity of one accepted connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A registered, named connection.
#[derive(Debug, Clone)]
pub struct Participant {
    pub username: String,
    outbox: Outbox,
    closer: CancellationToken,
}

impl Participant {
    /// # Arguments
    ///
    /// * `username` - Name announced to the other participants
    /// * `outbox` - Channel drained by the connection's handler
    /// * `closer` - Cancelling it makes the handler close the connection
    pub fn new(username: String, outbox: Outbox, closer: CancellationToken) -> Self {
        Self {
            username,
            outbox,
            closer,
        }
    }
}

/// Shared connection → participant map.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    participants: Arc<Mutex<HashMap<ConnectionId, Participant>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection that completed the username handshake.
    ///
    /// Usernames are not checked for uniqueness.
    pub async fn join(&self, id: ConnectionId, participant: Participant) {
        let mut participants = self.participants.lock().await;
        tracing::debug!("Registering '{}' as {}", participant.username, id);
        participants.insert(id, participant);
    }

    /// Remove a connection, returning its username if it was registered.
    pub async fn leave(&self, id: ConnectionId) -> Option<String> {
        let mut participants = self.participants.lock().await;
        participants.remove(&id).map(|p| p.username)
    }

    /// Relay `message` to every participant except `exclude`.
    ///
    /// Delivery failures are isolated per recipient and never reach the
    /// caller; the failing recipient is cleaned up by its own handler.
    ///
    /// # Returns
    ///
    /// The number of participants the message was handed to
    pub async fn broadcast(&self, message: &str, exclude: Option<ConnectionId>) -> usize {
        let targets: Vec<(ConnectionId, String, Outbox)> = {
            let participants = self.participants.lock().await;
            participants
                .iter()
                .filter(|(id, _)| Some(**id) != exclude)
                .map(|(id, p)| (*id, p.username.clone(), p.outbox.clone()))
                .collect()
        };

        let mut delivered = 0;
        for (id, username, outbox) in targets {
            if outbox.send(message.to_string()).is_err() {
                tracing::warn!(
                    "Failed to hand message to '{}' ({}), connection is closing",
                    username,
                    id
                );
            } else {
                delivered += 1;
            }
        }
        delivered
    }

    /// Number of registered participants.
    pub async fn len(&self) -> usize {
        self.participants.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.participants.lock().await.is_empty()
    }

    /// Registered usernames, sorted for stable output.
    pub async fn usernames(&self) -> Vec<String> {
        let participants = self.participants.lock().await;
        let mut usernames: Vec<String> = participants
            .values()
            .map(|p| p.username.clone())
            .collect();
        usernames.sort();
        usernames
    }

    /// Close every registered connection and empty the registry.
    ///
    /// # Returns
    ///
    /// The number of connections that were closed
    pub async fn close_all(&self) -> usize {
        let mut participants = self.participants.lock().await;
        let closed = participants.len();
        for (id, participant) in participants.drain() {
            tracing::debug!("Closing connection of '{}' ({})", participant.username, id);
            participant.closer.cancel();
        }
        closed
    }
}
