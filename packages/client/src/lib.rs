//! Hiroba chat client.
//!
//! [`ClientSession`] owns one TCP connection to a chat server and reports
//! everything it sees as [`SessionEvent`]s on a channel, so any presentation
//! loop (CLI, GUI) can consume them from its own thread.
//! [`discovery`] finds servers advertising themselves on the local network.

pub mod config;
pub mod connector;
pub mod discovery;
pub mod error;
pub mod event;
pub mod formatter;
pub mod session;

pub use config::{ClientConfig, DiscoveryConfig};
pub use connector::{Connector, TcpConnector};
pub use discovery::{DiscoveredServers, DiscoveryListener, discover_servers};
pub use error::ClientError;
pub use event::{SessionEvent, SessionStatus};
pub use session::{ClientSession, SessionState};
