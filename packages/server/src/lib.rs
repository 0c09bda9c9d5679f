//! Hiroba chat server.
//!
//! Accepts TCP connections, registers each as a named participant and relays
//! every participant's lines to all the others. Optionally advertises itself
//! over UDP so clients can find it without configuration.

pub mod beacon;
pub mod config;
pub mod error;
pub mod handler;
pub mod registry;
pub mod server;
pub mod signal;

pub use config::{AdvertiseConfig, ServerConfig};
pub use error::ServerError;
pub use registry::{ConnectionId, Participant, Registry};
pub use server::ChatServer;
