//! Shared building blocks for the Hiroba chat server and client.
//!
//! Holds the wire protocol (line framing, announcement formats, discovery
//! datagrams) together with logging, time and network helpers used by both
//! sides.

pub mod logger;
pub mod net;
pub mod protocol;
pub mod time;
