//! Message formatting utilities for client display.

use hiroba_shared::{protocol::is_system_message, time::format_time_of_day};

use crate::{
    discovery::DiscoveredServers,
    event::{SessionEvent, SessionStatus},
};

/// Message formatter for client display
pub struct MessageFormatter;

impl MessageFormatter {
    /// Format a received line with the local time it was displayed at
    ///
    /// Server announcements are set apart with a leading `*`.
    ///
    /// # Arguments
    ///
    /// * `text` - The line as received (chat line or system announcement)
    /// * `received_at` - Unix timestamp when the line arrived (milliseconds)
    pub fn format_message(text: &str, received_at: i64) -> String {
        let time = format_time_of_day(received_at);
        if is_system_message(text) {
            format!("[{}] * {}", time, text)
        } else {
            format!("[{}] {}", time, text)
        }
    }

    /// Format a connection status change
    pub fn format_status(status: &SessionStatus) -> String {
        format!("[STATUS] {}", status)
    }

    /// Format any session event
    pub fn format_event(event: &SessionEvent, received_at: i64) -> String {
        match event {
            SessionEvent::Message(text) => Self::format_message(text, received_at),
            SessionEvent::Status(status) => Self::format_status(status),
        }
    }

    /// Format the result of a discovery run
    pub fn format_server_list(servers: &DiscoveredServers) -> String {
        let mut output = String::from("Discovered servers:\n");
        if servers.is_empty() {
            output.push_str("(No servers found)\n");
        }
        for (ip, port) in servers {
            output.push_str(&format!("  {}:{}\n", ip, port));
        }
        output
    }
}
