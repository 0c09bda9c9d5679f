//! Events a session reports to the presentation layer.

use std::fmt;

/// Everything a [`ClientSession`](crate::ClientSession) reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A chat line, a system announcement, or the prefixed welcome text
    Message(String),
    /// A connection lifecycle transition
    Status(SessionStatus),
}

/// Connection lifecycle transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStatus {
    Connecting {
        host: String,
        port: u16,
    },
    Connected {
        host: String,
        port: u16,
        username: String,
    },
    ConnectFailed(String),
    SendFailed(String),
    /// The server closed the connection
    ServerClosed,
    /// Reading from the server failed
    ConnectionLost(String),
    /// The local side disconnected
    Disconnected,
}

impl SessionStatus {
    /// Whether this status ends the session.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::ConnectFailed(_)
                | Self::SendFailed(_)
                | Self::ServerClosed
                | Self::ConnectionLost(_)
                | Self::Disconnected
        )
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connecting { host, port } => write!(f, "Connecting to {}:{}", host, port),
            Self::Connected {
                host,
                port,
                username,
            } => write!(f, "Connected to {}:{} as {}", host, port, username),
            Self::ConnectFailed(reason) => write!(f, "Connection failed: {}", reason),
            Self::SendFailed(reason) => write!(f, "Send failed: {}", reason),
            Self::ServerClosed => write!(f, "Disconnected from server"),
            Self::ConnectionLost(reason) => {
                write!(f, "Disconnected from server: {}", reason)
            }
            Self::Disconnected => write!(f, "Client disconnected"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_display_distinguishes_local_and_remote_disconnect() {
        // テスト項目: 自分からの切断とサーバー側の切断が表示上区別できる
        // given (前提条件):
        let local = SessionStatus::Disconnected;
        let remote = SessionStatus::ServerClosed;

        // when (操作):
        let local_text = local.to_string();
        let remote_text = remote.to_string();

        // then (期待する結果):
        assert_eq!(local_text, "Client disconnected");
        assert_eq!(remote_text, "Disconnected from server");
        assert_ne!(local_text, remote_text);
    }

    #[test]
    fn test_connected_status_names_the_user() {
        // テスト項目: 接続完了の表示にユーザー名が含まれる
        // given (前提条件):
        let status = SessionStatus::Connected {
            host: "localhost".to_string(),
            port: 10000,
            username: "alice".to_string(),
        };

        // when (操作):
        let text = status.to_string();

        // then (期待する結果):
        assert_eq!(text, "Connected to localhost:10000 as alice");
        assert!(!status.is_terminal());
    }

    #[test]
    fn test_failure_statuses_are_terminal() {
        // テスト項目: 失敗や切断を表すステータスは終端として扱われる
        // given (前提条件):
        let statuses = [
            SessionStatus::ConnectFailed("refused".to_string()),
            SessionStatus::SendFailed("broken pipe".to_string()),
            SessionStatus::ServerClosed,
            SessionStatus::ConnectionLost("reset".to_string()),
            SessionStatus::Disconnected,
        ];

        // when (操作) / then (期待する結果):
        assert!(statuses.iter().all(SessionStatus::is_terminal));
        assert!(
            !SessionStatus::Connecting {
                host: "h".to_string(),
                port: 1
            }
            .is_terminal()
        );
    }
}
