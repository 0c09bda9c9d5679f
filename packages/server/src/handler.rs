//! Per-connection chat handler.
//!
//! Drives one connection through `Accepted → AwaitingUsername → Registered →
//! Closed`: welcome, username handshake, message loop, then a single cleanup
//! that leaves the registry, announces the departure and closes the stream.

use std::net::SocketAddr;

use futures_util::{SinkExt, StreamExt};
use hiroba_shared::{
    net::is_disconnect,
    protocol::{self, WELCOME_MESSAGE},
};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::mpsc,
};
use tokio_util::{
    codec::{Framed, LinesCodec, LinesCodecError},
    sync::CancellationToken,
};

use crate::registry::{ConnectionId, Participant, Registry};

type ChatFramed<S> = Framed<S, LinesCodec>;

/// Why a registered connection's message loop ended
#[derive(Debug, PartialEq, Eq)]
enum LoopExit {
    PeerClosed,
    ReadFailed,
    WriteFailed,
    Closed,
}

/// Serve one accepted connection until it closes.
///
/// # Arguments
///
/// * `stream` - The accepted byte stream
/// * `peer` - Remote address, used for logging
/// * `registry` - Shared participant registry
/// * `closer` - Cancelling it closes the connection from the server side
/// * `max_line_length` - Longest accepted line
pub async fn handle_connection<S>(
    stream: S,
    peer: SocketAddr,
    registry: Registry,
    closer: CancellationToken,
    max_line_length: usize,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut framed = Framed::new(stream, protocol::line_codec(max_line_length));

    if let Err(e) = framed.send(WELCOME_MESSAGE).await {
        log_codec_error(peer, "send welcome", &e);
        return;
    }

    let Some(username) = await_username(&mut framed, peer, &closer).await else {
        tracing::debug!("Abandoning connection from {} without a username", peer);
        return;
    };

    let id = ConnectionId::generate();
    let (outbox, mut inbox) = mpsc::unbounded_channel();
    registry
        .join(id, Participant::new(username.clone(), outbox, closer.clone()))
        .await;
    tracing::info!("User '{}' joined from {}", username, peer);

    registry
        .broadcast(&protocol::join_announcement(&username), Some(id))
        .await;

    let exit = message_loop(&mut framed, &mut inbox, id, &username, &registry, &closer).await;
    tracing::debug!("Connection of '{}' ended: {:?}", username, exit);

    // Absent when shutdown already evicted the participant.
    if let Some(username) = registry.leave(id).await {
        tracing::info!("User '{}' left", username);
        registry
            .broadcast(&protocol::leave_announcement(&username), None)
            .await;
    }

    close(framed, peer).await;
}

/// Read the username line, or `None` if the connection should be abandoned.
async fn await_username<S>(
    framed: &mut ChatFramed<S>,
    peer: SocketAddr,
    closer: &CancellationToken,
) -> Option<String>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let line = tokio::select! {
        _ = closer.cancelled() => return None,
        line = framed.next() => line,
    };

    match line {
        Some(Ok(line)) => {
            let username = line.trim();
            (!username.is_empty()).then(|| username.to_string())
        }
        Some(Err(e)) => {
            log_codec_error(peer, "read username", &e);
            None
        }
        None => None,
    }
}

async fn message_loop<S>(
    framed: &mut ChatFramed<S>,
    inbox: &mut mpsc::UnboundedReceiver<String>,
    id: ConnectionId,
    username: &str,
    registry: &Registry,
    closer: &CancellationToken,
) -> LoopExit
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        tokio::select! {
            _ = closer.cancelled() => return LoopExit::Closed,
            outbound = inbox.recv() => {
                let Some(line) = outbound else {
                    return LoopExit::Closed;
                };
                let sent = tokio::select! {
                    _ = closer.cancelled() => return LoopExit::Closed,
                    sent = framed.send(line) => sent,
                };
                if let Err(e) = sent {
                    tracing::debug!("Write to '{}' failed: {}", username, e);
                    return LoopExit::WriteFailed;
                }
            }
            inbound = framed.next() => match inbound {
                Some(Ok(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    tracing::debug!("[{}] {}", username, line);
                    registry
                        .broadcast(&protocol::chat_line(username, &line), Some(id))
                        .await;
                }
                Some(Err(e)) => {
                    tracing::debug!("Read from '{}' failed: {}", username, e);
                    return LoopExit::ReadFailed;
                }
                None => return LoopExit::PeerClosed,
            },
        }
    }
}

/// Flush and shut down the write side; the stream is dropped afterwards.
async fn close<S>(mut framed: ChatFramed<S>, peer: SocketAddr)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    if let Err(e) = SinkExt::<String>::close(&mut framed).await {
        log_codec_error(peer, "close", &e);
    }
}

fn log_codec_error(peer: SocketAddr, action: &str, err: &LinesCodecError) {
    match err {
        LinesCodecError::Io(e) if is_disconnect(e) => {
            tracing::debug!("Failed to {} for {}: {}", action, peer, e);
        }
        _ => tracing::warn!("Failed to {} for {}: {}", action, peer, err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hiroba_shared::protocol::DEFAULT_MAX_LINE_LENGTH;
    use std::time::Duration;
    use tokio::{
        io::{DuplexStream, duplex},
        task::JoinHandle,
        time::timeout,
    };

    // ========================================
    // テスト作業記録
    // ========================================
    // 【何をテストするか】
    // - handle_connection のハンドシェイク、メッセージ中継、後片付け
    //
    // 【なぜこのテストが必要か】
    // - ユーザー名を送らない接続が Registry に残らないことを保証する
    // - 後片付けがどの終了経路でも一度だけ行われることを保証する
    //
    // 【どのようなシナリオをテストするか】
    // 1. 空のユーザー名で接続が破棄される
    // 2. ユーザー名送信で登録され、メッセージが他の参加者に中継される
    // 3. ピアの切断で登録解除と退出通知が行われる
    // 4. サーバー側からのキャンセルで接続が閉じられる
    // 5. 最大行長を超える行で接続が終了する
    // ========================================

    const WAIT: Duration = Duration::from_secs(2);

    fn peer() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    fn spawn_handler(
        registry: &Registry,
        closer: &CancellationToken,
    ) -> (Framed<DuplexStream, LinesCodec>, JoinHandle<()>) {
        spawn_handler_with_limit(registry, closer, DEFAULT_MAX_LINE_LENGTH)
    }

    fn spawn_handler_with_limit(
        registry: &Registry,
        closer: &CancellationToken,
        max_line_length: usize,
    ) -> (Framed<DuplexStream, LinesCodec>, JoinHandle<()>) {
        let (client_io, server_io) = duplex(4096);
        let handle = tokio::spawn(handle_connection(
            server_io,
            peer(),
            registry.clone(),
            closer.clone(),
            max_line_length,
        ));
        (Framed::new(client_io, LinesCodec::new()), handle)
    }

    async fn next_line(client: &mut Framed<DuplexStream, LinesCodec>) -> Option<String> {
        timeout(WAIT, client.next())
            .await
            .expect("timed out waiting for a line")
            .map(|line| line.expect("codec error"))
    }

    async fn wait_for_len(registry: &Registry, expected: usize) {
        timeout(WAIT, async {
            while registry.len().await != expected {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("registry never reached the expected size");
    }

    #[tokio::test]
    async fn test_empty_username_abandons_connection() {
        // テスト項目: 空のユーザー名では登録されずに接続が閉じられる
        // given (前提条件):
        let registry = Registry::new();
        let closer = CancellationToken::new();
        let (mut client, handle) = spawn_handler(&registry, &closer);
        assert_eq!(next_line(&mut client).await.as_deref(), Some(WELCOME_MESSAGE));

        // when (操作):
        client.send("   ").await.unwrap();

        // then (期待する結果):
        timeout(WAIT, handle).await.unwrap().unwrap();
        assert!(registry.is_empty().await);
        assert_eq!(next_line(&mut client).await, None);
    }

    #[tokio::test]
    async fn test_registered_connection_relays_to_others() {
        // テスト項目: 登録済み接続のメッセージが送信者名付きで他の参加者へ中継される
        // given (前提条件):
        let registry = Registry::new();
        let (bob_tx, mut bob_rx) = mpsc::unbounded_channel();
        registry
            .join(
                ConnectionId::generate(),
                Participant::new("bob".to_string(), bob_tx, CancellationToken::new()),
            )
            .await;
        let closer = CancellationToken::new();
        let (mut alice, _handle) = spawn_handler(&registry, &closer);
        next_line(&mut alice).await;

        // when (操作):
        alice.send("alice").await.unwrap();
        wait_for_len(&registry, 2).await;
        alice.send("hi").await.unwrap();

        // then (期待する結果):
        assert_eq!(
            bob_rx.recv().await.as_deref(),
            Some("[SYSTEM] alice joined the chat")
        );
        assert_eq!(bob_rx.recv().await.as_deref(), Some("alice: hi"));
    }

    #[tokio::test]
    async fn test_outbound_messages_are_written_to_socket() {
        // テスト項目: Registry 経由のメッセージが接続のソケットに書き込まれる
        // given (前提条件):
        let registry = Registry::new();
        let closer = CancellationToken::new();
        let (mut alice, _handle) = spawn_handler(&registry, &closer);
        next_line(&mut alice).await;
        alice.send("alice").await.unwrap();
        wait_for_len(&registry, 1).await;

        // when (操作):
        registry.broadcast("bob: hello", None).await;

        // then (期待する結果):
        assert_eq!(next_line(&mut alice).await.as_deref(), Some("bob: hello"));
    }

    #[tokio::test]
    async fn test_peer_close_unregisters_and_announces() {
        // テスト項目: ピアが切断すると登録解除され、残りの参加者へ退出通知が届く
        // given (前提条件):
        let registry = Registry::new();
        let (bob_tx, mut bob_rx) = mpsc::unbounded_channel();
        registry
            .join(
                ConnectionId::generate(),
                Participant::new("bob".to_string(), bob_tx, CancellationToken::new()),
            )
            .await;
        let closer = CancellationToken::new();
        let (mut alice, handle) = spawn_handler(&registry, &closer);
        next_line(&mut alice).await;
        alice.send("alice").await.unwrap();
        wait_for_len(&registry, 2).await;

        // when (操作):
        drop(alice);

        // then (期待する結果):
        timeout(WAIT, handle).await.unwrap().unwrap();
        assert_eq!(registry.usernames().await, vec!["bob".to_string()]);
        assert_eq!(
            bob_rx.recv().await.as_deref(),
            Some("[SYSTEM] alice joined the chat")
        );
        assert_eq!(
            bob_rx.recv().await.as_deref(),
            Some("[SYSTEM] alice left the chat")
        );
    }

    #[tokio::test]
    async fn test_cancellation_closes_connection() {
        // テスト項目: サーバー側のキャンセルで接続が閉じられ、クライアントは EOF を受け取る
        // given (前提条件):
        let registry = Registry::new();
        let closer = CancellationToken::new();
        let (mut alice, handle) = spawn_handler(&registry, &closer);
        next_line(&mut alice).await;
        alice.send("alice").await.unwrap();
        wait_for_len(&registry, 1).await;

        // when (操作):
        registry.close_all().await;

        // then (期待する結果):
        timeout(WAIT, handle).await.unwrap().unwrap();
        assert!(closer.is_cancelled());
        assert!(registry.is_empty().await);
        assert_eq!(next_line(&mut alice).await, None);
    }

    #[tokio::test]
    async fn test_line_over_limit_ends_connection() {
        // テスト項目: 最大行長を超える行を送った接続は終了し、登録解除と退出通知が行われる
        // given (前提条件):
        let registry = Registry::new();
        let (bob_tx, mut bob_rx) = mpsc::unbounded_channel();
        registry
            .join(
                ConnectionId::generate(),
                Participant::new("bob".to_string(), bob_tx, CancellationToken::new()),
            )
            .await;
        let closer = CancellationToken::new();
        let (mut alice, handle) = spawn_handler_with_limit(&registry, &closer, 32);
        next_line(&mut alice).await;
        alice.send("alice").await.unwrap();
        wait_for_len(&registry, 2).await;

        // when (操作):
        alice.send("x".repeat(64)).await.unwrap();

        // then (期待する結果):
        timeout(WAIT, handle).await.unwrap().unwrap();
        assert_eq!(registry.usernames().await, vec!["bob".to_string()]);
        assert_eq!(
            bob_rx.recv().await.as_deref(),
            Some("[SYSTEM] alice joined the chat")
        );
        assert_eq!(
            bob_rx.recv().await.as_deref(),
            Some("[SYSTEM] alice left the chat")
        );
        assert_eq!(next_line(&mut alice).await, None);
    }
}
