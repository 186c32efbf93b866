//! Session handshake and buffering behavior, driven over in-memory pipes.

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tokio::time::timeout;

use lobbyq_sdk::event::SessionEvent;
use lobbyq_sdk::frame::{ClientFrame, ServerFrame};
use lobbyq_sdk::session::{Identity, SessionHandle, connect_io};

fn identity() -> Identity {
    Identity {
        user_id: 7,
        username: "nova".to_string(),
    }
}

/// The server's end of the wire.
struct FakeServer {
    reader: BufReader<ReadHalf<DuplexStream>>,
    writer: WriteHalf<DuplexStream>,
}

impl FakeServer {
    fn start() -> (FakeServer, SessionHandle, mpsc::Receiver<SessionEvent>) {
        let (client_io, server_io) = tokio::io::duplex(4096);
        let (handle, events) = connect_io(client_io, identity());
        let (reader, writer) = tokio::io::split(server_io);
        (
            FakeServer {
                reader: BufReader::new(reader),
                writer,
            },
            handle,
            events,
        )
    }

    async fn recv_frame(&mut self) -> Option<ClientFrame> {
        let mut line = String::new();
        let n = self.reader.read_line(&mut line).await.expect("read");
        if n == 0 {
            return None;
        }
        Some(serde_json::from_str(line.trim()).expect("client frame"))
    }

    async fn expect_no_frame(&mut self) {
        let mut line = String::new();
        let read = timeout(Duration::from_millis(80), self.reader.read_line(&mut line)).await;
        assert!(read.is_err(), "unexpected frame on the wire: {line}");
    }

    async fn send_frame(&mut self, frame: &ServerFrame) {
        let mut line = serde_json::to_string(frame).expect("encode");
        line.push('\n');
        self.writer.write_all(line.as_bytes()).await.expect("write");
    }

    async fn send_raw(&mut self, line: &str) {
        self.writer.write_all(line.as_bytes()).await.expect("write");
    }
}

async fn next_event(events: &mut mpsc::Receiver<SessionEvent>) -> SessionEvent {
    timeout(Duration::from_secs(2), events.recv())
        .await
        .expect("timed out waiting for session event")
        .expect("session event stream ended")
}

#[tokio::test]
async fn auth_frame_goes_out_first() {
    let (mut server, _handle, mut events) = FakeServer::start();

    assert_eq!(next_event(&mut events).await, SessionEvent::Connected);
    assert_eq!(
        server.recv_frame().await,
        Some(ClientFrame::Auth { user_id: 7 })
    );
}

#[tokio::test]
async fn pre_ready_sends_are_buffered_and_flushed_in_order() {
    let (mut server, handle, mut events) = FakeServer::start();
    assert_eq!(server.recv_frame().await, Some(ClientFrame::Auth { user_id: 7 }));

    // Enqueued before the ack: a subscribe, then a typing ping.
    handle.subscribe(1).await.unwrap();
    handle.typing(1).await.unwrap();

    // Nothing reaches the wire until the ack.
    server.expect_no_frame().await;

    server.send_frame(&ServerFrame::AuthSuccess).await;
    assert_eq!(next_event(&mut events).await, SessionEvent::Connected);
    assert_eq!(next_event(&mut events).await, SessionEvent::Ready);

    assert_eq!(
        server.recv_frame().await,
        Some(ClientFrame::SubscribeLobby { lobby_id: 1 })
    );
    assert_eq!(
        server.recv_frame().await,
        Some(ClientFrame::Typing {
            lobby_id: 1,
            user_id: 7,
            username: "nova".to_string(),
        })
    );
    server.expect_no_frame().await;
}

#[tokio::test]
async fn pre_ready_subscribe_is_sent_exactly_once() {
    let (mut server, handle, _events) = FakeServer::start();
    assert!(server.recv_frame().await.is_some());

    handle.subscribe(3).await.unwrap();
    handle.subscribe(3).await.unwrap();
    server.send_frame(&ServerFrame::AuthSuccess).await;

    assert_eq!(
        server.recv_frame().await,
        Some(ClientFrame::SubscribeLobby { lobby_id: 3 })
    );
    server.expect_no_frame().await;
}

#[tokio::test]
async fn pre_ready_unsubscribe_cancels_queued_subscribe() {
    let (mut server, handle, _events) = FakeServer::start();
    assert!(server.recv_frame().await.is_some());

    handle.subscribe(3).await.unwrap();
    handle.unsubscribe(3).await.unwrap();
    server.send_frame(&ServerFrame::AuthSuccess).await;

    // Neither frame goes out: the topic was no longer requested by the
    // time the buffer flushed.
    server.expect_no_frame().await;
}

#[tokio::test]
async fn malformed_frames_are_discarded_not_fatal() {
    let (mut server, _handle, mut events) = FakeServer::start();
    assert!(server.recv_frame().await.is_some());

    server.send_frame(&ServerFrame::AuthSuccess).await;
    server.send_raw("{{{ this is not json\n").await;
    server.send_raw("{\"type\":\"no_such_frame\"}\n").await;
    server
        .send_frame(&ServerFrame::UnreadCount { count: 2 })
        .await;

    assert_eq!(next_event(&mut events).await, SessionEvent::Connected);
    assert_eq!(next_event(&mut events).await, SessionEvent::Ready);
    assert_eq!(
        next_event(&mut events).await,
        SessionEvent::Frame(ServerFrame::UnreadCount { count: 2 })
    );
}

#[tokio::test]
async fn frames_are_delivered_in_arrival_order() {
    let (mut server, _handle, mut events) = FakeServer::start();
    assert!(server.recv_frame().await.is_some());

    server.send_frame(&ServerFrame::AuthSuccess).await;
    for count in [1, 2, 3] {
        server.send_frame(&ServerFrame::UnreadCount { count }).await;
    }

    assert_eq!(next_event(&mut events).await, SessionEvent::Connected);
    assert_eq!(next_event(&mut events).await, SessionEvent::Ready);
    for count in [1, 2, 3] {
        assert_eq!(
            next_event(&mut events).await,
            SessionEvent::Frame(ServerFrame::UnreadCount { count })
        );
    }
}

#[tokio::test]
async fn close_attempts_unsubscribe_then_hangs_up() {
    let (mut server, handle, mut events) = FakeServer::start();
    assert!(server.recv_frame().await.is_some());

    server.send_frame(&ServerFrame::AuthSuccess).await;
    handle.subscribe(42).await.unwrap();
    assert_eq!(
        server.recv_frame().await,
        Some(ClientFrame::SubscribeLobby { lobby_id: 42 })
    );

    handle.close().await.unwrap();
    assert_eq!(
        server.recv_frame().await,
        Some(ClientFrame::UnsubscribeLobby { lobby_id: 42 })
    );
    // Transport is gone afterwards.
    assert_eq!(server.recv_frame().await, None);

    loop {
        match next_event(&mut events).await {
            SessionEvent::Disconnected { reason } => {
                assert_eq!(reason, "closed");
                break;
            }
            _ => continue,
        }
    }

    // The session is gone; further sends fail.
    assert!(handle.subscribe(1).await.is_err());
}

#[tokio::test]
async fn server_hangup_surfaces_as_disconnected() {
    let (server, _handle, mut events) = FakeServer::start();
    drop(server);

    loop {
        match next_event(&mut events).await {
            SessionEvent::Disconnected { reason } => {
                assert!(reason.contains("closed"), "reason: {reason}");
                break;
            }
            _ => continue,
        }
    }
}
