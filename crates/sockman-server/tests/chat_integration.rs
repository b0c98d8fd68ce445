//! End-to-end chat sessions against the real server loop, with
//! `tokio-tungstenite` clients.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use sockman_server::domain::{ChatEvent, ChatRequest, ServerConfig};
use sockman_server::infrastructure::{build_reactor, drive};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct ChatServer {
    addr: SocketAddr,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl ChatServer {
    /// Starts the server loop on its own thread, listening on an ephemeral port.
    fn start() -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        let (tx, rx) = mpsc::channel();
        let handle = thread::spawn(move || {
            let mut reactor = build_reactor(&ServerConfig::default()).expect("reactor");
            reactor.listen("127.0.0.1", 0).expect("listen");
            tx.send(reactor.local_addr().expect("address")).unwrap();
            drive(&mut reactor, &flag).expect("loop");
        });
        let addr = rx.recv().expect("server address");
        Self {
            addr,
            running,
            handle: Some(handle),
        }
    }

    async fn connect(&self) -> Ws {
        let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{}/", self.addr))
            .await
            .expect("handshake");
        ws
    }
}

impl Drop for ChatServer {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

async fn send(ws: &mut Ws, request: &ChatRequest) {
    let text = serde_json::to_string(request).unwrap();
    ws.send(Message::Text(text)).await.expect("send");
}

/// Next chat event, skipping control frames.
async fn next_event(ws: &mut Ws) -> ChatEvent {
    loop {
        let message = timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("event within 5 s")
            .expect("stream open")
            .expect("valid frame");
        if let Message::Text(text) = message {
            return serde_json::from_str(&text).expect("chat event");
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_entrance_and_message_reach_every_member() {
    // Arrange
    let server = ChatServer::start();
    let mut alice = server.connect().await;
    send(&mut alice, &ChatRequest::entrance("alice")).await;
    assert_eq!(
        next_event(&mut alice).await,
        ChatEvent::Entered { user: "alice".into(), members: 1 }
    );

    // Act
    let mut bob = server.connect().await;
    send(&mut bob, &ChatRequest::entrance("bob")).await;
    let entered = ChatEvent::Entered { user: "bob".into(), members: 2 };
    assert_eq!(next_event(&mut alice).await, entered);
    assert_eq!(next_event(&mut bob).await, entered);

    send(&mut bob, &ChatRequest::message("hi all")).await;

    // Assert
    let said = ChatEvent::Message { user: "bob".into(), comment: "hi all".into() };
    assert_eq!(next_event(&mut alice).await, said);
    assert_eq!(next_event(&mut bob).await, said);
}

#[tokio::test]
async fn test_echo_answers_only_the_sender() {
    let server = ChatServer::start();
    let mut ws = server.connect().await;

    send(&mut ws, &ChatRequest::echo("ping")).await;

    assert_eq!(next_event(&mut ws).await, ChatEvent::Echo { comment: "ping".into() });
}

#[tokio::test]
async fn test_exit_closes_with_normal_code_and_notifies_others() {
    // Arrange
    let server = ChatServer::start();
    let mut alice = server.connect().await;
    send(&mut alice, &ChatRequest::entrance("alice")).await;
    next_event(&mut alice).await;
    let mut bob = server.connect().await;
    send(&mut bob, &ChatRequest::entrance("bob")).await;
    next_event(&mut alice).await;
    next_event(&mut bob).await;

    // Act
    send(&mut bob, &ChatRequest::exit()).await;

    // Assert: bob gets a 1000 close, alice hears that bob left.
    let close = loop {
        match timeout(Duration::from_secs(5), bob.next()).await.expect("close within 5 s") {
            Some(Ok(Message::Close(frame))) => break frame,
            Some(Ok(_)) => continue,
            other => panic!("expected a close frame, got {other:?}"),
        }
    };
    assert_eq!(close.map(|f| f.code), Some(CloseCode::Normal));
    assert_eq!(
        next_event(&mut alice).await,
        ChatEvent::Left { user: "bob".into(), members: 1 }
    );
}

#[tokio::test]
async fn test_unknown_command_drops_the_connection() {
    let server = ChatServer::start();
    let mut ws = server.connect().await;

    ws.send(Message::Text(r#"{"cmd":"dance"}"#.to_string())).await.unwrap();

    let ended = timeout(Duration::from_secs(5), async {
        loop {
            match ws.next().await {
                None | Some(Err(_)) => return true,
                Some(Ok(Message::Close(_))) => return true,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await
    .expect("connection should end within 5 s");
    assert!(ended);
}
