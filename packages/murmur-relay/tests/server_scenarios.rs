//! End-to-end scenarios over real loopback sockets.
//!
//! Each test binds the real accept loop on an ephemeral port and drives it
//! with murmur-core clients (or a raw socket where the client library
//! would refuse to misbehave).

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::timeout;

use murmur_core::client::{ChatClient, ClientEvent};
use murmur_core::crypto::RsaKeyPair;
use murmur_core::framing::FrameCodec;
use murmur_core::protocol::{ProtocolMessage, UsernameOutcome};
use murmur_relay::state::{Registry, ServerConfig};

async fn start_server(password: Option<&str>) -> (u16, Registry) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let registry = Registry::new();
    let config = ServerConfig {
        port,
        password: password.map(str::to_string),
    };
    let serve_registry = registry.clone();
    tokio::spawn(async move {
        murmur_relay::serve(listener, config, serve_registry).await;
    });
    (port, registry)
}

async fn next_event(events: &mut UnboundedReceiver<ClientEvent>) -> ClientEvent {
    timeout(Duration::from_secs(10), events.recv())
        .await
        .expect("timed out waiting for client event")
        .expect("event stream ended")
}

async fn no_event_within(events: &mut UnboundedReceiver<ClientEvent>, window: Duration) {
    if let Ok(Some(event)) = timeout(window, events.recv()).await {
        panic!("expected silence, got {event:?}");
    }
}

/// Connect and drive the session through to Authenticated.
async fn join(
    port: u16,
    username: &str,
    password: Option<&str>,
) -> (ChatClient, UnboundedReceiver<ClientEvent>) {
    let (client, mut events) = ChatClient::connect("127.0.0.1", port, username).await.unwrap();
    assert!(matches!(next_event(&mut events).await, ClientEvent::KeyEstablished));
    match next_event(&mut events).await {
        ClientEvent::Authenticated => {}
        ClientEvent::PasswordRequired => {
            client.send_password(password.expect("server demanded a password")).unwrap();
            assert!(matches!(next_event(&mut events).await, ClientEvent::Authenticated));
        }
        other => panic!("unexpected event while joining: {other:?}"),
    }
    (client, events)
}

async fn wait_until(mut check: impl FnMut() -> bool) {
    timeout(Duration::from_secs(5), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("condition never became true");
}

// ── Scenario A: open room ─────────────────────────────────────────────────────

#[tokio::test]
async fn open_room_join_notice_and_chat() {
    let (port, registry) = start_server(None).await;

    let (alice, mut alice_events) = join(port, "alice", None).await;
    assert_eq!(registry.authenticated_count(), 1);

    let (bob, _bob_events) = join(port, "bob", None).await;

    match next_event(&mut alice_events).await {
        ClientEvent::Joined { username, .. } => assert_eq!(username, "bob"),
        other => panic!("expected join notice for bob, got {other:?}"),
    }

    bob.send_chat("hello alice").unwrap();
    match next_event(&mut alice_events).await {
        ClientEvent::Message { sender, text, .. } => {
            assert_eq!(sender, "bob");
            assert_eq!(text, "hello alice");
        }
        other => panic!("expected chat from bob, got {other:?}"),
    }

    alice.close().await;
    bob.close().await;
}

// ── Scenario B: wrong password ────────────────────────────────────────────────

#[tokio::test]
async fn wrong_password_is_rejected_without_join() {
    let (port, registry) = start_server(Some("secret123")).await;

    let (_alice, mut alice_events) = join(port, "alice", Some("secret123")).await;

    let (bob, mut bob_events) = ChatClient::connect("127.0.0.1", port, "bob").await.unwrap();
    assert!(matches!(next_event(&mut bob_events).await, ClientEvent::KeyEstablished));
    assert!(matches!(next_event(&mut bob_events).await, ClientEvent::PasswordRequired));

    bob.send_password("letmein").unwrap();
    assert!(matches!(next_event(&mut bob_events).await, ClientEvent::AuthFailed));
    match next_event(&mut bob_events).await {
        ClientEvent::Closed { reconnecting } => assert!(!reconnecting),
        other => panic!("expected server-initiated close, got {other:?}"),
    }

    // No Join ever reaches the authenticated member.
    no_event_within(&mut alice_events, Duration::from_millis(300)).await;
    wait_until(|| registry.online_count() == 1).await;
    bob.close().await;
}

#[tokio::test]
async fn correct_password_authenticates() {
    let (port, registry) = start_server(Some("secret123")).await;
    let (client, _events) = join(port, "alice", Some("secret123")).await;
    assert_eq!(registry.authenticated_count(), 1);
    client.close().await;
}

// ── Scenario C: graceful leave ────────────────────────────────────────────────

#[tokio::test]
async fn leave_notifies_others_and_removes_exactly_once() {
    let (port, registry) = start_server(None).await;

    let (alice, _alice_events) = join(port, "alice", None).await;
    let (_bob, mut bob_events) = join(port, "bob", None).await;
    let (_carol, mut carol_events) = join(port, "carol", None).await;

    // Drain the join notices bob and carol saw while the room filled.
    assert!(matches!(next_event(&mut bob_events).await, ClientEvent::Joined { .. }));
    wait_until(|| registry.authenticated_count() == 3).await;

    alice.leave().await.unwrap();

    match next_event(&mut bob_events).await {
        ClientEvent::Left { username, .. } => assert_eq!(username, "alice"),
        other => panic!("expected leave notice, got {other:?}"),
    }
    match next_event(&mut carol_events).await {
        ClientEvent::Left { username, .. } => assert_eq!(username, "alice"),
        other => panic!("expected leave notice, got {other:?}"),
    }

    // The socket close that follows the leave must not produce a second
    // removal or a second notice.
    wait_until(|| registry.online_count() == 2).await;
    no_event_within(&mut bob_events, Duration::from_millis(300)).await;
    assert!(!registry.contains("alice"));
}

// ── Username arbitration ──────────────────────────────────────────────────────

#[tokio::test]
async fn duplicate_username_is_rejected_and_reconnect_works() {
    let (port, registry) = start_server(None).await;

    let (_alice, mut alice_events) = join(port, "alice", None).await;

    let (impostor, mut impostor_events) =
        ChatClient::connect("127.0.0.1", port, "alice").await.unwrap();
    match next_event(&mut impostor_events).await {
        ClientEvent::UsernameRejected { reason } => assert_eq!(reason, UsernameOutcome::Taken),
        other => panic!("expected username rejection, got {other:?}"),
    }
    match next_event(&mut impostor_events).await {
        ClientEvent::Closed { reconnecting } => assert!(reconnecting),
        other => panic!("expected non-fatal close, got {other:?}"),
    }
    impostor.close().await;

    // The original session was never displaced.
    assert_eq!(registry.online_count(), 1);
    no_event_within(&mut alice_events, Duration::from_millis(300)).await;

    // Reconnecting from scratch with a fresh name succeeds.
    let (_alice2, _alice2_events) = join(port, "alice2", None).await;
    match next_event(&mut alice_events).await {
        ClientEvent::Joined { username, .. } => assert_eq!(username, "alice2"),
        other => panic!("expected join notice, got {other:?}"),
    }
    wait_until(|| registry.online_count() == 2).await;
}

#[tokio::test]
async fn invalid_username_is_rejected_before_any_session() {
    let (port, registry) = start_server(None).await;

    // The client library refuses bad names, so speak the wire directly.
    let keys = RsaKeyPair::generate().unwrap();
    let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    let hello = ProtocolMessage::PublicKey {
        sender: "no spaces!".to_string(),
        content: keys.public_key_pem().unwrap(),
        timestamp: 0,
    };
    stream.write_all(&FrameCodec::encode(&hello).unwrap()).await.unwrap();

    let mut codec = FrameCodec::new();
    let mut chunk = [0u8; 4096];
    let reply = loop {
        let n = stream.read(&mut chunk).await.unwrap();
        assert!(n > 0, "server closed without a reply");
        if let Some(frame) = codec.feed(&chunk[..n]).into_iter().next() {
            break frame.unwrap();
        }
    };
    assert!(matches!(
        reply,
        ProtocolMessage::UsernameResult { outcome: UsernameOutcome::Invalid, .. }
    ));

    // The reply is flushed before the close; the read that follows is EOF.
    wait_until(|| registry.online_count() == 0).await;
    loop {
        match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(_) => continue,
        }
    }
}

// ── Protocol robustness ───────────────────────────────────────────────────────

#[tokio::test]
async fn malformed_frame_is_dropped_and_connection_survives() {
    let (port, registry) = start_server(None).await;

    let keys = RsaKeyPair::generate().unwrap();
    let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();

    // Garbage first; the server must log, drop, and keep reading.
    stream.write_all(b"definitely not json\n").await.unwrap();

    let hello = ProtocolMessage::PublicKey {
        sender: "mallory".to_string(),
        content: keys.public_key_pem().unwrap(),
        timestamp: 0,
    };
    stream.write_all(&FrameCodec::encode(&hello).unwrap()).await.unwrap();

    let mut codec = FrameCodec::new();
    let mut chunk = [0u8; 4096];
    let reply = loop {
        let n = stream.read(&mut chunk).await.unwrap();
        assert!(n > 0, "server closed on a malformed frame");
        if let Some(frame) = codec.feed(&chunk[..n]).into_iter().next() {
            break frame.unwrap();
        }
    };
    assert!(
        matches!(reply, ProtocolMessage::PublicKey { .. }),
        "expected the wrapped session secret, got {reply:?}"
    );
    wait_until(|| registry.online_count() == 1).await;
}
