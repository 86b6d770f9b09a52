//! Messaging client session.
//!
//! Client-side mirror of the relay's connection state machine:
//!
//! ```text
//! Disconnected → Connected → KeyEstablished → AwaitingPassword? → Authenticated
//!                    │                                                  │
//!                    └──────────── Reconnecting ◄──────────────────────┘
//!                           (username rejected by the server)
//! ```
//!
//! [`ChatClient::connect`] opens the socket, announces the username and
//! public key, and returns a handle plus an event stream. A reader task
//! parses inbound frames and drives the phase transitions; a writer task
//! owns the write half so outbound frames are serialized and flushed in
//! order. Username rejection is an explicit `Reconnecting` phase: the
//! socket close that follows it is reported as non-fatal so the frontend
//! can re-prompt and dial again from scratch.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};

use crate::crypto::{open, seal, RsaKeyPair, SessionSecret};
use crate::error::{Error, Result};
use crate::framing::FrameCodec;
use crate::protocol::{
    now_millis, valid_username, AuthOutcome, ProtocolMessage, UsernameOutcome, LEAVE_COMMAND,
};

/// Client session phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientPhase {
    /// No live socket.
    Disconnected,
    /// Socket open, public key announced, waiting for the wrapped secret.
    Connected,
    /// Session secret unwrapped and installed.
    KeyEstablished,
    /// Server demands a password before relaying.
    AwaitingPassword,
    /// Fully joined; chat flows.
    Authenticated,
    /// Username was rejected; the imminent socket close is expected and
    /// non-fatal, and the frontend should dial again with a new name.
    Reconnecting,
}

/// Events surfaced to the frontend by the reader task.
#[derive(Debug)]
pub enum ClientEvent {
    /// Key exchange completed; the session secret is installed.
    KeyEstablished,
    /// The server is password-protected; submit one via `send_password`.
    PasswordRequired,
    /// The session is authenticated; chat may begin.
    Authenticated,
    /// Wrong password. The server will close the connection.
    AuthFailed,
    /// The requested username was rejected; reconnect with another.
    UsernameRejected { reason: UsernameOutcome },
    /// A decrypted chat line from another member.
    Message {
        sender: String,
        text: String,
        sent_at: i64,
    },
    /// A member joined the room.
    Joined { username: String, timestamp: i64 },
    /// A member left the room.
    Left { username: String, timestamp: i64 },
    /// The socket closed. `reconnecting` is true when the close was the
    /// expected consequence of a username rejection.
    Closed { reconnecting: bool },
    /// Unrecoverable session error (e.g. key exchange failure).
    Fatal { reason: String },
}

/// State shared between the handle and the reader task.
struct Shared {
    phase: ClientPhase,
    secret: Option<SessionSecret>,
}

/// Handle to a live client session.
pub struct ChatClient {
    username: String,
    shared: Arc<Mutex<Shared>>,
    outbound: Option<mpsc::UnboundedSender<ProtocolMessage>>,
    writer: Option<JoinHandle<()>>,
    reader: JoinHandle<()>,
}

impl ChatClient {
    /// Probe server reachability: connect, then immediately disconnect.
    ///
    /// Lets the frontend fail fast with a clear error before any prompting
    /// or key generation happens.
    pub async fn probe(host: &str, port: u16) -> Result<()> {
        TcpStream::connect((host, port))
            .await
            .map_err(|e| Error::ConnectionFailed(format!("{host}:{port} unreachable: {e}")))?;
        Ok(())
    }

    /// Connect, generate a fresh keypair, and announce `username`.
    ///
    /// Returns the session handle and the event stream. Key exchange and
    /// authentication progress arrive as [`ClientEvent`]s.
    pub async fn connect(
        host: &str,
        port: u16,
        username: &str,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ClientEvent>)> {
        if !valid_username(username) {
            return Err(Error::InvalidState(
                "username must be 3-20 alphanumeric characters".into(),
            ));
        }

        let keys = RsaKeyPair::generate()?;
        let public_pem = keys.public_key_pem()?;

        let stream = TcpStream::connect((host, port))
            .await
            .map_err(|e| Error::ConnectionFailed(e.to_string()))?;
        let (read_half, write_half) = stream.into_split();

        let shared = Arc::new(Mutex::new(Shared {
            phase: ClientPhase::Connected,
            secret: None,
        }));

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let writer = tokio::spawn(write_loop(write_half, outbound_rx));
        let reader = tokio::spawn(read_loop(
            read_half,
            Arc::new(keys),
            shared.clone(),
            event_tx,
        ));

        outbound_tx
            .send(ProtocolMessage::PublicKey {
                sender: username.to_string(),
                content: public_pem,
                timestamp: now_millis(),
            })
            .map_err(|_| Error::ConnectionClosed)?;

        Ok((
            Self {
                username: username.to_string(),
                shared,
                outbound: Some(outbound_tx),
                writer: Some(writer),
                reader,
            },
            event_rx,
        ))
    }

    /// The username this session announced.
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Current session phase.
    pub fn phase(&self) -> ClientPhase {
        self.shared.lock().phase
    }

    /// Seal and send a chat line. Requires an authenticated session.
    pub fn send_chat(&self, text: &str) -> Result<()> {
        let envelope = {
            let shared = self.shared.lock();
            if shared.phase != ClientPhase::Authenticated {
                return Err(Error::InvalidState("not authenticated yet".into()));
            }
            let secret = shared
                .secret
                .as_ref()
                .ok_or_else(|| Error::InvalidState("no session secret installed".into()))?;
            seal(secret, text.as_bytes())?
        };

        self.send(ProtocolMessage::Message {
            sender: self.username.clone(),
            content: envelope.ciphertext,
            nonce: envelope.nonce,
            tag: envelope.tag,
            sent_at: now_millis(),
            relayed_at: None,
        })
    }

    /// Seal and send the room password. Requires the `AwaitingPassword`
    /// phase (entered on `AuthResult(password_required)`).
    pub fn send_password(&self, password: &str) -> Result<()> {
        let envelope = {
            let shared = self.shared.lock();
            if shared.phase != ClientPhase::AwaitingPassword {
                return Err(Error::InvalidState("no password was requested".into()));
            }
            let secret = shared
                .secret
                .as_ref()
                .ok_or_else(|| Error::InvalidState("no session secret installed".into()))?;
            seal(secret, password.as_bytes())?
        };

        self.send(ProtocolMessage::Auth {
            sender: self.username.clone(),
            content: envelope.ciphertext,
            nonce: envelope.nonce,
            tag: envelope.tag,
            timestamp: now_millis(),
        })
    }

    /// Gracefully leave: send the leave command, flush, and close the
    /// socket without waiting for an echo.
    pub async fn leave(mut self) -> Result<()> {
        self.send_chat(LEAVE_COMMAND)?;
        self.shutdown().await;
        Ok(())
    }

    /// Close the socket, flushing any queued outbound frames first.
    pub async fn close(mut self) {
        self.shutdown().await;
    }

    fn send(&self, message: ProtocolMessage) -> Result<()> {
        self.outbound
            .as_ref()
            .ok_or(Error::ConnectionClosed)?
            .send(message)
            .map_err(|_| Error::ConnectionClosed)
    }

    /// Flush-then-close: dropping the outbound sender lets the writer task
    /// drain its queue, flush, and shut the write half down; only then is
    /// the reader cancelled.
    async fn shutdown(&mut self) {
        self.outbound.take();
        if let Some(writer) = self.writer.take() {
            let _ = writer.await;
        }
        self.reader.abort();
        let mut shared = self.shared.lock();
        shared.secret = None;
        if shared.phase != ClientPhase::Reconnecting {
            shared.phase = ClientPhase::Disconnected;
        }
    }
}

// ── Writer Task ───────────────────────────────────────────────────────────────

/// Owns the write half: encodes, writes, and flushes outbound frames in
/// order. Ends when every sender is dropped, shutting the socket down after
/// the queue drains.
async fn write_loop(
    write_half: OwnedWriteHalf,
    mut outbound: mpsc::UnboundedReceiver<ProtocolMessage>,
) {
    let mut writer = BufWriter::new(write_half);
    while let Some(message) = outbound.recv().await {
        let bytes = match FrameCodec::encode(&message) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!(error = %e, "failed to encode outbound frame");
                continue;
            }
        };
        if writer.write_all(&bytes).await.is_err() || writer.flush().await.is_err() {
            break;
        }
    }
    let _ = writer.shutdown().await;
}

// ── Reader Task ───────────────────────────────────────────────────────────────

async fn read_loop(
    mut read_half: OwnedReadHalf,
    keys: Arc<RsaKeyPair>,
    shared: Arc<Mutex<Shared>>,
    events: mpsc::UnboundedSender<ClientEvent>,
) {
    let mut codec = FrameCodec::new();
    let mut chunk = [0u8; 4096];

    loop {
        let n = match read_half.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                tracing::debug!(error = %e, "socket read failed");
                break;
            }
        };

        for frame in codec.feed(&chunk[..n]) {
            match frame {
                Ok(message) => {
                    if let Err(reason) = handle_server_message(message, &keys, &shared, &events) {
                        {
                            let mut s = shared.lock();
                            s.secret = None;
                            s.phase = ClientPhase::Disconnected;
                        }
                        let _ = events.send(ClientEvent::Fatal { reason });
                        return;
                    }
                }
                Err(e) => tracing::warn!(error = %e, "dropping malformed frame"),
            }
        }
    }

    let reconnecting = {
        let mut s = shared.lock();
        s.secret = None;
        let reconnecting = s.phase == ClientPhase::Reconnecting;
        if !reconnecting {
            s.phase = ClientPhase::Disconnected;
        }
        reconnecting
    };
    let _ = events.send(ClientEvent::Closed { reconnecting });
}

/// Dispatch one inbound message. `Err(reason)` is session-fatal.
fn handle_server_message(
    message: ProtocolMessage,
    keys: &RsaKeyPair,
    shared: &Arc<Mutex<Shared>>,
    events: &mpsc::UnboundedSender<ClientEvent>,
) -> std::result::Result<(), String> {
    match message {
        ProtocolMessage::PublicKey { content, .. } => {
            let wrapped = BASE64
                .decode(&content)
                .map_err(|_| "key exchange failed: malformed wrapped secret".to_string())?;
            let secret = keys
                .unwrap_secret(&wrapped)
                .map_err(|e| e.to_string())?;
            {
                let mut s = shared.lock();
                s.secret = Some(secret);
                s.phase = ClientPhase::KeyEstablished;
            }
            let _ = events.send(ClientEvent::KeyEstablished);
        }

        ProtocolMessage::AuthResult { outcome, .. } => match outcome {
            AuthOutcome::PasswordRequired => {
                shared.lock().phase = ClientPhase::AwaitingPassword;
                let _ = events.send(ClientEvent::PasswordRequired);
            }
            AuthOutcome::Authenticated => {
                shared.lock().phase = ClientPhase::Authenticated;
                let _ = events.send(ClientEvent::Authenticated);
            }
            AuthOutcome::AuthenticationFailed => {
                // The server closes the connection after this; surface the
                // failure and let the close arrive on its own.
                let _ = events.send(ClientEvent::AuthFailed);
            }
        },

        ProtocolMessage::UsernameResult { outcome, .. } => {
            {
                let mut s = shared.lock();
                s.phase = ClientPhase::Reconnecting;
                s.secret = None;
            }
            let _ = events.send(ClientEvent::UsernameRejected { reason: outcome });
        }

        ProtocolMessage::Message {
            sender,
            content,
            nonce,
            tag,
            sent_at,
            ..
        } => {
            let secret = shared.lock().secret.clone();
            let Some(secret) = secret else {
                tracing::warn!(sender = sender.as_str(), "chat before key exchange, dropping");
                return Ok(());
            };
            match open(&secret, &nonce, &content, &tag) {
                Ok(plaintext) => match String::from_utf8(plaintext) {
                    Ok(text) => {
                        let _ = events.send(ClientEvent::Message { sender, text, sent_at });
                    }
                    Err(_) => {
                        tracing::warn!(sender = sender.as_str(), "non-utf8 chat payload, dropping")
                    }
                },
                // One undecryptable message drops only itself.
                Err(e) => {
                    tracing::warn!(sender = sender.as_str(), error = %e, "dropping undecryptable message")
                }
            }
        }

        ProtocolMessage::Join { sender, timestamp } => {
            let _ = events.send(ClientEvent::Joined { username: sender, timestamp });
        }

        ProtocolMessage::Leave { sender, timestamp } => {
            let _ = events.send(ClientEvent::Left { username: sender, timestamp });
        }

        ProtocolMessage::Auth { .. } => {
            tracing::warn!("server sent an auth frame, ignoring");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::wrap_secret;
    use tokio::net::TcpListener;
    use tokio::time::{timeout, Duration};

    /// Read frames from a raw socket until one parses.
    async fn next_frame(stream: &mut TcpStream, codec: &mut FrameCodec) -> ProtocolMessage {
        let mut chunk = [0u8; 4096];
        loop {
            let n = stream.read(&mut chunk).await.unwrap();
            assert!(n > 0, "peer closed before a frame arrived");
            if let Some(frame) = codec.feed(&chunk[..n]).into_iter().next() {
                return frame.unwrap();
            }
        }
    }

    async fn send_frame(stream: &mut TcpStream, message: &ProtocolMessage) {
        stream
            .write_all(&FrameCodec::encode(message).unwrap())
            .await
            .unwrap();
    }

    async fn recv_event(events: &mut mpsc::UnboundedReceiver<ClientEvent>) -> ClientEvent {
        timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("timed out waiting for client event")
            .expect("event stream ended")
    }

    #[tokio::test]
    async fn test_key_exchange_then_chat() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut codec = FrameCodec::new();

            let hello = next_frame(&mut stream, &mut codec).await;
            let ProtocolMessage::PublicKey { sender, content, .. } = hello else {
                panic!("expected public_key first, got {hello:?}");
            };
            assert_eq!(sender, "alice");

            let secret = SessionSecret::generate();
            let wrapped = wrap_secret(&content, &secret).unwrap();
            send_frame(
                &mut stream,
                &ProtocolMessage::PublicKey {
                    sender: "server".to_string(),
                    content: BASE64.encode(&wrapped),
                    timestamp: 1,
                },
            )
            .await;
            send_frame(
                &mut stream,
                &ProtocolMessage::AuthResult { outcome: AuthOutcome::Authenticated, timestamp: 2 },
            )
            .await;

            // Deliver a chat line sealed under the session secret.
            let envelope = seal(&secret, b"welcome in").unwrap();
            send_frame(
                &mut stream,
                &ProtocolMessage::Message {
                    sender: "bob".to_string(),
                    content: envelope.ciphertext,
                    nonce: envelope.nonce,
                    tag: envelope.tag,
                    sent_at: 3,
                    relayed_at: Some(4),
                },
            )
            .await;

            // Expect the client's own (encrypted) line back.
            let outbound = next_frame(&mut stream, &mut codec).await;
            let ProtocolMessage::Message { content, nonce, tag, .. } = outbound else {
                panic!("expected chat message, got {outbound:?}");
            };
            assert_eq!(open(&secret, &nonce, &content, &tag).unwrap(), b"hi bob");
        });

        let (client, mut events) = ChatClient::connect("127.0.0.1", addr.port(), "alice")
            .await
            .unwrap();

        assert!(matches!(recv_event(&mut events).await, ClientEvent::KeyEstablished));
        assert!(matches!(recv_event(&mut events).await, ClientEvent::Authenticated));
        assert_eq!(client.phase(), ClientPhase::Authenticated);

        match recv_event(&mut events).await {
            ClientEvent::Message { sender, text, sent_at } => {
                assert_eq!(sender, "bob");
                assert_eq!(text, "welcome in");
                assert_eq!(sent_at, 3);
            }
            other => panic!("expected message event, got {other:?}"),
        }

        client.send_chat("hi bob").unwrap();
        server.await.unwrap();
        client.close().await;
    }

    #[tokio::test]
    async fn test_username_rejection_enters_reconnecting() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut codec = FrameCodec::new();
            let _hello = next_frame(&mut stream, &mut codec).await;
            send_frame(
                &mut stream,
                &ProtocolMessage::UsernameResult {
                    outcome: UsernameOutcome::Taken,
                    timestamp: 1,
                },
            )
            .await;
            // Server closes after the rejection, as the relay does.
        });

        let (client, mut events) = ChatClient::connect("127.0.0.1", addr.port(), "alice")
            .await
            .unwrap();

        match recv_event(&mut events).await {
            ClientEvent::UsernameRejected { reason } => assert_eq!(reason, UsernameOutcome::Taken),
            other => panic!("expected rejection, got {other:?}"),
        }
        assert_eq!(client.phase(), ClientPhase::Reconnecting);

        // The close that follows is expected, not fatal.
        match recv_event(&mut events).await {
            ClientEvent::Closed { reconnecting } => assert!(reconnecting),
            other => panic!("expected close, got {other:?}"),
        }

        server.await.unwrap();
        client.close().await;
    }

    #[tokio::test]
    async fn test_send_before_authentication_is_rejected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (client, _events) = ChatClient::connect("127.0.0.1", addr.port(), "alice")
            .await
            .unwrap();
        assert!(matches!(client.send_chat("too early"), Err(Error::InvalidState(_))));
        client.close().await;
    }

    #[tokio::test]
    async fn test_connect_rejects_invalid_username() {
        assert!(ChatClient::connect("127.0.0.1", 1, "a!").await.is_err());
    }

    #[tokio::test]
    async fn test_probe_unreachable_fails_fast() {
        // Port 1 on localhost is essentially never listening.
        assert!(matches!(
            ChatClient::probe("127.0.0.1", 1).await,
            Err(Error::ConnectionFailed(_))
        ));
    }
}
