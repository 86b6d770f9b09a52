//! Per-connection handler.
//!
//! Each accepted socket runs one handler task through this state machine:
//!
//! ```text
//! AwaitingKey ──► AwaitingAuth ──► Authenticated ──► Terminated
//!      │         (password set)          │
//!      └────────────────────────────────►│  (no password configured)
//! ```
//!
//! The handler owns all per-connection state in an explicit [`Connection`]
//! object and dispatches on the inbound message variant. Outbound frames go
//! through a writer task fed by an unbounded channel, so writes to the
//! socket never interleave. Terminal replies (username taken/invalid, auth
//! failure) use flush-then-close: the reply is queued, the channel closed,
//! and the writer awaited, so it drains, flushes, and shuts the socket
//! down before the handler returns.

use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use murmur_core::crypto::{open, wrap_secret, SessionSecret};
use murmur_core::framing::FrameCodec;
use murmur_core::protocol::{
    now_millis, valid_username, AuthOutcome, ProtocolMessage, UsernameOutcome, LEAVE_COMMAND,
    SERVER_NAME,
};

use crate::state::{ClientSession, Registry, ServerConfig};

/// Connection phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    AwaitingKey,
    AwaitingAuth,
    Authenticated,
}

/// Dispatch verdict: keep reading, or close the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Close,
}

/// All state for one connection, owned by its handler task.
struct Connection {
    registry: Registry,
    config: Arc<ServerConfig>,
    outbound: mpsc::UnboundedSender<ProtocolMessage>,
    peer: String,
    phase: Phase,
    username: Option<String>,
    secret: Option<SessionSecret>,
    disconnected: bool,
}

/// Handle a single client connection for its whole lifetime.
pub async fn handle_connection(stream: TcpStream, registry: Registry, config: Arc<ServerConfig>) {
    let peer = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".to_string());

    let (mut read_half, write_half) = stream.into_split();
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let writer = tokio::spawn(write_loop(write_half, outbound_rx));

    let mut conn = Connection {
        registry,
        config,
        outbound: outbound_tx,
        peer,
        phase: Phase::AwaitingKey,
        username: None,
        secret: None,
        disconnected: false,
    };

    let mut codec = FrameCodec::new();
    let mut chunk = [0u8; 4096];

    'read: loop {
        let n = match read_half.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                tracing::debug!(peer = conn.peer.as_str(), error = %e, "socket read failed");
                break;
            }
        };

        for frame in codec.feed(&chunk[..n]) {
            match frame {
                Ok(message) => {
                    if conn.dispatch(message) == Flow::Close {
                        break 'read;
                    }
                }
                // Malformed frame: log, drop, keep the connection.
                Err(e) => {
                    tracing::warn!(peer = conn.peer.as_str(), error = %e, "dropping malformed frame")
                }
            }
        }
    }

    conn.teardown();

    // Flush-then-close: dropping the connection drops the last sender, the
    // writer drains whatever is queued (including any terminal reply),
    // flushes, and shuts the socket down.
    drop(conn);
    let _ = writer.await;
}

impl Connection {
    /// Dispatch one parsed message against the current phase. Anything the
    /// phase does not accept is logged and ignored without a transition.
    fn dispatch(&mut self, message: ProtocolMessage) -> Flow {
        match self.phase {
            Phase::AwaitingKey => match message {
                ProtocolMessage::PublicKey { sender, content, .. } => {
                    self.on_public_key(sender, content)
                }
                other => self.ignore("awaiting_key", &other),
            },
            Phase::AwaitingAuth => match message {
                ProtocolMessage::Auth { content, nonce, tag, .. } => {
                    self.on_auth(&content, &nonce, &tag)
                }
                other => self.ignore("awaiting_auth", &other),
            },
            Phase::Authenticated => match message {
                ProtocolMessage::Message { content, nonce, tag, sent_at, .. } => {
                    self.on_chat(&content, &nonce, &tag, sent_at)
                }
                other => self.ignore("authenticated", &other),
            },
        }
    }

    /// AwaitingKey: arbitrate the username, establish the session secret,
    /// and either authenticate immediately or demand a password.
    fn on_public_key(&mut self, username: String, public_key_pem: String) -> Flow {
        if !valid_username(&username) {
            tracing::warn!(
                peer = self.peer.as_str(),
                username = username.as_str(),
                "rejecting username outside the 3-20 alphanumeric policy"
            );
            self.send(ProtocolMessage::UsernameResult {
                outcome: UsernameOutcome::Invalid,
                timestamp: now_millis(),
            });
            return Flow::Close;
        }

        let secret = SessionSecret::generate();
        let wrapped = match wrap_secret(&public_key_pem, &secret) {
            Ok(wrapped) => wrapped,
            // Key-exchange failure is connection-fatal: without a shared
            // secret nothing downstream can work.
            Err(e) => {
                tracing::warn!(
                    peer = self.peer.as_str(),
                    username = username.as_str(),
                    error = %e,
                    "key exchange failed, closing"
                );
                return Flow::Close;
            }
        };

        let authenticated = self.config.password.is_none();
        let session = ClientSession {
            sender: self.outbound.clone(),
            secret: secret.clone(),
            authenticated,
        };
        if !self.registry.try_insert(&username, session) {
            tracing::info!(
                peer = self.peer.as_str(),
                username = username.as_str(),
                "username already connected"
            );
            self.send(ProtocolMessage::UsernameResult {
                outcome: UsernameOutcome::Taken,
                timestamp: now_millis(),
            });
            return Flow::Close;
        }

        self.send(ProtocolMessage::PublicKey {
            sender: SERVER_NAME.to_string(),
            content: BASE64.encode(&wrapped),
            timestamp: now_millis(),
        });
        self.username = Some(username.clone());
        self.secret = Some(secret);

        if self.config.password.is_some() {
            self.phase = Phase::AwaitingAuth;
            self.send(ProtocolMessage::AuthResult {
                outcome: AuthOutcome::PasswordRequired,
                timestamp: now_millis(),
            });
        } else {
            self.phase = Phase::Authenticated;
            self.send(ProtocolMessage::AuthResult {
                outcome: AuthOutcome::Authenticated,
                timestamp: now_millis(),
            });
            self.registry.broadcast_system(
                &ProtocolMessage::Join { sender: username.clone(), timestamp: now_millis() },
                &username,
            );
            tracing::info!(username = username.as_str(), "joined");
        }
        Flow::Continue
    }

    /// AwaitingAuth: unseal the presented password and compare.
    fn on_auth(&mut self, content: &str, nonce: &str, tag: &str) -> Flow {
        let Some(username) = self.username.clone() else {
            tracing::error!(peer = self.peer.as_str(), "auth phase without a session");
            return Flow::Close;
        };
        let Some(secret) = self.secret.as_ref() else {
            tracing::error!(peer = self.peer.as_str(), "auth phase without a secret");
            return Flow::Close;
        };
        let Some(expected) = self.config.password.as_deref() else {
            tracing::error!(peer = self.peer.as_str(), "auth phase without a configured password");
            return Flow::Close;
        };

        // An envelope that fails to open cannot be compared; it fails the
        // authentication rather than being dropped, since the session
        // cannot progress without it.
        let presented = match open(secret, nonce, content, tag) {
            Ok(bytes) => String::from_utf8(bytes).ok(),
            Err(e) => {
                tracing::warn!(username = username.as_str(), error = %e, "auth envelope failed to open");
                None
            }
        };

        if presented.as_deref() == Some(expected) {
            self.registry.mark_authenticated(&username);
            self.phase = Phase::Authenticated;
            self.send(ProtocolMessage::AuthResult {
                outcome: AuthOutcome::Authenticated,
                timestamp: now_millis(),
            });
            self.registry.broadcast_system(
                &ProtocolMessage::Join { sender: username.clone(), timestamp: now_millis() },
                &username,
            );
            tracing::info!(username = username.as_str(), "authenticated and joined");
            Flow::Continue
        } else {
            tracing::warn!(username = username.as_str(), "authentication failed");
            self.send(ProtocolMessage::AuthResult {
                outcome: AuthOutcome::AuthenticationFailed,
                timestamp: now_millis(),
            });
            // Teardown removes the never-authenticated session; no Leave
            // is broadcast because no Join was.
            Flow::Close
        }
    }

    /// Authenticated: unseal the chat line and relay it, or honor a leave.
    fn on_chat(&mut self, content: &str, nonce: &str, tag: &str, sent_at: i64) -> Flow {
        let Some(username) = self.username.as_deref() else {
            tracing::error!(peer = self.peer.as_str(), "chat phase without a session");
            return Flow::Close;
        };
        let Some(secret) = self.secret.as_ref() else {
            tracing::error!(peer = self.peer.as_str(), "chat phase without a secret");
            return Flow::Close;
        };

        // One undecryptable message drops only itself.
        let plaintext = match open(secret, nonce, content, tag) {
            Ok(plaintext) => plaintext,
            Err(e) => {
                tracing::warn!(username, error = %e, "dropping undecryptable message");
                return Flow::Continue;
            }
        };
        let text = match String::from_utf8(plaintext) {
            Ok(text) => text,
            Err(_) => {
                tracing::warn!(username, "dropping non-utf8 chat payload");
                return Flow::Continue;
            }
        };

        if text == LEAVE_COMMAND {
            tracing::info!(username, "leaving");
            return Flow::Close;
        }

        self.registry.relay_chat(username, &text, sent_at);
        Flow::Continue
    }

    fn ignore(&self, phase: &'static str, message: &ProtocolMessage) -> Flow {
        tracing::warn!(
            peer = self.peer.as_str(),
            phase,
            message = ?message,
            "unexpected message for phase, ignoring"
        );
        Flow::Continue
    }

    fn send(&self, message: ProtocolMessage) {
        if self.outbound.send(message).is_err() {
            tracing::debug!(peer = self.peer.as_str(), "writer task gone, dropping frame");
        }
    }

    /// Idempotent teardown: registry removal and the Leave broadcast happen
    /// at most once, however many close/error paths fire.
    fn teardown(&mut self) {
        if self.disconnected {
            return;
        }
        self.disconnected = true;

        if let Some(username) = self.username.take() {
            if let Some(session) = self.registry.remove(&username) {
                if session.authenticated {
                    self.registry.broadcast_system(
                        &ProtocolMessage::Leave {
                            sender: username.clone(),
                            timestamp: now_millis(),
                        },
                        &username,
                    );
                }
            }
            tracing::info!(username = username.as_str(), "session closed");
        }
        // Dropping the secret zeroizes it.
        self.secret = None;
    }
}

// ── Writer Task ───────────────────────────────────────────────────────────────

/// Owns the write half: encodes, writes, and flushes outbound frames in
/// order, then shuts the socket down once every sender is gone.
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
