//! Server state: configuration, the session registry, and the relay.
//!
//! The registry is the only cross-connection shared state. Every insert,
//! uniqueness lookup, removal, and broadcast snapshot goes through its one
//! mutex; per-connection mutation stays inside the owning handler task.
//! The lock is held only to mutate or snapshot the map, never across
//! encryption or socket I/O, so one stalled peer cannot delay delivery to
//! others (each session drains its own writer queue).

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use murmur_core::crypto::{seal, SessionSecret};
use murmur_core::protocol::{now_millis, ProtocolMessage};

/// Default listening port.
pub const DEFAULT_PORT: u16 = 25525;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    /// When set, sessions must present this password before chatting.
    pub password: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            password: None,
        }
    }
}

/// A connected session's outbound channel. The channel feeds that socket's
/// writer task, which serializes all writes to the peer.
pub type ClientSender = mpsc::UnboundedSender<ProtocolMessage>;

/// Registry-resident record for one live connection.
///
/// The handler task owns the connection; this record exists so broadcasts
/// and uniqueness checks can reach it. It is inserted exactly once (when
/// key exchange completes) and removed exactly once (first disconnect
/// notice, guarded by the handler's latch).
pub struct ClientSession {
    pub sender: ClientSender,
    pub secret: SessionSecret,
    pub authenticated: bool,
}

/// Username → live session map behind a single mutex.
#[derive(Clone, Default)]
pub struct Registry {
    sessions: Arc<Mutex<HashMap<String, ClientSession>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically insert a session if the username is free. Returns false
    /// (and leaves the map untouched) when the name is already connected.
    pub fn try_insert(&self, username: &str, session: ClientSession) -> bool {
        let mut sessions = self.sessions.lock();
        if sessions.contains_key(username) {
            return false;
        }
        sessions.insert(username.to_string(), session);
        true
    }

    /// Flip a session's authenticated flag after a password match.
    pub fn mark_authenticated(&self, username: &str) {
        if let Some(session) = self.sessions.lock().get_mut(username) {
            session.authenticated = true;
        }
    }

    /// Remove a session, returning its record. Callers gate this behind the
    /// connection's disconnect latch so removal happens at most once.
    pub fn remove(&self, username: &str) -> Option<ClientSession> {
        self.sessions.lock().remove(username)
    }

    pub fn contains(&self, username: &str) -> bool {
        self.sessions.lock().contains_key(username)
    }

    pub fn online_count(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn authenticated_count(&self) -> usize {
        self.sessions.lock().values().filter(|s| s.authenticated).count()
    }

    /// Send a plaintext system notice (Join/Leave) to every authenticated
    /// session except `except`.
    pub fn broadcast_system(&self, message: &ProtocolMessage, except: &str) {
        let recipients: Vec<(String, ClientSender)> = self
            .sessions
            .lock()
            .iter()
            .filter(|(name, session)| session.authenticated && name.as_str() != except)
            .map(|(name, session)| (name.clone(), session.sender.clone()))
            .collect();

        for (name, sender) in recipients {
            if sender.send(message.clone()).is_err() {
                tracing::debug!(recipient = name.as_str(), "dropping notice for closed session");
            }
        }
    }

    /// Relay a chat line: re-encrypt the plaintext independently for every
    /// other authenticated session under that session's own secret. One
    /// recipient's ciphertext is never reused for another.
    pub fn relay_chat(&self, from: &str, plaintext: &str, sent_at: i64) {
        let recipients: Vec<(String, ClientSender, SessionSecret)> = self
            .sessions
            .lock()
            .iter()
            .filter(|(name, session)| session.authenticated && name.as_str() != from)
            .map(|(name, session)| (name.clone(), session.sender.clone(), session.secret.clone()))
            .collect();

        let relayed_at = now_millis();
        for (name, sender, secret) in recipients {
            let envelope = match seal(&secret, plaintext.as_bytes()) {
                Ok(envelope) => envelope,
                Err(e) => {
                    tracing::error!(
                        recipient = name.as_str(),
                        error = %e,
                        "failed to re-encrypt for recipient"
                    );
                    continue;
                }
            };
            let message = ProtocolMessage::Message {
                sender: from.to_string(),
                content: envelope.ciphertext,
                nonce: envelope.nonce,
                tag: envelope.tag,
                sent_at,
                relayed_at: Some(relayed_at),
            };
            if sender.send(message).is_err() {
                tracing::debug!(recipient = name.as_str(), "dropping chat for closed session");
            }
        }
    }
}
