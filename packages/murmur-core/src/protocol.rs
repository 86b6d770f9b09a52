//! Wire protocol message definitions.
//!
//! Murmur speaks newline-delimited JSON over a plain TCP stream. Messages
//! are internally tagged; confidential variants (`message`, `auth`) carry
//! their payload as base64 ciphertext plus a base64 nonce and tag, while
//! system variants (`join`, `leave`, results) travel as plaintext, since
//! they carry no sensitive payload.

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Username the server signs its own frames with.
pub const SERVER_NAME: &str = "server";

/// Chat line that triggers a graceful disconnect instead of a relay.
pub const LEAVE_COMMAND: &str = "/leave";

/// Current wall-clock time as epoch milliseconds, the wire timestamp unit.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Username policy: 3–20 ASCII alphanumeric characters.
///
/// Enforced at the client prompt and again by the server before a session
/// is created.
pub fn valid_username(name: &str) -> bool {
    (3..=20).contains(&name.len()) && name.chars().all(|c| c.is_ascii_alphanumeric())
}

// ── Messages ──────────────────────────────────────────────────────────────────

/// A single protocol message, in either direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProtocolMessage {
    /// An encrypted chat line. Client → server it is sealed under the
    /// sender's session secret; server → client it has been re-sealed under
    /// the recipient's own secret.
    Message {
        sender: String,
        /// Base64 AES-256-GCM ciphertext.
        content: String,
        /// Base64 96-bit nonce.
        nonce: String,
        /// Base64 128-bit authentication tag.
        tag: String,
        /// Sender's send time (epoch millis), preserved across the relay.
        sent_at: i64,
        /// Server receipt time, stamped on relayed copies.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        relayed_at: Option<i64>,
    },

    /// A member joined the room. Plaintext system notice.
    Join { sender: String, timestamp: i64 },

    /// A member left the room. Plaintext system notice.
    Leave { sender: String, timestamp: i64 },

    /// Key exchange. Client → server: `sender` is the requested username
    /// and `content` the client's PKCS#1 PEM public key. Server → client:
    /// `content` is the base64 RSA-OAEP-wrapped session secret.
    PublicKey {
        sender: String,
        content: String,
        timestamp: i64,
    },

    /// Password submission, sealed under the session secret.
    Auth {
        sender: String,
        content: String,
        nonce: String,
        tag: String,
        timestamp: i64,
    },

    /// Authentication progress and outcome.
    AuthResult {
        outcome: AuthOutcome,
        timestamp: i64,
    },

    /// Username arbitration outcome. Only sent on rejection; acceptance is
    /// implied by the server's `public_key` reply.
    UsernameResult {
        outcome: UsernameOutcome,
        timestamp: i64,
    },
}

/// Outcome field of an `auth_result` message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthOutcome {
    /// The server is password-protected; an `auth` message must follow.
    PasswordRequired,
    /// The session is authenticated and may chat.
    Authenticated,
    /// Wrong password; the server will close the connection.
    AuthenticationFailed,
}

/// Outcome field of a `username_result` message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsernameOutcome {
    /// The requested username is already connected.
    Taken,
    /// The requested username violates the 3–20 alphanumeric policy.
    Invalid,
}
