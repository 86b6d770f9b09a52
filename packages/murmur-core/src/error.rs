//! # Error Handling
//!
//! Error types for the Murmur core library, grouped by the layer that
//! raises them:
//!
//! - **Crypto**: key generation, key wrap/unwrap, seal/open failures.
//!   A failed key exchange is connection-fatal; a failed `open` on a chat
//!   message drops only that message.
//! - **Protocol**: a completed frame that does not parse. The frame is
//!   dropped and the connection continues.
//! - **Transport**: socket-level failures and unreachable peers. These
//!   tear down the affected session only.
//! - **State**: an operation attempted in the wrong session phase
//!   (e.g. sending chat before authentication completes).

use thiserror::Error;

/// Result type alias for Murmur core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the Murmur core library.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Crypto Errors
    // ========================================================================
    /// Asymmetric keypair generation failed.
    #[error("key generation failed: {0}")]
    KeyGenerationFailed(String),

    /// Wrapping or unwrapping the session secret failed. Connection-fatal:
    /// without a shared secret the session cannot proceed.
    #[error("key exchange failed: {0}")]
    KeyExchangeFailed(String),

    /// A public key could not be parsed from its PEM encoding.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// Symmetric encryption failed.
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),

    /// Symmetric decryption failed: tag mismatch, malformed nonce, or
    /// malformed encoding. No partial plaintext is ever returned.
    #[error("decryption failed: {0}")]
    DecryptionFailed(String),

    // ========================================================================
    // Protocol Errors
    // ========================================================================
    /// A completed frame did not parse as a protocol message.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// An outbound message could not be serialized.
    #[error("serialization failed: {0}")]
    SerializationFailed(String),

    // ========================================================================
    // Transport Errors
    // ========================================================================
    /// Could not reach or connect to the server.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// The connection closed while an operation was in flight.
    #[error("connection closed")]
    ConnectionClosed,

    /// Underlying socket I/O error.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    // ========================================================================
    // State Errors
    // ========================================================================
    /// Operation attempted in the wrong session phase.
    #[error("invalid state: {0}")]
    InvalidState(String),
}
