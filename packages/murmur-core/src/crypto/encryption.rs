//! AES-256-GCM payload encryption.
//!
//! Every confidential wire payload is sealed with the connection's session
//! secret. The nonce is drawn from the OS CSPRNG *inside* [`seal`] and is
//! never caller-supplied, so nonce reuse under one key cannot happen short
//! of an RNG failure. The 128-bit tag is verified before any plaintext is
//! released; a mismatch fails closed.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce as AesNonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use rand::RngCore;
use zeroize::ZeroizeOnDrop;

use crate::error::{Error, Result};

/// Size of the AES-GCM nonce in bytes (96 bits).
pub const NONCE_SIZE: usize = 12;

/// Size of the AES-GCM authentication tag in bytes (128 bits).
pub const TAG_SIZE: usize = 16;

/// Size of the session secret in bytes (256 bits).
pub const KEY_SIZE: usize = 32;

/// A per-connection 256-bit symmetric key.
///
/// Generated once by the server when a connection completes key exchange,
/// transported to the client wrapped under its RSA public key, and dropped
/// (and thereby zeroized) when the connection tears down. Never persisted.
#[derive(Clone, ZeroizeOnDrop)]
pub struct SessionSecret([u8; KEY_SIZE]);

impl SessionSecret {
    /// Generate a fresh random secret from the OS CSPRNG.
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Create from existing bytes (e.g. an unwrapped key-exchange payload).
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Get the raw key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

/// The transport-ready output of [`seal`]: nonce, ciphertext, and tag as
/// three independently base64-encoded fields, matching the wire layout of
/// confidential protocol messages.
#[derive(Debug, Clone)]
pub struct SealedEnvelope {
    /// Base64-encoded 96-bit nonce.
    pub nonce: String,
    /// Base64-encoded ciphertext (tag excluded).
    pub ciphertext: String,
    /// Base64-encoded 128-bit authentication tag.
    pub tag: String,
}

/// Encrypt a plaintext under a session secret.
///
/// Draws a fresh random nonce per call. Returns the nonce, ciphertext, and
/// authentication tag as separate base64 fields.
pub fn seal(secret: &SessionSecret, plaintext: &[u8]) -> Result<SealedEnvelope> {
    let mut nonce = [0u8; NONCE_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut nonce);

    let cipher = Aes256Gcm::new_from_slice(secret.as_bytes())
        .map_err(|e| Error::EncryptionFailed(format!("invalid key: {e}")))?;

    let mut ciphertext = cipher
        .encrypt(AesNonce::from_slice(&nonce), plaintext)
        .map_err(|e| Error::EncryptionFailed(e.to_string()))?;

    // aes-gcm appends the tag; carry it as its own field on the wire.
    let tag = ciphertext.split_off(ciphertext.len() - TAG_SIZE);

    Ok(SealedEnvelope {
        nonce: BASE64.encode(nonce),
        ciphertext: BASE64.encode(&ciphertext),
        tag: BASE64.encode(&tag),
    })
}

/// Decrypt a sealed payload under a session secret.
///
/// The tag is verified before any plaintext is released. Malformed base64,
/// a wrong-length nonce or tag, or a tag mismatch all fail closed.
pub fn open(secret: &SessionSecret, nonce: &str, ciphertext: &str, tag: &str) -> Result<Vec<u8>> {
    let nonce = BASE64
        .decode(nonce)
        .map_err(|_| Error::DecryptionFailed("malformed nonce encoding".into()))?;
    if nonce.len() != NONCE_SIZE {
        return Err(Error::DecryptionFailed("wrong nonce length".into()));
    }

    let mut data = BASE64
        .decode(ciphertext)
        .map_err(|_| Error::DecryptionFailed("malformed ciphertext encoding".into()))?;
    let tag = BASE64
        .decode(tag)
        .map_err(|_| Error::DecryptionFailed("malformed tag encoding".into()))?;
    if tag.len() != TAG_SIZE {
        return Err(Error::DecryptionFailed("wrong tag length".into()));
    }
    data.extend_from_slice(&tag);

    let cipher = Aes256Gcm::new_from_slice(secret.as_bytes())
        .map_err(|e| Error::DecryptionFailed(format!("invalid key: {e}")))?;

    cipher
        .decrypt(AesNonce::from_slice(&nonce), data.as_slice())
        .map_err(|_| Error::DecryptionFailed("authentication tag mismatch".into()))
}
