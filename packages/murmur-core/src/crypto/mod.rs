//! # Cryptography Module
//!
//! All cryptographic primitives used by Murmur.
//!
//! ## Session Key Establishment
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                    PER-CONNECTION KEY EXCHANGE                      │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │                                                                     │
//! │  CLIENT                                 SERVER                      │
//! │  ──────                                 ──────                      │
//! │                                                                     │
//! │  RSA-2048 keypair                                                   │
//! │  (fresh per process)                                                │
//! │        │                                                            │
//! │        │  public key (PKCS#1 PEM)                                   │
//! │        ├───────────────────────────────►                            │
//! │        │                                 SessionSecret::generate()  │
//! │        │                                 (random 256-bit key)       │
//! │        │                                        │                   │
//! │        │  RSA-OAEP(SHA-256) wrapped secret      │                   │
//! │        ◄────────────────────────────────────────┤                   │
//! │        │                                        │                   │
//! │  unwrap with private key                        │                   │
//! │        │                                        │                   │
//! │        ▼                                        ▼                   │
//! │  ┌──────────────────────────────────────────────────────────┐      │
//! │  │  Shared 256-bit session secret (lifetime = connection,   │      │
//! │  │  zeroized on teardown, never persisted)                  │      │
//! │  └──────────────────────────────────────────────────────────┘      │
//! │                                                                     │
//! │  All subsequent confidential payloads: AES-256-GCM with a fresh     │
//! │  random 96-bit nonce drawn inside the primitive and a 128-bit       │
//! │  authentication tag, each base64-encoded for transport.             │
//! │                                                                     │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```

mod encryption;
mod keys;

pub use encryption::{open, seal, SealedEnvelope, SessionSecret, KEY_SIZE, NONCE_SIZE, TAG_SIZE};
pub use keys::{wrap_secret, RsaKeyPair, RSA_KEY_BITS};
