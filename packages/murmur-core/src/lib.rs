//! # Murmur Core
//!
//! Shared library for the Murmur terminal group chat: the wire protocol,
//! the framing codec, the session cryptography, and the client-side
//! session state machine. The relay server builds on these same pieces.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                         MURMUR CORE MODULES                         │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │                                                                     │
//! │  ┌─────────────┐   ┌─────────────┐   ┌──────────────────────────┐  │
//! │  │  protocol   │   │   framing   │   │          crypto          │  │
//! │  │             │   │             │   │                          │  │
//! │  │ - tagged    │   │ - newline   │   │ - RSA-2048 + OAEP wrap   │  │
//! │  │   messages  │   │   delimited │   │ - AES-256-GCM seal/open  │  │
//! │  │ - outcomes  │   │ - chunk     │   │ - zeroized secrets       │  │
//! │  │ - username  │   │   buffering │   │                          │  │
//! │  │   policy    │   │             │   │                          │  │
//! │  └──────┬──────┘   └──────┬──────┘   └────────────┬─────────────┘  │
//! │         │                 │                       │                │
//! │         └────────────────┬┴───────────────────────┘                │
//! │                          ▼                                         │
//! │  ┌──────────────────────────────────────────────────────────────┐  │
//! │  │                          client                              │  │
//! │  │   connect → key exchange → (password?) → authenticated       │  │
//! │  │   reader/writer tasks, event stream, reconnect-on-collision  │  │
//! │  └──────────────────────────────────────────────────────────────┘  │
//! │                                                                     │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Security Model
//!
//! The relay is a trusted intermediary: it holds every connection's session
//! secret and observes plaintext in memory while re-encrypting chat for
//! each recipient. What the protocol does guarantee: secrets travel only
//! RSA-OAEP-wrapped, payloads are AES-256-GCM authenticated, nonces are
//! generated inside the seal primitive and never reused under a key, and
//! secrets are zeroized at teardown and never persisted.

#![warn(missing_docs)]

pub mod client;
pub mod crypto;
pub mod error;
pub mod framing;
pub mod protocol;

pub use client::{ChatClient, ClientEvent, ClientPhase};
pub use crypto::{RsaKeyPair, SessionSecret};
pub use error::{Error, Result};
pub use framing::FrameCodec;
pub use protocol::{AuthOutcome, ProtocolMessage, UsernameOutcome};
