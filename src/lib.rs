//! # Relaychat - End-to-end encrypted chat over a relay
//!
//! Relaychat is the session and cryptographic core of a chat client that
//! talks to its peers through a single relay connection. The relay forwards
//! opaque envelopes and broadcasts who is online; it never sees plaintext.
//!
//! ## Overview
//!
//! - Each connection generates an ephemeral X25519 key pair
//! - Peers derive a shared AEAD key from their public keys (X25519 + HKDF)
//! - Messages are sealed with ChaCha20-Poly1305 under a fresh random nonce
//! - Decryption runs off the dispatch loop; results are released in arrival order
//! - Nothing is persisted: keys and history live only for the session
//!
//! ## Example Usage
//!
//! ```no_run
//! use relaychat::chat::{ChatClient, ChatConfig};
//!
//! # async fn run() -> Result<(), relaychat::chat::ChatError> {
//! let mut client = ChatClient::websocket(ChatConfig::default());
//! client.connect("alice").await?;
//! client.wait_active().await?;
//!
//! let bob = client.snapshot().peers.first().cloned();
//! if let Some(bob) = bob {
//!     client.send(&bob.public_key, "hi").await?;
//! }
//!
//! client.disconnect().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`crypto`]: Session key pairs and per-peer key derivation
//! - [`chat`]: Wire protocol, session state machine, transports and client

pub mod chat;
pub mod crypto;

pub use chat::{ChatClient, ChatConfig, ChatError, SessionEvent, SessionState};
pub use crypto::PeerKey;
