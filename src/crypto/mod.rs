//! Cryptographic primitives for relaychat.
//!
//! This module provides:
//! - Ephemeral X25519 key pairs, one per connection
//! - Per-peer AEAD key derivation (X25519 + HKDF-SHA256) with a session cache
//!
//! Payload encryption itself lives in [`crate::chat::protocol`], next to the
//! wire format it feeds.

pub mod keys;

pub use keys::{KeyManager, PeerKey, SessionKeyPair, SharedKey, PUBLIC_KEY_SIZE, SHARED_KEY_SIZE};
