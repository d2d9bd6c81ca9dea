//! # Relaychat Chat Module
//!
//! Encrypted one-to-one messaging over a broadcast relay.
//!
//! The relay sees only envelopes and the roster of connected participants.
//! Every participant generates a fresh X25519 key pair per connection and
//! derives a separate AEAD key for each peer it talks to.
//!
//! ## Security Model
//!
//! - **Ephemeral keys**: new key pair on every connect, zeroized on close
//! - **Per-peer keys**: X25519 + HKDF-SHA256, cached for the session only
//! - **ChaCha20-Poly1305** with a random nonce per message
//! - **Fail closed**: tampered messages become error markers, never text
//! - **Client-side filtering**: messages for other participants are dropped

mod client;
mod config;
mod delivery;
mod error;
pub mod protocol;
mod roster;
mod session;
pub mod transport;

pub use client::{ChatClient, SessionEvent};
pub use config::{
    ChatConfig, DEFAULT_COMMAND_BUFFER, DEFAULT_EVENT_BUFFER, DEFAULT_IDLE_TIMEOUT_SECS,
    DEFAULT_MAX_MESSAGE_LEN, DEFAULT_RELAY_URL,
};
pub use delivery::{
    ConversationEntry, Delivery, DeliveryQueue, Direction, HistoryItem, HistoryView,
};
pub use error::ChatError;
pub use protocol::{Envelope, Identity, MessageEnvelope};
pub use roster::{RosterChange, RosterTracker};
pub use session::{
    CloseReason, DecryptJob, DecryptResult, Inbound, Outbound, Session, SessionSnapshot,
    SessionState,
};
