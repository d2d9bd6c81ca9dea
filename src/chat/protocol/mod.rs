//! Relay protocol types and payload crypto.
//!
//! - **Envelopes** tagged by `kind` (hello, roster, message) as JSON text frames
//! - **Payload AEAD** (ChaCha20-Poly1305, fresh random nonce per message)
//!
//! Nothing here knows about sessions or rosters; it is a pure function of
//! bytes and keys.

mod envelope;
mod payload;

pub use envelope::{local_timestamp, Envelope, Identity, MessageEnvelope, TIMESTAMP_FORMAT};
pub use payload::{decrypt_payload, encrypt_payload, NONCE_SIZE, TAG_SIZE};
