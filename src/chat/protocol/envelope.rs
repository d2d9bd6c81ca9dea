//! Wire envelope types for the relay protocol.
//!
//! These types define what actually gets sent over the connection. Every frame
//! is a JSON object tagged by `kind`; each variant carries exactly the fields
//! valid for it, so malformed combinations fail at deserialization.

use serde::{Deserialize, Serialize};

use crate::chat::protocol::payload::{decrypt_payload, encrypt_payload, NONCE_SIZE};
use crate::chat::ChatError;
use crate::crypto::{PeerKey, SharedKey};

/// Format used for envelope timestamps.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A participant as announced to and broadcast by the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Self-declared display name (not unique).
    pub name: String,
    /// Session public key (unique).
    #[serde(rename = "publicKey")]
    pub public_key: PeerKey,
}

impl Identity {
    /// Create a new identity.
    pub fn new(name: impl Into<String>, public_key: PeerKey) -> Self {
        Self {
            name: name.into(),
            public_key,
        }
    }
}

/// An encrypted message between two participants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageEnvelope {
    /// Sender's session public key.
    pub from: PeerKey,
    /// Recipient's session public key.
    pub to: PeerKey,
    /// Nonce used for this ciphertext only.
    #[serde(with = "hex_nonce")]
    pub nonce: [u8; NONCE_SIZE],
    /// AEAD ciphertext including the tag.
    #[serde(with = "hex_bytes")]
    pub ciphertext: Vec<u8>,
    /// Sender's local time when the message was sealed.
    pub timestamp: String,
}

impl MessageEnvelope {
    /// Encrypt `plaintext` for `to` and stamp it with the current local time.
    pub fn seal(
        from: PeerKey,
        to: PeerKey,
        plaintext: &str,
        key: &SharedKey,
    ) -> Result<Self, ChatError> {
        let (nonce, ciphertext) = encrypt_payload(plaintext, key)?;
        Ok(Self {
            from,
            to,
            nonce,
            ciphertext,
            timestamp: local_timestamp(),
        })
    }

    /// Decrypt the payload with the shared key for the sender.
    pub fn open(&self, key: &SharedKey) -> Result<String, ChatError> {
        decrypt_payload(&self.nonce, &self.ciphertext, key)
    }
}

/// A single frame exchanged with the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Envelope {
    /// First frame of a session: announces the local identity.
    Hello {
        /// The announcing participant.
        identity: Identity,
    },
    /// Full replacement of the participant list.
    Roster {
        /// Every currently connected participant, in relay order.
        identities: Vec<Identity>,
    },
    /// An encrypted message.
    Message(MessageEnvelope),
}

impl Envelope {
    /// Serialize to a text frame for transport.
    pub fn to_frame(&self) -> Result<String, ChatError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse a text frame received from the relay.
    pub fn from_frame(frame: &str) -> Result<Self, ChatError> {
        Ok(serde_json::from_str(frame)?)
    }

    /// The wire `kind` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            Envelope::Hello { .. } => "hello",
            Envelope::Roster { .. } => "roster",
            Envelope::Message(_) => "message",
        }
    }
}

/// Current local time in [`TIMESTAMP_FORMAT`].
pub fn local_timestamp() -> String {
    chrono::Local::now().format(TIMESTAMP_FORMAT).to_string()
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}

mod hex_nonce {
    use serde::{Deserialize, Deserializer, Serializer};

    use super::NONCE_SIZE;

    pub fn serialize<S: Serializer>(
        nonce: &[u8; NONCE_SIZE],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(nonce))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<[u8; NONCE_SIZE], D::Error> {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(s).map_err(serde::de::Error::custom)?;
        bytes.as_slice().try_into().map_err(|_| {
            serde::de::Error::custom(format!(
                "nonce must be {} bytes, got {}",
                NONCE_SIZE,
                bytes.len()
            ))
        })
    }
}
