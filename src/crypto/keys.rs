//! Session key management for relaychat.
//!
//! Each connection gets one ephemeral X25519 key pair. Per-peer AEAD keys are
//! derived from it on demand and cached until the connection ends. Nothing here
//! is persisted, and all secret material is zeroized when cleared or dropped.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use hkdf::Hkdf;
use rand::rngs::OsRng;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::Sha256;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::chat::ChatError;

/// Size of an X25519 public key in bytes.
pub const PUBLIC_KEY_SIZE: usize = 32;

/// Size of a derived AEAD key in bytes.
pub const SHARED_KEY_SIZE: usize = 32;

/// HKDF info string for per-peer AEAD keys.
const HKDF_INFO: &[u8] = b"RELAYCHAT-V1-AEAD-KEY";

// ============================================================================
// Public keys
// ============================================================================

/// Opaque public key bytes identifying a participant.
///
/// This is the uniqueness key for roster entries; display names may collide.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerKey([u8; PUBLIC_KEY_SIZE]);

impl PeerKey {
    /// Wraps raw public key bytes.
    pub fn from_bytes(bytes: [u8; PUBLIC_KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Builds a key from a slice, checking the length.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, ChatError> {
        let arr: [u8; PUBLIC_KEY_SIZE] = bytes.try_into().map_err(|_| {
            ChatError::InvalidPeerKey(format!(
                "expected {} bytes, got {}",
                PUBLIC_KEY_SIZE,
                bytes.len()
            ))
        })?;
        Ok(Self(arr))
    }

    /// Returns the raw key bytes.
    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_SIZE] {
        &self.0
    }

    /// Full lowercase hex encoding, as used on the wire.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Short form for logs and display (first 4 bytes).
    pub fn fingerprint(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl fmt::Debug for PeerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerKey({})", self.fingerprint())
    }
}

impl fmt::Display for PeerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for PeerKey {
    type Err = ChatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s.trim())
            .map_err(|e| ChatError::InvalidPeerKey(format!("invalid hex: {}", e)))?;
        Self::from_slice(&bytes)
    }
}

impl Serialize for PeerKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for PeerKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// Symmetric keys
// ============================================================================

/// A 256-bit AEAD key shared with exactly one peer.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SharedKey([u8; SHARED_KEY_SIZE]);

impl SharedKey {
    /// Wraps raw key bytes.
    pub fn from_bytes(bytes: [u8; SHARED_KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Returns the raw key bytes.
    pub fn as_bytes(&self) -> &[u8; SHARED_KEY_SIZE] {
        &self.0
    }
}

impl fmt::Debug for SharedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SharedKey([REDACTED])")
    }
}

// ============================================================================
// Key pair
// ============================================================================

/// Ephemeral key pair for one connection lifetime.
pub struct SessionKeyPair {
    secret: StaticSecret,
    public: PeerKey,
}

impl fmt::Debug for SessionKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Don't expose private key in debug output
        f.debug_struct("SessionKeyPair")
            .field("public", &self.public.to_hex())
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

impl SessionKeyPair {
    /// Generates a fresh key pair from the OS random source.
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PeerKey(*PublicKey::from(&secret).as_bytes());
        Self { secret, public }
    }

    /// Returns the public half.
    pub fn public_key(&self) -> PeerKey {
        self.public
    }

    /// ECDH with `peer` followed by HKDF-SHA256 into an AEAD key.
    ///
    /// The salt is both public keys in sorted order, so both ends derive the
    /// same key regardless of who computes it.
    fn agree(&self, peer: &PeerKey) -> Result<SharedKey, ChatError> {
        let shared = self.secret.diffie_hellman(&PublicKey::from(peer.0));
        if !shared.was_contributory() {
            return Err(ChatError::InvalidPeerKey(format!(
                "{} is not a usable curve point",
                peer.fingerprint()
            )));
        }

        let (first, second) = if self.public <= *peer {
            (&self.public, peer)
        } else {
            (peer, &self.public)
        };
        let mut salt = [0u8; PUBLIC_KEY_SIZE * 2];
        salt[..PUBLIC_KEY_SIZE].copy_from_slice(first.as_bytes());
        salt[PUBLIC_KEY_SIZE..].copy_from_slice(second.as_bytes());

        let hk = Hkdf::<Sha256>::new(Some(&salt), shared.as_bytes());
        let mut okm = [0u8; SHARED_KEY_SIZE];
        hk.expand(HKDF_INFO, &mut okm)
            .map_err(|_| ChatError::InvalidPeerKey("key derivation failed".to_string()))?;

        let key = SharedKey(okm);
        okm.zeroize();
        Ok(key)
    }
}

// ============================================================================
// Key manager
// ============================================================================

/// Owns the session key pair and the shared secret cache.
///
/// The private key never leaves this type; callers only see public keys and
/// derived symmetric keys.
#[derive(Debug, Default)]
pub struct KeyManager {
    keypair: Option<SessionKeyPair>,
    cache: HashMap<PeerKey, SharedKey>,
}

impl KeyManager {
    /// Creates an empty manager with no key pair.
    pub fn new() -> Self {
        Self::default()
    }

    /// Generates a fresh session key pair, discarding any previous one.
    ///
    /// The shared secret cache is emptied because every cached key was bound
    /// to the old private key.
    pub fn generate_session_key_pair(&mut self) -> PeerKey {
        self.clear();
        let keypair = SessionKeyPair::generate();
        let public = keypair.public_key();
        self.keypair = Some(keypair);
        tracing::debug!(key = %public.fingerprint(), "generated session key pair");
        public
    }

    /// Public key of the current session, if one exists.
    pub fn public_key(&self) -> Option<PeerKey> {
        self.keypair.as_ref().map(SessionKeyPair::public_key)
    }

    /// Returns the AEAD key shared with `peer`, deriving and caching it on first use.
    pub fn derive_shared_secret(&mut self, peer: &PeerKey) -> Result<SharedKey, ChatError> {
        if let Some(key) = self.cache.get(peer) {
            return Ok(key.clone());
        }

        let keypair = self.keypair.as_ref().ok_or(ChatError::NotConnected)?;
        let key = keypair.agree(peer)?;
        self.cache.insert(*peer, key.clone());
        tracing::debug!(peer = %peer.fingerprint(), "derived shared secret");
        Ok(key)
    }

    /// Number of cached per-peer keys.
    pub fn cached_secrets(&self) -> usize {
        self.cache.len()
    }

    /// Drops the key pair and every cached secret (all zeroized on drop).
    pub fn clear(&mut self) {
        self.cache.clear();
        self.keypair = None;
    }
}
