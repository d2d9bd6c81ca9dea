//! Message payload encryption and decryption.
//!
//! Payloads are sealed with ChaCha20-Poly1305 under the per-peer shared key.
//! Every call draws a fresh random 96-bit nonce, which travels next to the
//! ciphertext in the envelope.

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Key, Nonce,
};
use rand::RngCore;

use crate::chat::ChatError;
use crate::crypto::SharedKey;

/// Nonce size for ChaCha20-Poly1305.
pub const NONCE_SIZE: usize = 12;

/// Poly1305 tag size appended to every ciphertext.
pub const TAG_SIZE: usize = 16;

/// Encrypt a plaintext message under `key`.
///
/// # Returns
///
/// A tuple of (nonce, ciphertext) on success. The ciphertext includes the tag.
pub fn encrypt_payload(
    plaintext: &str,
    key: &SharedKey,
) -> Result<([u8; NONCE_SIZE], Vec<u8>), ChatError> {
    let mut nonce_bytes = [0u8; NONCE_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);

    let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce_bytes), plaintext.as_bytes())
        .map_err(|e| ChatError::MalformedEnvelope(format!("encryption failed: {}", e)))?;

    Ok((nonce_bytes, ciphertext))
}

/// Decrypt a payload sealed by [`encrypt_payload`].
///
/// Any integrity failure, including a plaintext that is not UTF-8, is reported
/// as [`ChatError::AuthenticationFailure`]; partial or garbled output is never
/// returned.
pub fn decrypt_payload(
    nonce: &[u8; NONCE_SIZE],
    ciphertext: &[u8],
    key: &SharedKey,
) -> Result<String, ChatError> {
    if ciphertext.len() < TAG_SIZE {
        return Err(ChatError::AuthenticationFailure);
    }

    let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));
    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| ChatError::AuthenticationFailure)?;

    String::from_utf8(plaintext).map_err(|_| ChatError::AuthenticationFailure)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key(byte: u8) -> SharedKey {
        SharedKey::from_bytes([byte; 32])
    }

    #[test]
    fn test_payload_roundtrip() {
        let key = test_key(42);
        let (nonce, ct) = encrypt_payload("Hello, Bob!", &key).unwrap();
        let pt = decrypt_payload(&nonce, &ct, &key).unwrap();
        assert_eq!(pt, "Hello, Bob!");
    }

    #[test]
    fn test_unicode_and_empty() {
        let key = test_key(1);
        for msg in ["", "héllo wörld", "日本語 🚀"] {
            let (nonce, ct) = encrypt_payload(msg, &key).unwrap();
            assert_eq!(decrypt_payload(&nonce, &ct, &key).unwrap(), msg);
        }
    }

    #[test]
    fn test_ciphertext_includes_tag() {
        let key = test_key(3);
        let (_, ct) = encrypt_payload("abc", &key).unwrap();
        assert_eq!(ct.len(), 3 + TAG_SIZE);
    }

    #[test]
    fn test_wrong_key_fails() {
        let (nonce, ct) = encrypt_payload("secret", &test_key(1)).unwrap();
        let result = decrypt_payload(&nonce, &ct, &test_key(2));
        assert_eq!(result, Err(ChatError::AuthenticationFailure));
    }

    #[test]
    fn test_every_ciphertext_bit_flip_detected() {
        let key = test_key(9);
        let (nonce, ct) = encrypt_payload("tamper me", &key).unwrap();

        for i in 0..ct.len() {
            for bit in 0..8 {
                let mut tampered = ct.clone();
                tampered[i] ^= 1 << bit;
                assert_eq!(
                    decrypt_payload(&nonce, &tampered, &key),
                    Err(ChatError::AuthenticationFailure),
                    "flip at byte {} bit {} went undetected",
                    i,
                    bit
                );
            }
        }
    }

    #[test]
    fn test_every_nonce_bit_flip_detected() {
        let key = test_key(9);
        let (nonce, ct) = encrypt_payload("tamper me", &key).unwrap();

        for i in 0..NONCE_SIZE {
            for bit in 0..8 {
                let mut tampered = nonce;
                tampered[i] ^= 1 << bit;
                assert_eq!(
                    decrypt_payload(&tampered, &ct, &key),
                    Err(ChatError::AuthenticationFailure)
                );
            }
        }
    }

    #[test]
    fn test_truncated_ciphertext_fails() {
        let key = test_key(4);
        let (nonce, ct) = encrypt_payload("hello", &key).unwrap();
        assert_eq!(
            decrypt_payload(&nonce, &ct[..TAG_SIZE - 1], &key),
            Err(ChatError::AuthenticationFailure)
        );
    }

    #[test]
    fn test_fresh_nonce_per_call() {
        let key = test_key(5);
        let (n1, c1) = encrypt_payload("same", &key).unwrap();
        let (n2, c2) = encrypt_payload("same", &key).unwrap();

        assert_ne!(n1, n2);
        assert_ne!(c1, c2);
        assert_eq!(decrypt_payload(&n1, &c1, &key).unwrap(), "same");
        assert_eq!(decrypt_payload(&n2, &c2, &key).unwrap(), "same");
    }
}
