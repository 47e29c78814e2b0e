//! Envelope encryption for stored credentials
//!
//! Secret-bearing profile fields are encrypted at rest with AES-256-GCM.
//! Ciphertexts are marked with an `enc:` prefix so plaintext rows written
//! before a key was configured keep decrypting to themselves.

use aes_gcm::aead::{Aead, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Key, KeyInit, Nonce};
use base64::Engine;
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD};
use thiserror::Error;

/// Marker prefix carried by every ciphertext value.
pub const ENC_PREFIX: &str = "enc:";

const NONCE_LEN: usize = 12;

/// Errors from key setup and value decryption.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("encryption key is not valid base64")]
    InvalidKeyEncoding,

    #[error("encryption key must decode to exactly 32 bytes, got {0}")]
    InvalidKeyLength(usize),

    /// Deliberately does not say which step failed.
    #[error("failed to decrypt value")]
    DecryptFailed,

    #[error("failed to encrypt value")]
    EncryptFailed,
}

/// Whether a stored value carries the ciphertext marker.
#[must_use]
pub fn is_encrypted(value: &str) -> bool {
    value.starts_with(ENC_PREFIX)
}

/// AES-256-GCM cipher handle over a 32-byte key.
#[derive(Clone)]
pub struct SecretCipher {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for SecretCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretCipher").finish_non_exhaustive()
    }
}

impl SecretCipher {
    /// Build a cipher from a base64-encoded 32-byte key. Standard and
    /// URL-safe alphabets are accepted, padded or raw.
    pub fn new(base64_key: &str) -> Result<Self, CryptoError> {
        let raw = decode_key(base64_key.trim())?;
        if raw.len() != 32 {
            return Err(CryptoError::InvalidKeyLength(raw.len()));
        }
        let key = Key::<Aes256Gcm>::from_slice(&raw);
        Ok(Self {
            cipher: Aes256Gcm::new(key),
        })
    }

    /// Encrypt a plaintext into `enc:base64(nonce ‖ ciphertext ‖ tag)`.
    /// A fresh random nonce is drawn for every call.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, CryptoError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| CryptoError::EncryptFailed)?;
        let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&ciphertext);
        Ok(format!("{ENC_PREFIX}{}", STANDARD.encode(blob)))
    }

    /// Decrypt an `enc:`-prefixed value. Values without the prefix are
    /// returned unchanged (rows written before encryption was enabled).
    pub fn decrypt(&self, value: &str) -> Result<String, CryptoError> {
        let Some(encoded) = value.strip_prefix(ENC_PREFIX) else {
            return Ok(value.to_string());
        };
        let blob = STANDARD
            .decode(encoded)
            .map_err(|_| CryptoError::DecryptFailed)?;
        if blob.len() < NONCE_LEN {
            return Err(CryptoError::DecryptFailed);
        }
        let (nonce, ciphertext) = blob.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CryptoError::DecryptFailed)?;
        String::from_utf8(plaintext).map_err(|_| CryptoError::DecryptFailed)
    }
}

fn decode_key(key: &str) -> Result<Vec<u8>, CryptoError> {
    for engine in [&STANDARD, &STANDARD_NO_PAD, &URL_SAFE, &URL_SAFE_NO_PAD] {
        if let Ok(raw) = engine.decode(key) {
            return Ok(raw);
        }
    }
    Err(CryptoError::InvalidKeyEncoding)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> String {
        STANDARD.encode([7u8; 32])
    }

    #[test]
    fn test_round_trip() {
        let cipher = SecretCipher::new(&test_key()).unwrap();
        let ct = cipher.encrypt("super-secret").unwrap();
        assert!(ct.starts_with(ENC_PREFIX));
        assert_eq!(cipher.decrypt(&ct).unwrap(), "super-secret");
    }

    #[test]
    fn test_nonces_never_repeat() {
        let cipher = SecretCipher::new(&test_key()).unwrap();
        let a = cipher.encrypt("same input").unwrap();
        let b = cipher.encrypt("same input").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_plaintext_passthrough() {
        let cipher = SecretCipher::new(&test_key()).unwrap();
        assert_eq!(cipher.decrypt("legacy-plaintext").unwrap(), "legacy-plaintext");
    }

    #[test]
    fn test_key_encodings_accepted() {
        let raw = [0x3fu8; 32];
        for key in [
            STANDARD.encode(raw),
            STANDARD_NO_PAD.encode(raw),
            URL_SAFE.encode(raw),
            URL_SAFE_NO_PAD.encode(raw),
        ] {
            assert!(SecretCipher::new(&key).is_ok(), "rejected key {key}");
        }
    }

    #[test]
    fn test_wrong_key_length_rejected() {
        let err = SecretCipher::new(&STANDARD.encode([1u8; 16])).unwrap_err();
        assert!(matches!(err, CryptoError::InvalidKeyLength(16)));
    }

    #[test]
    fn test_tampered_value_fails_opaquely() {
        let cipher = SecretCipher::new(&test_key()).unwrap();
        let mut ct = cipher.encrypt("payload").unwrap();
        ct.pop();
        ct.push('A');
        let err = cipher.decrypt(&ct).unwrap_err();
        assert_eq!(err.to_string(), "failed to decrypt value");
    }

    #[test]
    fn test_decrypt_with_other_key_fails() {
        let a = SecretCipher::new(&test_key()).unwrap();
        let b = SecretCipher::new(&STANDARD.encode([9u8; 32])).unwrap();
        let ct = a.encrypt("payload").unwrap();
        assert!(b.decrypt(&ct).is_err());
    }
}
