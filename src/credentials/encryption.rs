//! AES-256-GCM encryption for provider tokens.
//!
//! Blob layout: `base64(nonce || ciphertext || tag)`. A fresh random nonce is
//! drawn for every call, so encrypting the same plaintext twice never yields
//! the same blob.

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

/// Size of the encryption key in bytes (256 bits)
const KEY_SIZE: usize = 32;

/// Size of the nonce in bytes (96 bits, standard for GCM)
const NONCE_SIZE: usize = 12;

/// Codec errors
#[derive(Debug, PartialEq)]
pub enum CryptoError {
    /// The configured secret is empty
    MissingSecret,
    /// The configured secret decodes to fewer than 32 bytes
    KeyTooShort(usize),
    /// Blob is not valid base64, or too short to hold a nonce
    InvalidInput(String),
    /// Authentication tag did not verify (tampered or corrupted ciphertext,
    /// or wrong key)
    Integrity,
    /// Cipher operation failed
    Cipher,
}

impl std::fmt::Display for CryptoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CryptoError::MissingSecret => write!(f, "token encryption secret is empty"),
            CryptoError::KeyTooShort(len) => write!(
                f,
                "token encryption key must decode to at least {} bytes, got {}",
                KEY_SIZE, len
            ),
            CryptoError::InvalidInput(msg) => write!(f, "malformed token blob: {}", msg),
            CryptoError::Integrity => {
                write!(f, "ciphertext failed integrity check (tampered or corrupted)")
            }
            CryptoError::Cipher => write!(f, "cipher operation failed"),
        }
    }
}

impl std::error::Error for CryptoError {}

/// Authenticated symmetric codec for token strings.
///
/// The key is derived exactly once, at construction, from the base64-encoded
/// server secret: the secret must decode to at least 32 bytes and the first
/// 32 are used as the AES-256 key. The cipher is immutable afterwards and
/// safe to share across tasks behind an `Arc`. Construct it at startup and
/// inject it; never re-derive per request.
pub struct TokenCipher {
    cipher: Aes256Gcm,
}

impl TokenCipher {
    /// Build a cipher from the base64-encoded server secret.
    pub fn new(secret_base64: &str) -> Result<Self, CryptoError> {
        if secret_base64.trim().is_empty() {
            return Err(CryptoError::MissingSecret);
        }

        let key_bytes = BASE64
            .decode(secret_base64.trim())
            .map_err(|e| CryptoError::InvalidInput(format!("secret is not valid base64: {}", e)))?;

        if key_bytes.len() < KEY_SIZE {
            return Err(CryptoError::KeyTooShort(key_bytes.len()));
        }

        let cipher =
            Aes256Gcm::new_from_slice(&key_bytes[..KEY_SIZE]).map_err(|_| CryptoError::Cipher)?;

        Ok(Self { cipher })
    }

    /// Encrypt a token string into an opaque blob.
    ///
    /// Never reuses a nonce: each call draws 12 fresh random bytes from the
    /// OS and prepends them to the ciphertext before base64 encoding.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, CryptoError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| CryptoError::Cipher)?;

        let mut blob = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&ciphertext);

        Ok(BASE64.encode(blob))
    }

    /// Decrypt a blob produced by [`encrypt`](Self::encrypt).
    ///
    /// Fails with [`CryptoError::Integrity`] if the authentication tag does
    /// not verify; a tampered blob never decrypts to wrong plaintext.
    pub fn decrypt(&self, blob: &str) -> Result<String, CryptoError> {
        let bytes = BASE64
            .decode(blob)
            .map_err(|e| CryptoError::InvalidInput(format!("not valid base64: {}", e)))?;

        if bytes.len() <= NONCE_SIZE {
            return Err(CryptoError::InvalidInput(format!(
                "blob too short: {} bytes",
                bytes.len()
            )));
        }

        let (nonce_bytes, ciphertext) = bytes.split_at(NONCE_SIZE);
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| CryptoError::Integrity)?;

        String::from_utf8(plaintext).map_err(|_| CryptoError::Integrity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_cipher() -> TokenCipher {
        let secret = BASE64.encode([7u8; 32]);
        TokenCipher::new(&secret).expect("cipher")
    }

    #[test]
    fn test_secret_validation() {
        // Empty secret
        assert_eq!(TokenCipher::new("").err(), Some(CryptoError::MissingSecret));
        assert_eq!(TokenCipher::new("   ").err(), Some(CryptoError::MissingSecret));

        // Too short
        let short = BASE64.encode([0u8; 16]);
        assert_eq!(TokenCipher::new(&short).err(), Some(CryptoError::KeyTooShort(16)));

        // Longer than 32 bytes is fine (truncated)
        let long = BASE64.encode([0u8; 48]);
        assert!(TokenCipher::new(&long).is_ok());

        // Invalid base64
        assert!(matches!(
            TokenCipher::new("not-valid-base64!@#$"),
            Err(CryptoError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let cipher = test_cipher();
        let plaintext = "my-secret-access-token-12345";

        let blob = cipher.encrypt(plaintext).expect("encrypt");
        assert_ne!(blob, plaintext);

        let decrypted = cipher.decrypt(&blob).expect("decrypt");
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn test_fresh_nonce_per_call() {
        let cipher = test_cipher();
        let plaintext = "same-plaintext";

        let blob1 = cipher.encrypt(plaintext).unwrap();
        let blob2 = cipher.encrypt(plaintext).unwrap();

        // Different nonces make the whole blob differ
        assert_ne!(blob1, blob2);

        assert_eq!(cipher.decrypt(&blob1).unwrap(), plaintext);
        assert_eq!(cipher.decrypt(&blob2).unwrap(), plaintext);
    }

    #[test]
    fn test_wrong_key_fails() {
        let cipher1 = test_cipher();
        let cipher2 = TokenCipher::new(&BASE64.encode([9u8; 32])).unwrap();

        let blob = cipher1.encrypt("secret").unwrap();
        assert_eq!(cipher2.decrypt(&blob).err(), Some(CryptoError::Integrity));
    }

    #[test]
    fn test_tampered_blob_fails() {
        let cipher = test_cipher();
        let blob = cipher.encrypt("secret").unwrap();

        // Flip one byte anywhere in the decoded blob
        let mut bytes = BASE64.decode(&blob).unwrap();
        for i in 0..bytes.len() {
            bytes[i] ^= 0x01;
            let tampered = BASE64.encode(&bytes);
            assert_eq!(
                cipher.decrypt(&tampered).err(),
                Some(CryptoError::Integrity),
                "byte {} flip must fail integrity",
                i
            );
            bytes[i] ^= 0x01;
        }
    }

    #[test]
    fn test_malformed_blob_rejected() {
        let cipher = test_cipher();

        // Not base64
        assert!(matches!(
            cipher.decrypt("%%%not-base64%%%"),
            Err(CryptoError::InvalidInput(_))
        ));

        // Too short to even hold a nonce
        let short = BASE64.encode([0u8; 8]);
        assert!(matches!(
            cipher.decrypt(&short),
            Err(CryptoError::InvalidInput(_))
        ));
    }
}
