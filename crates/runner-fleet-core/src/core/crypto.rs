// crates/runner-fleet-core/src/core/crypto.rs
// ============================================================================
// Module: Runner Fleet Secret Encryption
// Description: Passphrase-keyed AES-256-GCM encryption for secrets at rest.
// Purpose: Seal webhook secrets, credential payloads, and JIT configs.
// Dependencies: aes-gcm, serde
// ============================================================================

//! ## Overview
//! Secrets are sealed with AES-256-GCM keyed directly by a 32-byte
//! passphrase. The stored form is `nonce || ciphertext` with a fresh random
//! 96-bit nonce per seal. Opening with the wrong passphrase fails the
//! authentication tag check and surfaces as [`StoreError::Encoding`], which is
//! distinct from any lookup failure.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use aes_gcm::Aes256Gcm;
use aes_gcm::Nonce;
use aes_gcm::aead::Aead;
use aes_gcm::aead::AeadCore;
use aes_gcm::aead::KeyInit;
use aes_gcm::aead::OsRng;
use serde::Deserialize;

use crate::interfaces::StoreError;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Required passphrase length in bytes.
pub const PASSPHRASE_LEN: usize = 32;
/// AES-GCM nonce length in bytes.
const NONCE_LEN: usize = 12;

// ============================================================================
// SECTION: Passphrase
// ============================================================================

/// Encryption passphrase with a redacted debug form.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct Passphrase(String);

impl Passphrase {
    /// Wraps a passphrase string.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the passphrase bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    /// Checks the passphrase length.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidArgument`] unless the passphrase is exactly
    /// [`PASSPHRASE_LEN`] bytes.
    pub fn validate(&self) -> Result<(), StoreError> {
        if self.0.len() != PASSPHRASE_LEN {
            return Err(StoreError::invalid(
                "validate_passphrase",
                format!("passphrase must be exactly {PASSPHRASE_LEN} bytes"),
            ));
        }
        Ok(())
    }
}

impl fmt::Debug for Passphrase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Passphrase(<redacted>)")
    }
}

// ============================================================================
// SECTION: Cipher
// ============================================================================

/// Seals and opens secrets with a configured passphrase.
#[derive(Clone)]
pub struct SecretCipher {
    /// Initialized AES-256-GCM cipher.
    cipher: Aes256Gcm,
}

impl SecretCipher {
    /// Builds a cipher from a passphrase.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidArgument`] when the passphrase length is wrong.
    pub fn new(passphrase: &Passphrase) -> Result<Self, StoreError> {
        passphrase.validate()?;
        let cipher = Aes256Gcm::new_from_slice(passphrase.as_bytes())
            .map_err(|_| StoreError::invalid("secret_cipher", "invalid key length"))?;
        Ok(Self {
            cipher,
        })
    }

    /// Encrypts `plaintext`, returning `nonce || ciphertext`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Encoding`] when encryption fails.
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, StoreError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|err| StoreError::encoding("seal_secret", err.to_string()))?;
        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(nonce.as_slice());
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    /// Decrypts a value produced by [`SecretCipher::seal`].
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Encoding`] when the payload is truncated or the
    /// passphrase does not match.
    pub fn open(&self, sealed: &[u8]) -> Result<Vec<u8>, StoreError> {
        if sealed.len() < NONCE_LEN {
            return Err(StoreError::encoding("open_secret", "sealed payload too short"));
        }
        let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| StoreError::encoding("open_secret", "failed to decrypt secret"))
    }

    /// Encrypts a UTF-8 string.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Encoding`] when encryption fails.
    pub fn seal_str(&self, plaintext: &str) -> Result<Vec<u8>, StoreError> {
        self.seal(plaintext.as_bytes())
    }

    /// Decrypts into a UTF-8 string.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Encoding`] when decryption fails or the plaintext
    /// is not UTF-8.
    pub fn open_str(&self, sealed: &[u8]) -> Result<String, StoreError> {
        let bytes = self.open(sealed)?;
        String::from_utf8(bytes)
            .map_err(|_| StoreError::encoding("open_secret", "secret is not valid utf-8"))
    }
}

impl fmt::Debug for SecretCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretCipher(<redacted>)")
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::use_debug,
    reason = "Tests unwrap fixtures and inspect debug output."
)]
mod tests {
    use super::*;
    use crate::interfaces::ErrorKind;

    fn cipher(pass: &str) -> SecretCipher {
        SecretCipher::new(&Passphrase::new(pass)).unwrap()
    }

    #[test]
    fn seal_then_open_recovers_plaintext() {
        let cipher = cipher("0123456789abcdef0123456789abcdef");
        let sealed = cipher.seal_str("webhook-secret").unwrap();
        assert_ne!(sealed, b"webhook-secret");
        assert_eq!(cipher.open_str(&sealed).unwrap(), "webhook-secret");
    }

    #[test]
    fn wrong_passphrase_is_an_encoding_error() {
        let sealed = cipher("0123456789abcdef0123456789abcdef").seal_str("secret").unwrap();
        let err = cipher("fedcba9876543210fedcba9876543210").open_str(&sealed).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Encoding);
    }

    #[test]
    fn short_passphrase_is_rejected() {
        let err = SecretCipher::new(&Passphrase::new("short")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn debug_output_is_redacted() {
        let rendered = format!("{:?}", Passphrase::new("0123456789abcdef0123456789abcdef"));
        assert!(!rendered.contains("0123"));
    }
}
