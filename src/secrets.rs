//! Encryption at rest for SSH credentials.
//!
//! Monitored hosts can carry optional remote-exec credentials; the plaintext
//! password must never reach the store. Uses AES-256-GCM with a random
//! 96-bit nonce prepended to the ciphertext, hex-encoded for storage.

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, AeadCore, KeyInit, OsRng},
};
use thiserror::Error;

const NONCE_LEN: usize = 12;

#[derive(Error, Debug)]
pub enum VaultError {
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),
    #[error("decryption failed: {0}")]
    DecryptionFailed(String),
    #[error("encryption key must be 32 bytes of hex")]
    InvalidKey,
}

pub struct CredentialVault {
    cipher: Aes256Gcm,
}

impl CredentialVault {
    pub fn new(key: &[u8]) -> Result<Self, VaultError> {
        Ok(Self {
            cipher: Aes256Gcm::new_from_slice(key).map_err(|_| VaultError::InvalidKey)?,
        })
    }

    /// Builds a vault from a 64-character hex key, as carried in the config.
    pub fn from_hex_key(hex_key: &str) -> Result<Self, VaultError> {
        let key = hex::decode(hex_key).map_err(|_| VaultError::InvalidKey)?;
        Self::new(&key)
    }

    /// Encrypts a credential for storage. Output is `hex(nonce || ciphertext)`.
    pub fn seal(&self, plaintext: &str) -> Result<String, VaultError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| VaultError::EncryptionFailed(e.to_string()))?;

        let mut sealed = nonce.to_vec();
        sealed.extend_from_slice(&ciphertext);
        Ok(hex::encode(sealed))
    }

    /// Decrypts a value previously produced by [`seal`](Self::seal).
    pub fn open(&self, sealed_hex: &str) -> Result<String, VaultError> {
        let sealed = hex::decode(sealed_hex)
            .map_err(|e| VaultError::DecryptionFailed(e.to_string()))?;
        if sealed.len() < NONCE_LEN {
            return Err(VaultError::DecryptionFailed(
                "sealed value too short to contain a nonce".to_string(),
            ));
        }

        let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);
        let plaintext = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| VaultError::DecryptionFailed(e.to_string()))?;

        String::from_utf8(plaintext).map_err(|e| VaultError::DecryptionFailed(e.to_string()))
    }
}
