//! At-rest encryption for persisted session values.
//!
//! AES-256-GCM with a fresh 96-bit nonce per value. The cipher key is
//! derived from the configured key string with SHA-256, so any string
//! (including the shipped fallback) yields a valid 256-bit key.
//!
//! ## Threat model
//! The key ships with the client, so this stops casual inspection of the
//! data directory, not an attacker who has the binary or its config.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use sha2::{Digest, Sha256};

/// Nonce size for AES-256-GCM (12 bytes / 96 bits).
const AES_GCM_NONCE_SIZE: usize = 12;

/// Prefix for stored ciphertext.
const AES_GCM_PREFIX: &str = "aes256:";

/// AES-256-GCM encryption engine.
#[derive(Clone)]
pub struct AesEncryptor {
    key: [u8; 32],
}

impl std::fmt::Debug for AesEncryptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AesEncryptor").finish_non_exhaustive()
    }
}

impl AesEncryptor {
    /// Create a new encryptor with a raw 256-bit key.
    pub fn new(key: [u8; 32]) -> Self {
        Self { key }
    }

    /// Derive the cipher key from an arbitrary key string.
    pub fn from_passphrase(passphrase: &str) -> Self {
        let digest = Sha256::digest(passphrase.as_bytes());
        let mut key = [0u8; 32];
        key.copy_from_slice(&digest);
        Self { key }
    }

    fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new(&self.key.into())
    }

    /// Encrypt `plaintext` to `aes256:<base64(nonce || ciphertext)>`.
    pub fn encrypt(&self, plaintext: &str) -> anyhow::Result<String> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let sealed = self
            .cipher()
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| anyhow::anyhow!("sealing session value: {e}"))?;

        let framed: Vec<u8> = nonce.iter().copied().chain(sealed).collect();
        Ok(format!("{AES_GCM_PREFIX}{}", BASE64.encode(framed)))
    }

    /// Reverse of [`encrypt`](Self::encrypt). Fails on a missing prefix,
    /// bad base64, a short frame, or a failed tag check.
    pub fn decrypt(&self, encrypted: &str) -> anyhow::Result<String> {
        let Some(encoded) = encrypted.strip_prefix(AES_GCM_PREFIX) else {
            anyhow::bail!("value is not in {AES_GCM_PREFIX} format");
        };
        let framed = BASE64.decode(encoded)?;
        if framed.len() < AES_GCM_NONCE_SIZE {
            anyhow::bail!("sealed value shorter than its nonce");
        }

        let (nonce, sealed) = framed.split_at(AES_GCM_NONCE_SIZE);
        let opened = self
            .cipher()
            .decrypt(Nonce::from_slice(nonce), sealed)
            .map_err(|e| anyhow::anyhow!("opening session value: {e}"))?;
        Ok(String::from_utf8(opened)?)
    }

    /// Check if a string carries the ciphertext prefix.
    pub fn is_encrypted(value: &str) -> bool {
        value.starts_with(AES_GCM_PREFIX)
    }
}
