//! Authenticated symmetric encryption for opaque blobs.
//!
//! A 256-bit key is derived per message with PBKDF2-HMAC-SHA256 from the
//! master secret and a random salt. Output layout:
//! `salt (16) || nonce (12) || tag (16) || ciphertext`.

use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce, Tag};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use pbkdf2::pbkdf2_hmac;
use rand::{rngs::OsRng, RngCore};
use sha2::Sha256;
use thiserror::Error;

pub const SALT_LEN: usize = 16;
pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;
pub const KEY_LEN: usize = 32;
pub const PBKDF2_ITERATIONS: u32 = 100_000;

const HEADER_LEN: usize = SALT_LEN + NONCE_LEN + TAG_LEN;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CryptoError {
    #[error("encryption master key is required")]
    MissingKey,
    #[error("ciphertext failed integrity verification")]
    Integrity,
    #[error("encryption failed")]
    Encrypt,
}

pub type CryptoResult<T> = Result<T, CryptoError>;

#[derive(Clone)]
pub struct EncryptionService {
    master_key: Vec<u8>,
    iterations: u32,
}

impl std::fmt::Debug for EncryptionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionService")
            .field("iterations", &self.iterations)
            .finish_non_exhaustive()
    }
}

impl EncryptionService {
    pub fn new(master_key: impl AsRef<[u8]>) -> CryptoResult<Self> {
        let master_key = master_key.as_ref();
        if master_key.is_empty() {
            return Err(CryptoError::MissingKey);
        }
        Ok(Self {
            master_key: master_key.to_vec(),
            iterations: PBKDF2_ITERATIONS,
        })
    }

    #[cfg(test)]
    fn with_iterations(master_key: &[u8], iterations: u32) -> Self {
        Self {
            master_key: master_key.to_vec(),
            iterations,
        }
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> CryptoResult<Vec<u8>> {
        let mut salt = [0u8; SALT_LEN];
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut salt);
        OsRng.fill_bytes(&mut nonce);

        let cipher = self.cipher_for(&salt)?;
        let mut buffer = plaintext.to_vec();
        let tag = cipher
            .encrypt_in_place_detached(Nonce::from_slice(&nonce), b"", &mut buffer)
            .map_err(|_| CryptoError::Encrypt)?;

        let mut blob = Vec::with_capacity(HEADER_LEN + buffer.len());
        blob.extend_from_slice(&salt);
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(tag.as_slice());
        blob.extend_from_slice(&buffer);
        Ok(blob)
    }

    pub fn decrypt(&self, blob: &[u8]) -> CryptoResult<Vec<u8>> {
        if blob.len() < HEADER_LEN {
            return Err(CryptoError::Integrity);
        }
        let (salt, rest) = blob.split_at(SALT_LEN);
        let (nonce, rest) = rest.split_at(NONCE_LEN);
        let (tag, ciphertext) = rest.split_at(TAG_LEN);

        let cipher = self.cipher_for(salt)?;
        let mut buffer = ciphertext.to_vec();
        cipher
            .decrypt_in_place_detached(
                Nonce::from_slice(nonce),
                b"",
                &mut buffer,
                Tag::from_slice(tag),
            )
            .map_err(|_| CryptoError::Integrity)?;
        Ok(buffer)
    }

    /// Encrypts UTF-8 text and returns the blob as standard base64.
    pub fn encrypt_to_base64(&self, plaintext: &str) -> CryptoResult<String> {
        self.encrypt(plaintext.as_bytes())
            .map(|blob| STANDARD.encode(blob))
    }

    pub fn decrypt_from_base64(&self, encoded: &str) -> CryptoResult<String> {
        let blob = STANDARD
            .decode(encoded.trim())
            .map_err(|_| CryptoError::Integrity)?;
        let plaintext = self.decrypt(&blob)?;
        String::from_utf8(plaintext).map_err(|_| CryptoError::Integrity)
    }

    fn cipher_for(&self, salt: &[u8]) -> CryptoResult<Aes256Gcm> {
        let mut key = [0u8; KEY_LEN];
        pbkdf2_hmac::<Sha256>(&self.master_key, salt, self.iterations, &mut key);
        Aes256Gcm::new_from_slice(&key).map_err(|_| CryptoError::Encrypt)
    }
}
