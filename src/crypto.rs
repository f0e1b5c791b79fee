//! Provider secret encryption using AES-256-GCM.
//!
//! Secrets are sealed as `version || nonce || ciphertext+tag`, with the
//! owning tenant, agent and connection ids bound in as associated data so a
//! ciphertext copied onto another row fails to open.

#![allow(deprecated)]

use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, AeadCore, KeyInit, OsRng, Payload},
};
use thiserror::Error;
use uuid::Uuid;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

const FORMAT_V1: u8 = 0x01;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const HEADER_LEN: usize = 1 + NONCE_LEN;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid key length: expected 32 bytes, got {0}")]
    InvalidKeyLength(usize),
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),
    #[error("decryption failed: {0}")]
    DecryptionFailed(String),
    #[error("unsupported secret format version {0:#04x}")]
    UnsupportedVersion(u8),
    #[error("sealed secret is truncated")]
    Truncated,
    #[error("decrypted secret is not valid UTF-8")]
    InvalidUtf8,
}

/// AES-256 key material, wiped from memory on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct CryptoKey(Vec<u8>);

impl CryptoKey {
    pub fn new(bytes: Vec<u8>) -> Result<Self, CryptoError> {
        if bytes.len() != 32 {
            return Err(CryptoError::InvalidKeyLength(bytes.len()));
        }
        Ok(Self(bytes))
    }

    fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.0))
    }
}

impl std::fmt::Debug for CryptoKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("CryptoKey([REDACTED])")
    }
}

/// Identity a secret is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecretBinding {
    pub tenant_id: Uuid,
    pub agent_id: Uuid,
    pub connection_id: Uuid,
}

impl SecretBinding {
    fn aad(&self) -> String {
        format!("{}|{}|{}", self.tenant_id, self.agent_id, self.connection_id)
    }
}

pub fn seal(key: &CryptoKey, aad: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let body = key
        .cipher()
        .encrypt(&nonce, Payload { msg: plaintext, aad })
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

    let mut sealed = Vec::with_capacity(HEADER_LEN + body.len());
    sealed.push(FORMAT_V1);
    sealed.extend_from_slice(&nonce);
    sealed.extend_from_slice(&body);
    Ok(sealed)
}

pub fn open(key: &CryptoKey, aad: &[u8], sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let Some(&version) = sealed.first() else {
        return Err(CryptoError::Truncated);
    };
    if version != FORMAT_V1 {
        return Err(CryptoError::UnsupportedVersion(version));
    }
    if sealed.len() < HEADER_LEN + TAG_LEN {
        return Err(CryptoError::Truncated);
    }

    let nonce = Nonce::from_slice(&sealed[1..HEADER_LEN]);
    key.cipher()
        .decrypt(
            nonce,
            Payload {
                msg: &sealed[HEADER_LEN..],
                aad,
            },
        )
        .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))
}

/// Encrypt a provider secret for storage on a connection row.
pub fn encrypt_secret(
    key: &CryptoKey,
    binding: &SecretBinding,
    secret: &str,
) -> Result<Vec<u8>, CryptoError> {
    seal(key, binding.aad().as_bytes(), secret.as_bytes())
}

/// Decrypt a stored provider secret.
pub fn decrypt_secret(
    key: &CryptoKey,
    binding: &SecretBinding,
    sealed: &[u8],
) -> Result<String, CryptoError> {
    let bytes = Zeroizing::new(open(key, binding.aad().as_bytes(), sealed)?);
    std::str::from_utf8(&bytes)
        .map(str::to_owned)
        .map_err(|_| CryptoError::InvalidUtf8)
}
