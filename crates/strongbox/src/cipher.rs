//! Authenticated symmetric encryption for note content
//!
//! AES-256-GCM with a fresh random nonce per call. The nonce is prefixed to
//! the ciphertext so a sealed blob is self-contained. Sealing the same
//! plaintext twice must produce different blobs; the tests pin that down.

use aes_gcm::{
  aead::{Aead, AeadCore, KeyInit, OsRng},
  Aes256Gcm, Key, Nonce,
};
use thiserror::Error;

use crate::vault::StoreKey;

/// AES-GCM nonce size in bytes, stored as the blob prefix
pub const NONCE_LEN: usize = 12;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CipherError {
  /// Authentication tag did not verify: tampered blob or wrong key.
  /// Treated as permanent data loss for that record, never papered over.
  #[error("ciphertext failed authentication (tampered or wrong key)")]
  AuthenticationFailure,

  /// Blob shorter than one nonce; it cannot have come from `seal`.
  #[error("malformed ciphertext blob: {0} bytes, need at least {NONCE_LEN}")]
  MalformedInput(usize),

  #[error("encryption failed")]
  SealFailure,
}

/// Encrypt `plaintext` under `key`, returning `nonce || ciphertext`
pub fn seal(key: &StoreKey, plaintext: &[u8]) -> Result<Vec<u8>, CipherError> {
  let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));
  let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

  let ciphertext = cipher.encrypt(&nonce, plaintext).map_err(|_| CipherError::SealFailure)?;

  let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
  blob.extend_from_slice(&nonce);
  blob.extend_from_slice(&ciphertext);
  Ok(blob)
}

/// Decrypt a `nonce || ciphertext` blob produced by [`seal`]
pub fn open(key: &StoreKey, blob: &[u8]) -> Result<Vec<u8>, CipherError> {
  if blob.len() < NONCE_LEN {
    return Err(CipherError::MalformedInput(blob.len()));
  }

  let (nonce_bytes, ciphertext) = blob.split_at(NONCE_LEN);
  let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));
  let nonce = Nonce::from_slice(nonce_bytes);

  cipher.decrypt(nonce, ciphertext).map_err(|_| CipherError::AuthenticationFailure)
}
