//! Error taxonomy shared across the store, router, and pipelines
//!
//! The store and cipher never swallow errors; the pipeline re-labels
//! collaborator failures with the failing step's name; the router converts
//! everything into the `{success:false, error}` response shape so no
//! cross-environment call is ever left unanswered.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngramError {
  #[error(transparent)]
  KeyUnavailable(#[from] strongbox::VaultError),

  #[error(transparent)]
  Cipher(#[from] strongbox::CipherError),

  #[error("not found: {0}")]
  NotFound(String),

  #[error("embedding failed: {0}")]
  EmbeddingFailed(String),

  #[error("encryption failed: {0}")]
  EncryptionFailed(String),

  #[error("store failed: {0}")]
  StoreFailed(String),

  #[error("unknown operation: {0}")]
  UnknownOperation(String),

  #[error("environment unavailable: {0}")]
  EnvironmentUnavailable(String),
}

pub type Result<T> = std::result::Result<T, EngramError>;
