//! Strongbox - content-at-rest protection for the engram store
//!
//! Two pieces: a [`vault::KeyVault`] that owns the single symmetric key
//! (generated lazily, persisted once, never regenerated), and a stateless
//! [`cipher`] over that key. Note content is sealed before it ever touches
//! disk; everything else in a note stays plaintext so the store can filter
//! and rank without key access.

pub mod cipher;
pub mod vault;

pub use cipher::{open, seal, CipherError, NONCE_LEN};
pub use vault::{KeyVault, StoreKey, VaultError};
