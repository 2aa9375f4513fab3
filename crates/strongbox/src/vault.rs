//! Key vault - the single symmetric key behind the store
//!
//! The key is created lazily on first use and persisted in serialized form.
//! It is never regenerated: replacing it would orphan every sealed blob, and
//! that loss is irrecoverable by design. Multiple environments may race the
//! first call; each racer stages its candidate in full and publishes with a
//! hard link, so exactly one key is ever persisted, it appears with its
//! content complete, and every loser converges on the winner's material.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, Utc};
use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::OnceCell;

const KEY_FILE: &str = "master.key";
const KEY_LEN: usize = 32;
const BLOB_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum VaultError {
  /// The persistence layer could not be read or written.
  #[error("key material unavailable: {0}")]
  KeyUnavailable(String),
}

/// The store's AES-256 key
#[derive(Clone, PartialEq, Eq)]
pub struct StoreKey([u8; KEY_LEN]);

impl StoreKey {
  pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
    Self(bytes)
  }

  pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
    &self.0
  }

  /// Short hex digest for diagnostics; never exposes key material
  pub fn fingerprint(&self) -> String {
    let digest = Sha256::digest(self.0);
    digest[..4].iter().map(|b| format!("{b:02x}")).collect()
  }
}

impl std::fmt::Debug for StoreKey {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "StoreKey({})", self.fingerprint())
  }
}

/// Serialized key material as persisted on disk
#[derive(Debug, Serialize, Deserialize)]
struct KeyBlob {
  key: String,
  created_at: DateTime<Utc>,
  version: u32,
}

/// Owns the key file and the in-process cache of the loaded key
pub struct KeyVault {
  key_path: PathBuf,
  cached: OnceCell<StoreKey>,
}

impl KeyVault {
  pub fn open(dir: &Path) -> Self {
    Self { key_path: dir.join(KEY_FILE), cached: OnceCell::new() }
  }

  /// Load the persisted key, generating and persisting it on first use
  pub async fn get_or_create_key(&self) -> Result<StoreKey, VaultError> {
    self.cached.get_or_try_init(|| self.load_or_generate()).await.cloned()
  }

  pub fn key_path(&self) -> &Path {
    &self.key_path
  }

  async fn load_or_generate(&self) -> Result<StoreKey, VaultError> {
    match self.read_blob().await {
      Ok(Some(key)) => return Ok(key),
      Ok(None) => {}
      Err(e) => return Err(e),
    }

    let mut material = [0u8; KEY_LEN];
    rand::rng().fill_bytes(&mut material);

    let staged = self
      .stage_blob(&material)
      .await
      .map_err(|e| VaultError::KeyUnavailable(format!("failed to stage key: {e}")))?;

    let published = self.publish(&staged, material).await;
    let _ = tokio::fs::remove_file(&staged).await;
    published
  }

  async fn read_blob(&self) -> Result<Option<StoreKey>, VaultError> {
    let data = match tokio::fs::read_to_string(&self.key_path).await {
      Ok(data) => data,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
      Err(e) => return Err(VaultError::KeyUnavailable(format!("failed to read key file: {e}"))),
    };

    // A zero-length file holds no key material (interrupted first run);
    // treat it as absent so creation can recover.
    if data.trim().is_empty() {
      return Ok(None);
    }

    let blob: KeyBlob = serde_json::from_str(data.trim())
      .map_err(|e| VaultError::KeyUnavailable(format!("invalid key file: {e}")))?;

    let bytes = BASE64
      .decode(&blob.key)
      .map_err(|e| VaultError::KeyUnavailable(format!("invalid key encoding: {e}")))?;

    let material: [u8; KEY_LEN] = bytes
      .try_into()
      .map_err(|_| VaultError::KeyUnavailable("key material has wrong length".into()))?;

    Ok(Some(StoreKey(material)))
  }

  /// Write the full blob to a uniquely named sibling file. Nothing appears
  /// at the key path until `publish` links it there, so no reader can ever
  /// observe a half-written key file.
  async fn stage_blob(&self, material: &[u8; KEY_LEN]) -> std::io::Result<PathBuf> {
    if let Some(parent) = self.key_path.parent() {
      tokio::fs::create_dir_all(parent).await?;
    }

    let blob =
      KeyBlob { key: BASE64.encode(material), created_at: Utc::now(), version: BLOB_VERSION };
    let json = serde_json::to_string_pretty(&blob)
      .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

    let suffix: u64 = rand::rng().random();
    let staged = self.key_path.with_extension(format!("key.{suffix:016x}"));

    let mut file =
      tokio::fs::OpenOptions::new().write(true).create_new(true).open(&staged).await?;
    file.write_all(json.as_bytes()).await?;
    file.flush().await?;

    Ok(staged)
  }

  /// Link the staged blob into place. hard_link is the at-most-once
  /// guarantee: the first publisher wins atomically with its content already
  /// complete, every later publisher sees AlreadyExists and re-reads.
  async fn publish(&self, staged: &Path, material: [u8; KEY_LEN]) -> Result<StoreKey, VaultError> {
    for _ in 0..3 {
      match tokio::fs::hard_link(staged, &self.key_path).await {
        Ok(()) => {
          quill::info!("generated new store key ({})", StoreKey(material).fingerprint());
          return Ok(StoreKey(material));
        }
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
          // Lost the first-write race: another environment persisted first.
          // Converge on its key; ours is discarded unused.
          match self.read_blob().await? {
            Some(key) => return Ok(key),
            // Zero-length remnant; clear it and try to publish again.
            None => {
              let _ = tokio::fs::remove_file(&self.key_path).await;
            }
          }
        }
        Err(e) => return Err(VaultError::KeyUnavailable(format!("failed to persist key: {e}"))),
      }
    }

    Err(VaultError::KeyUnavailable("key file kept vanishing during creation".into()))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  #[tokio::test]
  async fn test_first_call_creates_and_persists_key() {
    let temp_dir = TempDir::new().unwrap();
    let vault = KeyVault::open(temp_dir.path());

    assert!(!vault.key_path().exists());

    let key = vault.get_or_create_key().await.unwrap();

    assert!(vault.key_path().exists(), "key file should be persisted on first use");
    assert_eq!(key.as_bytes().len(), KEY_LEN);
  }

  #[tokio::test]
  async fn test_subsequent_calls_return_same_key() {
    let temp_dir = TempDir::new().unwrap();
    let vault = KeyVault::open(temp_dir.path());

    let first = vault.get_or_create_key().await.unwrap();
    let second = vault.get_or_create_key().await.unwrap();

    assert_eq!(first, second);
  }

  #[tokio::test]
  async fn test_fresh_vault_instance_loads_persisted_key() {
    let temp_dir = TempDir::new().unwrap();

    let created = KeyVault::open(temp_dir.path()).get_or_create_key().await.unwrap();
    let loaded = KeyVault::open(temp_dir.path()).get_or_create_key().await.unwrap();

    assert_eq!(created, loaded, "a new vault over the same dir must converge on the same key");
  }

  #[tokio::test]
  async fn test_racing_vaults_converge_on_one_key() {
    let temp_dir = TempDir::new().unwrap();

    let a = KeyVault::open(temp_dir.path());
    let b = KeyVault::open(temp_dir.path());

    let (ka, kb) = tokio::join!(a.get_or_create_key(), b.get_or_create_key());

    assert_eq!(ka.unwrap(), kb.unwrap(), "racers must converge on the single persisted key");
  }

  #[tokio::test]
  async fn test_four_racing_vaults_converge_on_one_key() {
    let temp_dir = TempDir::new().unwrap();

    let a = KeyVault::open(temp_dir.path());
    let b = KeyVault::open(temp_dir.path());
    let c = KeyVault::open(temp_dir.path());
    let d = KeyVault::open(temp_dir.path());

    let (ka, kb, kc, kd) =
      tokio::join!(a.get_or_create_key(), b.get_or_create_key(), c.get_or_create_key(), d.get_or_create_key());

    let key = ka.unwrap();
    assert_eq!(key, kb.unwrap());
    assert_eq!(key, kc.unwrap());
    assert_eq!(key, kd.unwrap());
  }

  #[tokio::test]
  async fn test_empty_key_file_is_recovered() {
    let temp_dir = TempDir::new().unwrap();
    std::fs::write(temp_dir.path().join(KEY_FILE), "").unwrap();

    let vault = KeyVault::open(temp_dir.path());
    let key = vault.get_or_create_key().await.unwrap();

    let reloaded = KeyVault::open(temp_dir.path()).get_or_create_key().await.unwrap();
    assert_eq!(key, reloaded, "recovered key must be the one persisted");
  }

  #[tokio::test]
  async fn test_no_staged_files_left_behind() {
    let temp_dir = TempDir::new().unwrap();

    let a = KeyVault::open(temp_dir.path());
    let b = KeyVault::open(temp_dir.path());
    let _ = tokio::join!(a.get_or_create_key(), b.get_or_create_key());

    let entries: Vec<_> = std::fs::read_dir(temp_dir.path())
      .unwrap()
      .map(|e| e.unwrap().file_name().into_string().unwrap())
      .collect();
    assert_eq!(entries, vec![KEY_FILE.to_string()], "losers must clean up their staged blobs");
  }

  #[tokio::test]
  async fn test_garbage_key_file_is_key_unavailable() {
    let temp_dir = TempDir::new().unwrap();
    std::fs::write(temp_dir.path().join(KEY_FILE), "not json at all").unwrap();

    let vault = KeyVault::open(temp_dir.path());
    let err = vault.get_or_create_key().await.unwrap_err();

    assert!(err.to_string().contains("key material unavailable"));
  }

  #[tokio::test]
  async fn test_wrong_length_key_material_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let blob = KeyBlob { key: BASE64.encode([1u8; 16]), created_at: Utc::now(), version: 1 };
    std::fs::write(temp_dir.path().join(KEY_FILE), serde_json::to_string(&blob).unwrap()).unwrap();

    let vault = KeyVault::open(temp_dir.path());
    let err = vault.get_or_create_key().await.unwrap_err();

    assert!(err.to_string().contains("wrong length"));
  }

  #[test]
  fn test_fingerprint_is_short_and_stable() {
    let key = StoreKey::from_bytes([42u8; 32]);

    assert_eq!(key.fingerprint().len(), 8);
    assert_eq!(key.fingerprint(), key.fingerprint());
    assert_eq!(format!("{key:?}"), format!("StoreKey({})", key.fingerprint()));
  }
}
