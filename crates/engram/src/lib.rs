//! Engram - a local-first personal knowledge store
//!
//! Notes are persisted with their content encrypted at rest and retrieved by
//! exact title match or by cosine similarity over embedding vectors. Exactly
//! one environment (the daemon) owns the canonical store and key material;
//! every other environment reaches it through the message router.

pub mod cli;
pub mod embed;
pub mod error;
pub mod intent;
pub mod model;
pub mod pipeline;
pub mod protocol;
pub mod router;
pub mod store;

use std::path::PathBuf;

/// Base data directory: `$ENGRAM_HOME`, else `~/.engram`
pub fn base_dir() -> anyhow::Result<PathBuf> {
  if let Ok(dir) = std::env::var("ENGRAM_HOME") {
    return Ok(PathBuf::from(dir));
  }

  Ok(
    dirs::home_dir()
      .ok_or_else(|| anyhow::anyhow!("failed to determine home directory"))?
      .join(".engram"),
  )
}

/// The daemon's request socket under the base dir
pub fn socket_path(base: &std::path::Path) -> PathBuf {
  base.join("engram.sock")
}

/// The daemon's pid file under the base dir
pub fn pid_path(base: &std::path::Path) -> PathBuf {
  base.join("engram.pid")
}
