//! Embedding providers
//!
//! The embedding generator is a black box behind [`EmbeddingProvider`]: the
//! store and pipelines only ever see finished vectors. `SocketEmbedder`
//! defers to an external model service over a unix socket; `LocalEmbedder`
//! is a deterministic hash-based fallback that keeps the whole system
//! usable with no model service running.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use uuid::Uuid;

use crate::error::{EngramError, Result};
use crate::model::EMBEDDING_DIM;

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
  async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

#[derive(Debug, Serialize)]
struct EmbedServiceRequest {
  id: String,
  texts: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct EmbedServiceResponse {
  id: String,
  #[serde(default)]
  embeddings: Vec<Vec<f32>>,
  #[serde(default)]
  error: Option<String>,
}

/// Talks to an external embedding service over line-delimited JSON
pub struct SocketEmbedder {
  socket_path: PathBuf,
  timeout: Duration,
}

impl SocketEmbedder {
  pub fn new(socket_path: PathBuf) -> Self {
    Self { socket_path, timeout: Duration::from_secs(30) }
  }

  async fn round_trip(&self, text: &str) -> Result<Vec<f32>> {
    let mut stream = UnixStream::connect(&self.socket_path)
      .await
      .map_err(|e| EngramError::EmbeddingFailed(format!("embedding service unreachable: {e}")))?;

    let request =
      EmbedServiceRequest { id: Uuid::new_v4().to_string(), texts: vec![text.to_string()] };
    let mut line = serde_json::to_string(&request)
      .map_err(|e| EngramError::EmbeddingFailed(e.to_string()))?;
    line.push('\n');

    stream
      .write_all(line.as_bytes())
      .await
      .map_err(|e| EngramError::EmbeddingFailed(format!("failed to send request: {e}")))?;

    let mut reader = BufReader::new(stream);
    let mut response_line = String::new();
    reader
      .read_line(&mut response_line)
      .await
      .map_err(|e| EngramError::EmbeddingFailed(format!("failed to read response: {e}")))?;

    let response: EmbedServiceResponse = serde_json::from_str(response_line.trim())
      .map_err(|e| EngramError::EmbeddingFailed(format!("invalid response: {e}")))?;

    if response.id != request.id {
      return Err(EngramError::EmbeddingFailed("response id does not match request".into()));
    }
    if let Some(error) = response.error {
      return Err(EngramError::EmbeddingFailed(error));
    }

    response
      .embeddings
      .into_iter()
      .next()
      .ok_or_else(|| EngramError::EmbeddingFailed("service returned no embedding".into()))
  }
}

#[async_trait]
impl EmbeddingProvider for SocketEmbedder {
  async fn embed(&self, text: &str) -> Result<Vec<f32>> {
    tokio::time::timeout(self.timeout, self.round_trip(text))
      .await
      .map_err(|_| EngramError::EmbeddingFailed("embedding request timed out".into()))?
  }
}

/// Deterministic in-process embedder. Folds the text's bytes into a fixed
/// number of buckets and normalizes; the same text always yields the same
/// vector, so similarity search stays meaningful for exact and near-exact
/// content without any model service.
pub struct LocalEmbedder;

#[async_trait]
impl EmbeddingProvider for LocalEmbedder {
  async fn embed(&self, text: &str) -> Result<Vec<f32>> {
    let mut buckets = vec![0.0f32; EMBEDDING_DIM];
    for (i, byte) in text.bytes().enumerate() {
      let slot = (byte as usize * 31 + i * 7) % EMBEDDING_DIM;
      buckets[slot] += 1.0;
    }

    let magnitude: f32 = buckets.iter().map(|x| x * x).sum::<f32>().sqrt();
    if magnitude > 0.0 {
      for value in buckets.iter_mut() {
        *value /= magnitude;
      }
    }

    Ok(buckets)
  }
}


#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn test_local_embedder_is_deterministic() {
    let embedder = LocalEmbedder;

    let first = embedder.embed("the same words").await.unwrap();
    let second = embedder.embed("the same words").await.unwrap();

    assert_eq!(first, second);
    assert_eq!(first.len(), EMBEDDING_DIM);
  }

  #[tokio::test]
  async fn test_local_embedder_distinguishes_texts() {
    let embedder = LocalEmbedder;

    let a = embedder.embed("grocery list for tuesday").await.unwrap();
    let b = embedder.embed("notes on borrow checking").await.unwrap();

    assert_ne!(a, b);
  }

  #[tokio::test]
  async fn test_local_embedder_output_is_normalized() {
    let embedder = LocalEmbedder;
    let vector = embedder.embed("normalize me").await.unwrap();

    let magnitude: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    assert!((magnitude - 1.0).abs() < 1e-5);
  }

  #[tokio::test]
  async fn test_socket_embedder_reports_unreachable_service() {
    let embedder = SocketEmbedder::new(PathBuf::from("/nonexistent/embed.sock"));

    let err = embedder.embed("hello").await.unwrap_err();
    assert!(err.to_string().contains("embedding failed"));
  }
}
