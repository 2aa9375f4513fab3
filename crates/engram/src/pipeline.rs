//! Multi-step pipelines over the router
//!
//! Save, update, and search each chain embedding, encryption, and store
//! calls. The pipeline talks to collaborators only through the router, so
//! the same code runs whether the store is in-process or behind the daemon
//! socket. Failures are re-labeled with the step that failed; a caller
//! reading the error always knows whether embedding, encryption, or the
//! store gave out.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use strongbox::KeyVault;

use crate::error::{EngramError, Result};
use crate::intent::{Intent, IntentClassifier};
use crate::model::{Note, NoteDraft, NotePatch, ScoredNote};
use crate::protocol::Request;
use crate::router::Router;

#[derive(Debug, Clone, Default)]
pub struct SaveRequest {
  pub title: String,
  pub category: Option<String>,
  pub content: String,
  pub source_url: Option<String>,
  /// Skip the embedding step and use this vector instead
  pub embedding: Option<Vec<f32>>,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateRequest {
  pub title: Option<String>,
  pub category: Option<String>,
  pub content: Option<String>,
  pub source_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchOutcome {
  pub intent: Intent,
  pub matches: Vec<ScoredNote>,
}

pub struct Pipeline {
  router: Arc<Router>,
  vault: Arc<KeyVault>,
  classifier: Arc<dyn IntentClassifier>,
}

impl Pipeline {
  pub fn new(
    router: Arc<Router>,
    vault: Arc<KeyVault>,
    classifier: Arc<dyn IntentClassifier>,
  ) -> Self {
    Self { router, vault, classifier }
  }

  /// Embed, encrypt, store. Plaintext never leaves this function.
  pub async fn save(&self, request: SaveRequest) -> Result<Note> {
    let embedding = match request.embedding {
      Some(vector) => vector,
      None => self.embed(&request.content).await?,
    };
    let content = self.seal(request.content.as_bytes()).await?;

    let draft = NoteDraft {
      title: request.title,
      category: request.category,
      content,
      embedding,
      source_url: request.source_url,
    };

    self.router.call(Request::AddNote(draft)).await.map_err(label_store)
  }

  /// Partial update. A content change re-embeds and re-encrypts so the
  /// stored vector always describes the stored ciphertext.
  pub async fn update(&self, id: &str, request: UpdateRequest) -> Result<Note> {
    let (content, embedding) = match request.content {
      Some(plaintext) => {
        let embedding = self.embed(&plaintext).await?;
        let sealed = self.seal(plaintext.as_bytes()).await?;
        (Some(sealed), Some(embedding))
      }
      None => (None, None),
    };

    let patch = NotePatch {
      title: request.title,
      category: request.category,
      content,
      embedding,
      source_url: request.source_url,
    };

    self
      .router
      .call(Request::UpdateNote { id: id.to_string(), patch })
      .await
      .map_err(label_store)
  }

  /// Classify intent and embed the query concurrently, then rank by
  /// similarity. Classification is advisory: if the classifier fails the
  /// search proceeds with `Intent::Unknown`.
  pub async fn search(&self, query: &str, limit: usize) -> Result<SearchOutcome> {
    let (intent, embedding) = tokio::join!(
      self.classifier.classify(query),
      self.router.call::<Vec<f32>>(Request::EmbedText { text: query.to_string() }),
    );

    let intent = intent.unwrap_or_else(|e| {
      quill::warn!("intent classification failed, continuing: {e}");
      Intent::Unknown
    });
    let vector = embedding.map_err(label_embedding)?;

    let matches = self
      .router
      .call(Request::SearchByVector { vector, limit })
      .await
      .map_err(label_store)?;

    Ok(SearchOutcome { intent, matches })
  }

  /// Decrypt a stored note's content for display
  pub async fn reveal(&self, note: &Note) -> Result<String> {
    let key = self
      .vault
      .get_or_create_key()
      .await
      .map_err(|e| EngramError::EncryptionFailed(e.to_string()))?;

    let plaintext = strongbox::open(&key, &note.content)?;
    String::from_utf8(plaintext)
      .map_err(|_| EngramError::StoreFailed("note content is not valid utf-8".into()))
  }

  async fn embed(&self, text: &str) -> Result<Vec<f32>> {
    self
      .router
      .call(Request::EmbedText { text: text.to_string() })
      .await
      .map_err(label_embedding)
  }

  async fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
    let key = self
      .vault
      .get_or_create_key()
      .await
      .map_err(|e| EngramError::EncryptionFailed(e.to_string()))?;

    strongbox::seal(&key, plaintext)
      .map_err(|e| EngramError::EncryptionFailed(e.to_string()))
  }
}

fn label_embedding(e: EngramError) -> EngramError {
  match e {
    EngramError::EmbeddingFailed(_) | EngramError::EnvironmentUnavailable(_) => e,
    other => EngramError::EmbeddingFailed(other.to_string()),
  }
}

fn label_store(e: EngramError) -> EngramError {
  match e {
    EngramError::StoreFailed(_)
    | EngramError::NotFound(_)
    | EngramError::EnvironmentUnavailable(_) => e,
    other => EngramError::StoreFailed(other.to_string()),
  }
}
