//! Query intent classification
//!
//! Runs alongside embedding during search to hint at what the caller wants
//! back. Classification is advisory: a classifier failure downgrades the
//! intent to `Unknown` and the search proceeds.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
  /// Find a specific note the caller already knows exists
  Lookup,
  /// Answer a question from stored knowledge
  Question,
  /// Do something with a note (summarize, rewrite, send)
  Action,
  Unknown,
}

#[async_trait]
pub trait IntentClassifier: Send + Sync {
  async fn classify(&self, query: &str) -> Result<Intent>;
}

/// Keyword heuristics; no model call, so it cannot slow a search down
pub struct KeywordClassifier;

const QUESTION_STARTERS: &[&str] =
  &["what", "when", "where", "who", "why", "how", "which", "is", "are", "do", "does", "can"];

const ACTION_STARTERS: &[&str] =
  &["summarize", "rewrite", "translate", "draft", "send", "export", "merge", "compare", "list"];

#[async_trait]
impl IntentClassifier for KeywordClassifier {
  async fn classify(&self, query: &str) -> Result<Intent> {
    let trimmed = query.trim().to_lowercase();
    if trimmed.is_empty() {
      return Ok(Intent::Unknown);
    }

    let first_word = trimmed.split_whitespace().next().unwrap_or_default();

    if ACTION_STARTERS.contains(&first_word) {
      return Ok(Intent::Action);
    }
    if trimmed.ends_with('?') || QUESTION_STARTERS.contains(&first_word) {
      return Ok(Intent::Question);
    }

    Ok(Intent::Lookup)
  }
}

#[cfg(test)]
pub mod testing {
  use super::*;
  use crate::error::EngramError;

  /// Fails every call, for exercising the advisory-classification path
  pub struct FailingClassifier;

  #[async_trait]
  impl IntentClassifier for FailingClassifier {
    async fn classify(&self, _query: &str) -> Result<Intent> {
      Err(EngramError::StoreFailed("classifier offline".into()))
    }
  }
}
