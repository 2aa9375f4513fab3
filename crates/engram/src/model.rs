//! Record shapes persisted by the store and carried over the wire
//!
//! Note content is always the sealed blob from `strongbox::seal`, serialized
//! as base64 so the JSON tables and the socket protocol stay text. Plaintext
//! never appears in any of these types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Dimension every embedding vector must have
pub const EMBEDDING_DIM: usize = 384;

/// Category assigned when a note is stored without one
pub const DEFAULT_CATEGORY: &str = "general";

/// A stored note. `content` is ciphertext; `embedding` was computed from the
/// plaintext before sealing and must always describe the current content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Note {
  pub id: String,
  pub title: String,
  pub category: String,
  #[serde(with = "sealed_bytes")]
  pub content: Vec<u8>,
  pub embedding: Vec<f32>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub source_url: Option<String>,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

/// Input to `add_note`: everything but the store-assigned id and timestamps
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoteDraft {
  pub title: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub category: Option<String>,
  #[serde(with = "sealed_bytes")]
  pub content: Vec<u8>,
  pub embedding: Vec<f32>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub source_url: Option<String>,
}

/// Partial update for a note. Absent fields are left untouched. A content
/// change must carry the matching embedding; the store rejects one without
/// the other so search never ranks a note by a stale vector.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotePatch {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub title: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub category: Option<String>,
  #[serde(with = "sealed_bytes_opt", default, skip_serializing_if = "Option::is_none")]
  pub content: Option<Vec<u8>>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub embedding: Option<Vec<f32>>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub source_url: Option<String>,
}

/// A response style the assistant can speak in
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Persona {
  pub id: String,
  pub name: String,
  pub description: String,
  pub context: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub output_template: Option<String>,
  pub is_default: bool,
  pub is_active: bool,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonaDraft {
  pub name: String,
  pub description: String,
  pub context: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub output_template: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PersonaPatch {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub name: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub context: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub output_template: Option<String>,
}

/// Singleton preferences table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub selected_persona_id: Option<String>,
  pub schema_version: u32,
  pub updated_at: DateTime<Utc>,
}

impl Default for Settings {
  fn default() -> Self {
    Self { selected_persona_id: None, schema_version: 1, updated_at: Utc::now() }
  }
}

/// Store-wide counts for the statistics operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreStats {
  pub total_notes: usize,
  pub total_personas: usize,
  pub categories: Vec<String>,
  pub notes_per_category: Vec<CategoryCount>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryCount {
  pub category: String,
  pub count: usize,
}

/// A note paired with its cosine similarity to a query vector
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredNote {
  pub note: Note,
  pub similarity: f32,
}

mod sealed_bytes {
  use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
  use serde::{Deserialize, Deserializer, Serializer};

  pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&BASE64.encode(bytes))
  }

  pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
    let encoded = String::deserialize(deserializer)?;
    BASE64.decode(encoded.as_bytes()).map_err(serde::de::Error::custom)
  }
}

mod sealed_bytes_opt {
  use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
  use serde::{Deserialize, Deserializer, Serializer};

  pub fn serialize<S: Serializer>(bytes: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error> {
    match bytes {
      Some(bytes) => serializer.serialize_some(&BASE64.encode(bytes)),
      None => serializer.serialize_none(),
    }
  }

  pub fn deserialize<'de, D: Deserializer<'de>>(
    deserializer: D,
  ) -> Result<Option<Vec<u8>>, D::Error> {
    let encoded: Option<String> = Option::deserialize(deserializer)?;
    encoded
      .map(|s| BASE64.decode(s.as_bytes()).map_err(serde::de::Error::custom))
      .transpose()
  }
}
