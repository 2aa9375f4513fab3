//! Canonical record store: notes, personas, and settings
//!
//! Three JSON tables under the base dir, loaded once and guarded by a single
//! RwLock. Every mutation rewrites its table through a temp file and rename,
//! so a crash mid-write leaves the previous table intact. Concurrent writers
//! serialize on the lock; the last committed write wins.
//!
//! Vector search is brute force cosine over every note. At personal-store
//! scale a linear scan beats maintaining an index.

use std::cmp::Ordering;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{EngramError, Result};
use crate::model::{
  CategoryCount, Note, NoteDraft, NotePatch, Persona, PersonaDraft, PersonaPatch, ScoredNote,
  Settings, StoreStats, DEFAULT_CATEGORY,
};

const NOTES_FILE: &str = "notes.json";
const PERSONAS_FILE: &str = "personas.json";
const SETTINGS_FILE: &str = "settings.json";

pub struct RecordStore {
  base_dir: PathBuf,
  tables: RwLock<Tables>,
}

#[derive(Default)]
struct Tables {
  notes: Vec<Note>,
  personas: Vec<Persona>,
  settings: Settings,
}

impl RecordStore {
  /// Load the tables under `base_dir`, creating them (and the built-in
  /// persona) on first open.
  pub async fn open(base_dir: &Path) -> Result<Self> {
    tokio::fs::create_dir_all(base_dir)
      .await
      .map_err(|e| EngramError::StoreFailed(format!("failed to create data dir: {e}")))?;

    let notes = load_table(&base_dir.join(NOTES_FILE)).await?.unwrap_or_default();
    let personas: Vec<Persona> = load_table(&base_dir.join(PERSONAS_FILE)).await?.unwrap_or_default();
    let settings = load_table(&base_dir.join(SETTINGS_FILE)).await?.unwrap_or_default();

    let store =
      Self { base_dir: base_dir.to_path_buf(), tables: RwLock::new(Tables { notes, personas, settings }) };

    store.seed_default_persona().await?;
    Ok(store)
  }

  async fn seed_default_persona(&self) -> Result<()> {
    let mut tables = self.tables.write().await;
    if tables.personas.iter().any(|p| p.is_default) {
      return Ok(());
    }

    let now = Utc::now();
    let persona = Persona {
      id: "persona-archivist".into(),
      name: "Archivist".into(),
      description: "Neutral, factual summaries of stored notes".into(),
      context: "Answer plainly using only the retrieved notes. Cite note titles.".into(),
      output_template: None,
      is_default: true,
      is_active: tables.settings.selected_persona_id.is_none(),
      created_at: now,
      updated_at: now,
    };

    if tables.settings.selected_persona_id.is_none() {
      tables.settings.selected_persona_id = Some(persona.id.clone());
      tables.settings.updated_at = now;
      self.commit_settings(&tables).await?;
    }

    quill::verbose!("seeded built-in persona '{}'", persona.name);
    tables.personas.push(persona);
    self.commit_personas(&tables).await
  }

  // --- notes ---

  pub async fn add_note(&self, draft: NoteDraft) -> Result<Note> {
    if draft.embedding.is_empty() {
      return Err(EngramError::StoreFailed("note embedding must not be empty".into()));
    }

    let now = Utc::now();
    let note = Note {
      id: Uuid::new_v4().to_string(),
      title: draft.title,
      category: draft.category.unwrap_or_else(|| DEFAULT_CATEGORY.into()),
      content: draft.content,
      embedding: draft.embedding,
      source_url: draft.source_url,
      created_at: now,
      updated_at: now,
    };

    let mut tables = self.tables.write().await;
    tables.notes.push(note.clone());
    self.commit_notes(&tables).await?;

    Ok(note)
  }

  pub async fn get_note(&self, id: &str) -> Option<Note> {
    let tables = self.tables.read().await;
    tables.notes.iter().find(|n| n.id == id).cloned()
  }

  /// Apply a partial update. Content and embedding may only change together;
  /// accepting one without the other would leave search ranking the note by
  /// a vector describing text it no longer contains.
  pub async fn update_note(&self, id: &str, patch: NotePatch) -> Result<Note> {
    if patch.content.is_some() != patch.embedding.is_some() {
      return Err(EngramError::StoreFailed(
        "content and embedding must be updated together".into(),
      ));
    }

    let mut tables = self.tables.write().await;
    let note = tables
      .notes
      .iter_mut()
      .find(|n| n.id == id)
      .ok_or_else(|| EngramError::NotFound(format!("note {id}")))?;

    if let Some(title) = patch.title {
      note.title = title;
    }
    if let Some(category) = patch.category {
      note.category = category;
    }
    if let (Some(content), Some(embedding)) = (patch.content, patch.embedding) {
      note.content = content;
      note.embedding = embedding;
    }
    if let Some(url) = patch.source_url {
      note.source_url = Some(url);
    }
    note.updated_at = Utc::now();

    let updated = note.clone();
    self.commit_notes(&tables).await?;
    Ok(updated)
  }

  /// Remove a note. Returns false when the id was never stored; deleting
  /// something already gone is not an error.
  pub async fn delete_note(&self, id: &str) -> Result<bool> {
    let mut tables = self.tables.write().await;
    let before = tables.notes.len();
    tables.notes.retain(|n| n.id != id);

    if tables.notes.len() == before {
      return Ok(false);
    }

    self.commit_notes(&tables).await?;
    Ok(true)
  }

  /// All notes, most recently updated first
  pub async fn list_notes(&self) -> Vec<Note> {
    let tables = self.tables.read().await;
    let mut notes = tables.notes.clone();
    notes.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
    notes
  }

  /// Case-insensitive substring match over titles, exact and prefix matches
  /// first, ties broken by recency. An empty query matches nothing.
  pub async fn search_by_title(&self, query: &str) -> Vec<Note> {
    let needle = query.trim().to_lowercase();
    if needle.is_empty() {
      return Vec::new();
    }

    let tables = self.tables.read().await;
    let mut scored: Vec<(u32, Note)> = tables
      .notes
      .iter()
      .filter_map(|n| {
        let score = title_score(&n.title, &needle);
        (score > 0).then(|| (score, n.clone()))
      })
      .collect();

    scored.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| b.1.updated_at.cmp(&a.1.updated_at)));
    scored.into_iter().map(|(_, n)| n).collect()
  }

  /// Top `limit` notes by cosine similarity to `query`, ties broken by
  /// recency so a degenerate all-equal-similarity store still orders
  /// deterministically.
  pub async fn search_by_vector(&self, query: &[f32], limit: usize) -> Vec<ScoredNote> {
    let tables = self.tables.read().await;
    let mut scored: Vec<ScoredNote> = tables
      .notes
      .iter()
      .map(|n| ScoredNote { note: n.clone(), similarity: cosine_similarity(query, &n.embedding) })
      .collect();

    scored.sort_by(|a, b| {
      b.similarity
        .partial_cmp(&a.similarity)
        .unwrap_or(Ordering::Equal)
        .then_with(|| b.note.updated_at.cmp(&a.note.updated_at))
    });
    scored.truncate(limit);
    scored
  }

  /// Distinct categories in use, sorted
  pub async fn list_categories(&self) -> Vec<String> {
    let tables = self.tables.read().await;
    let mut categories: Vec<String> = tables.notes.iter().map(|n| n.category.clone()).collect();
    categories.sort();
    categories.dedup();
    categories
  }

  pub async fn statistics(&self) -> StoreStats {
    let tables = self.tables.read().await;

    let mut per_category: Vec<CategoryCount> = Vec::new();
    for note in &tables.notes {
      match per_category.iter_mut().find(|c| c.category == note.category) {
        Some(entry) => entry.count += 1,
        None => per_category.push(CategoryCount { category: note.category.clone(), count: 1 }),
      }
    }
    per_category.sort_by(|a, b| a.category.cmp(&b.category));

    StoreStats {
      total_notes: tables.notes.len(),
      total_personas: tables.personas.len(),
      categories: per_category.iter().map(|c| c.category.clone()).collect(),
      notes_per_category: per_category,
    }
  }

  // --- personas ---

  pub async fn add_persona(&self, draft: PersonaDraft) -> Result<Persona> {
    let now = Utc::now();
    let persona = Persona {
      id: Uuid::new_v4().to_string(),
      name: draft.name,
      description: draft.description,
      context: draft.context,
      output_template: draft.output_template,
      is_default: false,
      is_active: false,
      created_at: now,
      updated_at: now,
    };

    let mut tables = self.tables.write().await;
    tables.personas.push(persona.clone());
    self.commit_personas(&tables).await?;

    Ok(persona)
  }

  pub async fn get_persona(&self, id: &str) -> Option<Persona> {
    let tables = self.tables.read().await;
    tables.personas.iter().find(|p| p.id == id).cloned()
  }

  pub async fn update_persona(&self, id: &str, patch: PersonaPatch) -> Result<Persona> {
    let mut tables = self.tables.write().await;
    let persona = tables
      .personas
      .iter_mut()
      .find(|p| p.id == id)
      .ok_or_else(|| EngramError::NotFound(format!("persona {id}")))?;

    if let Some(name) = patch.name {
      persona.name = name;
    }
    if let Some(description) = patch.description {
      persona.description = description;
    }
    if let Some(context) = patch.context {
      persona.context = context;
    }
    if let Some(template) = patch.output_template {
      persona.output_template = Some(template);
    }
    persona.updated_at = Utc::now();

    let updated = persona.clone();
    self.commit_personas(&tables).await?;
    Ok(updated)
  }

  /// Remove a persona. The built-in persona cannot be deleted; deleting the
  /// active persona falls back to the built-in one.
  pub async fn delete_persona(&self, id: &str) -> Result<bool> {
    let mut tables = self.tables.write().await;

    let Some(target) = tables.personas.iter().find(|p| p.id == id) else {
      return Ok(false);
    };
    if target.is_default {
      return Err(EngramError::StoreFailed("the built-in persona cannot be deleted".into()));
    }

    let was_active = target.is_active;
    tables.personas.retain(|p| p.id != id);

    if was_active {
      let now = Utc::now();
      let mut fallback_id = None;
      for persona in tables.personas.iter_mut() {
        persona.is_active = persona.is_default;
        if persona.is_default {
          persona.updated_at = now;
          fallback_id = Some(persona.id.clone());
        }
      }
      tables.settings.selected_persona_id = fallback_id;
      tables.settings.updated_at = now;
      self.commit_settings(&tables).await?;
    }

    self.commit_personas(&tables).await?;
    Ok(true)
  }

  pub async fn list_personas(&self) -> Vec<Persona> {
    let tables = self.tables.read().await;
    tables.personas.clone()
  }

  pub async fn get_active_persona(&self) -> Option<Persona> {
    let tables = self.tables.read().await;
    tables.personas.iter().find(|p| p.is_active).cloned()
  }

  /// Make `id` the active persona, deactivating whichever was active before
  pub async fn set_active_persona(&self, id: &str) -> Result<Persona> {
    let mut tables = self.tables.write().await;
    if !tables.personas.iter().any(|p| p.id == id) {
      return Err(EngramError::NotFound(format!("persona {id}")));
    }

    let now = Utc::now();
    let mut selected = None;
    for persona in tables.personas.iter_mut() {
      let active = persona.id == id;
      if persona.is_active != active {
        persona.updated_at = now;
      }
      persona.is_active = active;
      if active {
        selected = Some(persona.clone());
      }
    }

    tables.settings.selected_persona_id = Some(id.to_string());
    tables.settings.updated_at = now;

    self.commit_personas(&tables).await?;
    self.commit_settings(&tables).await?;

    selected.ok_or_else(|| EngramError::NotFound(format!("persona {id}")))
  }

  // --- settings ---

  pub async fn settings(&self) -> Settings {
    self.tables.read().await.settings.clone()
  }

  // --- persistence ---

  async fn commit_notes(&self, tables: &Tables) -> Result<()> {
    write_table(&self.base_dir.join(NOTES_FILE), &tables.notes).await
  }

  async fn commit_personas(&self, tables: &Tables) -> Result<()> {
    write_table(&self.base_dir.join(PERSONAS_FILE), &tables.personas).await
  }

  async fn commit_settings(&self, tables: &Tables) -> Result<()> {
    write_table(&self.base_dir.join(SETTINGS_FILE), &tables.settings).await
  }
}

async fn load_table<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>> {
  let data = match tokio::fs::read_to_string(path).await {
    Ok(data) => data,
    Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
    Err(e) => {
      return Err(EngramError::StoreFailed(format!("failed to read {}: {e}", path.display())))
    }
  };

  serde_json::from_str(&data)
    .map(Some)
    .map_err(|e| EngramError::StoreFailed(format!("corrupt table {}: {e}", path.display())))
}

async fn write_table<T: serde::Serialize>(path: &Path, table: &T) -> Result<()> {
  let json = serde_json::to_string_pretty(table)
    .map_err(|e| EngramError::StoreFailed(format!("failed to serialize table: {e}")))?;

  // Write-then-rename keeps the previous table readable if we die mid-write.
  let tmp = path.with_extension("json.tmp");
  tokio::fs::write(&tmp, json)
    .await
    .map_err(|e| EngramError::StoreFailed(format!("failed to write {}: {e}", tmp.display())))?;
  tokio::fs::rename(&tmp, path)
    .await
    .map_err(|e| EngramError::StoreFailed(format!("failed to commit {}: {e}", path.display())))
}

fn title_score(title: &str, needle: &str) -> u32 {
  let haystack = title.to_lowercase();
  if haystack == *needle {
    3
  } else if haystack.starts_with(needle) {
    2
  } else if haystack.contains(needle) {
    1
  } else {
    0
  }
}

/// Cosine similarity; zero-magnitude or mismatched-dimension vectors score 0
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
  if a.len() != b.len() || a.is_empty() {
    return 0.0;
  }

  let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
  let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
  let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

  if mag_a == 0.0 || mag_b == 0.0 {
    return 0.0;
  }

  dot / (mag_a * mag_b)
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  fn draft(title: &str, embedding: Vec<f32>) -> NoteDraft {
    NoteDraft {
      title: title.into(),
      category: None,
      content: vec![1, 2, 3],
      embedding,
      source_url: None,
    }
  }

  async fn fresh_store(dir: &TempDir) -> RecordStore {
    RecordStore::open(dir.path()).await.unwrap()
  }

  #[tokio::test]
  async fn test_add_and_get_note() {
    let dir = TempDir::new().unwrap();
    let store = fresh_store(&dir).await;

    let note = store.add_note(draft("rust lifetimes", vec![0.1; 4])).await.unwrap();

    assert_eq!(note.category, DEFAULT_CATEGORY);
    let fetched = store.get_note(&note.id).await.unwrap();
    assert_eq!(fetched.title, "rust lifetimes");
  }

  #[tokio::test]
  async fn test_get_absent_note_is_none() {
    let dir = TempDir::new().unwrap();
    let store = fresh_store(&dir).await;

    assert!(store.get_note("no-such-id").await.is_none());
  }

  #[tokio::test]
  async fn test_notes_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let id = {
      let store = fresh_store(&dir).await;
      store.add_note(draft("persisted", vec![0.2; 4])).await.unwrap().id
    };

    let reopened = fresh_store(&dir).await;
    assert_eq!(reopened.get_note(&id).await.unwrap().title, "persisted");
  }

  #[tokio::test]
  async fn test_update_touches_only_named_fields() {
    let dir = TempDir::new().unwrap();
    let store = fresh_store(&dir).await;
    let note = store.add_note(draft("before", vec![0.3; 4])).await.unwrap();

    let updated = store
      .update_note(&note.id, NotePatch { title: Some("after".into()), ..Default::default() })
      .await
      .unwrap();

    assert_eq!(updated.title, "after");
    assert_eq!(updated.content, note.content, "content untouched by metadata patch");
    assert_eq!(updated.embedding, note.embedding);
    assert!(updated.updated_at >= note.updated_at);
  }

  #[tokio::test]
  async fn test_update_rejects_content_without_embedding() {
    let dir = TempDir::new().unwrap();
    let store = fresh_store(&dir).await;
    let note = store.add_note(draft("paired fields", vec![0.4; 4])).await.unwrap();

    let err = store
      .update_note(&note.id, NotePatch { content: Some(vec![9, 9]), ..Default::default() })
      .await
      .unwrap_err();

    assert!(err.to_string().contains("together"));
  }

  #[tokio::test]
  async fn test_update_absent_note_is_not_found() {
    let dir = TempDir::new().unwrap();
    let store = fresh_store(&dir).await;

    let err = store.update_note("ghost", NotePatch::default()).await.unwrap_err();
    assert!(matches!(err, EngramError::NotFound(_)));
  }

  #[tokio::test]
  async fn test_delete_reports_whether_anything_was_removed() {
    let dir = TempDir::new().unwrap();
    let store = fresh_store(&dir).await;
    let note = store.add_note(draft("short lived", vec![0.5; 4])).await.unwrap();

    assert!(store.delete_note(&note.id).await.unwrap());
    assert!(!store.delete_note(&note.id).await.unwrap(), "second delete finds nothing");
    assert!(store.get_note(&note.id).await.is_none());
  }

  #[tokio::test]
  async fn test_vector_search_orders_by_similarity() {
    let dir = TempDir::new().unwrap();
    let store = fresh_store(&dir).await;

    store.add_note(draft("east", vec![1.0, 0.0])).await.unwrap();
    store.add_note(draft("north", vec![0.0, 1.0])).await.unwrap();

    let results = store.search_by_vector(&[1.0, 0.0], 10).await;

    assert_eq!(results[0].note.title, "east");
    assert_eq!(results[1].note.title, "north");
    assert!(results[0].similarity > results[1].similarity);
    assert!((results[0].similarity - 1.0).abs() < 1e-6);
  }

  #[tokio::test]
  async fn test_vector_search_ties_break_by_recency() {
    let dir = TempDir::new().unwrap();
    let store = fresh_store(&dir).await;

    store.add_note(draft("older", vec![1.0, 0.0])).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    store.add_note(draft("newer", vec![1.0, 0.0])).await.unwrap();

    let results = store.search_by_vector(&[1.0, 0.0], 10).await;

    assert_eq!(results[0].note.title, "newer");
    assert_eq!(results[1].note.title, "older");
  }

  #[tokio::test]
  async fn test_vector_search_respects_limit() {
    let dir = TempDir::new().unwrap();
    let store = fresh_store(&dir).await;

    for i in 0..5 {
      store.add_note(draft(&format!("note {i}"), vec![1.0, 0.0])).await.unwrap();
    }

    assert_eq!(store.search_by_vector(&[1.0, 0.0], 3).await.len(), 3);
  }

  #[tokio::test]
  async fn test_vector_search_on_empty_store() {
    let dir = TempDir::new().unwrap();
    let store = fresh_store(&dir).await;

    assert!(store.search_by_vector(&[1.0, 0.0], 10).await.is_empty());
  }

  #[tokio::test]
  async fn test_title_search_prefers_exact_then_prefix() {
    let dir = TempDir::new().unwrap();
    let store = fresh_store(&dir).await;

    store.add_note(draft("rust patterns in practice", vec![0.1; 2])).await.unwrap();
    store.add_note(draft("Rust", vec![0.1; 2])).await.unwrap();
    store.add_note(draft("rust basics", vec![0.1; 2])).await.unwrap();
    store.add_note(draft("unrelated", vec![0.1; 2])).await.unwrap();

    let results = store.search_by_title("rust").await;

    assert_eq!(results.len(), 3);
    assert_eq!(results[0].title, "Rust");
    assert_eq!(results[1].title, "rust basics");
    assert_eq!(results[2].title, "rust patterns in practice");
  }

  #[tokio::test]
  async fn test_title_search_empty_query_matches_nothing() {
    let dir = TempDir::new().unwrap();
    let store = fresh_store(&dir).await;
    store.add_note(draft("anything", vec![0.1; 2])).await.unwrap();

    assert!(store.search_by_title("").await.is_empty());
    assert!(store.search_by_title("   ").await.is_empty());
  }

  #[tokio::test]
  async fn test_categories_are_distinct_and_sorted() {
    let dir = TempDir::new().unwrap();
    let store = fresh_store(&dir).await;

    for cat in ["work", "ideas", "work"] {
      let mut d = draft("n", vec![0.1; 2]);
      d.category = Some(cat.into());
      store.add_note(d).await.unwrap();
    }

    assert_eq!(store.list_categories().await, vec!["ideas", "work"]);
  }

  #[tokio::test]
  async fn test_statistics_counts_per_category() {
    let dir = TempDir::new().unwrap();
    let store = fresh_store(&dir).await;

    for cat in ["work", "ideas", "work"] {
      let mut d = draft("n", vec![0.1; 2]);
      d.category = Some(cat.into());
      store.add_note(d).await.unwrap();
    }

    let stats = store.statistics().await;
    assert_eq!(stats.total_notes, 3);
    assert_eq!(stats.total_personas, 1, "built-in persona counted");
    assert_eq!(stats.notes_per_category[1].category, "work");
    assert_eq!(stats.notes_per_category[1].count, 2);
  }

  #[tokio::test]
  async fn test_fresh_store_seeds_active_default_persona() {
    let dir = TempDir::new().unwrap();
    let store = fresh_store(&dir).await;

    let active = store.get_active_persona().await.unwrap();
    assert!(active.is_default);
    assert_eq!(store.settings().await.selected_persona_id, Some(active.id));
  }

  #[tokio::test]
  async fn test_set_active_persona_swaps_activation() {
    let dir = TempDir::new().unwrap();
    let store = fresh_store(&dir).await;

    let custom = store
      .add_persona(PersonaDraft {
        name: "Coach".into(),
        description: "Encouraging".into(),
        context: "Be supportive.".into(),
        output_template: None,
      })
      .await
      .unwrap();

    store.set_active_persona(&custom.id).await.unwrap();

    let active = store.get_active_persona().await.unwrap();
    assert_eq!(active.id, custom.id);
    let default = store.list_personas().await.into_iter().find(|p| p.is_default).unwrap();
    assert!(!default.is_active, "only one persona may be active");
  }

  #[tokio::test]
  async fn test_default_persona_cannot_be_deleted() {
    let dir = TempDir::new().unwrap();
    let store = fresh_store(&dir).await;
    let default = store.get_active_persona().await.unwrap();

    let err = store.delete_persona(&default.id).await.unwrap_err();
    assert!(err.to_string().contains("cannot be deleted"));
  }

  #[tokio::test]
  async fn test_deleting_active_persona_falls_back_to_default() {
    let dir = TempDir::new().unwrap();
    let store = fresh_store(&dir).await;

    let custom = store
      .add_persona(PersonaDraft {
        name: "Coach".into(),
        description: "Encouraging".into(),
        context: "Be supportive.".into(),
        output_template: None,
      })
      .await
      .unwrap();
    store.set_active_persona(&custom.id).await.unwrap();

    assert!(store.delete_persona(&custom.id).await.unwrap());

    let active = store.get_active_persona().await.unwrap();
    assert!(active.is_default);
  }

  #[test]
  fn test_cosine_similarity_basics() {
    assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
    assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
    assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0, "dimension mismatch scores zero");
  }
}
