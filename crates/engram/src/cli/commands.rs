//! CLI command handlers
//!
//! The CLI is a thin client: every store and embed operation goes through a
//! remote router to the daemon. Encryption and decryption happen here, in
//! this environment, because the CLI holds vault access; only ciphertext
//! crosses the socket.

use std::sync::Arc;

use anyhow::Result;
use colored::*;
use strongbox::KeyVault;

use crate::cli::display;
use crate::intent::KeywordClassifier;
use crate::model::{Note, Persona, PersonaDraft, PersonaPatch, StoreStats};
use crate::pipeline::{Pipeline, SaveRequest, UpdateRequest};
use crate::protocol::Request;
use crate::router::{Capabilities, Router};

struct CliContext {
  router: Arc<Router>,
  pipeline: Pipeline,
}

fn context() -> Result<CliContext> {
  let base = crate::base_dir()?;
  let router =
    Arc::new(Router::remote(Capabilities::client("cli"), crate::socket_path(&base)));
  let vault = Arc::new(KeyVault::open(&base));
  let pipeline = Pipeline::new(router.clone(), vault, Arc::new(KeywordClassifier));

  Ok(CliContext { router, pipeline })
}

pub async fn save_note(
  title: &str,
  content: &str,
  category: Option<String>,
  source_url: Option<String>,
) -> Result<()> {
  let ctx = context()?;

  let note = ctx
    .pipeline
    .save(SaveRequest {
      title: title.to_string(),
      category,
      content: content.to_string(),
      source_url,
      embedding: None,
    })
    .await?;

  println!("{} saved {} {}", "✓".green(), note.title.bold(), note.id.dimmed());
  Ok(())
}

pub async fn get_note(id: &str, show_content: bool) -> Result<()> {
  let ctx = context()?;

  let note: Note = ctx.router.call(Request::GetNote { id: id.to_string() }).await?;

  let content = if show_content { Some(ctx.pipeline.reveal(&note).await?) } else { None };
  display::display_note(&note, content.as_deref());

  Ok(())
}

pub async fn list_notes(verbose: bool) -> Result<()> {
  let ctx = context()?;

  let notes: Vec<Note> = ctx.router.call(Request::ListNotes).await?;
  if notes.is_empty() {
    println!("No notes stored yet.");
    return Ok(());
  }

  println!("{} {} notes", "▪".cyan(), notes.len());
  for note in &notes {
    display::display_note_line(note, verbose);
  }

  Ok(())
}

pub async fn search_notes(query: &str, limit: usize, by_title: bool) -> Result<()> {
  let ctx = context()?;

  if by_title {
    let notes: Vec<Note> =
      ctx.router.call(Request::SearchByTitle { query: query.to_string() }).await?;
    if notes.is_empty() {
      println!("No titles match {}", query.yellow());
      return Ok(());
    }
    for note in &notes {
      display::display_note_line(note, true);
    }
    return Ok(());
  }

  let outcome = ctx.pipeline.search(query, limit).await?;
  if outcome.matches.is_empty() {
    println!("No notes in the store yet.");
    return Ok(());
  }

  println!("{} intent: {:?}", "▪".cyan(), outcome.intent);
  for (i, scored) in outcome.matches.iter().enumerate() {
    display::display_match(i + 1, scored);
  }

  Ok(())
}

pub async fn update_note(
  id: &str,
  title: Option<String>,
  category: Option<String>,
  content: Option<String>,
  source_url: Option<String>,
) -> Result<()> {
  let ctx = context()?;

  if title.is_none() && category.is_none() && content.is_none() && source_url.is_none() {
    quill::warn!("nothing to update; pass --title, --category, --content, or --url");
    return Ok(());
  }

  let note =
    ctx.pipeline.update(id, UpdateRequest { title, category, content, source_url }).await?;

  println!("{} updated {}", "✓".green(), note.title.bold());
  Ok(())
}

pub async fn delete_note(id: &str) -> Result<()> {
  let ctx = context()?;

  let deleted: bool = ctx.router.call(Request::DeleteNote { id: id.to_string() }).await?;
  if deleted {
    println!("{} deleted {}", "✓".green(), id.dimmed());
  } else {
    println!("No note with id {}", id.yellow());
  }

  Ok(())
}

pub async fn list_categories() -> Result<()> {
  let ctx = context()?;

  let categories: Vec<String> = ctx.router.call(Request::ListCategories).await?;
  if categories.is_empty() {
    println!("No categories in use.");
    return Ok(());
  }

  for category in categories {
    println!("  {}", category.yellow());
  }

  Ok(())
}

pub async fn show_stats() -> Result<()> {
  let ctx = context()?;

  let stats: StoreStats = ctx.router.call(Request::Statistics).await?;
  display::display_stats(&stats);

  Ok(())
}

pub async fn embed_text(text: &str) -> Result<()> {
  let ctx = context()?;

  let vector: Vec<f32> =
    ctx.router.call(Request::EmbedText { text: text.to_string() }).await?;
  println!("{} {} dimensions", "▪".cyan(), vector.len());
  println!("{vector:?}");

  Ok(())
}

// --- personas ---

pub async fn list_personas() -> Result<()> {
  let ctx = context()?;

  let personas: Vec<Persona> = ctx.router.call(Request::ListPersonas).await?;
  for persona in &personas {
    display::display_persona(persona);
  }

  Ok(())
}

pub async fn create_persona(
  name: &str,
  description: &str,
  persona_context: &str,
  output_template: Option<String>,
) -> Result<()> {
  let ctx = context()?;

  let persona: Persona = ctx
    .router
    .call(Request::AddPersona(PersonaDraft {
      name: name.to_string(),
      description: description.to_string(),
      context: persona_context.to_string(),
      output_template,
    }))
    .await?;

  println!("{} created persona {} {}", "✓".green(), persona.name.bold(), persona.id.dimmed());
  Ok(())
}

pub async fn show_persona(id: &str) -> Result<()> {
  let ctx = context()?;

  let persona: Persona = ctx.router.call(Request::GetPersona { id: id.to_string() }).await?;
  display::display_persona(&persona);
  println!("  context:     {}", persona.context);
  if let Some(template) = &persona.output_template {
    println!("  template:    {template}");
  }

  Ok(())
}

pub async fn use_persona(id: &str) -> Result<()> {
  let ctx = context()?;

  let persona: Persona =
    ctx.router.call(Request::SetActivePersona { id: id.to_string() }).await?;
  println!("{} now speaking as {}", "✓".green(), persona.name.bold());

  Ok(())
}

pub async fn update_persona(
  id: &str,
  name: Option<String>,
  description: Option<String>,
  persona_context: Option<String>,
  output_template: Option<String>,
) -> Result<()> {
  let ctx = context()?;

  let persona: Persona = ctx
    .router
    .call(Request::UpdatePersona {
      id: id.to_string(),
      patch: PersonaPatch { name, description, context: persona_context, output_template },
    })
    .await?;

  println!("{} updated persona {}", "✓".green(), persona.name.bold());
  Ok(())
}

pub async fn delete_persona(id: &str) -> Result<()> {
  let ctx = context()?;

  let deleted: bool = ctx.router.call(Request::DeletePersona { id: id.to_string() }).await?;
  if deleted {
    println!("{} deleted persona {}", "✓".green(), id.dimmed());
  } else {
    println!("No persona with id {}", id.yellow());
  }

  Ok(())
}

pub async fn active_persona() -> Result<()> {
  let ctx = context()?;

  let persona: Option<Persona> = ctx.router.call(Request::GetActivePersona).await?;
  match persona {
    Some(persona) => display::display_persona(&persona),
    None => println!("No active persona."),
  }

  Ok(())
}
