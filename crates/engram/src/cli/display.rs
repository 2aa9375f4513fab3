//! Terminal rendering for notes, matches, and personas

use colored::*;

use crate::model::{Note, Persona, ScoredNote, StoreStats};

pub fn display_note(note: &Note, content: Option<&str>) {
  println!("{} {}", "▪".cyan(), note.title.bold());
  println!("  id:       {}", note.id.dimmed());
  println!("  category: {}", note.category.yellow());
  if let Some(url) = &note.source_url {
    println!("  source:   {}", url.blue());
  }
  println!("  updated:  {}", note.updated_at.format("%Y-%m-%d %H:%M UTC"));

  if let Some(content) = content {
    println!("---\n{content}\n---");
  }
}

pub fn display_note_line(note: &Note, verbose: bool) {
  if verbose {
    println!(
      "  {} {} {} {}",
      "▪".cyan(),
      note.title.bold(),
      format!("[{}]", note.category).yellow(),
      note.id.dimmed()
    );
  } else {
    println!("  {} {}", "▪".cyan(), note.title.bold());
  }
}

pub fn display_match(rank: usize, scored: &ScoredNote) {
  println!(
    "  {} {} {}",
    format!("{rank}.").dimmed(),
    scored.note.title.bold(),
    format!("({:.3})", scored.similarity).dimmed()
  );
  println!("     {} {}", format!("[{}]", scored.note.category).yellow(), scored.note.id.dimmed());
}

pub fn display_persona(persona: &Persona) {
  let marker = if persona.is_active { "●".green() } else { "○".dimmed() };
  let name =
    if persona.is_default { format!("{} (built-in)", persona.name) } else { persona.name.clone() };

  println!("{marker} {}", name.bold());
  println!("  id:          {}", persona.id.dimmed());
  println!("  description: {}", persona.description);
}

pub fn display_stats(stats: &StoreStats) {
  println!("{} {} notes, {} personas", "▪".cyan(), stats.total_notes, stats.total_personas);
  for entry in &stats.notes_per_category {
    println!("  {} {}", format!("{:>4}", entry.count).dimmed(), entry.category.yellow());
  }
}
