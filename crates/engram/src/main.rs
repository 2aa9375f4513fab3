use anyhow::Result;
use clap::{Parser, Subcommand};
use engram::cli::{commands, daemon_control};

#[derive(Parser)]
#[command(name = "engram")]
#[command(about = "Engram - personal knowledge store\nEncrypted notes with semantic search")]
#[command(version)]
struct Cli {
  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand)]
enum Command {
  /// Save a new note
  Save {
    /// Note title
    title: String,
    /// Note content (encrypted at rest)
    content: String,
    /// Category label
    #[arg(short, long)]
    category: Option<String>,
    /// Source URL the note came from
    #[arg(long)]
    url: Option<String>,
  },
  /// Show a note
  Get {
    /// Note id
    id: String,
    /// Decrypt and print the content
    #[arg(short, long)]
    show: bool,
  },
  /// List all notes, most recently updated first
  List {
    /// Include ids and categories
    #[arg(short, long)]
    verbose: bool,
  },
  /// Search notes by meaning, or by title with --title
  Search {
    /// Search query
    query: String,
    /// Maximum number of matches
    #[arg(short, long, default_value = "5")]
    limit: usize,
    /// Substring match over titles instead of semantic search
    #[arg(long)]
    title: bool,
  },
  /// Update fields of an existing note
  Update {
    /// Note id
    id: String,
    /// New title
    #[arg(long)]
    title: Option<String>,
    /// New category
    #[arg(short, long)]
    category: Option<String>,
    /// New content; re-embedded and re-encrypted
    #[arg(long)]
    content: Option<String>,
    /// New source URL
    #[arg(long)]
    url: Option<String>,
  },
  /// Delete a note
  Delete {
    /// Note id
    id: String,
  },
  /// List categories in use
  Categories,
  /// Show store statistics
  Stats,
  /// Embed a text and print the vector (debugging)
  Embed {
    /// Text to embed
    text: String,
  },
  /// Manage response personas
  Persona {
    #[command(subcommand)]
    command: PersonaCommand,
  },
  /// Control the store daemon
  Daemon {
    #[command(subcommand)]
    command: DaemonCommand,
  },
}

#[derive(Subcommand)]
enum PersonaCommand {
  /// List all personas
  List,
  /// Create a persona
  Create {
    name: String,
    description: String,
    /// Instructions that shape responses
    context: String,
    /// Optional output template
    #[arg(long)]
    template: Option<String>,
  },
  /// Show one persona in full
  Show { id: String },
  /// Make a persona the active one
  Use { id: String },
  /// Update fields of a persona
  Update {
    id: String,
    #[arg(long)]
    name: Option<String>,
    #[arg(long)]
    description: Option<String>,
    #[arg(long)]
    context: Option<String>,
    #[arg(long)]
    template: Option<String>,
  },
  /// Delete a persona
  Delete { id: String },
  /// Show the active persona
  Active,
}

#[derive(Subcommand)]
enum DaemonCommand {
  /// Start the daemon
  Start,
  /// Stop the daemon
  Stop,
  /// Check whether the daemon is running
  Status,
}

async fn handle(command: Command) -> Result<()> {
  match command {
    Command::Save { title, content, category, url } => {
      commands::save_note(&title, &content, category, url).await
    }
    Command::Get { id, show } => commands::get_note(&id, show).await,
    Command::List { verbose } => commands::list_notes(verbose).await,
    Command::Search { query, limit, title } => commands::search_notes(&query, limit, title).await,
    Command::Update { id, title, category, content, url } => {
      commands::update_note(&id, title, category, content, url).await
    }
    Command::Delete { id } => commands::delete_note(&id).await,
    Command::Categories => commands::list_categories().await,
    Command::Stats => commands::show_stats().await,
    Command::Embed { text } => commands::embed_text(&text).await,
    Command::Persona { command } => handle_persona(command).await,
    Command::Daemon { command } => handle_daemon(command).await,
  }
}

async fn handle_persona(command: PersonaCommand) -> Result<()> {
  match command {
    PersonaCommand::List => commands::list_personas().await,
    PersonaCommand::Create { name, description, context, template } => {
      commands::create_persona(&name, &description, &context, template).await
    }
    PersonaCommand::Show { id } => commands::show_persona(&id).await,
    PersonaCommand::Use { id } => commands::use_persona(&id).await,
    PersonaCommand::Update { id, name, description, context, template } => {
      commands::update_persona(&id, name, description, context, template).await
    }
    PersonaCommand::Delete { id } => commands::delete_persona(&id).await,
    PersonaCommand::Active => commands::active_persona().await,
  }
}

async fn handle_daemon(command: DaemonCommand) -> Result<()> {
  let base = engram::base_dir()?;
  let socket = engram::socket_path(&base);
  let pid_file = engram::pid_path(&base);

  match command {
    DaemonCommand::Start => daemon_control::start(&socket, &pid_file).await,
    DaemonCommand::Stop => daemon_control::stop(&socket, &pid_file).await,
    DaemonCommand::Status => daemon_control::status(&socket).await,
  }
}

#[tokio::main]
async fn main() -> Result<()> {
  let cli = Cli::parse();

  handle(cli.command).await?;
  Ok(())
}
