//! # Groundwork CLI (`gw`)
//!
//! The `gw` binary drives the orchestrator from a terminal: it keeps chat
//! sessions on disk, runs turns against the configured backends, and lets
//! the user accept or reject proposed code edits.
//!
//! ## Usage
//!
//! ```bash
//! gw --config ./config/gw.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `gw ask "<message>"` | Run one turn in the active session |
//! | `gw chat` | Interactive loop (`/accept`, `/reject`, `/quit`) |
//! | `gw search "<query>"` | Retrieval preview, no generation |
//! | `gw sessions list\|new\|switch\|delete\|show` | Manage sessions |
//! | `gw connect <dir>` | New session over a local directory |
//! | `gw grounding --web on` | Show or change grounding sources |
//! | `gw suggestion accept\|reject` | Resolve a pending code suggestion |
//! | `gw edits` | List files changed by accepted suggestions |
//! | `gw models` | List or select the generation model |
//! | `gw files` | List files known to the cloud index |
//! | `gw completions <shell>` | Print shell completions |

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use std::io::BufRead;
use std::path::{Path, PathBuf};

use groundwork::config::{self, Config};
use groundwork::dataset;
use groundwork::logging;
use groundwork::models::{Attachment, GroundingConfig, Message, Role};
use groundwork::orchestrator::{App, Resolution, Resolved, TurnReport};
use groundwork::render::{self, LivePrinter, OutputMode};

/// Groundwork: grounded, cited answers and reviewable code edits from your
/// documents.
#[derive(Parser)]
#[command(
    name = "gw",
    about = "Groundwork: grounded, cited chat answers and reviewable code edits",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/gw.toml`. When the default file does not exist,
    /// built-in defaults are used.
    #[arg(long, global = true, default_value = "./config/gw.toml")]
    config: PathBuf,

    /// Log debug output to stderr (overridden by RUST_LOG).
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send one message in the active session.
    ///
    /// Creates a session first if none is active. The answer streams to
    /// stdout; sources, web attributions and code suggestions follow it.
    Ask {
        message: String,

        /// Attach a file to the message.
        #[arg(long)]
        attach: Option<PathBuf>,

        /// Use this model for this turn only (must be listed in
        /// `[generator].models`). The saved selection is left unchanged.
        #[arg(long)]
        model: Option<String>,

        /// Never route to the code suggestion pipeline.
        #[arg(long)]
        no_code: bool,
    },

    /// Interactive chat on stdin.
    Chat,

    /// Run retrieval only and print fused results.
    Search { query: String },

    /// Manage chat sessions.
    Sessions {
        #[command(subcommand)]
        action: SessionAction,
    },

    /// Create a session grounded on a local directory.
    Connect { dir: PathBuf },

    /// Show or change the active session's grounding sources.
    Grounding {
        #[arg(long, value_enum)]
        cloud: Option<Toggle>,
        #[arg(long, value_enum)]
        local: Option<Toggle>,
        #[arg(long, value_enum)]
        web: Option<Toggle>,
        #[arg(long, value_enum)]
        maps: Option<Toggle>,
    },

    /// Accept or reject a pending code suggestion.
    Suggestion {
        #[arg(value_enum)]
        action: SuggestionAction,

        /// Message index in the active session (default: newest pending).
        #[arg(long)]
        message: Option<usize>,
    },

    /// List files changed by accepted suggestions.
    Edits,

    /// List models, or select one.
    Models {
        #[arg(long)]
        select: Option<String>,
    },

    /// List every file known to the cloud index.
    Files,

    /// Print shell completions.
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand)]
enum SessionAction {
    /// List sessions, newest first (`*` marks the active one).
    List,
    /// Start a new empty session.
    New,
    /// Make another session active.
    Switch { id: String },
    /// Delete a session.
    Delete { id: String },
    /// Print the active session's messages.
    Show,
}

#[derive(Clone, Copy, ValueEnum)]
enum Toggle {
    On,
    Off,
}

impl Toggle {
    fn apply(self, flag: &mut bool) {
        *flag = matches!(self, Toggle::On);
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum SuggestionAction {
    Accept,
    Reject,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    if let Commands::Completions { shell } = cli.command {
        clap_complete::generate(shell, &mut Cli::command(), "gw", &mut std::io::stdout());
        return Ok(());
    }

    let cfg = load_or_default(&cli.config)?;
    let mut app = App::open(cfg)?;

    match cli.command {
        Commands::Ask {
            message,
            attach,
            model,
            no_code,
        } => {
            if no_code {
                app.config.features.code_generation = false;
            }
            let attachment = attach.as_deref().map(read_attachment).transpose()?;
            run_ask(&mut app, &message, attachment, model.as_deref()).await?;
        }
        Commands::Chat => run_chat(&mut app).await?,
        Commands::Search { query } => run_search(&app, &query).await?,
        Commands::Sessions { action } => run_sessions(&mut app, action)?,
        Commands::Connect { dir } => {
            let session = dataset::connect_session(&dir, &app.config.dataset)?;
            let files = session.local_dataset.len();
            let id = app.store.insert_session(session);
            app.save()?;
            println!("Connected {} ({} files) as session {}", dir.display(), files, id);
        }
        Commands::Grounding {
            cloud,
            local,
            web,
            maps,
        } => {
            let Some(session) = app.store.active() else {
                bail!("No active session. Create one with `gw sessions new`.");
            };
            let mut grounding = session.grounding_config;
            let changed = cloud.is_some() || local.is_some() || web.is_some() || maps.is_some();
            if let Some(t) = cloud {
                t.apply(&mut grounding.use_cloud_index);
            }
            if let Some(t) = local {
                t.apply(&mut grounding.use_local_dataset);
            }
            if let Some(t) = web {
                t.apply(&mut grounding.use_web_search);
            }
            if let Some(t) = maps {
                t.apply(&mut grounding.use_maps_search);
            }
            if changed {
                app.store.set_grounding(grounding);
                app.save()?;
            }
            print_grounding(&grounding);
        }
        Commands::Suggestion { action, message } => {
            let resolution = match action {
                SuggestionAction::Accept => Resolution::Accept,
                SuggestionAction::Reject => Resolution::Reject,
            };
            let resolved = app.resolve(message, resolution)?;
            print_resolved(&resolved);
        }
        Commands::Edits => {
            let mut any = false;
            for entry in app.store.edited_files() {
                println!("{}", render::render_edited_file(entry));
                any = true;
            }
            if !any {
                println!("No edited files.");
            }
        }
        Commands::Models { select } => {
            let models = app.config.generator.models.clone();
            if let Some(name) = select {
                app.store.set_selected_model(&name, &models)?;
                app.save()?;
            }
            for m in &models {
                let marker = if m == app.store.selected_model() { "*" } else { " " };
                println!("{} {}", marker, m);
            }
        }
        Commands::Files => {
            let files = app.cloud().list_files().await?;
            for f in &files {
                println!("{}  {}", f.id, f.full_path());
            }
            println!("{} files", files.len());
        }
        Commands::Completions { .. } => unreachable!("handled before config loading"),
    }

    Ok(())
}

/// Load the config file; fall back to defaults only when the file is absent.
fn load_or_default(path: &Path) -> Result<Config> {
    if path.exists() {
        config::load_config(path)
    } else {
        tracing::debug!(path = %path.display(), "config file not found, using defaults");
        Ok(Config::minimal())
    }
}

fn read_attachment(path: &Path) -> Result<Attachment> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read attachment: {}", path.display()))?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string());
    Ok(Attachment {
        mime_type: mime_for(&name).to_string(),
        name,
        data: BASE64_STANDARD.encode(bytes),
    })
}

fn mime_for(name: &str) -> &'static str {
    let ext = name
        .rsplit_once('.')
        .map(|(_, e)| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "pdf" => "application/pdf",
        "json" => "application/json",
        "xml" => "application/xml",
        "toml" => "application/toml",
        "yaml" | "yml" => "application/yaml",
        "html" | "htm" => "text/html",
        "csv" => "text/csv",
        "md" => "text/markdown",
        "txt" | "log" => "text/plain",
        _ if groundwork::code_edit::EDITABLE_EXTENSIONS.contains(&ext.as_str()) => "text/plain",
        _ => "application/octet-stream",
    }
}

async fn run_ask(
    app: &mut App,
    message: &str,
    attachment: Option<Attachment>,
    model: Option<&str>,
) -> Result<()> {
    let mode = OutputMode::default_for_tty();
    if mode == OutputMode::Live {
        app.store.set_observer(Box::new(LivePrinter::new()));
    }

    let report = match model {
        Some(model) => app.send_with_model(message, attachment, model).await?,
        None => app.send(message, attachment).await?,
    };
    print_turn(app, &report, mode);
    Ok(())
}

fn print_turn(app: &App, report: &TurnReport, mode: OutputMode) {
    for advisory in &report.advisories {
        eprintln!("note: {}", advisory);
    }
    for warning in &report.warnings {
        eprintln!("warning: {} source failed: {}", warning.source, warning.message);
    }

    let Some(tail) = app.store.tail() else {
        return;
    };
    if mode == OutputMode::Live {
        println!();
    } else {
        println!("{}", render::render_content(tail));
    }
    print_extras(tail);
}

fn print_extras(message: &Message) {
    let citations = render::render_citations(message);
    if !citations.is_empty() {
        println!("\n{}", citations.trim_end());
    }
    let attributions = render::render_attributions(&message.external_attributions);
    if !attributions.is_empty() {
        println!("\n{}", attributions.trim_end());
    }
    if let Some(suggestion) = &message.suggestion {
        println!("\n{}", render::render_suggestion(suggestion).trim_end());
        println!("Run `gw suggestion accept` or `gw suggestion reject`.");
    }
}

fn print_resolved(resolved: &Resolved) {
    match resolved {
        Resolved::Accepted(outcome) => {
            println!("Applied edit to {}", outcome.file.full_path());
            if let Some(warning) = &outcome.warning {
                eprintln!("warning: {}", warning);
            }
        }
        Resolved::Rejected(file) => println!("Discarded edit to {}", file.full_path()),
    }
}

async fn run_chat(app: &mut App) -> Result<()> {
    let mode = OutputMode::default_for_tty();
    if mode == OutputMode::Live {
        app.store.set_observer(Box::new(LivePrinter::new()));
    }
    if app.store.active().is_none() {
        app.store.create_session();
    }

    eprintln!("Chatting in session {}. /accept, /reject, /quit", app.store.active_id().unwrap_or("?"));

    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;
        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        match input {
            "/quit" | "/exit" => break,
            "/accept" | "/reject" => {
                let resolution = if input == "/accept" {
                    Resolution::Accept
                } else {
                    Resolution::Reject
                };
                match app.resolve(None, resolution) {
                    Ok(resolved) => print_resolved(&resolved),
                    Err(e) => eprintln!("error: {}", e),
                }
            }
            _ => {
                let report = app.send(input, None).await?;
                print_turn(app, &report, mode);
            }
        }
    }

    Ok(())
}

async fn run_search(app: &App, query: &str) -> Result<()> {
    let outcome = app.preview_search(query).await?;

    if outcome.query_used != query {
        println!("query: {}", outcome.query_used);
    }
    for warning in &outcome.warnings {
        eprintln!("warning: {} source failed: {}", warning.source, warning.message);
    }
    if let Some(advisory) = &outcome.advisory {
        eprintln!("note: {}", advisory);
    }

    if outcome.results.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, result) in outcome.results.iter().enumerate() {
        println!(
            "{}. [{:.4}] {}",
            i + 1,
            result.relevance,
            result.file.full_path()
        );
        let preview: String = result.snippet.chars().take(160).collect();
        println!("    {}", preview.replace('\n', " "));
    }

    Ok(())
}

fn run_sessions(app: &mut App, action: SessionAction) -> Result<()> {
    match action {
        SessionAction::List => {
            if app.store.sessions().is_empty() {
                println!("No sessions.");
            }
            let active = app.store.active_id().map(str::to_string);
            for session in app.store.sessions() {
                let is_active = active.as_deref() == Some(session.id.as_str());
                println!("{}", render::render_session_row(session, is_active));
            }
        }
        SessionAction::New => {
            let id = app.store.create_session();
            app.save()?;
            println!("Created session {}", id);
        }
        SessionAction::Switch { id } => {
            if !app.store.switch_to(&id) {
                bail!("No session with id {}", id);
            }
            app.save()?;
            println!("Switched to session {}", id);
        }
        SessionAction::Delete { id } => {
            if !app.store.delete_session(&id) {
                bail!("No session with id {}", id);
            }
            app.save()?;
            println!("Deleted session {}", id);
        }
        SessionAction::Show => {
            let Some(session) = app.store.active() else {
                println!("No active session.");
                return Ok(());
            };
            println!("# {} ({})", session.title, session.id);
            print_grounding(&session.grounding_config);
            for (i, message) in session.messages.iter().enumerate() {
                let who = match message.role {
                    Role::User => "you",
                    Role::Model => "model",
                };
                println!("\n[{}] {}:", i, who);
                println!("{}", render::render_content(message));
                print_extras(message);
            }
        }
    }
    Ok(())
}

fn print_grounding(grounding: &GroundingConfig) {
    let flag = |on: bool| if on { "on" } else { "off" };
    println!(
        "grounding: cloud={} local={} web={} maps={}",
        flag(grounding.use_cloud_index),
        flag(grounding.use_local_dataset),
        flag(grounding.use_web_search),
        flag(grounding.use_maps_search)
    );
}
