//! checklist: local-first checklists with optional directory-backed sync.
//!
//! Every subcommand opens the local store, restores the remote session when
//! one is configured, pulls, does its work and flushes pending remote work
//! before exiting. Without a subcommand an interactive shell starts and
//! syncs in the background.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio::io::AsyncReadExt;
use tracing::info;
use tracing_subscriber::EnvFilter;

use checklist_cli::config::{resolve_data_dir, Config};
use checklist_cli::shell::{self, render_active, render_checklists, render_templates};
use checklist_cli::{log_sync_events, open_app, CliApp};
use checklist_core::{Command, Outcome};

#[derive(Parser, Debug)]
#[command(name = "checklist")]
#[command(about = "Prioritized checklists that sync between devices")]
struct Args {
    /// Directory holding config.json and the local data file
    #[arg(long, env = "CHECKLIST_DATA_DIR")]
    data_dir: Option<String>,

    /// Shared directory to sync through (overrides config)
    #[arg(long, env = "CHECKLIST_REMOTE")]
    remote: Option<String>,

    /// Owner of the remote rows (overrides config)
    #[arg(long, env = "CHECKLIST_OWNER")]
    owner: Option<String>,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Cmd>,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// List all checklists
    List,
    /// Print a checklist (the active one by default)
    Show { name: Option<String> },
    /// Start a new checklist, optionally with items
    New { title: String, items: Vec<String> },
    /// Add items to the active checklist
    Add {
        #[arg(required = true)]
        items: Vec<String>,
    },
    /// Make a checklist the active one
    Open { name: String },
    /// Rename the active checklist
    Rename { name: String },
    /// Delete a checklist
    Delete { name: String },
    /// Write the active checklist in the text encoding
    Export {
        /// Directory to write a timestamped file into (stdout if omitted)
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Print the active checklist's text encoding for pasting elsewhere
    Copy,
    /// Read items in the text encoding from a file, or `-` for stdin
    Import {
        file: String,
        /// Replace the active items instead of appending
        #[arg(long)]
        replace: bool,
    },
    /// Pull, merge and push everything now
    Sync,
    /// Interactive shell
    Shell,
    /// List templates
    Templates,
    /// Set the color shown for a priority level
    Color { priority: i64, color: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Logs go to stderr so exported text on stdout stays clean
    let default_filter = if args.verbose {
        "debug,checklist_cli=debug,checklist_core=debug"
    } else {
        "info,checklist_cli=info,checklist_core=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let data_dir = resolve_data_dir(args.data_dir.as_deref())?;
    let config = Config::load(&data_dir)?.with_overrides(args.remote.as_deref(), args.owner.as_deref());
    info!("Data directory: {:?}", data_dir);

    let mut app = open_app(&data_dir, &config)?;
    // Subscribed before the initial pull runs
    let _subscription = app.engine().events().subscribe(log_sync_events);

    let command = args.command.unwrap_or(Cmd::Shell);
    if !matches!(command, Cmd::Shell) {
        shell::log_reports(&app.run_pending().await);
    }
    run(&mut app, command).await?;

    shell::log_reports(&app.flush().await);
    Ok(())
}

async fn run(app: &mut CliApp, command: Cmd) -> Result<()> {
    match command {
        Cmd::List => print!("{}", render_checklists(&app.checklists(), app.active().name.as_deref())),
        Cmd::Show { name } => {
            if let Some(name) = name {
                app.dispatch(Command::Open { name })?;
            }
            print_active(app);
        }
        Cmd::New { title, items } => {
            app.dispatch(Command::NewChecklist { title: Some(title) })?;
            for text in items {
                report(app.dispatch(Command::AddItem { text })?);
            }
            print_active(app);
        }
        Cmd::Add { items } => {
            for text in items {
                report(app.dispatch(Command::AddItem { text })?);
            }
            print_active(app);
        }
        Cmd::Open { name } => {
            app.dispatch(Command::Open { name })?;
            print_active(app);
        }
        Cmd::Rename { name } => {
            app.active_name()?;
            report(app.dispatch(Command::Rename { name })?);
        }
        Cmd::Delete { name } => {
            app.dispatch(Command::DeleteChecklist { name: name.clone() })?;
            println!("Deleted {:?}", name);
        }
        Cmd::Export { out: None } | Cmd::Copy => print!("{}", app.export_text()),
        Cmd::Export { out: Some(dir) } => {
            let path = dir.join(app.export_file_name(chrono::Utc::now()));
            std::fs::create_dir_all(&dir).with_context(|| format!("Failed to create {:?}", dir))?;
            std::fs::write(&path, app.export_text())
                .with_context(|| format!("Failed to write {:?}", path))?;
            println!("{}", path.display());
        }
        Cmd::Import { file, replace } => {
            let text = if file == "-" {
                let mut text = String::new();
                tokio::io::stdin().read_to_string(&mut text).await?;
                text
            } else {
                tokio::fs::read_to_string(&file)
                    .await
                    .with_context(|| format!("Failed to read {:?}", file))?
            };
            report(app.dispatch(Command::Import { text, replace })?);
            print_active(app);
        }
        Cmd::Sync => {
            if app.dispatch(Command::Sync)? == Outcome::Unchanged {
                bail!("Sync is not configured: set remote_dir and owner in config.json or pass --remote and --owner");
            }
        }
        Cmd::Templates => print!("{}", render_templates(&app.templates())),
        Cmd::Color { priority, color } => {
            app.dispatch(Command::SetPriorityColor { priority, color })?;
        }
        // Pulls and flushes through its own background worker
        Cmd::Shell => shell::run(app).await?,
    }
    Ok(())
}

fn print_active(app: &CliApp) {
    print!("{}", render_active(app.active(), |p| app.priority_color(p)));
}

fn report(outcome: Outcome) {
    match outcome {
        Outcome::Created(name) => println!("Created {:?}", name),
        Outcome::Renamed(name) => println!("Renamed to {:?}", name),
        Outcome::Changed | Outcome::Unchanged => {}
    }
}
