//! Interactive line shell over the active checklist.
//!
//! Items, checklists and templates are addressed by their 1-based position
//! as printed by `show`, `lists` and `templates`.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use checklist_core::{ActiveDocument, Checklist, Clock, Command, Outcome, Placement, Priority, SyncReport, Template};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};

use crate::{CliApp, SyncWorker};

pub const HELP: &str = "\
Items:
  add <text>              add an item
  done <n>                toggle done
  pri <n> <1-5>           set priority
  edit <n> <text>         replace the item text
  rm <n>                  delete an item
  rm-done                 delete every done item
  clear                   delete every item
  mv <n> before|after <m> move an item
  sort                    undone first, then by priority
  undo                    revert the last bulk change
  title <text>            set the list title
Checklists:
  show | lists            print the active list / all lists
  new [title]             start a blank list
  open <n|name>           switch lists
  rename <name>           rename the active list
  delete <n|name>         delete a list
  mv-list <n> before|after <m>
  sort-lists
Templates:
  templates               print all templates
  save-template [name]    save the active items as a template
  apply <n> | apply! <n>  append (or replace with) a template's items
  rename-template <n> <name>
  delete-template <n>
  mv-template <n> before|after <m>
  sort-templates
Other:
  color <1-5> <color>     set a priority color
  export | copy           print the list in the text encoding
  sync | signin <owner> | signout
  help | quit";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("Unknown command {0:?}, try `help`")]
    UnknownCommand(String),

    #[error("Missing {0}")]
    MissingArgument(&'static str),

    #[error("No {kind} at position {value:?}")]
    BadIndex { kind: &'static str, value: String },

    #[error("Expected `before` or `after`, got {0:?}")]
    BadPlacement(String),

    #[error("Expected a number, got {0:?}")]
    BadNumber(String),
}

/// One parsed shell line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Command(Command),
    Show,
    Lists,
    Templates,
    Export,
    Help,
    Quit,
    Empty,
}

/// What positional arguments resolve against.
pub struct ParseContext<'a> {
    pub active: &'a ActiveDocument,
    pub checklists: &'a [Checklist],
    pub templates: &'a [Template],
}

impl ParseContext<'_> {
    fn item_id(&self, arg: &str) -> Result<String, ParseError> {
        position(arg, self.active.items.len(), "item").map(|i| self.active.items[i].id.clone())
    }

    /// A position in the list overview, else a literal checklist name.
    fn checklist_name(&self, arg: &str) -> String {
        match arg.parse::<usize>() {
            Ok(n) if (1..=self.checklists.len()).contains(&n) => self.checklists[n - 1].name.clone(),
            _ => arg.to_string(),
        }
    }

    fn template_id(&self, arg: &str) -> Result<String, ParseError> {
        position(arg, self.templates.len(), "template").map(|i| self.templates[i].id.clone())
    }
}

fn position(arg: &str, len: usize, kind: &'static str) -> Result<usize, ParseError> {
    match arg.parse::<usize>() {
        Ok(n) if (1..=len).contains(&n) => Ok(n - 1),
        _ => Err(ParseError::BadIndex {
            kind,
            value: arg.to_string(),
        }),
    }
}

fn placement(arg: &str) -> Result<Placement, ParseError> {
    match arg.to_ascii_lowercase().as_str() {
        "before" => Ok(Placement::Before),
        "after" => Ok(Placement::After),
        _ => Err(ParseError::BadPlacement(arg.to_string())),
    }
}

fn number(arg: &str) -> Result<i64, ParseError> {
    arg.parse().map_err(|_| ParseError::BadNumber(arg.to_string()))
}

/// Split off the first whitespace-delimited word.
fn split_word(s: &str) -> (&str, &str) {
    let s = s.trim();
    match s.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (s, ""),
    }
}

fn required<'a>(rest: &'a str, what: &'static str) -> Result<&'a str, ParseError> {
    if rest.is_empty() {
        Err(ParseError::MissingArgument(what))
    } else {
        Ok(rest)
    }
}

fn optional(rest: &str) -> Option<String> {
    (!rest.is_empty()).then(|| rest.to_string())
}

/// `<n> before|after <m>`
fn move_args<'a>(rest: &'a str) -> Result<(&'a str, Placement, &'a str), ParseError> {
    let (from, rest) = split_word(rest);
    let (how, to) = split_word(rest);
    let from = required(from, "position")?;
    let how = placement(required(how, "`before` or `after`")?)?;
    let to = required(to, "target position")?;
    Ok((from, how, to))
}

pub fn parse_line(line: &str, ctx: &ParseContext<'_>) -> Result<Input, ParseError> {
    let (verb, rest) = split_word(line);
    let command = match verb {
        "" => return Ok(Input::Empty),
        "help" | "?" => return Ok(Input::Help),
        "quit" | "exit" | "q" => return Ok(Input::Quit),
        "show" | "ls" => return Ok(Input::Show),
        "lists" => return Ok(Input::Lists),
        "templates" => return Ok(Input::Templates),
        "export" | "copy" => return Ok(Input::Export),

        "add" => Command::AddItem {
            text: required(rest, "item text")?.to_string(),
        },
        "done" | "x" => Command::ToggleDone {
            item: ctx.item_id(required(rest, "item position")?)?,
        },
        "pri" => {
            let (n, level) = split_word(rest);
            Command::SetPriority {
                item: ctx.item_id(required(n, "item position")?)?,
                priority: number(required(level, "priority")?)?,
            }
        }
        "edit" => {
            let (n, text) = split_word(rest);
            Command::EditText {
                item: ctx.item_id(required(n, "item position")?)?,
                text: required(text, "item text")?.to_string(),
            }
        }
        "rm" => Command::DeleteItem {
            item: ctx.item_id(required(rest, "item position")?)?,
        },
        "rm-done" => Command::DeleteDone,
        "clear" => Command::Clear,
        "mv" => {
            let (from, placement, to) = move_args(rest)?;
            Command::MoveItem {
                item: ctx.item_id(from)?,
                target: ctx.item_id(to)?,
                placement,
            }
        }
        "sort" => Command::SortByPriority,
        "undo" => Command::Undo,
        "title" => Command::SetTitle {
            title: required(rest, "title")?.to_string(),
        },

        "new" => Command::NewChecklist { title: optional(rest) },
        "open" => Command::Open {
            name: ctx.checklist_name(required(rest, "checklist")?),
        },
        "rename" => Command::Rename {
            name: required(rest, "new name")?.to_string(),
        },
        "delete" => Command::DeleteChecklist {
            name: ctx.checklist_name(required(rest, "checklist")?),
        },
        "mv-list" => {
            let (from, placement, to) = move_args(rest)?;
            position(from, ctx.checklists.len(), "checklist")?;
            position(to, ctx.checklists.len(), "checklist")?;
            Command::ReorderChecklist {
                name: ctx.checklist_name(from),
                target: ctx.checklist_name(to),
                placement,
            }
        }
        "sort-lists" => Command::SortChecklists,

        "save-template" => Command::SaveTemplate { name: optional(rest) },
        "apply" | "apply!" => Command::ApplyTemplate {
            id: ctx.template_id(required(rest, "template position")?)?,
            replace: verb == "apply!",
        },
        "rename-template" => {
            let (n, name) = split_word(rest);
            Command::RenameTemplate {
                id: ctx.template_id(required(n, "template position")?)?,
                name: required(name, "template name")?.to_string(),
            }
        }
        "delete-template" => Command::DeleteTemplate {
            id: ctx.template_id(required(rest, "template position")?)?,
        },
        "mv-template" => {
            let (from, placement, to) = move_args(rest)?;
            Command::ReorderTemplate {
                id: ctx.template_id(from)?,
                target: ctx.template_id(to)?,
                placement,
            }
        }
        "sort-templates" => Command::SortTemplates,

        "color" => {
            let (level, color) = split_word(rest);
            Command::SetPriorityColor {
                priority: number(required(level, "priority")?)?,
                color: required(color, "color")?.to_string(),
            }
        }
        "sync" => Command::Sync,
        "signin" => Command::SignIn {
            owner: required(rest, "owner")?.to_string(),
        },
        "signout" => Command::SignOut,

        other => return Err(ParseError::UnknownCommand(other.to_string())),
    };
    Ok(Input::Command(command))
}

// ==================== Rendering ====================

/// The active list, one numbered line per item.
pub fn render_active(doc: &ActiveDocument, color_of: impl Fn(Priority) -> Option<String>) -> String {
    let mut out = format!("== {} ==", doc.title);
    if doc.name.is_none() {
        out.push_str(" (unsaved)");
    }
    out.push('\n');
    if doc.items.is_empty() {
        out.push_str("  (no items)\n");
    }
    for (i, item) in doc.items.iter().enumerate() {
        let mark = if item.done { 'x' } else { ' ' };
        let color = color_of(item.priority)
            .map(|c| format!(", {}", c))
            .unwrap_or_default();
        out.push_str(&format!(
            "{:>3}. [{}] {}  ({} {}{})\n",
            i + 1,
            mark,
            item.text,
            item.priority.level(),
            item.priority.label(),
            color
        ));
    }
    out
}

pub fn render_checklists(checklists: &[Checklist], active: Option<&str>) -> String {
    if checklists.is_empty() {
        return "  (no checklists)\n".to_string();
    }
    checklists
        .iter()
        .enumerate()
        .map(|(i, c)| {
            let marker = if Some(c.name.as_str()) == active { '*' } else { ' ' };
            let pending = if c.synced { "" } else { " [unsynced]" };
            format!("{}{:>2}. {} ({} items){}\n", marker, i + 1, c.name, c.items.len(), pending)
        })
        .collect()
}

pub fn render_templates(templates: &[Template]) -> String {
    if templates.is_empty() {
        return "  (no templates)\n".to_string();
    }
    templates
        .iter()
        .enumerate()
        .map(|(i, t)| format!("{:>3}. {} ({} items)\n", i + 1, t.name, t.items.len()))
        .collect()
}

fn describe(outcome: &Outcome) -> Option<String> {
    match outcome {
        Outcome::Created(key) => Some(format!("Created {:?}", key)),
        Outcome::Renamed(key) => Some(format!("Renamed to {:?}", key)),
        Outcome::Changed | Outcome::Unchanged => None,
    }
}

pub fn log_reports(reports: &[SyncReport]) {
    for report in reports {
        if !report.is_clean() {
            warn!(
                "Sync of {} incomplete: {} failed, aborted: {}",
                report.namespace,
                report.failed.len(),
                report.aborted
            );
        } else if !(report.pulled.is_empty() && report.pushed.is_empty() && report.deleted.is_empty()) {
            info!(
                "Synced {}: {} pulled, {} pushed, {} deleted",
                report.namespace,
                report.pulled.len(),
                report.pushed.len(),
                report.deleted.len()
            );
        }
    }
}

// ==================== Loop ====================

/// Apply one line. Returns `false` once the user asked to quit.
pub fn handle_line(app: &mut CliApp, line: &str, out: &mut impl Write) -> Result<bool> {
    let checklists = app.checklists();
    let templates = app.templates();
    let ctx = ParseContext {
        active: app.active(),
        checklists: &checklists,
        templates: &templates,
    };

    let input = match parse_line(line, &ctx) {
        Ok(input) => input,
        Err(e) => {
            writeln!(out, "{}", e)?;
            return Ok(true);
        }
    };

    match input {
        Input::Empty => {}
        Input::Quit => return Ok(false),
        Input::Help => writeln!(out, "{}", HELP)?,
        Input::Show => write!(out, "{}", render_active(app.active(), |p| app.priority_color(p)))?,
        Input::Lists => write!(out, "{}", render_checklists(&checklists, app.active().name.as_deref()))?,
        Input::Templates => write!(out, "{}", render_templates(&templates))?,
        Input::Export => write!(out, "{}", app.export_text())?,
        Input::Command(command) => match app.dispatch(command) {
            Ok(outcome) => {
                if let Some(message) = describe(&outcome) {
                    writeln!(out, "{}", message)?;
                }
                if outcome != Outcome::Unchanged {
                    write!(out, "{}", render_active(app.active(), |p| app.priority_color(p)))?;
                }
            }
            Err(e) => writeln!(out, "Error: {}", e)?,
        },
    }
    Ok(true)
}

/// Time left until the earliest debounced push, measured on the app's clock.
fn until_due(app: &CliApp) -> Option<Duration> {
    let due = app.next_push_due()?;
    let wait = due - app.clock().now_millis();
    Some(Duration::from_millis(wait.max(0) as u64))
}

/// Fold finished sync passes in, reprinting the list if it was reloaded.
fn apply_reports(app: &mut CliApp, reports: &[SyncReport], out: &mut impl Write) -> Result<()> {
    if app.apply_sync_reports(reports) {
        write!(out, "{}", render_active(app.active(), |p| app.priority_color(p)))?;
    }
    log_reports(reports);
    Ok(())
}

/// Read commands from stdin until `quit`, end of input or Ctrl+C.
///
/// Remote work runs on a [`SyncWorker`] so commands keep being read while a
/// sync is in flight. Debounced pushes are handed over from the timer
/// branch, and everything still queued is flushed before returning.
pub async fn run(app: &mut CliApp) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = std::io::stdout();
    let mut worker = SyncWorker::spawn(Arc::clone(app.engine()));

    write!(stdout, "{}", render_active(app.active(), |p| app.priority_color(p)))?;
    writeln!(stdout, "Type `help` for commands.")?;

    // Initial pull from the restored session
    worker.submit(app.take_jobs());

    loop {
        let wait = until_due(app);

        tokio::select! {
            line = lines.next_line() => {
                match line? {
                    Some(line) => {
                        if !handle_line(app, &line, &mut stdout)? {
                            break;
                        }
                        // Sync, delete and rename jobs go out right away
                        worker.submit(app.take_jobs());
                    }
                    None => break,
                }
            }

            _ = tokio::time::sleep(wait.unwrap_or_default()), if wait.is_some() => {
                debug!("Push quiet period elapsed");
                worker.submit(app.take_jobs());
            }

            Some(reports) = worker.next(), if worker.in_flight() > 0 => {
                apply_reports(app, &reports, &mut stdout)?;
            }

            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    worker.submit(app.flush_jobs());
    let reports = worker.finish().await;
    apply_reports(app, &reports, &mut stdout)?;
    Ok(())
}
