//! Application context and command dispatch.
//!
//! `App` owns the single live document (the active checklist's title and
//! items), its undo stack and the push debouncer. Every user action is a
//! [`Command`] run through [`App::dispatch`], which is synchronous: the
//! change is persisted through the record store before it returns, and any
//! remote work is queued as a [`RemoteJob`] for the caller to run.

use crate::clock::Clock;
use crate::debounce::PushDebouncer;
use crate::events::SyncEvent;
use crate::model::{Checklist, InvalidPriority, Item, Namespace, Priority, Template, Timestamp};
use crate::order::Placement;
use crate::record::Record;
use crate::serializer;
use crate::store::{RecordStore, SharedStore, StorageBackend, StoreError};
use crate::sync_engine::{RemoteJob, Session, SyncEngine, SyncError, SyncReport, SETTINGS_KEY};
use crate::undo::UndoStack;
use crate::remote::RemoteStore;

use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::{Arc, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// Title of a fresh, unsaved list.
pub const DEFAULT_TITLE: &str = "Checklist Queue";

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error("No active checklist")]
    NoActiveChecklist,

    #[error("Unknown checklist: {0}")]
    UnknownChecklist(String),

    #[error("Unknown template: {0}")]
    UnknownTemplate(String),

    #[error("Unknown item: {0}")]
    UnknownItem(String),

    #[error(transparent)]
    InvalidPriority(#[from] InvalidPriority),
}

pub type Result<T> = std::result::Result<T, AppError>;

/// Behavior knobs the binary loads from its config file.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// New items go to the head of the list instead of the tail.
    pub insert_at_top: bool,
    /// Maximum undo depth; 0 keeps every snapshot for the session.
    pub undo_limit: usize,
    pub push_debounce: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            insert_at_top: false,
            undo_limit: 0,
            push_debounce: crate::debounce::DEFAULT_PUSH_DELAY,
        }
    }
}

/// The live, editable list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveDocument {
    /// Store key, `None` until the first save.
    pub name: Option<String>,
    pub title: String,
    pub items: Vec<Item>,
}

impl ActiveDocument {
    pub fn blank(title: Option<&str>) -> Self {
        let title = title
            .map(serializer::clean_text)
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| DEFAULT_TITLE.to_string());
        Self {
            name: None,
            title,
            items: Vec::new(),
        }
    }

    fn from_record(record: &Checklist) -> Self {
        Self {
            name: Some(record.name.clone()),
            title: record.display_name().to_string(),
            items: record.items.clone(),
        }
    }

    fn index_of(&self, id: &str) -> Result<usize> {
        self.items
            .iter()
            .position(|i| i.id == id)
            .ok_or_else(|| AppError::UnknownItem(id.to_string()))
    }
}

/// Every user action the context understands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    // Items on the active list
    AddItem { text: String },
    ToggleDone { item: String },
    SetPriority { item: String, priority: i64 },
    EditText { item: String, text: String },
    DeleteItem { item: String },
    DeleteDone,
    Clear,
    MoveItem { item: String, target: String, placement: Placement },
    SortByPriority,
    Undo,
    SetTitle { title: String },
    Import { text: String, replace: bool },

    // Checklists
    NewChecklist { title: Option<String> },
    Open { name: String },
    Rename { name: String },
    DeleteChecklist { name: String },
    ReorderChecklist { name: String, target: String, placement: Placement },
    SortChecklists,

    // Templates
    SaveTemplate { name: Option<String> },
    ApplyTemplate { id: String, replace: bool },
    RenameTemplate { id: String, name: String },
    DeleteTemplate { id: String },
    ReorderTemplate { id: String, target: String, placement: Placement },
    SortTemplates,

    // Settings
    SetPriorityColor { priority: i64, color: String },

    // Remote session
    SignIn { owner: String },
    SignOut,
    Sync,
}

/// Result of a dispatched command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The command was a no-op.
    Unchanged,
    Changed,
    /// A record was created under this key.
    Created(String),
    /// The active checklist now lives under this key.
    Renamed(String),
}

pub struct App<B: StorageBackend, R: RemoteStore + ?Sized> {
    store: SharedStore<B>,
    engine: Arc<SyncEngine<B, R>>,
    clock: Arc<dyn Clock>,
    config: AppConfig,
    active: ActiveDocument,
    undo: UndoStack,
    debouncer: PushDebouncer,
    jobs: VecDeque<RemoteJob>,
}

impl<B, R> App<B, R>
where
    B: StorageBackend,
    R: RemoteStore + ?Sized,
{
    /// Build the context, reopening the last active checklist if any.
    pub fn new(engine: Arc<SyncEngine<B, R>>, clock: Arc<dyn Clock>, config: AppConfig) -> Self {
        let store = Arc::clone(engine.store());
        let active = {
            let store = store.lock().unwrap_or_else(|e| e.into_inner());
            store
                .current_checklist()
                .and_then(|name| store.record::<Checklist>(name))
                .map(ActiveDocument::from_record)
                .unwrap_or_else(|| ActiveDocument::blank(None))
        };

        Self {
            store,
            engine,
            clock,
            undo: UndoStack::with_limit(config.undo_limit),
            debouncer: PushDebouncer::new(config.push_debounce),
            config,
            active,
            jobs: VecDeque::new(),
        }
    }

    fn lock_store(&self) -> MutexGuard<'_, RecordStore<B>> {
        self.store.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn store(&self) -> &SharedStore<B> {
        &self.store
    }

    pub fn engine(&self) -> &Arc<SyncEngine<B, R>> {
        &self.engine
    }

    /// The clock edits are stamped and pushes are scheduled with.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn active(&self) -> &ActiveDocument {
        &self.active
    }

    pub fn undo_depth(&self) -> usize {
        self.undo.len()
    }

    /// Checklists in display order.
    pub fn checklists(&self) -> Vec<Checklist> {
        let snapshot = self.lock_store().get::<Checklist>();
        snapshot.ordered().into_iter().cloned().collect()
    }

    /// Templates in display order.
    pub fn templates(&self) -> Vec<Template> {
        let snapshot = self.lock_store().get::<Template>();
        snapshot.ordered().into_iter().cloned().collect()
    }

    pub fn priority_color(&self, priority: Priority) -> Option<String> {
        self.lock_store()
            .settings()
            .and_then(|s| s.color(priority))
            .map(str::to_string)
    }

    // ==================== Dispatch ====================

    pub fn dispatch(&mut self, command: Command) -> Result<Outcome> {
        debug!("Dispatch {:?}", command);
        match command {
            Command::AddItem { text } => self.add_item(&text),
            Command::ToggleDone { item } => {
                let index = self.active.index_of(&item)?;
                self.active.items[index].done = !self.active.items[index].done;
                self.save_active()
            }
            Command::SetPriority { item, priority } => {
                let priority = Priority::try_from(priority)?;
                let index = self.active.index_of(&item)?;
                if self.active.items[index].priority == priority {
                    return Ok(Outcome::Unchanged);
                }
                self.active.items[index].priority = priority;
                self.save_active()
            }
            Command::EditText { item, text } => {
                let index = self.active.index_of(&item)?;
                let text = serializer::clean_text(&text);
                if text.is_empty() || self.active.items[index].text == text {
                    return Ok(Outcome::Unchanged);
                }
                self.active.items[index].text = text;
                self.save_active()
            }
            Command::DeleteItem { item } => {
                let index = self.active.index_of(&item)?;
                self.undo.snapshot(&self.active.items);
                self.active.items.remove(index);
                self.save_active()
            }
            Command::DeleteDone => {
                if !self.active.items.iter().any(|i| i.done) {
                    return Ok(Outcome::Unchanged);
                }
                self.undo.snapshot(&self.active.items);
                self.active.items.retain(|i| !i.done);
                self.save_active()
            }
            Command::Clear => {
                if self.active.items.is_empty() {
                    return Ok(Outcome::Unchanged);
                }
                self.undo.snapshot(&self.active.items);
                self.active.items.clear();
                self.save_active()
            }
            Command::MoveItem {
                item,
                target,
                placement,
            } => self.move_item(&item, &target, placement),
            Command::SortByPriority => self.sort_by_priority(),
            Command::Undo => match self.undo.undo() {
                Some(items) => {
                    self.active.items = items;
                    self.save_active()
                }
                None => Ok(Outcome::Unchanged),
            },
            Command::SetTitle { title } => {
                let title = serializer::clean_text(&title);
                if title.is_empty() || self.active.title == title {
                    return Ok(Outcome::Unchanged);
                }
                self.active.title = title;
                self.save_active()
            }
            Command::Import { text, replace } => self.import(&text, replace),

            Command::NewChecklist { title } => {
                self.leave_active();
                self.active = ActiveDocument::blank(title.as_deref());
                self.lock_store().set_current_checklist(None)?;
                Ok(Outcome::Changed)
            }
            Command::Open { name } => self.open(&name),
            Command::Rename { name } => self.rename_active(&name),
            Command::DeleteChecklist { name } => self.delete_checklist(&name),
            Command::ReorderChecklist {
                name,
                target,
                placement,
            } => changed(self.lock_store().reorder::<Checklist>(&name, &target, placement)?),
            Command::SortChecklists => {
                self.lock_store().sort_by_display_name::<Checklist>()?;
                Ok(Outcome::Changed)
            }

            Command::SaveTemplate { name } => self.save_template(name.as_deref()),
            Command::ApplyTemplate { id, replace } => self.apply_template(&id, replace),
            Command::RenameTemplate { id, name } => self.rename_template(&id, &name),
            Command::DeleteTemplate { id } => {
                if self.lock_store().delete::<Template>(&id)?.is_none() {
                    return Err(AppError::UnknownTemplate(id));
                }
                self.debouncer.cancel(Namespace::Templates, &id);
                self.queue(RemoteJob::Delete {
                    namespace: Namespace::Templates,
                    key: id,
                });
                Ok(Outcome::Changed)
            }
            Command::ReorderTemplate {
                id,
                target,
                placement,
            } => changed(self.lock_store().reorder::<Template>(&id, &target, placement)?),
            Command::SortTemplates => {
                self.lock_store().sort_by_display_name::<Template>()?;
                Ok(Outcome::Changed)
            }

            Command::SetPriorityColor { priority, color } => {
                let priority = Priority::try_from(priority)?;
                let color = color.trim().to_string();
                self.lock_store().update_settings(|s| {
                    s.priority_colors.insert(priority.level(), color);
                })?;
                self.schedule_push(Namespace::Settings, SETTINGS_KEY);
                Ok(Outcome::Changed)
            }

            Command::SignIn { owner } => {
                self.engine.set_session(Some(Session::new(owner)));
                self.queue(RemoteJob::SyncAll);
                Ok(Outcome::Changed)
            }
            Command::SignOut => {
                self.engine.set_session(None);
                self.debouncer.cancel_all();
                self.jobs.clear();
                Ok(Outcome::Changed)
            }
            Command::Sync => {
                if !self.engine.is_enabled() {
                    return Ok(Outcome::Unchanged);
                }
                self.queue(RemoteJob::SyncAll);
                Ok(Outcome::Changed)
            }
        }
    }

    // ==================== Items ====================

    fn add_item(&mut self, text: &str) -> Result<Outcome> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(Outcome::Unchanged);
        }
        if serializer::looks_encoded(text) {
            return self.import(text, false);
        }

        let item = Item::new(serializer::clean_text(text), Priority::DEFAULT, false);
        if self.config.insert_at_top {
            self.active.items.insert(0, item);
        } else {
            self.active.items.push(item);
        }
        self.save_active()
    }

    fn import(&mut self, text: &str, replace: bool) -> Result<Outcome> {
        let decoded = serializer::decode(text);
        if decoded.skipped > 0 {
            info!("Import skipped {} unparseable block(s)", decoded.skipped);
        }
        if decoded.items.is_empty() && decoded.title.is_none() && !replace {
            return Ok(Outcome::Unchanged);
        }

        self.undo.snapshot(&self.active.items);
        if let Some(title) = decoded.title.filter(|t| !t.is_empty()) {
            self.active.title = title;
        }
        if replace {
            self.active.items = decoded.items;
        } else if self.config.insert_at_top {
            let mut items = decoded.items;
            items.append(&mut self.active.items);
            self.active.items = items;
        } else {
            self.active.items.extend(decoded.items);
        }
        self.save_active()
    }

    fn move_item(&mut self, item: &str, target: &str, placement: Placement) -> Result<Outcome> {
        if item == target {
            return Ok(Outcome::Unchanged);
        }
        let from = self.active.index_of(item)?;
        self.active.index_of(target)?;

        let moved = self.active.items.remove(from);
        let target_index = self.active.index_of(target)?;
        let to = match placement {
            Placement::Before => target_index,
            Placement::After => target_index + 1,
        };
        self.active.items.insert(to, moved);
        if to == from {
            return Ok(Outcome::Unchanged);
        }
        self.save_active()
    }

    /// Undone items first, then priority descending. Stable within ties.
    fn sort_by_priority(&mut self) -> Result<Outcome> {
        let mut sorted = self.active.items.clone();
        sorted.sort_by(|a, b| {
            a.done
                .cmp(&b.done)
                .then_with(|| b.priority.cmp(&a.priority))
        });
        let reordered = sorted
            .iter()
            .zip(&self.active.items)
            .any(|(a, b)| a.id != b.id);
        if !reordered {
            return Ok(Outcome::Unchanged);
        }
        self.undo.snapshot(&self.active.items);
        self.active.items = sorted;
        self.save_active()
    }

    // ==================== Active document ====================

    /// Persist the active list, creating its record on first save.
    fn save_active(&mut self) -> Result<Outcome> {
        let mut store = self.store.lock().unwrap_or_else(|e| e.into_inner());
        let (name, created) = match &self.active.name {
            Some(name) => (name.clone(), false),
            None => (store.unique_checklist_name(&self.active.title, None), true),
        };

        let mut record = store
            .record::<Checklist>(&name)
            .cloned()
            .unwrap_or_else(|| Checklist::new(name.clone(), "", Vec::new()));
        record.title = self.active.title.clone();
        record.items = self.active.items.clone();
        store.put(record)?;

        if created {
            self.active.name = Some(name.clone());
            store.set_current_checklist(Some(&name))?;
            info!("Created checklist {:?}", name);
        }
        drop(store);

        self.schedule_push(Namespace::Checklists, &name);
        Ok(if created {
            Outcome::Created(name)
        } else {
            Outcome::Changed
        })
    }

    /// Navigating away cancels the pending push for the current list.
    fn leave_active(&mut self) {
        if let Some(name) = &self.active.name {
            self.debouncer.cancel(Namespace::Checklists, name);
        }
    }

    fn open(&mut self, name: &str) -> Result<Outcome> {
        let record = self
            .lock_store()
            .record::<Checklist>(name)
            .cloned()
            .ok_or_else(|| AppError::UnknownChecklist(name.to_string()))?;
        if self.active.name.as_deref() == Some(name) {
            return Ok(Outcome::Unchanged);
        }

        self.leave_active();
        self.active = ActiveDocument::from_record(&record);
        self.lock_store().set_current_checklist(Some(name))?;
        Ok(Outcome::Changed)
    }

    fn rename_active(&mut self, requested: &str) -> Result<Outcome> {
        let requested = serializer::clean_text(requested);
        if requested.is_empty() {
            return Ok(Outcome::Unchanged);
        }
        let Some(old) = self.active.name.clone() else {
            // Unsaved lists take the name on their first save
            self.active.title = requested;
            return self.save_active();
        };

        let new = self.lock_store().rename_checklist(&old, &requested)?;
        if new == old {
            return Ok(Outcome::Unchanged);
        }
        self.active.name = Some(new.clone());
        self.active.title = new.clone();
        self.debouncer.cancel(Namespace::Checklists, &old);
        self.queue(RemoteJob::Rename {
            old,
            new: new.clone(),
        });
        Ok(Outcome::Renamed(new))
    }

    fn delete_checklist(&mut self, name: &str) -> Result<Outcome> {
        if self.lock_store().delete::<Checklist>(name)?.is_none() {
            return Err(AppError::UnknownChecklist(name.to_string()));
        }
        self.debouncer.cancel(Namespace::Checklists, name);
        if self.active.name.as_deref() == Some(name) {
            self.active = ActiveDocument::blank(None);
        }
        self.queue(RemoteJob::Delete {
            namespace: Namespace::Checklists,
            key: name.to_string(),
        });
        info!("Deleted checklist {:?}", name);
        Ok(Outcome::Changed)
    }

    // ==================== Templates ====================

    fn save_template(&mut self, name: Option<&str>) -> Result<Outcome> {
        let name = name
            .map(serializer::clean_text)
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| self.active.title.clone());
        let items = self.active.items.iter().map(Item::duplicate).collect();
        let template = Template::new(name, items);
        let id = template.id.clone();

        self.lock_store().put(template)?;
        self.schedule_push(Namespace::Templates, &id);
        Ok(Outcome::Created(id))
    }

    fn apply_template(&mut self, id: &str, replace: bool) -> Result<Outcome> {
        let template = self
            .lock_store()
            .record::<Template>(id)
            .cloned()
            .ok_or_else(|| AppError::UnknownTemplate(id.to_string()))?;

        self.undo.snapshot(&self.active.items);
        let items = template.items.iter().map(Item::duplicate);
        if replace {
            self.active.items = items.collect();
        } else {
            self.active.items.extend(items);
        }
        self.save_active()
    }

    fn rename_template(&mut self, id: &str, name: &str) -> Result<Outcome> {
        let name = serializer::clean_text(name);
        let mut template = self
            .lock_store()
            .record::<Template>(id)
            .cloned()
            .ok_or_else(|| AppError::UnknownTemplate(id.to_string()))?;
        if name.is_empty() || template.name == name {
            return Ok(Outcome::Unchanged);
        }
        template.name = name;
        self.lock_store().put(template)?;
        self.schedule_push(Namespace::Templates, id);
        Ok(Outcome::Changed)
    }

    // ==================== Remote work ====================

    fn queue(&mut self, job: RemoteJob) {
        if self.engine.is_enabled() {
            self.jobs.push_back(job);
        }
    }

    fn schedule_push(&mut self, namespace: Namespace, key: &str) {
        if self.engine.is_enabled() {
            let now = self.clock.now_millis();
            self.debouncer.schedule(namespace, key, now);
        }
    }

    pub fn is_push_pending(&self, namespace: Namespace, key: &str) -> bool {
        self.debouncer.is_pending(namespace, key)
    }

    /// Earliest debounced push deadline.
    pub fn next_push_due(&self) -> Option<Timestamp> {
        self.debouncer.next_due()
    }

    /// Drain queued jobs plus any debounced pushes whose quiet period ended.
    pub fn take_jobs(&mut self) -> Vec<RemoteJob> {
        let now = self.clock.now_millis();
        let mut jobs: Vec<RemoteJob> = self.jobs.drain(..).collect();
        jobs.extend(self.debouncer.take_due(now).into_iter().map(|due| RemoteJob::Push {
            namespace: due.namespace,
            keys: due.keys,
        }));
        jobs
    }

    /// Drain queued jobs plus every debounced push, due or not.
    pub fn flush_jobs(&mut self) -> Vec<RemoteJob> {
        let mut jobs: Vec<RemoteJob> = self.jobs.drain(..).collect();
        jobs.extend(self.debouncer.flush().into_iter().map(|due| RemoteJob::Push {
            namespace: due.namespace,
            keys: due.keys,
        }));
        jobs
    }

    /// Fold finished sync passes back into the live view.
    ///
    /// Reloads the active list when a strictly newer remote version replaced
    /// it, or clears it if it no longer exists. Returns whether the active
    /// document changed.
    pub fn apply_sync_reports(&mut self, reports: &[SyncReport]) -> bool {
        let Some(name) = self.active.name.clone() else {
            return false;
        };
        let replaced = reports
            .iter()
            .filter(|r| r.namespace == Namespace::Checklists)
            .any(|r| r.newer_remote.iter().any(|k| *k == name));
        if !replaced {
            return false;
        }

        let record = self.lock_store().record::<Checklist>(&name).cloned();
        match record {
            Some(record) => {
                info!("Reloading {:?} from newer remote version", name);
                self.active = ActiveDocument::from_record(&record);
            }
            None => self.active = ActiveDocument::blank(None),
        }
        self.engine.events().emit(SyncEvent::ActiveReloaded { key: name });
        true
    }

    /// Run due remote work to completion and fold the results in.
    pub async fn run_pending(&mut self) -> Vec<SyncReport> {
        let jobs = self.take_jobs();
        self.run_jobs(jobs).await
    }

    /// Run every queued and debounced job now.
    pub async fn flush(&mut self) -> Vec<SyncReport> {
        let jobs = self.flush_jobs();
        self.run_jobs(jobs).await
    }

    async fn run_jobs(&mut self, jobs: Vec<RemoteJob>) -> Vec<SyncReport> {
        let engine = Arc::clone(&self.engine);
        let mut reports = Vec::new();
        for job in jobs {
            reports.extend(engine.execute(job).await);
        }
        self.apply_sync_reports(&reports);
        reports
    }

    // ==================== Export ====================

    /// The active list in the interchange encoding.
    pub fn export_text(&self) -> String {
        serializer::encode(&self.active.title, &self.active.items)
    }

    pub fn export_file_name(&self, at: DateTime<Utc>) -> String {
        serializer::export_file_name(&self.active.title, at)
    }

    /// Active list name, or an error when nothing has been saved yet.
    pub fn active_name(&self) -> Result<&str> {
        self.active
            .name
            .as_deref()
            .ok_or(AppError::NoActiveChecklist)
    }
}

fn changed(changed: bool) -> Result<Outcome> {
    Ok(if changed {
        Outcome::Changed
    } else {
        Outcome::Unchanged
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::events::EventBus;
    use crate::model::same_items;
    use crate::remote::{InMemoryRemote, RemoteRow, Table};
    use crate::store::InMemoryBackend;

    type TestApp = App<InMemoryBackend, InMemoryRemote>;

    struct Fixture {
        app: TestApp,
        remote: Arc<InMemoryRemote>,
        clock: Arc<ManualClock>,
    }

    fn fixture_with(config: AppConfig, remote: Arc<InMemoryRemote>) -> Fixture {
        let clock = Arc::new(ManualClock::new(10_000));
        let store = RecordStore::open(InMemoryBackend::new(), clock.clone())
            .unwrap()
            .into_shared();
        let engine = Arc::new(SyncEngine::new(store, remote.clone(), Arc::new(EventBus::new())));
        let app = App::new(engine, clock.clone(), config);
        Fixture { app, remote, clock }
    }

    fn fixture() -> Fixture {
        fixture_with(AppConfig::default(), Arc::new(InMemoryRemote::new()))
    }

    fn add(app: &mut TestApp, texts: &[&str]) {
        for text in texts {
            app.dispatch(Command::AddItem { text: text.to_string() }).unwrap();
        }
    }

    fn texts(app: &TestApp) -> Vec<String> {
        app.active().items.iter().map(|i| i.text.clone()).collect()
    }

    fn id_of(app: &TestApp, text: &str) -> String {
        app.active()
            .items
            .iter()
            .find(|i| i.text == text)
            .map(|i| i.id.clone())
            .unwrap()
    }

    // ==================== Items ====================

    #[test]
    fn test_first_add_creates_checklist() {
        let mut f = fixture();
        assert_eq!(f.app.active().title, DEFAULT_TITLE);
        let outcome = f.app.dispatch(Command::AddItem { text: " Milk ".into() }).unwrap();
        assert_eq!(outcome, Outcome::Created(DEFAULT_TITLE.to_string()));

        let item = &f.app.active().items[0];
        assert_eq!(item.text, "Milk");
        assert_eq!(item.priority, Priority::DEFAULT);
        assert!(!item.done);

        let store = f.app.lock_store();
        assert_eq!(store.current_checklist(), Some(DEFAULT_TITLE));
        assert_eq!(store.record::<Checklist>(DEFAULT_TITLE).unwrap().items.len(), 1);
    }

    #[test]
    fn test_blank_add_is_ignored() {
        let mut f = fixture();
        assert_eq!(
            f.app.dispatch(Command::AddItem { text: "   ".into() }).unwrap(),
            Outcome::Unchanged
        );
        assert!(f.app.checklists().is_empty());
    }

    #[test]
    fn test_insert_at_top() {
        let config = AppConfig {
            insert_at_top: true,
            ..AppConfig::default()
        };
        let mut f = fixture_with(config, Arc::new(InMemoryRemote::new()));
        add(&mut f.app, &["a", "b"]);
        assert_eq!(texts(&f.app), vec!["b", "a"]);
    }

    #[test]
    fn test_encoded_add_routes_to_import() {
        let mut f = fixture();
        add(&mut f.app, &["first"]);
        let text = "::TITLE:: X\n::ITEM::\nA || 5 || true\n::ITEM::\nB || 1 || false\n";
        f.app.dispatch(Command::AddItem { text: text.into() }).unwrap();

        assert_eq!(f.app.active().title, "X");
        assert_eq!(texts(&f.app), vec!["first", "A", "B"]);
        assert_eq!(f.app.undo_depth(), 1);
    }

    #[test]
    fn test_toggle_priority_and_edit() {
        let mut f = fixture();
        add(&mut f.app, &["Milk"]);
        let id = id_of(&f.app, "Milk");

        f.app.dispatch(Command::ToggleDone { item: id.clone() }).unwrap();
        f.app.dispatch(Command::SetPriority { item: id.clone(), priority: 5 }).unwrap();
        f.app
            .dispatch(Command::EditText { item: id.clone(), text: "  Oat milk ".into() })
            .unwrap();
        assert_eq!(
            f.app.dispatch(Command::EditText { item: id.clone(), text: " ".into() }).unwrap(),
            Outcome::Unchanged
        );

        let item = &f.app.active().items[0];
        assert!(item.done);
        assert_eq!(item.priority, Priority::MAX);
        assert_eq!(item.text, "Oat milk");
    }

    #[test]
    fn test_out_of_range_priority_is_rejected() {
        let mut f = fixture();
        add(&mut f.app, &["Milk"]);
        let id = id_of(&f.app, "Milk");
        let err = f.app.dispatch(Command::SetPriority { item: id, priority: 9 }).unwrap_err();
        assert!(matches!(err, AppError::InvalidPriority(_)));
    }

    #[test]
    fn test_unknown_item() {
        let mut f = fixture();
        let err = f.app.dispatch(Command::ToggleDone { item: "nope".into() }).unwrap_err();
        assert!(matches!(err, AppError::UnknownItem(_)));
    }

    #[test]
    fn test_move_item() {
        let mut f = fixture();
        add(&mut f.app, &["a", "b", "c"]);
        let (a, c) = (id_of(&f.app, "a"), id_of(&f.app, "c"));

        f.app
            .dispatch(Command::MoveItem { item: c.clone(), target: a.clone(), placement: Placement::Before })
            .unwrap();
        assert_eq!(texts(&f.app), vec!["c", "a", "b"]);

        f.app
            .dispatch(Command::MoveItem { item: c, target: a.clone(), placement: Placement::Before })
            .unwrap();
        assert_eq!(texts(&f.app), vec!["c", "a", "b"]);

        let b = id_of(&f.app, "b");
        f.app
            .dispatch(Command::MoveItem { item: a, target: b, placement: Placement::After })
            .unwrap();
        assert_eq!(texts(&f.app), vec!["c", "b", "a"]);
    }

    #[test]
    fn test_sort_by_priority_undone_first() {
        let mut f = fixture();
        add(&mut f.app, &["low", "done-high", "high", "mid"]);
        for (text, priority) in [("low", 1), ("done-high", 5), ("high", 5), ("mid", 3)] {
            let id = id_of(&f.app, text);
            f.app.dispatch(Command::SetPriority { item: id, priority }).unwrap();
        }
        let done = id_of(&f.app, "done-high");
        f.app.dispatch(Command::ToggleDone { item: done }).unwrap();

        f.app.dispatch(Command::SortByPriority).unwrap();
        assert_eq!(texts(&f.app), vec!["high", "mid", "low", "done-high"]);
        assert_eq!(f.app.undo_depth(), 1);

        // Already sorted: no snapshot
        assert_eq!(f.app.dispatch(Command::SortByPriority).unwrap(), Outcome::Unchanged);
        assert_eq!(f.app.undo_depth(), 1);
    }

    // ==================== Undo ====================

    #[test]
    fn test_undo_is_a_strict_stack() {
        let mut f = fixture();
        add(&mut f.app, &["a", "b", "c"]);
        let id = id_of(&f.app, "b");
        f.app.dispatch(Command::ToggleDone { item: id_of(&f.app, "c") }).unwrap();
        let original = f.app.active().items.clone();

        f.app.dispatch(Command::DeleteItem { item: id }).unwrap();
        f.app.dispatch(Command::DeleteDone).unwrap();
        f.app.dispatch(Command::Clear).unwrap();
        assert!(f.app.active().items.is_empty());

        for _ in 0..3 {
            f.app.dispatch(Command::Undo).unwrap();
        }
        assert!(same_items(&f.app.active().items, &original));
        assert_eq!(f.app.dispatch(Command::Undo).unwrap(), Outcome::Unchanged);

        // Restored list is persisted
        let store = f.app.lock_store();
        let saved = store.record::<Checklist>(DEFAULT_TITLE).unwrap();
        assert!(same_items(&saved.items, &original));
    }

    #[test]
    fn test_noop_bulk_ops_push_no_snapshot() {
        let mut f = fixture();
        assert_eq!(f.app.dispatch(Command::Clear).unwrap(), Outcome::Unchanged);
        add(&mut f.app, &["a"]);
        assert_eq!(f.app.dispatch(Command::DeleteDone).unwrap(), Outcome::Unchanged);
        assert_eq!(f.app.undo_depth(), 0);
    }

    #[test]
    fn test_import_replace_and_undo() {
        let mut f = fixture();
        add(&mut f.app, &["keep me"]);
        f.app
            .dispatch(Command::Import { text: "::ITEM::\nnew || 2 || false\n".into(), replace: true })
            .unwrap();
        assert_eq!(texts(&f.app), vec!["new"]);

        f.app.dispatch(Command::Undo).unwrap();
        assert_eq!(texts(&f.app), vec!["keep me"]);
    }

    // ==================== Checklists ====================

    #[test]
    fn test_rename_scenario() {
        let mut f = fixture();
        f.app.dispatch(Command::NewChecklist { title: Some("Groceries".into()) }).unwrap();
        add(&mut f.app, &["Milk"]);
        assert_eq!(f.app.active_name().unwrap(), "Groceries");

        let outcome = f.app.dispatch(Command::Rename { name: "Groceries v2".into() }).unwrap();
        assert_eq!(outcome, Outcome::Renamed("Groceries v2".into()));

        let store = f.app.lock_store();
        assert!(!store.contains::<Checklist>("Groceries"));
        let renamed = store.record::<Checklist>("Groceries v2").unwrap();
        assert_eq!(renamed.items.len(), 1);
        assert_eq!(renamed.items[0].text, "Milk");
        assert_eq!(renamed.items[0].priority, Priority::DEFAULT);
        assert_eq!(store.current_checklist(), Some("Groceries v2"));
    }

    #[test]
    fn test_new_checklist_with_taken_name_gets_suffix() {
        let mut f = fixture();
        add(&mut f.app, &["a"]);
        f.app.dispatch(Command::NewChecklist { title: None }).unwrap();
        let outcome = f.app.dispatch(Command::AddItem { text: "b".into() }).unwrap();
        assert_eq!(outcome, Outcome::Created(format!("{} (2)", DEFAULT_TITLE)));
        assert_eq!(f.app.checklists().len(), 2);
    }

    #[test]
    fn test_open_and_delete_active() {
        let mut f = fixture();
        f.app.dispatch(Command::NewChecklist { title: Some("One".into()) }).unwrap();
        add(&mut f.app, &["1"]);
        f.app.dispatch(Command::NewChecklist { title: Some("Two".into()) }).unwrap();
        add(&mut f.app, &["2"]);

        f.app.dispatch(Command::Open { name: "One".into() }).unwrap();
        assert_eq!(texts(&f.app), vec!["1"]);
        assert!(matches!(
            f.app.dispatch(Command::Open { name: "Nope".into() }),
            Err(AppError::UnknownChecklist(_))
        ));

        f.app.dispatch(Command::DeleteChecklist { name: "One".into() }).unwrap();
        assert!(f.app.active().name.is_none());
        assert_eq!(f.app.checklists().len(), 1);
        assert!(matches!(f.app.active_name(), Err(AppError::NoActiveChecklist)));
    }

    #[test]
    fn test_reorder_and_sort_checklists() {
        let mut f = fixture();
        for title in ["b", "a", "c"] {
            f.app.dispatch(Command::NewChecklist { title: Some(title.into()) }).unwrap();
            add(&mut f.app, &["x"]);
        }
        let names = |app: &TestApp| app.checklists().into_iter().map(|c| c.name).collect::<Vec<_>>();
        assert_eq!(names(&f.app), vec!["c", "a", "b"]);

        f.app
            .dispatch(Command::ReorderChecklist { name: "b".into(), target: "c".into(), placement: Placement::Before })
            .unwrap();
        assert_eq!(names(&f.app), vec!["b", "c", "a"]);

        f.app.dispatch(Command::SortChecklists).unwrap();
        assert_eq!(names(&f.app), vec!["a", "b", "c"]);
    }

    // ==================== Templates ====================

    #[test]
    fn test_template_lifecycle() {
        let mut f = fixture();
        add(&mut f.app, &["Socks", "Shirt"]);
        let Outcome::Created(id) = f.app.dispatch(Command::SaveTemplate { name: Some("Packing".into()) }).unwrap() else {
            panic!("expected a new template");
        };
        assert_eq!(f.app.templates()[0].name, "Packing");

        f.app.dispatch(Command::Clear).unwrap();
        f.app.dispatch(Command::ApplyTemplate { id: id.clone(), replace: false }).unwrap();
        assert_eq!(texts(&f.app), vec!["Socks", "Shirt"]);
        // Applied items get fresh ids
        assert_ne!(f.app.active().items[0].id, f.app.templates()[0].items[0].id);

        f.app.dispatch(Command::RenameTemplate { id: id.clone(), name: "Trip".into() }).unwrap();
        assert_eq!(f.app.templates()[0].name, "Trip");
        assert_eq!(f.app.templates()[0].id, id);

        f.app.dispatch(Command::DeleteTemplate { id: id.clone() }).unwrap();
        assert!(f.app.templates().is_empty());
        assert!(matches!(
            f.app.dispatch(Command::ApplyTemplate { id, replace: true }),
            Err(AppError::UnknownTemplate(_))
        ));
    }

    #[test]
    fn test_priority_color() {
        let mut f = fixture();
        f.app
            .dispatch(Command::SetPriorityColor { priority: 4, color: " orange ".into() })
            .unwrap();
        assert_eq!(f.app.priority_color(Priority::try_from(4).unwrap()).as_deref(), Some("orange"));
        assert!(f.app.dispatch(Command::SetPriorityColor { priority: 0, color: "x".into() }).is_err());
    }

    // ==================== Remote work ====================

    #[tokio::test]
    async fn test_edits_are_debounced_into_one_push() {
        let mut f = fixture();
        f.app.dispatch(Command::SignIn { owner: "me".into() }).unwrap();
        f.app.run_pending().await;

        add(&mut f.app, &["a"]);
        f.clock.advance(400);
        add(&mut f.app, &["b"]);
        f.clock.advance(400);
        add(&mut f.app, &["c"]);

        // Quiet period restarted with every edit
        f.clock.advance(900);
        assert!(f.app.run_pending().await.is_empty());

        f.clock.advance(200);
        let reports = f.app.run_pending().await;
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].pushed, vec![DEFAULT_TITLE.to_string()]);
        assert_eq!(f.remote.upsert_count(), 1);

        let row = f.remote.row("me", Table::Checklists, DEFAULT_TITLE).unwrap();
        assert!(row.content.contains("c || 3 || false"));
    }

    #[tokio::test]
    async fn test_navigating_away_cancels_pending_push() {
        let mut f = fixture();
        f.app.dispatch(Command::SignIn { owner: "me".into() }).unwrap();
        f.app.run_pending().await;

        add(&mut f.app, &["a"]);
        assert!(f.app.is_push_pending(Namespace::Checklists, DEFAULT_TITLE));
        f.app.dispatch(Command::NewChecklist { title: None }).unwrap();
        assert!(!f.app.is_push_pending(Namespace::Checklists, DEFAULT_TITLE));

        f.clock.advance(5_000);
        f.app.run_pending().await;
        assert_eq!(f.remote.upsert_count(), 0);

        // Still dirty, so the next full sync carries it
        f.app.dispatch(Command::Sync).unwrap();
        f.app.run_pending().await;
        assert!(f.remote.row("me", Table::Checklists, DEFAULT_TITLE).is_some());
    }

    #[tokio::test]
    async fn test_delete_cancels_push_and_propagates() {
        let mut f = fixture();
        f.app.dispatch(Command::SignIn { owner: "me".into() }).unwrap();
        add(&mut f.app, &["a"]);
        f.app.flush().await;
        assert!(f.remote.row("me", Table::Checklists, DEFAULT_TITLE).is_some());

        add(&mut f.app, &["b"]);
        f.app.dispatch(Command::DeleteChecklist { name: DEFAULT_TITLE.into() }).unwrap();
        f.app.flush().await;
        assert!(f.remote.row("me", Table::Checklists, DEFAULT_TITLE).is_none());
    }

    #[tokio::test]
    async fn test_rename_propagates_atomically() {
        let mut f = fixture();
        f.app.dispatch(Command::SignIn { owner: "me".into() }).unwrap();
        f.app.dispatch(Command::NewChecklist { title: Some("Groceries".into()) }).unwrap();
        add(&mut f.app, &["Milk"]);
        f.app.flush().await;

        f.app.dispatch(Command::Rename { name: "Groceries v2".into() }).unwrap();
        f.app.flush().await;
        assert_eq!(f.remote.rename_count(), 1);
        assert!(f.remote.row("me", Table::Checklists, "Groceries").is_none());
        assert!(f.remote.row("me", Table::Checklists, "Groceries v2").is_some());
    }

    #[tokio::test]
    async fn test_newer_remote_reloads_active_document() {
        let mut f = fixture();
        add(&mut f.app, &["local"]);
        let local_at = f.app.lock_store().record::<Checklist>(DEFAULT_TITLE).unwrap().last_modified;

        f.remote.insert_row(
            "me",
            Table::Checklists,
            RemoteRow {
                name: DEFAULT_TITLE.into(),
                content: "::TITLE:: From phone\n::ITEM::\nremote || 4 || false\n".into(),
                last_modified: local_at + 100,
            },
        );
        f.app.dispatch(Command::SignIn { owner: "me".into() }).unwrap();
        f.app.run_pending().await;

        assert_eq!(f.app.active().title, "From phone");
        assert_eq!(texts(&f.app), vec!["remote"]);
    }

    #[tokio::test]
    async fn test_marker_text_reaches_remote_intact() {
        let mut f = fixture();
        f.app.dispatch(Command::SignIn { owner: "me".into() }).unwrap();
        add(&mut f.app, &["notes"]);
        let id = id_of(&f.app, "notes");

        let outcome = f.app
            .dispatch(Command::EditText { item: id, text: "see ::ITEM:: notes".into() })
            .unwrap();
        assert_eq!(outcome, Outcome::Changed);
        f.app
            .dispatch(Command::SetTitle { title: "Trip ::TITLE:: B\nsecond line".into() })
            .unwrap();
        assert_eq!(texts(&f.app), vec!["see :ITEM: notes"]);
        assert_eq!(f.app.active().title, "Trip :TITLE: B second line");

        f.app.flush().await;
        let row = f.remote.row("me", Table::Checklists, DEFAULT_TITLE).unwrap();
        let pulled = Checklist::from_row(&row);
        assert_eq!(pulled.title, f.app.active().title);
        assert!(same_items(&pulled.items, &f.app.active().items));
    }

    #[tokio::test]
    async fn test_signed_out_queues_nothing() {
        let mut f = fixture();
        add(&mut f.app, &["a"]);
        f.app.dispatch(Command::DeleteChecklist { name: DEFAULT_TITLE.into() }).unwrap();
        assert!(f.app.flush_jobs().is_empty());
        assert_eq!(f.app.dispatch(Command::Sync).unwrap(), Outcome::Unchanged);
    }

    #[test]
    fn test_export() {
        let mut f = fixture();
        f.app.dispatch(Command::SetTitle { title: "My List!".into() }).unwrap();
        add(&mut f.app, &["A"]);
        assert_eq!(f.app.export_text(), "::TITLE:: My List!\n::ITEM::\nA || 3 || false\n");

        let at = DateTime::parse_from_rfc3339("2024-05-06T07:08:09Z").unwrap().with_timezone(&Utc);
        assert_eq!(f.app.export_file_name(at), "My_List__2024-05-06T07:08:09.txt");
    }
}
