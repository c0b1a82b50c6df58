//! RemoteStore trait for the passive cloud replica.
//!
//! The remote is three tables scoped by owner principal:
//! - `checklists` / `templates`: rows keyed by name, holding the serializer's
//!   text encoding in `content`
//! - `user_settings`: one row per owner
//!
//! Implementations:
//! - `InMemoryRemote` - For testing, with failure injection
//! - `DirRemote` (in checklist-cli) - JSON tables in a shared directory

use crate::conflict::Versioned;
use crate::model::Timestamp;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt::{self, Display, Formatter};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::RwLock;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Remote unreachable: {0}")]
    Unreachable(String),

    #[error("Remote rejected request: {0}")]
    Rejected(String),

    #[error("Remote call timed out after {0}ms")]
    Timeout(u64),

    #[error("Malformed remote data: {0}")]
    Malformed(String),
}

pub type Result<T> = std::result::Result<T, TransportError>;

/// Remote tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Checklists,
    Templates,
    UserSettings,
}

impl Table {
    pub fn as_str(&self) -> &'static str {
        match self {
            Table::Checklists => "checklists",
            Table::Templates => "templates",
            Table::UserSettings => "user_settings",
        }
    }
}

impl Display for Table {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A checklist or template row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteRow {
    /// Row key within (owner, table). Checklist name or template id.
    pub name: String,
    /// Serializer text encoding.
    pub content: String,
    pub last_modified: Timestamp,
}

/// The settings row.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RemoteSettings {
    pub priority_colors: BTreeMap<u8, String>,
    pub last_modified: Timestamp,
}

impl Versioned for RemoteRow {
    fn last_modified(&self) -> Timestamp {
        self.last_modified
    }

    fn is_synced(&self) -> bool {
        true
    }
}

impl Versioned for RemoteSettings {
    fn last_modified(&self) -> Timestamp {
        self.last_modified
    }

    fn is_synced(&self) -> bool {
        true
    }
}

/// Passive remote replica: upsert, delete, and select-by-owner.
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
pub trait RemoteStore: Send + Sync {
    /// Create or replace the row keyed by (owner, row.name).
    async fn upsert(&self, owner: &str, table: Table, row: RemoteRow) -> Result<()>;

    /// Delete the row keyed by (owner, name). Deleting a missing row succeeds.
    async fn delete(&self, owner: &str, table: Table, name: &str) -> Result<()>;

    /// All rows for an owner, newest first.
    async fn select_all(&self, owner: &str, table: Table) -> Result<Vec<RemoteRow>>;

    /// Move `old_name` to `row.name` in one call.
    ///
    /// Backends without an atomic rename get this fallback, which upserts the
    /// new key before deleting the old one. An interruption between the two
    /// calls leaves a duplicate rather than losing the record.
    async fn rename(&self, owner: &str, table: Table, old_name: &str, row: RemoteRow) -> Result<()> {
        let new_name = row.name.clone();
        self.upsert(owner, table, row).await?;
        if new_name != old_name {
            self.delete(owner, table, old_name).await?;
        }
        Ok(())
    }

    /// Create or replace the owner's settings row.
    async fn upsert_settings(&self, owner: &str, settings: RemoteSettings) -> Result<()>;

    /// The owner's settings row, if any.
    async fn select_settings(&self, owner: &str) -> Result<Option<RemoteSettings>>;
}

type Tables = HashMap<(String, Table), BTreeMap<String, RemoteRow>>;

/// In-memory remote for testing.
///
/// `set_offline(true)` makes every call fail with `Unreachable`, and
/// `fail_next_upserts(n)` rejects just the next `n` upserts.
#[derive(Default)]
pub struct InMemoryRemote {
    tables: RwLock<Tables>,
    settings: RwLock<HashMap<String, RemoteSettings>>,
    offline: AtomicBool,
    failing_upserts: AtomicUsize,
    upserts: AtomicUsize,
    deletes: AtomicUsize,
    renames: AtomicUsize,
}

impl InMemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn fail_next_upserts(&self, count: usize) {
        self.failing_upserts.store(count, Ordering::SeqCst);
    }

    /// Number of successful row and settings upserts so far.
    pub fn upsert_count(&self) -> usize {
        self.upserts.load(Ordering::SeqCst)
    }

    pub fn delete_count(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    pub fn rename_count(&self) -> usize {
        self.renames.load(Ordering::SeqCst)
    }

    /// Read a row directly, bypassing failure injection.
    pub fn row(&self, owner: &str, table: Table, name: &str) -> Option<RemoteRow> {
        let tables = self.tables.read().unwrap_or_else(|e| e.into_inner());
        tables
            .get(&(owner.to_string(), table))
            .and_then(|rows| rows.get(name))
            .cloned()
    }

    /// Seed a row directly, bypassing failure injection.
    pub fn insert_row(&self, owner: &str, table: Table, row: RemoteRow) {
        let mut tables = self.tables.write().unwrap_or_else(|e| e.into_inner());
        tables
            .entry((owner.to_string(), table))
            .or_default()
            .insert(row.name.clone(), row);
    }

    /// Read the settings row directly.
    pub fn settings(&self, owner: &str) -> Option<RemoteSettings> {
        let settings = self.settings.read().unwrap_or_else(|e| e.into_inner());
        settings.get(owner).cloned()
    }

    fn check_online(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(TransportError::Unreachable("remote is offline".into()));
        }
        Ok(())
    }

    fn check_upsert_allowed(&self) -> Result<()> {
        self.check_online()?;
        let remaining = self.failing_upserts.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failing_upserts.store(remaining - 1, Ordering::SeqCst);
            return Err(TransportError::Rejected("injected upsert failure".into()));
        }
        Ok(())
    }
}

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
impl RemoteStore for InMemoryRemote {
    async fn upsert(&self, owner: &str, table: Table, row: RemoteRow) -> Result<()> {
        self.check_upsert_allowed()?;
        self.insert_row(owner, table, row);
        self.upserts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn delete(&self, owner: &str, table: Table, name: &str) -> Result<()> {
        self.check_online()?;
        let mut tables = self.tables.write().unwrap_or_else(|e| e.into_inner());
        if let Some(rows) = tables.get_mut(&(owner.to_string(), table)) {
            rows.remove(name);
        }
        self.deletes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn select_all(&self, owner: &str, table: Table) -> Result<Vec<RemoteRow>> {
        self.check_online()?;
        let tables = self.tables.read().unwrap_or_else(|e| e.into_inner());
        let mut rows: Vec<RemoteRow> = tables
            .get(&(owner.to_string(), table))
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default();
        rows.sort_by(|a, b| b.last_modified.cmp(&a.last_modified));
        Ok(rows)
    }

    async fn rename(&self, owner: &str, table: Table, old_name: &str, row: RemoteRow) -> Result<()> {
        self.check_upsert_allowed()?;
        // Single write lock: readers never observe the intermediate state
        let mut tables = self.tables.write().unwrap_or_else(|e| e.into_inner());
        let rows = tables.entry((owner.to_string(), table)).or_default();
        rows.remove(old_name);
        rows.insert(row.name.clone(), row);
        self.renames.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn upsert_settings(&self, owner: &str, settings: RemoteSettings) -> Result<()> {
        self.check_upsert_allowed()?;
        let mut all = self.settings.write().unwrap_or_else(|e| e.into_inner());
        all.insert(owner.to_string(), settings);
        self.upserts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn select_settings(&self, owner: &str) -> Result<Option<RemoteSettings>> {
        self.check_online()?;
        Ok(self.settings(owner))
    }
}
