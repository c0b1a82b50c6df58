//! RecordStore: durable local state for checklists, templates and settings.
//!
//! Everything lives in one root object persisted as JSON through a
//! [`StorageBackend`]. Every mutation is built on a copy of the root and
//! only replaces the in-memory state once the backend accepted it, so a read
//! right after a write observes it and a failed save leaves nothing behind.
//!
//! Only the store writes persisted state. Other components hold a
//! [`SharedStore`] and go through these methods.

use crate::clock::Clock;
use crate::model::{Namespace, Settings, Timestamp};
use crate::order::{OrderList, Placement};
use crate::record::Record;
use crate::serializer;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, info};

/// Bound on the recently-opened list.
pub const MOST_RECENT_LIMIT: usize = 10;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Storage backend error: {0}")]
    Backend(String),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("No {namespace} record with key {key:?}")]
    NotFound { namespace: Namespace, key: String },
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Synchronous byte storage for the persisted root object.
///
/// Implementations:
/// - `InMemoryBackend` - For testing
/// - `JsonFileBackend` (in checklist-cli) - A JSON file on disk
pub trait StorageBackend: Send {
    /// Load the stored bytes, or `None` on first run.
    fn load(&self) -> Result<Option<Vec<u8>>>;

    /// Replace the stored bytes.
    fn save(&self, bytes: &[u8]) -> Result<()>;
}

/// In-memory backend for testing.
///
/// Clones share the same contents, so a test can reopen a store against
/// what a previous instance wrote.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBackend {
    bytes: Arc<Mutex<Option<Vec<u8>>>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from existing persisted JSON.
    pub fn with_contents(json: &str) -> Self {
        Self {
            bytes: Arc::new(Mutex::new(Some(json.as_bytes().to_vec()))),
        }
    }

    /// Current persisted JSON, if anything was written.
    pub fn contents(&self) -> Option<String> {
        let bytes = self.bytes.lock().unwrap_or_else(|e| e.into_inner());
        bytes
            .as_ref()
            .map(|b| String::from_utf8_lossy(b).into_owned())
    }
}

impl StorageBackend for InMemoryBackend {
    fn load(&self) -> Result<Option<Vec<u8>>> {
        Ok(self.bytes.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }

    fn save(&self, bytes: &[u8]) -> Result<()> {
        *self.bytes.lock().unwrap_or_else(|e| e.into_inner()) = Some(bytes.to_vec());
        Ok(())
    }
}

/// A local delete not yet acknowledged by the remote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingDelete {
    pub namespace: Namespace,
    pub key: String,
}

/// The persisted root object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalData {
    #[serde(default)]
    pub checklists: BTreeMap<String, crate::model::Checklist>,
    #[serde(default)]
    pub templates: BTreeMap<String, crate::model::Template>,
    #[serde(default)]
    pub checklist_order: OrderList,
    #[serde(default)]
    pub template_order: OrderList,
    /// Settings record (`theme.priorityColors`), absent until first customized.
    #[serde(default)]
    pub theme: Option<Settings>,
    /// Recently opened checklist names, newest first.
    #[serde(default)]
    pub most_recent: Vec<String>,
    #[serde(default)]
    pub current_checklist: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pending_deletes: Vec<PendingDelete>,
}

/// A namespace's records plus its reconciled display order.
#[derive(Debug, Clone)]
pub struct Snapshot<T> {
    pub records: BTreeMap<String, T>,
    pub order: Vec<String>,
}

impl<T> Snapshot<T> {
    /// Records in display order.
    pub fn ordered(&self) -> Vec<&T> {
        self.order
            .iter()
            .filter_map(|key| self.records.get(key))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Store shared between the application context and the sync engine.
pub type SharedStore<B> = Arc<Mutex<RecordStore<B>>>;

pub struct RecordStore<B: StorageBackend> {
    backend: B,
    data: LocalData,
    clock: Arc<dyn Clock>,
}

impl<B: StorageBackend> RecordStore<B> {
    /// Open the store, initializing empty namespaces on first run and
    /// migrating legacy flat-text records in place.
    pub fn open(backend: B, clock: Arc<dyn Clock>) -> Result<Self> {
        let data = match backend.load()? {
            Some(bytes) if !bytes.is_empty() => serde_json::from_slice(&bytes)?,
            _ => {
                info!("No local data found, starting empty");
                LocalData::default()
            }
        };

        let mut store = Self {
            backend,
            data,
            clock,
        };

        let migrated = store.migrate();
        let reordered = store.heal_orders();
        if migrated > 0 || reordered {
            if migrated > 0 {
                info!("Migrated {} legacy record(s)", migrated);
            }
            store.persist()?;
        }

        Ok(store)
    }

    pub fn into_shared(self) -> SharedStore<B> {
        Arc::new(Mutex::new(self))
    }

    /// Read-only view of the persisted root.
    pub fn data(&self) -> &LocalData {
        &self.data
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now_millis()
    }

    /// Parse legacy `content` into structured items. Idempotent.
    ///
    /// Returns the number of records rewritten.
    pub fn migrate(&mut self) -> usize {
        migrate_records::<crate::model::Checklist>(&mut self.data)
            + migrate_records::<crate::model::Template>(&mut self.data)
    }

    fn heal_orders(&mut self) -> bool {
        let checklists = reconcile::<crate::model::Checklist>(&mut self.data);
        let templates = reconcile::<crate::model::Template>(&mut self.data);
        checklists || templates
    }

    fn persist(&self) -> Result<()> {
        save(&self.backend, &self.data)
    }

    /// Save `next` and make it the live state.
    fn commit(&mut self, next: LocalData) -> Result<()> {
        save(&self.backend, &next)?;
        self.data = next;
        Ok(())
    }

    /// Stamp strictly after `previous` so two edits in the same millisecond
    /// still order.
    fn next_stamp(&self, previous: Option<Timestamp>) -> Timestamp {
        let now = self.clock.now_millis();
        match previous {
            Some(previous) if previous >= now => previous + 1,
            _ => now,
        }
    }

    // ==================== Generic record access ====================

    /// Snapshot of a namespace with a self-healed order list.
    pub fn get<T: Record>(&self) -> Snapshot<T> {
        let records = T::records(&self.data).clone();
        let mut order = T::order(&self.data).clone();
        order.reconcile_with(records.keys().map(String::as_str));
        Snapshot {
            records,
            order: order.keys().to_vec(),
        }
    }

    pub fn record<T: Record>(&self, key: &str) -> Option<&T> {
        T::records(&self.data).get(key)
    }

    pub fn contains<T: Record>(&self, key: &str) -> bool {
        T::records(&self.data).contains_key(key)
    }

    /// Upsert a local edit: stamps `lastModified = now` and marks it dirty.
    ///
    /// New keys are inserted at the head of the order list.
    pub fn put<T: Record>(&mut self, mut record: T) -> Result<Timestamp> {
        let key = record.key().to_string();
        let previous = T::records(&self.data).get(&key).map(|r| r.last_modified());
        let stamp = self.next_stamp(previous);

        record.set_last_modified(stamp);
        record.set_synced(false);
        *record.legacy_content() = None;

        let mut next = self.data.clone();
        T::records_mut(&mut next).insert(key.clone(), record);
        T::order_mut(&mut next).insert_head(&key);
        next.pending_deletes
            .retain(|p| !(p.namespace == T::NAMESPACE && p.key == key));
        self.commit(next)?;

        debug!("Stored {} {:?} at {}", T::NAMESPACE, key, stamp);
        Ok(stamp)
    }

    /// Remove a record and its order entry, remembering the delete for the
    /// remote.
    pub fn delete<T: Record>(&mut self, key: &str) -> Result<Option<T>> {
        let mut next = self.data.clone();
        let removed = T::records_mut(&mut next).remove(key);
        let unordered = T::order_mut(&mut next).remove(key);
        if removed.is_none() && !unordered {
            return Ok(None);
        }

        if removed.is_some() {
            add_pending_delete(&mut next, T::NAMESPACE, key);
        }
        if T::NAMESPACE == Namespace::Checklists {
            next.most_recent.retain(|name| name != key);
            if next.current_checklist.as_deref() == Some(key) {
                next.current_checklist = None;
            }
        }
        self.commit(next)?;

        debug!("Deleted {} {:?}", T::NAMESPACE, key);
        Ok(removed)
    }

    /// Store a version received from the remote as-is (timestamp kept,
    /// marked synced).
    pub fn apply_remote<T: Record>(&mut self, mut record: T) -> Result<()> {
        record.set_synced(true);
        let key = record.key().to_string();
        let mut next = self.data.clone();
        T::records_mut(&mut next).insert(key.clone(), record);
        T::order_mut(&mut next).insert_head(&key);
        self.commit(next)
    }

    /// Mark a record synced if it hasn't been edited since `pushed_at`.
    ///
    /// Returns `false` when a newer local edit exists (it stays dirty).
    pub fn mark_synced<T: Record>(&mut self, key: &str, pushed_at: Timestamp) -> Result<bool> {
        let Some(record) = T::records(&self.data).get(key) else {
            return Ok(false);
        };
        if record.last_modified() != pushed_at {
            return Ok(false);
        }
        if !record.is_synced() {
            let mut next = self.data.clone();
            if let Some(record) = T::records_mut(&mut next).get_mut(key) {
                record.set_synced(true);
            }
            self.commit(next)?;
        }
        Ok(true)
    }

    /// Records with local edits the remote hasn't acknowledged.
    pub fn dirty<T: Record>(&self) -> Vec<T> {
        T::records(&self.data)
            .values()
            .filter(|r| !r.is_synced())
            .cloned()
            .collect()
    }

    /// Move a key next to another in the display order.
    pub fn reorder<T: Record>(&mut self, key: &str, target: &str, placement: Placement) -> Result<bool> {
        let mut next = self.data.clone();
        let moved = T::order_mut(&mut next).move_relative(key, target, placement);
        if moved {
            self.commit(next)?;
        }
        Ok(moved)
    }

    /// Re-sort a namespace's order by display name.
    pub fn sort_by_display_name<T: Record>(&mut self) -> Result<()> {
        let mut next = self.data.clone();
        reconcile::<T>(&mut next);
        let names: BTreeMap<String, String> = T::records(&next)
            .iter()
            .map(|(key, record)| (key.clone(), record.display_name().to_string()))
            .collect();
        T::order_mut(&mut next).sort_by_display_name(|key| names.get(key).cloned());
        self.commit(next)
    }

    /// Reconcile a namespace's order list with its keys, persisting if it
    /// drifted.
    pub fn reconcile_order<T: Record>(&mut self) -> Result<bool> {
        let mut next = self.data.clone();
        let changed = reconcile::<T>(&mut next);
        if changed {
            self.commit(next)?;
        }
        Ok(changed)
    }

    // ==================== Pending deletes ====================

    pub fn pending_deletes(&self, namespace: Namespace) -> Vec<String> {
        self.data
            .pending_deletes
            .iter()
            .filter(|p| p.namespace == namespace)
            .map(|p| p.key.clone())
            .collect()
    }

    pub fn is_pending_delete(&self, namespace: Namespace, key: &str) -> bool {
        self.data
            .pending_deletes
            .iter()
            .any(|p| p.namespace == namespace && p.key == key)
    }

    pub fn clear_pending_delete(&mut self, namespace: Namespace, key: &str) -> Result<()> {
        if !self.is_pending_delete(namespace, key) {
            return Ok(());
        }
        let mut next = self.data.clone();
        next.pending_deletes
            .retain(|p| !(p.namespace == namespace && p.key == key));
        self.commit(next)
    }

    // ==================== Checklist names ====================

    /// `base`, or `base (2)`, `base (3)`, ... whichever is free.
    ///
    /// `ignoring` names a key that may be reused (the record being renamed).
    pub fn unique_checklist_name(&self, base: &str, ignoring: Option<&str>) -> String {
        let base = base.trim();
        let taken = |name: &str| Some(name) != ignoring && self.data.checklists.contains_key(name);
        if !taken(base) {
            return base.to_string();
        }
        (2..)
            .map(|n| format!("{} ({})", base, n))
            .find(|candidate| !taken(candidate))
            .unwrap_or_else(|| base.to_string())
    }

    /// Rename a checklist as one delete-old/insert-new transaction.
    ///
    /// A taken name is disambiguated with a counter suffix. The record keeps
    /// its position in the order list, and the current/recent pointers
    /// follow it. Returns the key actually used.
    pub fn rename_checklist(&mut self, old: &str, requested: &str) -> Result<String> {
        if !self.data.checklists.contains_key(old) {
            return Err(StoreError::NotFound {
                namespace: Namespace::Checklists,
                key: old.to_string(),
            });
        }
        let new = self.unique_checklist_name(requested, Some(old));
        if new == old {
            return Ok(new);
        }

        let mut next = self.data.clone();
        let Some(mut record) = next.checklists.remove(old) else {
            return Ok(old.to_string());
        };
        record.name = new.clone();
        record.title = new.clone();
        record.last_modified = self.next_stamp(Some(record.last_modified));
        record.synced = false;
        next.checklists.insert(new.clone(), record);

        next.checklist_order.replace(old, &new);
        for name in next.most_recent.iter_mut() {
            if name == old {
                *name = new.clone();
            }
        }
        if next.current_checklist.as_deref() == Some(old) {
            next.current_checklist = Some(new.clone());
        }
        add_pending_delete(&mut next, Namespace::Checklists, old);
        next.pending_deletes
            .retain(|p| !(p.namespace == Namespace::Checklists && p.key == new));
        self.commit(next)?;

        info!("Renamed checklist {:?} -> {:?}", old, new);
        Ok(new)
    }

    pub fn current_checklist(&self) -> Option<&str> {
        self.data.current_checklist.as_deref()
    }

    /// Set the active checklist and bump it in the recent list.
    pub fn set_current_checklist(&mut self, name: Option<&str>) -> Result<()> {
        let mut next = self.data.clone();
        next.current_checklist = name.map(str::to_string);
        if let Some(name) = name {
            next.most_recent.retain(|n| n != name);
            next.most_recent.insert(0, name.to_string());
            next.most_recent.truncate(MOST_RECENT_LIMIT);
        }
        self.commit(next)
    }

    pub fn most_recent(&self) -> &[String] {
        &self.data.most_recent
    }

    // ==================== Settings ====================

    pub fn settings(&self) -> Option<&Settings> {
        self.data.theme.as_ref()
    }

    /// Edit settings, creating the record on first use. Marks it dirty.
    pub fn update_settings<F>(&mut self, edit: F) -> Result<Timestamp>
    where
        F: FnOnce(&mut Settings),
    {
        let previous = self.data.theme.as_ref().map(|s| s.last_modified);
        let stamp = self.next_stamp(previous);
        let mut next = self.data.clone();
        let settings = next.theme.get_or_insert_with(Settings::default);
        edit(settings);
        settings.last_modified = stamp;
        settings.synced = false;
        self.commit(next)?;
        Ok(stamp)
    }

    pub fn apply_remote_settings(&mut self, mut settings: Settings) -> Result<()> {
        settings.synced = true;
        let mut next = self.data.clone();
        next.theme = Some(settings);
        self.commit(next)
    }

    pub fn mark_settings_synced(&mut self, pushed_at: Timestamp) -> Result<bool> {
        match self.data.theme.as_ref() {
            Some(settings) if settings.last_modified == pushed_at => {
                if !settings.synced {
                    let mut next = self.data.clone();
                    if let Some(settings) = next.theme.as_mut() {
                        settings.synced = true;
                    }
                    self.commit(next)?;
                }
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

fn save<B: StorageBackend>(backend: &B, data: &LocalData) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(data)?;
    backend.save(&bytes)
}

fn add_pending_delete(data: &mut LocalData, namespace: Namespace, key: &str) {
    let exists = data
        .pending_deletes
        .iter()
        .any(|p| p.namespace == namespace && p.key == key);
    if !exists {
        data.pending_deletes.push(PendingDelete {
            namespace,
            key: key.to_string(),
        });
    }
}

fn migrate_records<T: Record>(data: &mut LocalData) -> usize {
    let mut migrated = 0;
    for record in T::records_mut(data).values_mut() {
        let Some(content) = record.legacy_content().take() else {
            continue;
        };
        if record.items().is_empty() {
            let decoded = serializer::decode(&content);
            record.adopt_decoded(decoded.title, decoded.items);
        }
        migrated += 1;
    }
    migrated
}

fn reconcile<T: Record>(data: &mut LocalData) -> bool {
    let keys: Vec<String> = T::records(data).keys().cloned().collect();
    T::order_mut(data).reconcile_with(keys.iter().map(String::as_str))
}
