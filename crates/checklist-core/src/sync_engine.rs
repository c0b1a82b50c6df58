//! SyncEngine: push/pull/merge between the local store and the remote.
//!
//! A sync pass for one namespace runs:
//!
//! 1. Retry pending deletes (tombstones) against the remote
//! 2. `pulling`: fetch every remote row for the owner. A failed fetch ends
//!    the pass without touching local state
//! 3. `merging`: resolve each row against the local copy, apply remote
//!    winners, then reconcile the order list with the merged key set
//! 4. `pushing`: upsert every record the resolver picked plus every record
//!    still marked dirty
//!
//! Passes are serialized per namespace; different namespaces run
//! concurrently. Transport failures are logged and counted in the
//! [`SyncReport`], and the affected records stay dirty for the next pass.

use crate::conflict::{resolve, Resolution};
use crate::events::{EventBus, SyncEvent, SyncState};
use crate::model::{Checklist, Namespace, Settings, Template, Timestamp};
use crate::record::Record;
use crate::remote::{RemoteSettings, RemoteStore, TransportError};
use crate::store::{RecordStore, SharedStore, StorageBackend, StoreError};

use futures::lock::{Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, MutexGuard, RwLock};
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Key used for the single settings record in reports and debouncing.
pub const SETTINGS_KEY: &str = "settings";

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

pub type Result<T> = std::result::Result<T, SyncError>;

/// An authenticated remote session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Owner principal scoping every remote row.
    pub owner: String,
}

impl Session {
    pub fn new(owner: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
        }
    }
}

/// What one pass did to one namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub namespace: Namespace,
    /// Keys overwritten or created from the remote.
    pub pulled: Vec<String>,
    /// Keys the remote acknowledged.
    pub pushed: Vec<String>,
    /// Tombstones the remote acknowledged.
    pub deleted: Vec<String>,
    /// Keys whose remote call failed; they stay dirty.
    pub failed: Vec<String>,
    /// Keys that existed locally and lost to a strictly newer remote version.
    pub newer_remote: Vec<String>,
    /// The pull failed (or the store did) and nothing was merged.
    pub aborted: bool,
}

impl SyncReport {
    pub fn new(namespace: Namespace) -> Self {
        Self {
            namespace,
            pulled: Vec::new(),
            pushed: Vec::new(),
            deleted: Vec::new(),
            failed: Vec::new(),
            newer_remote: Vec::new(),
            aborted: false,
        }
    }

    fn aborted(namespace: Namespace) -> Self {
        Self {
            aborted: true,
            ..Self::new(namespace)
        }
    }

    pub fn is_clean(&self) -> bool {
        !self.aborted && self.failed.is_empty()
    }
}

/// Remote work queued by the application context and run off the edit path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteJob {
    /// Full pull/merge/push of every namespace.
    SyncAll,
    /// Upsert specific records (debounced push).
    Push { namespace: Namespace, keys: Vec<String> },
    /// Propagate a local delete.
    Delete { namespace: Namespace, key: String },
    /// Propagate a checklist rename.
    Rename { old: String, new: String },
}

struct NamespaceLocks {
    checklists: AsyncMutex<()>,
    templates: AsyncMutex<()>,
    settings: AsyncMutex<()>,
}

impl NamespaceLocks {
    fn new() -> Self {
        Self {
            checklists: AsyncMutex::new(()),
            templates: AsyncMutex::new(()),
            settings: AsyncMutex::new(()),
        }
    }

    fn get(&self, namespace: Namespace) -> &AsyncMutex<()> {
        match namespace {
            Namespace::Checklists => &self.checklists,
            Namespace::Templates => &self.templates,
            Namespace::Settings => &self.settings,
        }
    }
}

pub struct SyncEngine<B: StorageBackend, R: RemoteStore + ?Sized> {
    store: SharedStore<B>,
    remote: Arc<R>,
    session: RwLock<Option<Session>>,
    states: RwLock<HashMap<Namespace, SyncState>>,
    locks: NamespaceLocks,
    events: Arc<EventBus>,
}

impl<B, R> SyncEngine<B, R>
where
    B: StorageBackend,
    R: RemoteStore + ?Sized,
{
    /// Create an engine with no session (every namespace `disabled`).
    pub fn new(store: SharedStore<B>, remote: Arc<R>, events: Arc<EventBus>) -> Self {
        let states = Namespace::ALL
            .iter()
            .map(|ns| (*ns, SyncState::Disabled))
            .collect();
        Self {
            store,
            remote,
            session: RwLock::new(None),
            states: RwLock::new(states),
            locks: NamespaceLocks::new(),
            events,
        }
    }

    pub fn store(&self) -> &SharedStore<B> {
        &self.store
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    fn lock_store(&self) -> MutexGuard<'_, RecordStore<B>> {
        self.store.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn lock_namespace(&self, namespace: Namespace) -> AsyncMutexGuard<'_, ()> {
        self.locks.get(namespace).lock().await
    }

    // ==================== Session / state ====================

    /// Establish or drop the remote session.
    ///
    /// Dropping it disables every namespace. Establishing it only enables;
    /// the caller triggers the initial pull with [`SyncEngine::sync_all`].
    pub fn set_session(&self, session: Option<Session>) {
        let state = if session.is_some() {
            SyncState::Idle
        } else {
            SyncState::Disabled
        };
        match &session {
            Some(s) => info!("Sync session established for {}", s.owner),
            None => info!("Sync session ended"),
        }
        *self.session.write().unwrap_or_else(|e| e.into_inner()) = session;
        for namespace in Namespace::ALL {
            self.set_state(namespace, state);
        }
    }

    pub fn session(&self) -> Option<Session> {
        self.session.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn is_enabled(&self) -> bool {
        self.session().is_some()
    }

    fn owner(&self) -> Option<String> {
        self.session().map(|s| s.owner)
    }

    pub fn state(&self, namespace: Namespace) -> SyncState {
        self.states
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&namespace)
            .copied()
            .unwrap_or(SyncState::Disabled)
    }

    fn set_state(&self, namespace: Namespace, state: SyncState) {
        let previous = self
            .states
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(namespace, state);
        if previous != Some(state) {
            debug!("{} sync: {}", namespace, state);
            self.events.emit(SyncEvent::StateChanged { namespace, state });
        }
    }

    /// Leave a pass: back to `idle` unless the session went away meanwhile.
    fn finish(&self, namespace: Namespace) {
        let state = if self.is_enabled() {
            SyncState::Idle
        } else {
            SyncState::Disabled
        };
        self.set_state(namespace, state);
    }

    // ==================== Full sync ====================

    /// Pull, merge and push every namespace concurrently.
    ///
    /// Returns no reports when there is no session.
    pub async fn sync_all(&self) -> Vec<SyncReport> {
        if !self.is_enabled() {
            debug!("Sync disabled, skipping");
            return Vec::new();
        }
        let (checklists, templates, settings) = futures::join!(
            self.sync_namespace(Namespace::Checklists),
            self.sync_namespace(Namespace::Templates),
            self.sync_namespace(Namespace::Settings),
        );
        vec![checklists, templates, settings]
    }

    /// One full pass over a namespace. Store failures abort the pass.
    pub async fn sync_namespace(&self, namespace: Namespace) -> SyncReport {
        let result = match namespace {
            Namespace::Checklists => self.sync_records::<Checklist>().await,
            Namespace::Templates => self.sync_records::<Template>().await,
            Namespace::Settings => self.sync_settings().await,
        };
        result.unwrap_or_else(|e| {
            error!("{} sync failed: {}", namespace, e);
            self.finish(namespace);
            SyncReport::aborted(namespace)
        })
    }

    /// Pull, merge and push one list-shaped namespace.
    pub async fn sync_records<T: Record>(&self) -> Result<SyncReport> {
        let namespace = T::NAMESPACE;
        let mut report = SyncReport::new(namespace);
        let Some(owner) = self.owner() else {
            return Ok(report);
        };
        let _guard = self.lock_namespace(namespace).await;

        self.retry_deletes(&owner, namespace, &mut report).await?;

        self.set_state(namespace, SyncState::Pulling);
        let rows = match self.remote.select_all(&owner, T::TABLE).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!("Pull of {} failed, keeping local state: {}", namespace, e);
                self.finish(namespace);
                return Ok(SyncReport {
                    aborted: true,
                    ..report
                });
            }
        };
        debug!("Pulled {} {} row(s)", rows.len(), namespace);

        self.set_state(namespace, SyncState::Merging);
        let mut to_push = BTreeSet::new();
        {
            let mut store = self.lock_store();
            let mut remote_keys = BTreeSet::new();

            for row in &rows {
                if store.is_pending_delete(namespace, &row.name) {
                    debug!("Ignoring remote {} {:?}, deleted locally", namespace, row.name);
                    continue;
                }
                remote_keys.insert(row.name.clone());

                let local = store.record::<T>(&row.name).cloned();
                match resolve(local.as_ref(), Some(row)) {
                    Some(Resolution::TakeRemote) => {
                        store.apply_remote(T::from_row(row))?;
                        if local.is_some() {
                            report.newer_remote.push(row.name.clone());
                        }
                        report.pulled.push(row.name.clone());
                        self.events.emit(SyncEvent::RecordPulled {
                            namespace,
                            key: row.name.clone(),
                            last_modified: row.last_modified,
                        });
                    }
                    Some(Resolution::PushLocal) => {
                        to_push.insert(row.name.clone());
                    }
                    Some(Resolution::KeepLocal) | None => {}
                }
            }

            // Local-only records win by absence
            for key in T::records(store.data()).keys() {
                if !remote_keys.contains(key) {
                    to_push.insert(key.clone());
                }
            }

            store.reconcile_order::<T>()?;

            for record in store.dirty::<T>() {
                to_push.insert(record.key().to_string());
            }
        }

        if !to_push.is_empty() {
            self.set_state(namespace, SyncState::Pushing);
            for key in to_push {
                self.push_record::<T>(&owner, &key, &mut report).await?;
            }
        }

        self.finish(namespace);
        info!(
            "{} sync: {} pulled, {} pushed, {} deleted, {} failed",
            namespace,
            report.pulled.len(),
            report.pushed.len(),
            report.deleted.len(),
            report.failed.len()
        );
        Ok(report)
    }

    async fn retry_deletes(
        &self,
        owner: &str,
        namespace: Namespace,
        report: &mut SyncReport,
    ) -> Result<()> {
        let pending = self.lock_store().pending_deletes(namespace);
        for key in pending {
            self.delete_remote(owner, namespace, &key, report).await?;
        }
        Ok(())
    }

    async fn delete_remote(
        &self,
        owner: &str,
        namespace: Namespace,
        key: &str,
        report: &mut SyncReport,
    ) -> Result<()> {
        let Some(table) = table_for(namespace) else {
            return Ok(());
        };
        match self.remote.delete(owner, table, key).await {
            Ok(()) => {
                self.lock_store().clear_pending_delete(namespace, key)?;
                report.deleted.push(key.to_string());
                self.events.emit(SyncEvent::RecordDeleted {
                    namespace,
                    key: key.to_string(),
                });
            }
            Err(e) => {
                warn!("Remote delete of {} {:?} failed: {}", namespace, key, e);
                report.failed.push(key.to_string());
            }
        }
        Ok(())
    }

    /// Upsert one record and mark it synced if it wasn't edited meanwhile.
    async fn push_record<T: Record>(
        &self,
        owner: &str,
        key: &str,
        report: &mut SyncReport,
    ) -> Result<()> {
        let namespace = T::NAMESPACE;
        let row = {
            let store = self.lock_store();
            if store.is_pending_delete(namespace, key) {
                return Ok(());
            }
            match store.record::<T>(key) {
                Some(record) => record.to_row(),
                None => return Ok(()),
            }
        };
        let pushed_at = row.last_modified;

        match self.remote.upsert(owner, T::TABLE, row).await {
            Ok(()) => {
                if self.lock_store().mark_synced::<T>(key, pushed_at)? {
                    debug!("Pushed {} {:?}", namespace, key);
                } else {
                    debug!("Pushed {} {:?}, but it changed meanwhile", namespace, key);
                }
                report.pushed.push(key.to_string());
                self.events.emit(SyncEvent::RecordPushed {
                    namespace,
                    key: key.to_string(),
                    last_modified: pushed_at,
                });
            }
            Err(e) => {
                warn!("Push of {} {:?} failed: {}", namespace, key, e);
                report.failed.push(key.to_string());
                self.events.emit(SyncEvent::PushFailed {
                    namespace,
                    key: key.to_string(),
                    error: e.to_string(),
                });
            }
        }
        Ok(())
    }

    // ==================== Settings ====================

    /// Pull, merge and push the settings record.
    pub async fn sync_settings(&self) -> Result<SyncReport> {
        let namespace = Namespace::Settings;
        let mut report = SyncReport::new(namespace);
        let Some(owner) = self.owner() else {
            return Ok(report);
        };
        let _guard = self.lock_namespace(namespace).await;

        self.set_state(namespace, SyncState::Pulling);
        let remote = match self.remote.select_settings(&owner).await {
            Ok(remote) => remote,
            Err(e) => {
                warn!("Pull of settings failed, keeping local state: {}", e);
                self.finish(namespace);
                return Ok(SyncReport {
                    aborted: true,
                    ..report
                });
            }
        };

        self.set_state(namespace, SyncState::Merging);
        let push = {
            let mut store = self.lock_store();
            let local = store.settings().cloned();
            match resolve(local.as_ref(), remote.as_ref()) {
                Some(Resolution::TakeRemote) => {
                    if let Some(remote) = remote {
                        let last_modified = remote.last_modified;
                        store.apply_remote_settings(Settings {
                            priority_colors: remote.priority_colors,
                            last_modified,
                            synced: true,
                        })?;
                        if local.is_some() {
                            report.newer_remote.push(SETTINGS_KEY.to_string());
                        }
                        report.pulled.push(SETTINGS_KEY.to_string());
                        self.events.emit(SyncEvent::RecordPulled {
                            namespace,
                            key: SETTINGS_KEY.to_string(),
                            last_modified,
                        });
                    }
                    false
                }
                Some(Resolution::PushLocal) => true,
                Some(Resolution::KeepLocal) | None => {
                    store.settings().map(|s| !s.synced).unwrap_or(false)
                }
            }
        };

        if push {
            self.set_state(namespace, SyncState::Pushing);
            self.push_settings_record(&owner, &mut report).await?;
        }

        self.finish(namespace);
        Ok(report)
    }

    async fn push_settings_record(&self, owner: &str, report: &mut SyncReport) -> Result<()> {
        let Some(settings) = self.lock_store().settings().cloned() else {
            return Ok(());
        };
        let pushed_at: Timestamp = settings.last_modified;
        let row = RemoteSettings {
            priority_colors: settings.priority_colors,
            last_modified: pushed_at,
        };

        match self.remote.upsert_settings(owner, row).await {
            Ok(()) => {
                self.lock_store().mark_settings_synced(pushed_at)?;
                report.pushed.push(SETTINGS_KEY.to_string());
                self.events.emit(SyncEvent::RecordPushed {
                    namespace: Namespace::Settings,
                    key: SETTINGS_KEY.to_string(),
                    last_modified: pushed_at,
                });
            }
            Err(e) => {
                warn!("Push of settings failed: {}", e);
                report.failed.push(SETTINGS_KEY.to_string());
                self.events.emit(SyncEvent::PushFailed {
                    namespace: Namespace::Settings,
                    key: SETTINGS_KEY.to_string(),
                    error: e.to_string(),
                });
            }
        }
        Ok(())
    }

    // ==================== Targeted operations ====================

    /// Push specific records without pulling (debounced push).
    ///
    /// Waits for any in-flight pass over the namespace to finish first.
    pub async fn push_keys(&self, namespace: Namespace, keys: &[String]) -> Result<SyncReport> {
        let mut report = SyncReport::new(namespace);
        let Some(owner) = self.owner() else {
            return Ok(report);
        };
        let _guard = self.lock_namespace(namespace).await;

        self.set_state(namespace, SyncState::Pushing);
        let result = match namespace {
            Namespace::Checklists => self.push_each::<Checklist>(&owner, keys, &mut report).await,
            Namespace::Templates => self.push_each::<Template>(&owner, keys, &mut report).await,
            Namespace::Settings => self.push_settings_record(&owner, &mut report).await,
        };
        self.finish(namespace);
        result.map(|()| report)
    }

    async fn push_each<T: Record>(
        &self,
        owner: &str,
        keys: &[String],
        report: &mut SyncReport,
    ) -> Result<()> {
        for key in keys {
            self.push_record::<T>(owner, key, report).await?;
        }
        Ok(())
    }

    /// Propagate a local delete. On failure the tombstone stays for the
    /// next pass.
    pub async fn propagate_delete(&self, namespace: Namespace, key: &str) -> Result<SyncReport> {
        let mut report = SyncReport::new(namespace);
        let Some(owner) = self.owner() else {
            return Ok(report);
        };
        let _guard = self.lock_namespace(namespace).await;
        let pending = self.lock_store().is_pending_delete(namespace, key);
        if pending {
            self.delete_remote(&owner, namespace, key, &mut report).await?;
        }
        Ok(report)
    }

    /// Propagate a checklist rename as one remote operation.
    ///
    /// On failure the old key stays tombstoned and the new one dirty, so the
    /// next pass converges the remote anyway.
    pub async fn propagate_rename(&self, old: &str, new: &str) -> Result<SyncReport> {
        let namespace = Namespace::Checklists;
        let mut report = SyncReport::new(namespace);
        let Some(owner) = self.owner() else {
            return Ok(report);
        };
        let _guard = self.lock_namespace(namespace).await;

        let Some(row) = self.lock_store().record::<Checklist>(new).map(|r| r.to_row()) else {
            return Ok(report);
        };
        let pushed_at = row.last_modified;

        match self.remote.rename(&owner, Checklist::TABLE, old, row).await {
            Ok(()) => {
                {
                    let mut store = self.lock_store();
                    store.clear_pending_delete(namespace, old)?;
                    store.mark_synced::<Checklist>(new, pushed_at)?;
                }
                report.deleted.push(old.to_string());
                report.pushed.push(new.to_string());
                self.events.emit(SyncEvent::RecordRenamed {
                    namespace,
                    old_key: old.to_string(),
                    new_key: new.to_string(),
                });
            }
            Err(e) => {
                warn!("Remote rename {:?} -> {:?} failed: {}", old, new, e);
                report.failed.push(new.to_string());
            }
        }
        Ok(report)
    }

    /// Run a queued job. Store errors are logged and reported as aborted.
    pub async fn execute(&self, job: RemoteJob) -> Vec<SyncReport> {
        let (namespace, result) = match job {
            RemoteJob::SyncAll => return self.sync_all().await,
            RemoteJob::Push { namespace, keys } => (namespace, self.push_keys(namespace, &keys).await),
            RemoteJob::Delete { namespace, key } => {
                (namespace, self.propagate_delete(namespace, &key).await)
            }
            RemoteJob::Rename { old, new } => {
                (Namespace::Checklists, self.propagate_rename(&old, &new).await)
            }
        };
        match result {
            Ok(report) => vec![report],
            Err(e) => {
                error!("Remote job on {} failed: {}", namespace, e);
                vec![SyncReport::aborted(namespace)]
            }
        }
    }
}

fn table_for(namespace: Namespace) -> Option<crate::remote::Table> {
    match namespace {
        Namespace::Checklists => Some(Checklist::TABLE),
        Namespace::Templates => Some(Template::TABLE),
        Namespace::Settings => None,
    }
}
