//! Directory-backed remote store using tokio::fs.
//!
//! Layout under the root:
//!
//! ```text
//! {owner}/checklists.json     name -> row
//! {owner}/templates.json      id -> row
//! {owner}/user_settings.json  settings row
//! ```
//!
//! Every write replaces a whole table file through a temp file and a rename,
//! so a rename is one atomic table rewrite. Point several data directories
//! at the same root to sync them.

use async_trait::async_trait;
use checklist_core::remote::{RemoteRow, RemoteSettings, RemoteStore, Result, Table, TransportError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;

type Rows = BTreeMap<String, RemoteRow>;

pub struct DirRemote {
    root: PathBuf,
    // Serializes read-modify-write cycles within this process
    write_lock: Mutex<()>,
}

impl DirRemote {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            write_lock: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn table_path(&self, owner: &str, table: Table) -> Result<PathBuf> {
        Ok(self.owner_dir(owner)?.join(format!("{}.json", table.as_str())))
    }

    fn owner_dir(&self, owner: &str) -> Result<PathBuf> {
        let valid = !owner.is_empty()
            && owner != "."
            && owner != ".."
            && !owner.contains(['/', '\\']);
        if !valid {
            return Err(TransportError::Rejected(format!("invalid owner {:?}", owner)));
        }
        Ok(self.root.join(owner))
    }

    async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
        let bytes = match fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(TransportError::Unreachable(format!("{:?}: {}", path, e))),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| TransportError::Malformed(format!("{:?}: {}", path, e)))
    }

    async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(value)
            .map_err(|e| TransportError::Malformed(e.to_string()))?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| TransportError::Unreachable(e.to_string()))?;
        }

        let temp = path.with_extension("json.tmp");
        fs::write(&temp, bytes)
            .await
            .map_err(|e| TransportError::Unreachable(format!("{:?}: {}", temp, e)))?;
        fs::rename(&temp, path)
            .await
            .map_err(|e| TransportError::Unreachable(format!("{:?}: {}", path, e)))
    }

    async fn read_rows(&self, owner: &str, table: Table) -> Result<Rows> {
        let path = self.table_path(owner, table)?;
        Ok(Self::read_json(&path).await?.unwrap_or_default())
    }

    /// Load a table, apply `edit`, write it back.
    async fn update_rows<F>(&self, owner: &str, table: Table, edit: F) -> Result<()>
    where
        F: FnOnce(&mut Rows) + Send,
    {
        let _guard = self.write_lock.lock().await;
        let path = self.table_path(owner, table)?;
        let mut rows: Rows = Self::read_json(&path).await?.unwrap_or_default();
        edit(&mut rows);
        Self::write_json(&path, &rows).await
    }
}

#[async_trait]
impl RemoteStore for DirRemote {
    async fn upsert(&self, owner: &str, table: Table, row: RemoteRow) -> Result<()> {
        self.update_rows(owner, table, |rows| {
            rows.insert(row.name.clone(), row);
        })
        .await
    }

    async fn delete(&self, owner: &str, table: Table, name: &str) -> Result<()> {
        let path = self.table_path(owner, table)?;
        if !fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(());
        }
        self.update_rows(owner, table, |rows| {
            rows.remove(name);
        })
        .await
    }

    async fn select_all(&self, owner: &str, table: Table) -> Result<Vec<RemoteRow>> {
        let mut rows: Vec<RemoteRow> = self.read_rows(owner, table).await?.into_values().collect();
        rows.sort_by(|a, b| b.last_modified.cmp(&a.last_modified));
        Ok(rows)
    }

    async fn rename(&self, owner: &str, table: Table, old_name: &str, row: RemoteRow) -> Result<()> {
        self.update_rows(owner, table, |rows| {
            rows.remove(old_name);
            rows.insert(row.name.clone(), row);
        })
        .await
    }

    async fn upsert_settings(&self, owner: &str, settings: RemoteSettings) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let path = self.table_path(owner, Table::UserSettings)?;
        Self::write_json(&path, &settings).await
    }

    async fn select_settings(&self, owner: &str) -> Result<Option<RemoteSettings>> {
        let path = self.table_path(owner, Table::UserSettings)?;
        Self::read_json(&path).await
    }
}
