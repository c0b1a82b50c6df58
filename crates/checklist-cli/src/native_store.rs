//! Native storage backend: the persisted root object as one JSON file.

use checklist_core::store::{Result, StorageBackend, StoreError};
use std::fs;
use std::path::{Path, PathBuf};

/// Stores the local data file on disk.
///
/// Saves go through a sibling temp file and a rename, so a crash mid-write
/// leaves the previous version intact.
pub struct JsonFileBackend {
    path: PathBuf,
}

impl JsonFileBackend {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl StorageBackend for JsonFileBackend {
    fn load(&self) -> Result<Option<Vec<u8>>> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::Backend(format!("{:?}: {}", self.path, e))),
        }
    }

    fn save(&self, bytes: &[u8]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| StoreError::Backend(e.to_string()))?;
        }

        let temp = self.temp_path();
        fs::write(&temp, bytes).map_err(|e| StoreError::Backend(format!("{:?}: {}", temp, e)))?;
        fs::rename(&temp, &self.path)
            .map_err(|e| StoreError::Backend(format!("{:?}: {}", self.path, e)))
    }
}
