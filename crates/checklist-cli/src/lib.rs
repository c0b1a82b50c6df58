//! checklist-cli library: native backends and session wiring for the
//! `checklist` binary.
//!
//! This is a thin library layer over the binary's components, allowing
//! integration tests to drive full sessions against temp directories.

pub mod config;
pub mod dir_remote;
pub mod native_store;
pub mod shell;
pub mod timeout;
pub mod worker;

pub use config::Config;
pub use dir_remote::DirRemote;
pub use native_store::JsonFileBackend;
pub use timeout::TimeoutRemote;
pub use worker::SyncWorker;

use anyhow::{Context, Result};
use checklist_core::{App, Clock, Command, EventBus, RecordStore, SyncEngine, SyncEvent, SystemClock};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

pub type CliRemote = TimeoutRemote<DirRemote>;
pub type CliApp = App<JsonFileBackend, CliRemote>;

/// Open the local store and, when a remote is configured, restore the
/// session.
///
/// The initial pull is queued, not run: subscribe to the engine's events
/// first, then drain it with `run_pending` or hand it to a [`SyncWorker`].
pub fn open_app(data_dir: &Path, config: &Config) -> Result<CliApp> {
    open_app_with_clock(data_dir, config, Arc::new(SystemClock))
}

pub fn open_app_with_clock(
    data_dir: &Path,
    config: &Config,
    clock: Arc<dyn Clock>,
) -> Result<CliApp> {
    let data_path = config.data_path(data_dir);
    let store = RecordStore::open(JsonFileBackend::new(data_path.clone()), clock.clone())
        .with_context(|| format!("Failed to open local data at {:?}", data_path))?
        .into_shared();

    let remote_root = config
        .remote_dir
        .clone()
        .unwrap_or_else(|| data_dir.join("remote"));
    let remote = TimeoutRemote::new(DirRemote::new(remote_root), config.remote_timeout());

    let events = Arc::new(EventBus::new());
    let engine = Arc::new(SyncEngine::new(store, Arc::new(remote), events));
    let mut app = App::new(engine, clock, config.app_config());

    if let (Some(owner), Some(remote_dir)) = (&config.owner, &config.remote_dir) {
        info!("Syncing as {} via {:?}", owner, remote_dir);
        app.dispatch(Command::SignIn {
            owner: owner.clone(),
        })?;
    }

    Ok(app)
}

/// Log every sync event as JSON at debug level.
pub fn log_sync_events(event: SyncEvent) {
    match serde_json::to_string(&event) {
        Ok(json) => debug!(target: "checklist::sync", "{}", json),
        Err(e) => debug!(target: "checklist::sync", "Unserializable event {:?}: {}", event, e),
    }
}
