//! End-to-end tests for the checklist binary's library layer.
//!
//! Two "devices" (separate data directories with their own clocks) share one
//! directory remote, exercising pull, push, rename and delete propagation
//! through real files.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use checklist_cli::{open_app_with_clock, CliApp, Config, DirRemote};
use checklist_core::{Checklist, Command, ManualClock, Outcome, RemoteStore, SyncEvent, Table};
use tempfile::TempDir;

const OWNER: &str = "alice";

struct Device {
    data_dir: TempDir,
    clock: Arc<ManualClock>,
    app: CliApp,
}

// ============================================================================
// Helpers
// ============================================================================

fn config_for(remote: &Path) -> Config {
    Config {
        remote_dir: Some(remote.to_path_buf()),
        owner: Some(OWNER.to_string()),
        ..Config::default()
    }
}

/// Open a device against the shared remote and run its initial pull.
async fn device(remote: &Path, start: i64) -> Device {
    let data_dir = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new(start));
    let mut app = open_app_with_clock(data_dir.path(), &config_for(remote), clock.clone()).unwrap();
    app.run_pending().await;
    Device { data_dir, clock, app }
}

/// Reopen a device from its data directory, as after a restart.
async fn restart(device: Device, remote: &Path) -> Device {
    let Device { data_dir, clock, app } = device;
    drop(app);
    let mut app = open_app_with_clock(data_dir.path(), &config_for(remote), clock.clone()).unwrap();
    app.run_pending().await;
    Device { data_dir, clock, app }
}

fn dispatch(device: &mut Device, command: Command) -> Outcome {
    device.app.dispatch(command).unwrap()
}

async fn sync(device: &mut Device) {
    dispatch(device, Command::Sync);
    device.app.run_pending().await;
}

fn names(device: &Device) -> Vec<String> {
    device.app.checklists().into_iter().map(|c| c.name).collect()
}

fn texts(device: &Device) -> Vec<String> {
    device.app.active().items.iter().map(|i| i.text.clone()).collect()
}

async fn remote_names(root: &Path) -> Vec<String> {
    let remote = DirRemote::new(root.to_path_buf());
    let mut names: Vec<String> = remote
        .select_all(OWNER, Table::Checklists)
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.name)
        .collect();
    names.sort();
    names
}

fn shared_root(dir: &TempDir) -> PathBuf {
    dir.path().join("remote")
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_checklist_reaches_second_device() {
    let shared = TempDir::new().unwrap();
    let root = shared_root(&shared);

    let mut phone = device(&root, 1_000).await;
    dispatch(&mut phone, Command::NewChecklist { title: Some("Groceries".into()) });
    dispatch(&mut phone, Command::AddItem { text: "Milk".into() });
    dispatch(&mut phone, Command::AddItem { text: "Eggs".into() });
    phone.app.flush().await;
    assert_eq!(remote_names(&root).await, vec!["Groceries"]);

    let mut laptop = device(&root, 2_000).await;
    assert_eq!(names(&laptop), vec!["Groceries"]);

    dispatch(&mut laptop, Command::Open { name: "Groceries".into() });
    assert_eq!(texts(&laptop), vec!["Milk", "Eggs"]);

    // Pulled records arrive already synced
    let pulled: Vec<Checklist> = laptop.app.checklists();
    assert!(pulled[0].synced);
}

#[tokio::test]
async fn test_initial_pull_events_reach_early_subscribers() {
    let shared = TempDir::new().unwrap();
    let root = shared_root(&shared);

    let mut phone = device(&root, 1_000).await;
    dispatch(&mut phone, Command::NewChecklist { title: Some("Groceries".into()) });
    dispatch(&mut phone, Command::AddItem { text: "Milk".into() });
    phone.app.flush().await;

    let data_dir = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new(2_000));
    let mut laptop = open_app_with_clock(data_dir.path(), &config_for(&root), clock).unwrap();
    let pulled = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&pulled);
    let _subscription = laptop.engine().events().subscribe(move |event| {
        if let SyncEvent::RecordPulled { key, .. } = event {
            seen.lock().unwrap().push(key);
        }
    });

    laptop.run_pending().await;
    assert_eq!(*pulled.lock().unwrap(), vec!["Groceries".to_string()]);
}

#[tokio::test]
async fn test_newer_remote_edit_replaces_active_list() {
    let shared = TempDir::new().unwrap();
    let root = shared_root(&shared);

    let mut phone = device(&root, 1_000).await;
    dispatch(&mut phone, Command::NewChecklist { title: Some("Chores".into()) });
    dispatch(&mut phone, Command::AddItem { text: "Dishes".into() });
    phone.app.flush().await;

    let mut laptop = device(&root, 5_000).await;
    dispatch(&mut laptop, Command::Open { name: "Chores".into() });
    dispatch(&mut laptop, Command::AddItem { text: "Laundry".into() });
    laptop.app.flush().await;

    // The phone still shows its older copy until it syncs
    assert_eq!(texts(&phone), vec!["Dishes"]);
    sync(&mut phone).await;
    assert_eq!(texts(&phone), vec!["Dishes", "Laundry"]);
}

#[tokio::test]
async fn test_local_newer_edit_wins_and_is_pushed() {
    let shared = TempDir::new().unwrap();
    let root = shared_root(&shared);

    let mut phone = device(&root, 1_000).await;
    dispatch(&mut phone, Command::NewChecklist { title: Some("Trip".into()) });
    dispatch(&mut phone, Command::AddItem { text: "Passport".into() });
    phone.app.flush().await;

    let mut laptop = device(&root, 2_000).await;
    dispatch(&mut laptop, Command::Open { name: "Trip".into() });
    dispatch(&mut laptop, Command::AddItem { text: "Charger".into() });
    laptop.app.flush().await;

    // Edited later on the phone without seeing the laptop's version
    phone.clock.set(9_000);
    dispatch(&mut phone, Command::AddItem { text: "Tickets".into() });
    sync(&mut phone).await;
    assert_eq!(texts(&phone), vec!["Passport", "Tickets"]);

    sync(&mut laptop).await;
    assert_eq!(texts(&laptop), vec!["Passport", "Tickets"]);
}

#[tokio::test]
async fn test_rename_moves_remote_row() {
    let shared = TempDir::new().unwrap();
    let root = shared_root(&shared);

    let mut phone = device(&root, 1_000).await;
    dispatch(&mut phone, Command::NewChecklist { title: Some("Groceries".into()) });
    dispatch(&mut phone, Command::AddItem { text: "Milk".into() });
    phone.app.flush().await;

    let outcome = dispatch(&mut phone, Command::Rename { name: "Groceries v2".into() });
    assert_eq!(outcome, Outcome::Renamed("Groceries v2".into()));
    phone.app.flush().await;

    assert_eq!(remote_names(&root).await, vec!["Groceries v2"]);

    let laptop = device(&root, 2_000).await;
    assert_eq!(names(&laptop), vec!["Groceries v2"]);
}

#[tokio::test]
async fn test_delete_propagates_and_survives_restart() {
    let shared = TempDir::new().unwrap();
    let root = shared_root(&shared);

    let mut phone = device(&root, 1_000).await;
    for title in ["Keep", "Drop"] {
        dispatch(&mut phone, Command::NewChecklist { title: Some(title.into()) });
        dispatch(&mut phone, Command::AddItem { text: "x".into() });
    }
    // Opening "Drop" cancelled the pending push of "Keep"; a full sync carries it
    sync(&mut phone).await;
    assert_eq!(remote_names(&root).await, vec!["Drop", "Keep"]);

    dispatch(&mut phone, Command::DeleteChecklist { name: "Drop".into() });
    phone.app.flush().await;
    assert_eq!(remote_names(&root).await, vec!["Keep"]);

    let phone = restart(phone, &root).await;
    assert_eq!(names(&phone), vec!["Keep"]);
}

#[tokio::test]
async fn test_offline_edits_stay_local_until_remote_returns() {
    let shared = TempDir::new().unwrap();
    // A regular file where the remote directory should be
    let blocked = shared.path().join("remote");
    std::fs::write(&blocked, "not a directory").unwrap();

    let mut phone = device(&blocked, 1_000).await;
    dispatch(&mut phone, Command::NewChecklist { title: Some("Offline".into()) });
    dispatch(&mut phone, Command::AddItem { text: "Still saved".into() });
    let reports = phone.app.flush().await;
    assert!(reports.iter().any(|r| !r.is_clean()));
    assert!(!phone.app.checklists()[0].synced);

    // Remote comes back
    std::fs::remove_file(&blocked).unwrap();
    let mut phone = restart(phone, &blocked).await;
    assert_eq!(texts(&phone), vec!["Still saved"]);
    sync(&mut phone).await;
    assert_eq!(remote_names(&blocked).await, vec!["Offline"]);
    assert!(phone.app.checklists()[0].synced);
}

#[tokio::test]
async fn test_local_store_is_plain_json_on_disk() {
    let shared = TempDir::new().unwrap();
    let root = shared_root(&shared);

    let mut phone = device(&root, 1_000).await;
    dispatch(&mut phone, Command::AddItem { text: "Milk".into() });

    let data_file = phone.data_dir.path().join("checklists.json");
    let json: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(data_file).unwrap()).unwrap();
    assert_eq!(json["currentChecklist"], "Checklist Queue");
    assert_eq!(json["checklists"]["Checklist Queue"]["items"][0]["text"], "Milk");
}
