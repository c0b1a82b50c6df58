//! checklist-core: local-first checklist storage and synchronization.
//!
//! This crate provides the core functionality for:
//! - Persisting checklists, templates and settings locally (`RecordStore`)
//! - User-defined ordering independent of timestamps (`OrderList`)
//! - The flat text encoding used for the remote store and file exchange
//! - Last-writer-wins conflict resolution and the push/pull `SyncEngine`
//! - Undo snapshots and debounced pushes for the active list
//! - `StorageBackend` and `RemoteStore` trait abstractions

pub mod app;
pub mod clock;
pub mod conflict;
pub mod debounce;
pub mod events;
pub mod model;
pub mod order;
pub mod record;
pub mod remote;
pub mod serializer;
pub mod store;
pub mod sync_engine;
pub mod undo;

pub use app::{ActiveDocument, App, AppConfig, AppError, Command, Outcome};
pub use clock::{Clock, ManualClock, SystemClock};
pub use conflict::{resolve, Resolution, Versioned};
pub use debounce::PushDebouncer;
pub use events::{EventBus, Subscription, SyncEvent, SyncState};
pub use model::{Checklist, Item, Namespace, Priority, Settings, Template, Timestamp};
pub use order::{OrderList, Placement};
pub use record::Record;
pub use remote::{InMemoryRemote, RemoteRow, RemoteSettings, RemoteStore, Table, TransportError};
pub use store::{InMemoryBackend, LocalData, RecordStore, SharedStore, StorageBackend, StoreError};
pub use sync_engine::{RemoteJob, Session, SyncEngine, SyncError, SyncReport};
pub use undo::UndoStack;
