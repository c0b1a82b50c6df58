//! Sync status events.
//!
//! The engine and the application context emit [`SyncEvent`]s on an
//! [`EventBus`]; the CLI subscribes and logs them as JSON.

use crate::model::{Namespace, Timestamp};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

/// Per-namespace sync state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SyncState {
    /// No session; every remote operation is a no-op.
    Disabled,
    Idle,
    Pulling,
    Merging,
    Pushing,
}

impl SyncState {
    /// Whether a sync pass is in flight.
    pub fn is_busy(&self) -> bool {
        matches!(self, SyncState::Pulling | SyncState::Merging | SyncState::Pushing)
    }
}

impl Display for SyncState {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let s = match self {
            SyncState::Disabled => "disabled",
            SyncState::Idle => "idle",
            SyncState::Pulling => "pulling",
            SyncState::Merging => "merging",
            SyncState::Pushing => "pushing",
        };
        f.write_str(s)
    }
}

/// Sync events emitted during sync operations.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SyncEvent {
    /// A namespace moved to a new sync state.
    StateChanged {
        namespace: Namespace,
        state: SyncState,
    },
    /// A remote version replaced the local record.
    RecordPulled {
        namespace: Namespace,
        key: String,
        #[serde(rename = "lastModified")]
        last_modified: Timestamp,
    },
    /// A local record was acknowledged by the remote.
    RecordPushed {
        namespace: Namespace,
        key: String,
        #[serde(rename = "lastModified")]
        last_modified: Timestamp,
    },
    /// A push failed; the record stays dirty and is retried later.
    PushFailed {
        namespace: Namespace,
        key: String,
        error: String,
    },
    /// A local delete was propagated.
    RecordDeleted { namespace: Namespace, key: String },
    /// A rename was propagated.
    RecordRenamed {
        namespace: Namespace,
        #[serde(rename = "oldKey")]
        old_key: String,
        #[serde(rename = "newKey")]
        new_key: String,
    },
    /// The active list was replaced by a newer remote version.
    ActiveReloaded { key: String },
}

/// Keeps a listener registered; dropping it removes the listener.
pub struct Subscription {
    bus: Weak<EventBus>,
    listener: u64,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.remove(self.listener);
        }
    }
}

type Listener = Arc<dyn Fn(SyncEvent) + Send + Sync>;

#[derive(Default)]
struct Listeners {
    next: u64,
    by_id: BTreeMap<u64, Listener>,
}

/// Fan-out of [`SyncEvent`]s to in-process listeners, in registration order.
///
/// Must live in an `Arc` so subscriptions can find their way back.
#[derive(Default)]
pub struct EventBus {
    listeners: Mutex<Listeners>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn listeners(&self) -> MutexGuard<'_, Listeners> {
        self.listeners.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn subscribe(
        self: &Arc<Self>,
        listener: impl Fn(SyncEvent) + Send + Sync + 'static,
    ) -> Subscription {
        let mut listeners = self.listeners();
        let id = listeners.next;
        listeners.next += 1;
        listeners.by_id.insert(id, Arc::new(listener));
        Subscription {
            bus: Arc::downgrade(self),
            listener: id,
        }
    }

    fn remove(&self, id: u64) {
        self.listeners().by_id.remove(&id);
    }

    /// Deliver `event` to every listener registered when the call started.
    ///
    /// The lock is released before delivery, so listeners may subscribe or
    /// drop subscriptions from inside the callback.
    pub fn emit(&self, event: SyncEvent) {
        let targets: Vec<Listener> = self.listeners().by_id.values().cloned().collect();
        for listener in targets {
            listener(event.clone());
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.listeners().by_id.len()
    }
}
