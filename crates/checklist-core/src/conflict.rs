//! Whole-record last-writer-wins resolution.
//!
//! Given the local and remote versions of one logical record, decide which
//! side wins. There is no field- or item-level merge: when both sides
//! changed since the last sync, the losing side's edits are discarded.

use crate::model::{Checklist, Settings, Template, Timestamp};

/// Anything carrying a modification stamp and a dirty flag.
pub trait Versioned {
    fn last_modified(&self) -> Timestamp;

    /// `false` means the record has edits the remote hasn't acknowledged.
    fn is_synced(&self) -> bool;
}

/// Outcome of comparing a local and a remote version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Overwrite local with the remote version and mark it synced.
    TakeRemote,
    /// Keep local and upsert it to the remote.
    PushLocal,
    /// Leave both sides alone.
    KeepLocal,
}

/// Resolve one record.
///
/// 1. Only one side exists: that side wins.
/// 2. Remote strictly newer: remote wins.
/// 3. Local strictly newer and dirty: local wins and is pushed.
/// 4. Equal stamps: local is authoritative.
///
/// A local copy that is newer but already marked synced is left alone.
///
/// Returns `None` when neither side exists.
pub fn resolve<L, R>(local: Option<&L>, remote: Option<&R>) -> Option<Resolution>
where
    L: Versioned + ?Sized,
    R: Versioned + ?Sized,
{
    let resolution = match (local, remote) {
        (None, None) => return None,
        (None, Some(_)) => Resolution::TakeRemote,
        (Some(_), None) => Resolution::PushLocal,
        (Some(local), Some(remote)) => {
            if remote.last_modified() > local.last_modified() {
                Resolution::TakeRemote
            } else if local.last_modified() > remote.last_modified() && !local.is_synced() {
                Resolution::PushLocal
            } else {
                Resolution::KeepLocal
            }
        }
    };
    Some(resolution)
}

impl Versioned for Checklist {
    fn last_modified(&self) -> Timestamp {
        self.last_modified
    }

    fn is_synced(&self) -> bool {
        self.synced
    }
}

impl Versioned for Template {
    fn last_modified(&self) -> Timestamp {
        self.last_modified
    }

    fn is_synced(&self) -> bool {
        self.synced
    }
}

impl Versioned for Settings {
    fn last_modified(&self) -> Timestamp {
        self.last_modified
    }

    fn is_synced(&self) -> bool {
        self.synced
    }
}
