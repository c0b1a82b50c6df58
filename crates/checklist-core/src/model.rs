//! Record types persisted locally and replicated to the remote store.
//!
//! Checklists are keyed by name, templates by a generated id, and settings
//! is a single record. Items are owned by exactly one checklist or template;
//! the parent record is the unit of merge, items never merge individually.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};
use thiserror::Error;
use uuid::Uuid;

/// Milliseconds since the Unix epoch.
pub type Timestamp = i64;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Priority must be between 1 and 5, got {0}")]
pub struct InvalidPriority(pub i64);

/// Item priority, 1 (later) through 5 (now).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct Priority(u8);

impl Priority {
    pub const MIN: Priority = Priority(1);
    pub const MAX: Priority = Priority(5);
    pub const DEFAULT: Priority = Priority(3);

    /// Clamp an arbitrary integer into the valid range.
    pub fn clamped(level: i64) -> Self {
        Self(level.clamp(1, 5) as u8)
    }

    pub fn level(&self) -> u8 {
        self.0
    }

    /// Short label shown on the priority bubble.
    pub fn label(&self) -> &'static str {
        match self.0 {
            1 => "Later",
            2 => "Low",
            3 => "High",
            4 => "Very High",
            _ => "NOW",
        }
    }

    pub fn all() -> impl Iterator<Item = Priority> {
        (1..=5).map(Priority)
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl TryFrom<i64> for Priority {
    type Error = InvalidPriority;

    fn try_from(level: i64) -> Result<Self, Self::Error> {
        if (1..=5).contains(&level) {
            Ok(Self(level as u8))
        } else {
            Err(InvalidPriority(level))
        }
    }
}

impl From<Priority> for i64 {
    fn from(priority: Priority) -> Self {
        priority.0 as i64
    }
}

impl Display for Priority {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single checklist entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    /// Local identity only; regenerated whenever items are decoded from text.
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub done: bool,
}

impl Item {
    pub fn new(text: impl Into<String>, priority: Priority, done: bool) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            text: text.into(),
            priority,
            done,
        }
    }

    /// Content equality (ignores `id`).
    pub fn same_content(&self, other: &Item) -> bool {
        self.text == other.text && self.priority == other.priority && self.done == other.done
    }

    /// Copy of this item with a fresh id.
    pub fn duplicate(&self) -> Self {
        Self::new(self.text.clone(), self.priority, self.done)
    }
}

/// Compare two item lists by content and order, ignoring ids.
pub fn same_items(a: &[Item], b: &[Item]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.same_content(y))
}

/// Top-level record namespaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Namespace {
    Checklists,
    Templates,
    Settings,
}

impl Namespace {
    pub const ALL: [Namespace; 3] = [Namespace::Checklists, Namespace::Templates, Namespace::Settings];

    pub fn as_str(&self) -> &'static str {
        match self {
            Namespace::Checklists => "checklists",
            Namespace::Templates => "templates",
            Namespace::Settings => "settings",
        }
    }
}

impl Display for Namespace {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named, ordered list of items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checklist {
    /// Primary key within the checklists namespace.
    pub name: String,
    /// Display name; may diverge from `name`.
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub items: Vec<Item>,
    #[serde(default)]
    pub last_modified: Timestamp,
    #[serde(default)]
    pub synced: bool,
    /// Legacy flat-text encoding, only present before migration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl Checklist {
    pub fn new(name: impl Into<String>, title: impl Into<String>, items: Vec<Item>) -> Self {
        Self {
            name: name.into(),
            title: title.into(),
            items,
            last_modified: 0,
            synced: false,
            content: None,
        }
    }
}

/// A reusable item list, keyed by a generated id since names may repeat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Template {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub items: Vec<Item>,
    #[serde(default)]
    pub last_modified: Timestamp,
    #[serde(default)]
    pub synced: bool,
    /// Legacy flat-text encoding, only present before migration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl Template {
    /// Create a template with a freshly generated id.
    pub fn new(name: impl Into<String>, items: Vec<Item>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            items,
            last_modified: 0,
            synced: false,
            content: None,
        }
    }
}

/// User settings; exactly one instance, created lazily.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    /// Priority level (1..=5) to color value.
    #[serde(default)]
    pub priority_colors: BTreeMap<u8, String>,
    #[serde(default)]
    pub last_modified: Timestamp,
    #[serde(default)]
    pub synced: bool,
}

impl Settings {
    pub fn color(&self, priority: Priority) -> Option<&str> {
        self.priority_colors.get(&priority.level()).map(String::as_str)
    }
}
