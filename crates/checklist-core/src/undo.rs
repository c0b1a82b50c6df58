//! Snapshot-based undo for the active document's item list.
//!
//! Bulk mutations push the pre-mutation items; `undo` pops and returns the
//! most recent snapshot for the caller to restore and persist. There is no
//! redo. The stack is session-local and never persisted or synced.

use crate::model::Item;

#[derive(Debug, Clone, Default)]
pub struct UndoStack {
    entries: Vec<Vec<Item>>,
    limit: Option<usize>,
}

impl UndoStack {
    /// Unbounded stack.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stack keeping at most `limit` snapshots, dropping the oldest.
    ///
    /// A limit of zero means unbounded.
    pub fn with_limit(limit: usize) -> Self {
        Self {
            entries: Vec::new(),
            limit: (limit > 0).then_some(limit),
        }
    }

    /// Push a deep copy of the items as they are before a mutation.
    pub fn snapshot(&mut self, items: &[Item]) {
        self.entries.push(items.to_vec());
        if let Some(limit) = self.limit {
            if self.entries.len() > limit {
                let excess = self.entries.len() - limit;
                self.entries.drain(..excess);
            }
        }
    }

    /// Pop the most recent snapshot. `None` when there is nothing to undo.
    pub fn undo(&mut self) -> Option<Vec<Item>> {
        self.entries.pop()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{same_items, Priority};

    fn items(texts: &[&str]) -> Vec<Item> {
        texts
            .iter()
            .map(|t| Item::new(*t, Priority::DEFAULT, false))
            .collect()
    }

    #[test]
    fn test_undo_on_empty_is_none() {
        let mut stack = UndoStack::new();
        assert!(stack.undo().is_none());
    }

    #[test]
    fn test_undo_restores_in_reverse_order() {
        let mut stack = UndoStack::new();
        let first = items(&["a"]);
        let second = items(&["a", "b"]);
        stack.snapshot(&first);
        stack.snapshot(&second);

        assert!(same_items(&stack.undo().unwrap(), &second));
        assert!(same_items(&stack.undo().unwrap(), &first));
        assert!(stack.is_empty());
    }

    #[test]
    fn test_snapshot_is_a_deep_copy() {
        let mut stack = UndoStack::new();
        let mut live = items(&["a"]);
        stack.snapshot(&live);
        live[0].text = "changed".into();
        live[0].done = true;

        let restored = stack.undo().unwrap();
        assert_eq!(restored[0].text, "a");
        assert!(!restored[0].done);
    }

    #[test]
    fn test_limit_drops_oldest() {
        let mut stack = UndoStack::with_limit(2);
        for text in ["a", "b", "c"] {
            stack.snapshot(&items(&[text]));
        }
        assert_eq!(stack.len(), 2);
        assert_eq!(stack.undo().unwrap()[0].text, "c");
        assert_eq!(stack.undo().unwrap()[0].text, "b");
        assert!(stack.undo().is_none());
    }

    #[test]
    fn test_zero_limit_is_unbounded() {
        let mut stack = UndoStack::with_limit(0);
        for _ in 0..100 {
            stack.snapshot(&[]);
        }
        assert_eq!(stack.len(), 100);
        stack.clear();
        assert!(stack.is_empty());
    }
}
