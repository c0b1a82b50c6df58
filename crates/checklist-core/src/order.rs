//! User-defined ordering of record keys.
//!
//! The order list is the only source of truth for display and iteration
//! order. It is independent of `lastModified`, so syncing a record never
//! moves it. Keys missing from the list are treated as newest and land at
//! the head.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Where to drop a key relative to its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    Before,
    After,
}

/// Ordered sequence of opaque record keys.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderList(Vec<String>);

impl OrderList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keys(&self) -> &[String] {
        &self.0
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.position(key).is_some()
    }

    pub fn position(&self, key: &str) -> Option<usize> {
        self.0.iter().position(|k| k == key)
    }

    /// Insert a key at the head. No-op if already present.
    pub fn insert_head(&mut self, key: &str) {
        if !self.contains(key) {
            self.0.insert(0, key.to_string());
        }
    }

    /// Remove a key. Returns whether it was present.
    pub fn remove(&mut self, key: &str) -> bool {
        let before = self.0.len();
        self.0.retain(|k| k != key);
        self.0.len() != before
    }

    /// Replace `old` with `new` in place, keeping its position.
    ///
    /// Falls back to inserting `new` at the head when `old` is absent.
    pub fn replace(&mut self, old: &str, new: &str) {
        self.0.retain(|k| k != new);
        match self.position(old) {
            Some(index) => self.0[index] = new.to_string(),
            None => self.insert_head(new),
        }
    }

    /// Bring the list in line with the set of keys that actually exist.
    ///
    /// Keys in `existing` but not in the list are inserted at the head (in
    /// the order given); keys in the list but not in `existing` are dropped,
    /// as are duplicates. Returns whether anything changed.
    pub fn reconcile_with<'a, I>(&mut self, existing: I) -> bool
    where
        I: IntoIterator<Item = &'a str>,
    {
        let existing: Vec<&str> = existing.into_iter().collect();
        let wanted: HashSet<&str> = existing.iter().copied().collect();

        let mut seen = HashSet::new();
        let kept: Vec<String> = self
            .0
            .iter()
            .filter(|k| wanted.contains(k.as_str()) && seen.insert(k.as_str()))
            .cloned()
            .collect();

        let mut missing: Vec<String> = Vec::new();
        for key in existing {
            if !seen.contains(key) && !missing.iter().any(|m| m == key) {
                missing.push(key.to_string());
            }
        }

        let mut reconciled = missing;
        reconciled.extend(kept);

        let changed = reconciled != self.0;
        self.0 = reconciled;
        changed
    }

    /// Move `key` directly before `target`.
    pub fn move_before(&mut self, key: &str, target: &str) -> bool {
        self.move_relative(key, target, Placement::Before)
    }

    /// Move `key` directly after `target`.
    pub fn move_after(&mut self, key: &str, target: &str) -> bool {
        self.move_relative(key, target, Placement::After)
    }

    /// Reposition `key` next to `target`.
    ///
    /// No-op when `key == target` or when either key is absent. Returns
    /// whether the list changed.
    pub fn move_relative(&mut self, key: &str, target: &str, placement: Placement) -> bool {
        if key == target || !self.contains(target) {
            return false;
        }
        let Some(from) = self.position(key) else {
            return false;
        };

        let before = self.0.clone();
        let moved = self.0.remove(from);
        // Target index must be looked up after removal
        let Some(target_index) = self.position(target) else {
            self.0 = before;
            return false;
        };
        let insert_at = match placement {
            Placement::Before => target_index,
            Placement::After => target_index + 1,
        };
        self.0.insert(insert_at, moved);
        self.0 != before
    }

    /// Re-sort by display name, ignoring case and accents first.
    ///
    /// Names compare by their base letters (`Éclair` sorts with `eclair`,
    /// between `apple` and `Zebra`); accents only break ties between names
    /// with the same base letters. The sort is stable, so names that still
    /// compare equal keep their relative order. Keys the lookup doesn't know
    /// sort by the key itself.
    pub fn sort_by_display_name<F>(&mut self, name_of: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut keyed: Vec<(CollationKey, String)> = self
            .0
            .drain(..)
            .map(|key| {
                let name = name_of(&key).unwrap_or_else(|| key.clone());
                (CollationKey::new(&name), key)
            })
            .collect();
        keyed.sort_by(|(a, _), (b, _)| a.cmp(b));
        self.0 = keyed.into_iter().map(|(_, key)| key).collect();
    }
}

/// Two-level sort key: base letters, then accents. Case never counts.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct CollationKey {
    base: String,
    accented: String,
}

impl CollationKey {
    fn new(name: &str) -> Self {
        let accented: String = name.trim().nfkd().collect::<String>().to_lowercase();
        let base = accented.chars().filter(|c| !is_combining_mark(*c)).collect();
        Self { base, accented }
    }
}

impl FromIterator<String> for OrderList {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn list(keys: &[&str]) -> OrderList {
        keys.iter().map(|k| k.to_string()).collect()
    }

    fn sorted_set(order: &OrderList) -> Vec<String> {
        let mut keys = order.keys().to_vec();
        keys.sort();
        keys
    }

    // ==================== reconcile_with ====================

    #[test]
    fn test_reconcile_inserts_missing_at_head() {
        let mut order = list(&["a", "b"]);
        assert!(order.reconcile_with(["a", "b", "c"]));
        assert_eq!(order, list(&["c", "a", "b"]));
    }

    #[test]
    fn test_reconcile_drops_unknown_and_duplicates() {
        let mut order = list(&["a", "ghost", "b", "a"]);
        assert!(order.reconcile_with(["a", "b"]));
        assert_eq!(order, list(&["a", "b"]));
    }

    #[test]
    fn test_reconcile_is_idempotent() {
        let mut once = list(&["x", "a", "b", "b"]);
        once.reconcile_with(["b", "d", "a", "c"]);
        let mut twice = once.clone();
        assert!(!twice.reconcile_with(["b", "d", "a", "c"]));
        assert_eq!(once, twice);
    }

    #[test]
    fn test_reconcile_empty() {
        let mut order = list(&["a"]);
        order.reconcile_with(std::iter::empty());
        assert!(order.is_empty());
    }

    // ==================== moves ====================

    #[test]
    fn test_move_before_and_after() {
        let mut order = list(&["a", "b", "c", "d"]);
        assert!(order.move_before("d", "b"));
        assert_eq!(order, list(&["a", "d", "b", "c"]));

        assert!(order.move_after("a", "c"));
        assert_eq!(order, list(&["d", "b", "c", "a"]));
    }

    #[test]
    fn test_move_forward_after_target() {
        let mut order = list(&["a", "b", "c"]);
        assert!(order.move_after("a", "b"));
        assert_eq!(order, list(&["b", "a", "c"]));
    }

    #[test]
    fn test_move_same_key_is_noop() {
        let mut order = list(&["a", "b"]);
        assert!(!order.move_before("a", "a"));
        assert_eq!(order, list(&["a", "b"]));
    }

    #[test]
    fn test_move_missing_keys_is_noop() {
        let mut order = list(&["a", "b"]);
        assert!(!order.move_before("zzz", "a"));
        assert!(!order.move_after("a", "zzz"));
        assert_eq!(order, list(&["a", "b"]));
    }

    #[test]
    fn test_moves_are_permutations() {
        let mut order = list(&["a", "b", "c", "d", "e"]);
        let original = sorted_set(&order);
        let moves = [("e", "a"), ("a", "c"), ("c", "c"), ("b", "e"), ("d", "b")];
        for (i, (key, target)) in moves.iter().enumerate() {
            if i % 2 == 0 {
                order.move_before(key, target);
            } else {
                order.move_after(key, target);
            }
            assert_eq!(sorted_set(&order), original);
            assert_eq!(order.len(), original.len());
        }
    }

    // ==================== replace / sort ====================

    #[test]
    fn test_replace_keeps_position() {
        let mut order = list(&["a", "b", "c"]);
        order.replace("b", "b2");
        assert_eq!(order, list(&["a", "b2", "c"]));

        order.replace("missing", "z");
        assert_eq!(order, list(&["z", "a", "b2", "c"]));
    }

    #[test]
    fn test_sort_by_display_name_is_case_insensitive_and_stable() {
        let names: HashMap<&str, &str> = [
            ("k1", "banana"),
            ("k2", "Apple"),
            ("k3", "apple"),
            ("k4", "cherry"),
        ]
        .into_iter()
        .collect();

        let mut order = list(&["k4", "k3", "k1", "k2"]);
        order.sort_by_display_name(|key| names.get(key).map(|n| n.to_string()));
        assert_eq!(order, list(&["k3", "k2", "k1", "k4"]));
    }

    #[test]
    fn test_sort_by_display_name_folds_accents() {
        let names: HashMap<&str, &str> = [
            ("z", "Zebra"),
            ("e", "Éclair"),
            ("a", "apple"),
            ("o", "Ölfarbe"),
            ("u", "über"),
            ("plain", "eclair"),
        ]
        .into_iter()
        .collect();

        let mut order = list(&["z", "e", "a", "o", "u", "plain"]);
        order.sort_by_display_name(|key| names.get(key).map(|n| n.to_string()));
        // Unaccented spelling first among equal base letters
        assert_eq!(order, list(&["a", "plain", "e", "o", "u", "z"]));
    }

    #[test]
    fn test_sort_unknown_keys_use_key() {
        let mut order = list(&["b", "a"]);
        order.sort_by_display_name(|_| None);
        assert_eq!(order, list(&["a", "b"]));
    }
}
