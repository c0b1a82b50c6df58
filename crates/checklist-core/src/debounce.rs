//! Debounced push scheduling.
//!
//! Each namespace is one timer class with at most one pending deadline.
//! Scheduling a key resets that deadline to `now + delay` and adds the key to
//! the pending set, so a burst of edits collapses into a single push once the
//! namespace has been quiet for `delay`.
//!
//! The debouncer only tracks deadlines. The caller drives it with the current
//! time (`take_due`) and sleeps until `next_due`.

use crate::model::{Namespace, Timestamp};

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

pub const DEFAULT_PUSH_DELAY: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct PendingPush {
    keys: BTreeSet<String>,
    due_at: Timestamp,
}

/// A batch of keys whose quiet period has elapsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuePush {
    pub namespace: Namespace,
    pub keys: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct PushDebouncer {
    delay: Duration,
    timers: BTreeMap<Namespace, PendingPush>,
}

impl Default for PushDebouncer {
    fn default() -> Self {
        Self::new(DEFAULT_PUSH_DELAY)
    }
}

impl PushDebouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            timers: BTreeMap::new(),
        }
    }

    /// Cancel-and-reschedule the namespace's timer, adding `key` to the batch.
    pub fn schedule(&mut self, namespace: Namespace, key: &str, now_ms: Timestamp) {
        let due_at = now_ms + self.delay.as_millis() as Timestamp;
        let pending = self.timers.entry(namespace).or_default();
        pending.keys.insert(key.to_string());
        pending.due_at = due_at;
    }

    /// Drop `key` from its namespace's batch. The timer goes away with its
    /// last key.
    pub fn cancel(&mut self, namespace: Namespace, key: &str) -> bool {
        let Some(pending) = self.timers.get_mut(&namespace) else {
            return false;
        };
        let removed = pending.keys.remove(key);
        if pending.keys.is_empty() {
            self.timers.remove(&namespace);
        }
        removed
    }

    pub fn cancel_all(&mut self) {
        self.timers.clear();
    }

    pub fn is_pending(&self, namespace: Namespace, key: &str) -> bool {
        self.timers
            .get(&namespace)
            .map(|p| p.keys.contains(key))
            .unwrap_or(false)
    }

    /// Earliest pending deadline, if any.
    pub fn next_due(&self) -> Option<Timestamp> {
        self.timers.values().map(|p| p.due_at).min()
    }

    /// Remove and return every batch whose deadline has passed.
    pub fn take_due(&mut self, now_ms: Timestamp) -> Vec<DuePush> {
        let due: Vec<Namespace> = self
            .timers
            .iter()
            .filter(|(_, p)| now_ms >= p.due_at)
            .map(|(ns, _)| *ns)
            .collect();
        due.into_iter()
            .filter_map(|namespace| {
                self.timers.remove(&namespace).map(|p| DuePush {
                    namespace,
                    keys: p.keys.into_iter().collect(),
                })
            })
            .collect()
    }

    /// Remove and return every pending batch regardless of deadline.
    pub fn flush(&mut self) -> Vec<DuePush> {
        std::mem::take(&mut self.timers)
            .into_iter()
            .map(|(namespace, p)| DuePush {
                namespace,
                keys: p.keys.into_iter().collect(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn debouncer() -> PushDebouncer {
        PushDebouncer::new(Duration::from_millis(1000))
    }

    #[test]
    fn test_nothing_due_before_quiet_period() {
        let mut d = debouncer();
        d.schedule(Namespace::Checklists, "a", 0);
        assert_eq!(d.next_due(), Some(1000));
        assert!(d.take_due(999).is_empty());
        assert!(d.is_pending(Namespace::Checklists, "a"));
    }

    #[test]
    fn test_burst_coalesces_into_one_push() {
        let mut d = debouncer();
        for t in [0, 300, 600, 900] {
            d.schedule(Namespace::Checklists, "a", t);
        }
        // Each edit pushed the deadline back
        assert!(d.take_due(1500).is_empty());

        let due = d.take_due(1900);
        assert_eq!(
            due,
            vec![DuePush {
                namespace: Namespace::Checklists,
                keys: vec!["a".into()],
            }]
        );
        assert_eq!(d.next_due(), None);
    }

    #[test]
    fn test_one_timer_per_namespace() {
        let mut d = debouncer();
        d.schedule(Namespace::Checklists, "a", 0);
        d.schedule(Namespace::Checklists, "b", 500);
        d.schedule(Namespace::Settings, "settings", 100);

        // a's deadline moved with b's schedule
        let due = d.take_due(1200);
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].namespace, Namespace::Settings);

        let due = d.take_due(1500);
        assert_eq!(due[0].keys, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_cancel_prevents_push() {
        let mut d = debouncer();
        d.schedule(Namespace::Checklists, "a", 0);
        d.schedule(Namespace::Checklists, "b", 0);
        assert!(d.cancel(Namespace::Checklists, "a"));
        assert!(!d.cancel(Namespace::Checklists, "a"));

        let due = d.take_due(5000);
        assert_eq!(due[0].keys, vec!["b".to_string()]);

        d.schedule(Namespace::Templates, "t", 0);
        d.cancel(Namespace::Templates, "t");
        assert_eq!(d.next_due(), None);
    }

    #[test]
    fn test_flush_ignores_deadlines() {
        let mut d = debouncer();
        d.schedule(Namespace::Checklists, "a", 0);
        d.schedule(Namespace::Templates, "t", 0);
        assert_eq!(d.flush().len(), 2);
        assert_eq!(d.next_due(), None);
        d.cancel_all();
    }
}
