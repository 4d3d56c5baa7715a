//! Duplicate-free, newest-first backlog of pending flag values.

use std::collections::HashSet;
use std::sync::Mutex;

use tokio::sync::Notify;

#[derive(Debug, Default)]
struct Entries {
    order: Vec<String>,
    members: HashSet<String>,
}

/// Insertion-ordered set with stack removal.
///
/// `put` ignores values already queued and keeps their original position;
/// `pop` hands out the most recently inserted value still present. Safe to
/// share between a producer and a consumer task.
#[derive(Debug, Default)]
pub struct BacklogQueue {
    entries: Mutex<Entries>,
    available: Notify,
}

impl BacklogQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `value` unless already present. Returns whether it was added.
    pub fn put(&self, value: impl Into<String>) -> bool {
        let value = value.into();
        let added = {
            let mut entries = self.lock();
            if entries.members.insert(value.clone()) {
                entries.order.push(value);
                true
            } else {
                false
            }
        };
        if added {
            self.available.notify_one();
        }
        added
    }

    /// Remove the newest value without waiting.
    pub fn try_pop(&self) -> Option<String> {
        let mut entries = self.lock();
        let value = entries.order.pop()?;
        entries.members.remove(&value);
        Some(value)
    }

    /// Remove the newest value, waiting for one to arrive if empty.
    pub async fn pop(&self) -> String {
        loop {
            if let Some(value) = self.try_pop() {
                return value;
            }
            self.available.notified().await;
        }
    }

    /// Pop up to `max` values, newest first, without waiting.
    pub fn drain_batch(&self, max: usize) -> Vec<String> {
        let mut entries = self.lock();
        let keep = entries.order.len().saturating_sub(max);
        let batch: Vec<String> = entries.order.drain(keep..).rev().collect();
        for value in &batch {
            entries.members.remove(value);
        }
        batch
    }

    /// Drop every queued value.
    pub fn clear(&self) {
        let mut entries = self.lock();
        entries.order.clear();
        entries.members.clear();
    }

    pub fn len(&self) -> usize {
        self.lock().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Entries> {
        // No critical section can panic between the two collection updates.
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_duplicate_put_is_one_entry() {
        let q = BacklogQueue::new();
        assert!(q.put("A"));
        assert!(!q.put("A"));
        assert_eq!(q.len(), 1);
        assert_eq!(q.try_pop().as_deref(), Some("A"));
        assert!(q.try_pop().is_none());
    }

    #[test]
    fn test_pop_returns_newest_first() {
        let q = BacklogQueue::new();
        q.put("A");
        q.put("B");
        q.put("C");
        // Re-adding keeps the original position.
        q.put("A");

        assert_eq!(q.try_pop().as_deref(), Some("C"));
        q.put("D");
        assert_eq!(q.try_pop().as_deref(), Some("D"));
        assert_eq!(q.try_pop().as_deref(), Some("B"));
        assert_eq!(q.try_pop().as_deref(), Some("A"));
        assert!(q.is_empty());
    }

    #[test]
    fn test_value_can_return_after_removal() {
        let q = BacklogQueue::new();
        q.put("A");
        q.try_pop();
        assert!(q.put("A"));
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn test_drain_batch_takes_newest() {
        let q = BacklogQueue::new();
        for v in ["A", "B", "C", "D", "E"] {
            q.put(v);
        }

        assert_eq!(q.drain_batch(2), vec!["E", "D"]);
        assert_eq!(q.drain_batch(10), vec!["C", "B", "A"]);
        assert!(q.drain_batch(3).is_empty());
        assert!(q.put("E"));
    }

    #[test]
    fn test_clear_forgets_members() {
        let q = BacklogQueue::new();
        q.put("A");
        q.put("B");
        q.clear();

        assert!(q.is_empty());
        assert!(q.put("A"));
        assert_eq!(q.drain_batch(5), vec!["A"]);
    }

    #[tokio::test]
    async fn test_pop_waits_for_producer() {
        let q = Arc::new(BacklogQueue::new());
        let consumer = {
            let q = q.clone();
            tokio::spawn(async move { q.pop().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        q.put("LATE");

        let value = tokio::time::timeout(Duration::from_secs(5), consumer)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(value, "LATE");
        assert!(q.is_empty());
    }
}
