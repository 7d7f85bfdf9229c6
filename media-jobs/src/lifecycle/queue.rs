//! In-memory FIFO of pending job ids.

use std::collections::VecDeque;

use parking_lot::Mutex;
use tokio::sync::Notify;

/// Pending job ids in submission order.
///
/// The store remains the source of truth; this only orders admission.
#[derive(Default)]
pub struct PendingQueue {
    ids: Mutex<VecDeque<String>>,
    notify: Notify,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, id: impl Into<String>) {
        self.ids.lock().push_back(id.into());
        self.notify.notify_one();
    }

    /// Put a job back at the head, e.g. when admission was deferred.
    pub fn push_front(&self, id: impl Into<String>) {
        self.ids.lock().push_front(id.into());
    }

    pub fn pop(&self) -> Option<String> {
        self.ids.lock().pop_front()
    }

    pub fn peek(&self) -> Option<String> {
        self.ids.lock().front().cloned()
    }

    /// Remove `id`; returns whether it was queued.
    pub fn remove(&self, id: &str) -> bool {
        let mut ids = self.ids.lock();
        let before = ids.len();
        ids.retain(|queued| queued != id);
        ids.len() != before
    }

    /// Remove and return every id matching `pred`.
    pub fn drain_where(&self, mut pred: impl FnMut(&str) -> bool) -> Vec<String> {
        let mut ids = self.ids.lock();
        let mut taken = Vec::new();
        ids.retain(|id| {
            if pred(id) {
                taken.push(id.clone());
                false
            } else {
                true
            }
        });
        taken
    }

    pub fn len(&self) -> usize {
        self.ids.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.lock().is_empty()
    }

    /// Wait until something is pushed.
    pub async fn notified(&self) {
        self.notify.notified().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_order_and_push_front() {
        let q = PendingQueue::new();
        q.push("a");
        q.push("b");
        assert_eq!(q.pop().as_deref(), Some("a"));
        q.push_front("a");
        assert_eq!(q.peek().as_deref(), Some("a"));
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn test_remove_and_drain() {
        let q = PendingQueue::new();
        for id in ["a", "b", "c"] {
            q.push(id);
        }
        assert!(q.remove("b"));
        assert!(!q.remove("b"));
        let taken = q.drain_where(|id| id == "c");
        assert_eq!(taken, vec!["c".to_string()]);
        assert_eq!(q.pop().as_deref(), Some("a"));
        assert!(q.is_empty());
    }

    #[tokio::test]
    async fn test_push_wakes_waiter() {
        let q = std::sync::Arc::new(PendingQueue::new());
        let waiter = {
            let q = q.clone();
            tokio::spawn(async move { q.notified().await })
        };
        tokio::task::yield_now().await;
        q.push("a");
        tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }
}
