//! Per-resource work queue.
//!
//! Replaces watch-framework dispatch with an explicit queue: events (spec
//! changes, timers, completed waits) enqueue a cluster key; a fixed worker
//! pool dequeues and reconciles. A key is deduplicated while queued, so a
//! burst of events costs one reconcile pass.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, trace};

use crate::api::ClusterKey;

pub struct WorkQueue {
    sender: async_channel::Sender<ClusterKey>,
    receiver: async_channel::Receiver<ClusterKey>,
    queued: Mutex<HashSet<ClusterKey>>,
}

impl WorkQueue {
    pub fn new() -> Arc<Self> {
        let (sender, receiver) = async_channel::unbounded();
        Arc::new(Self {
            sender,
            receiver,
            queued: Mutex::new(HashSet::new()),
        })
    }

    /// Enqueue a key unless it is already waiting.
    pub fn enqueue(&self, key: ClusterKey) {
        let mut queued = self.queued.lock().expect("queue lock poisoned");
        if !queued.insert(key.clone()) {
            trace!(%key, "already queued, skipping");
            return;
        }
        drop(queued);
        debug!(%key, "enqueued");
        // unbounded channel: try_send only fails when closed, at shutdown
        let _ = self.sender.try_send(key);
    }

    /// Re-enqueue after a delay. Used by reconcile passes that are waiting
    /// on an external condition.
    pub fn enqueue_after(self: &Arc<Self>, key: ClusterKey, delay: Duration) {
        if delay.is_zero() {
            self.enqueue(key);
            return;
        }
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.enqueue(key);
        });
    }

    /// Next key to reconcile. Dedup releases on dequeue, so events arriving
    /// while the key is being worked enqueue a fresh pass.
    pub async fn next(&self) -> Option<ClusterKey> {
        let key = self.receiver.recv().await.ok()?;
        self.queued
            .lock()
            .expect("queue lock poisoned")
            .remove(&key);
        Some(key)
    }

    pub fn close(&self) {
        self.sender.close();
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn key(name: &str) -> ClusterKey {
        ClusterKey::new("default", name)
    }

    #[tokio::test]
    async fn test_dedupe_while_queued() {
        let queue = WorkQueue::new();
        queue.enqueue(key("a"));
        queue.enqueue(key("a"));
        queue.enqueue(key("b"));

        assert_eq!(queue.next().await, Some(key("a")));
        assert_eq!(queue.next().await, Some(key("b")));

        // dequeued keys may be queued again
        queue.enqueue(key("a"));
        assert_eq!(queue.next().await, Some(key("a")));
    }

    #[tokio::test]
    async fn test_enqueue_after_delay() {
        let queue = WorkQueue::new();
        queue.enqueue_after(key("later"), Duration::from_millis(20));
        let start = std::time::Instant::now();
        assert_eq!(queue.next().await, Some(key("later")));
        assert!(start.elapsed() >= Duration::from_millis(15));
    }

    #[tokio::test]
    async fn test_close_ends_stream() {
        let queue = WorkQueue::new();
        queue.close();
        assert_eq!(queue.next().await, None);
    }
}
