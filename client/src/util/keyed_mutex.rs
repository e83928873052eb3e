//! Per-key serialization.
//!
//! Tasks sharing a key run one at a time in acquisition order; tasks on
//! different keys interleave freely. Message intake keys by chat JID,
//! post-upsert processing by `"p-" + chat id` so the two stages can
//! never deadlock on each other.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Debug, Default)]
pub struct KeyedMutex {
    // Entries are never evicted; the key space is bounded by the set of
    // active chats.
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl KeyedMutex {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_key_serializes() {
        let mutex = Arc::new(KeyedMutex::new());
        let running = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let mutex = mutex.clone();
            let running = running.clone();
            let max_seen = max_seen.clone();
            handles.push(tokio::spawn(async move {
                let _guard = mutex.lock("chat").await;
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(2)).await;
                running.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_distinct_keys_run_in_parallel() {
        let mutex = Arc::new(KeyedMutex::new());

        let guard_a = mutex.lock("a").await;
        // Must not block even though "a" is held.
        let guard_b = tokio::time::timeout(Duration::from_millis(50), mutex.lock("b"))
            .await
            .expect("distinct key should not wait");

        drop(guard_a);
        drop(guard_b);
    }

    #[tokio::test]
    async fn test_acquisition_order_is_fifo() {
        let mutex = Arc::new(KeyedMutex::new());
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let first = mutex.lock("chat").await;
        let mut handles = Vec::new();
        for i in 0..4 {
            let mutex = mutex.clone();
            let order = order.clone();
            handles.push(tokio::spawn(async move {
                let _guard = mutex.lock("chat").await;
                order.lock().push(i);
            }));
            // Let the task reach the lock before spawning the next one.
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        drop(first);
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(*order.lock(), vec![0, 1, 2, 3]);
    }
}
