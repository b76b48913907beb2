use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

/// One async mutex per key. Holders of the same key run one at a time; different keys
/// never wait on each other. Idle entries are dropped on the next acquisition.
pub struct KeyedLocks<K> {
    entries: Mutex<HashMap<K, Arc<Mutex<()>>>>,
}

impl<K> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self { entries: Mutex::new(HashMap::new()) }
    }
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
    pub async fn lock(&self, key: &K) -> OwnedMutexGuard<()> {
        let slot = {
            let mut entries = self.entries.lock().await;
            entries.retain(|_, slot| Arc::strong_count(slot) > 1);
            entries.entry(key.clone()).or_default().clone()
        };
        slot.lock_owned().await
    }

    pub async fn tracked(&self) -> usize {
        self.entries.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use super::KeyedLocks;

    #[tokio::test]
    async fn same_key_is_serialized() {
        let locks = Arc::new(KeyedLocks::<i64>::default());
        let inside = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let (locks, inside, peak) = (locks.clone(), inside.clone(), peak.clone());
            handles.push(tokio::spawn(async move {
                let _guard = locks.lock(&7).await;
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.expect("task");
        }

        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn different_keys_do_not_block_and_idle_entries_are_pruned() {
        let locks = KeyedLocks::<i64>::default();
        let first = locks.lock(&1).await;
        let second = tokio::time::timeout(Duration::from_millis(100), locks.lock(&2))
            .await
            .expect("other key is free");
        drop(first);
        drop(second);

        let _third = locks.lock(&3).await;
        assert_eq!(locks.tracked().await, 1);
    }
}
