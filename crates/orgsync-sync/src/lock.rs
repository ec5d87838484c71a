//! In-process exclusive handling per entity key.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};

use tokio::sync::{Mutex, OwnedMutexGuard};

type LockMap<K> = Arc<StdMutex<HashMap<K, Arc<Mutex<()>>>>>;

/// At most one holder per key; different keys never contend.
///
/// Entries are dropped once the last guard for a key is released.
pub struct KeyedLock<K> {
    locks: LockMap<K>,
}

impl<K> Clone for KeyedLock<K> {
    fn clone(&self) -> Self {
        Self {
            locks: Arc::clone(&self.locks),
        }
    }
}

impl<K: Eq + Hash + Clone> Default for KeyedLock<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash + Clone> KeyedLock<K> {
    pub fn new() -> Self {
        Self {
            locks: Arc::new(StdMutex::new(HashMap::new())),
        }
    }

    /// Wait until `key` is free and hold it.
    pub async fn lock(&self, key: K) -> KeyedGuard<K> {
        let entry = self.entry(&key);
        let guard = entry.lock_owned().await;
        KeyedGuard {
            key,
            guard: Some(guard),
            locks: Arc::clone(&self.locks),
        }
    }

    /// Hold `key` only if nobody else does.
    pub fn try_lock(&self, key: K) -> Option<KeyedGuard<K>> {
        let entry = self.entry(&key);
        let guard = entry.try_lock_owned().ok();
        match guard {
            Some(guard) => Some(KeyedGuard {
                key,
                guard: Some(guard),
                locks: Arc::clone(&self.locks),
            }),
            None => {
                prune(&self.locks, &key);
                None
            }
        }
    }

    /// Number of keys currently held or awaited.
    pub fn len(&self) -> usize {
        table(&self.locks).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn entry(&self, key: &K) -> Arc<Mutex<()>> {
        let mut locks = table(&self.locks);
        Arc::clone(locks.entry(key.clone()).or_default())
    }
}

/// Releases its key on drop.
pub struct KeyedGuard<K: Eq + Hash> {
    key: K,
    guard: Option<OwnedMutexGuard<()>>,
    locks: LockMap<K>,
}

impl<K: Eq + Hash> KeyedGuard<K> {
    pub fn key(&self) -> &K {
        &self.key
    }
}

impl<K: Eq + Hash> Drop for KeyedGuard<K> {
    fn drop(&mut self) {
        drop(self.guard.take());
        prune(&self.locks, &self.key);
    }
}

fn table<K>(locks: &StdMutex<HashMap<K, Arc<Mutex<()>>>>) -> MutexGuard<'_, HashMap<K, Arc<Mutex<()>>>> {
    locks.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Remove `key` if the table holds the only reference to its mutex.
fn prune<K: Eq + Hash>(locks: &StdMutex<HashMap<K, Arc<Mutex<()>>>>, key: &K) {
    let mut locks = table(locks);
    if locks.get(key).is_some_and(|m| Arc::strong_count(m) == 1) {
        locks.remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_key_is_exclusive() {
        let locks = KeyedLock::new();
        let held = locks.lock("unit-a").await;
        assert!(locks.try_lock("unit-a").is_none());
        assert_eq!(held.key(), &"unit-a");
        drop(held);
        assert!(locks.try_lock("unit-a").is_some());
    }

    #[tokio::test]
    async fn different_keys_are_independent() {
        let locks = KeyedLock::new();
        let _a = locks.lock("a").await;
        let b = locks.try_lock("b");
        assert!(b.is_some());
        assert_eq!(locks.len(), 2);
    }

    #[tokio::test]
    async fn entries_are_removed_after_release() {
        let locks = KeyedLock::new();
        {
            let _g = locks.lock(1u32).await;
            assert_eq!(locks.len(), 1);
        }
        assert!(locks.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn waiters_run_one_at_a_time() {
        let locks = KeyedLock::new();
        let log = Arc::new(StdMutex::new(Vec::new()));

        let mut tasks = Vec::new();
        for n in 0..3 {
            let locks = locks.clone();
            let log = Arc::clone(&log);
            tasks.push(tokio::spawn(async move {
                let _g = locks.lock("shared").await;
                log.lock().unwrap().push(("enter", n));
                tokio::time::sleep(Duration::from_millis(10)).await;
                log.lock().unwrap().push(("leave", n));
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let log = log.lock().unwrap();
        assert_eq!(log.len(), 6);
        for pair in log.chunks(2) {
            assert_eq!(pair[0].0, "enter");
            assert_eq!(pair[1].0, "leave");
            assert_eq!(pair[0].1, pair[1].1);
        }
        assert!(locks.is_empty());
    }
}
