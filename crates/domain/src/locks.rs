use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use tokio::sync::{Mutex, MutexGuard};

/// Striped async locks serializing read-merge-write per item key within one
/// process. Distinct keys may share a stripe; that only costs parallelism.
pub struct KeyedLocks {
    stripes: Vec<Mutex<()>>,
}

impl KeyedLocks {
    pub fn new(stripes: usize) -> Self {
        Self {
            stripes: (0..stripes.max(1)).map(|_| Mutex::new(())).collect(),
        }
    }

    pub async fn lock<K: Hash + ?Sized>(&self, key: &K) -> MutexGuard<'_, ()> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let index = (hasher.finish() % self.stripes.len() as u64) as usize;
        self.stripes[index].lock().await
    }
}

impl Default for KeyedLocks {
    fn default() -> Self {
        Self::new(64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn serializes_same_key() {
        let locks = Arc::new(KeyedLocks::new(4));
        let log = Arc::new(tokio::sync::Mutex::new(Vec::new()));

        let guard = locks.lock("dao:1").await;
        let task = {
            let locks = locks.clone();
            let log = log.clone();
            tokio::spawn(async move {
                let _guard = locks.lock("dao:1").await;
                log.lock().await.push("second");
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        log.lock().await.push("first");
        drop(guard);
        task.await.expect("join");

        assert_eq!(*log.lock().await, vec!["first", "second"]);
    }
}
