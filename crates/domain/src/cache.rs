use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use uuid::Uuid;

use crate::items::FeedList;
use crate::tasks::BackgroundTasks;

struct CacheState<K, V> {
    generation: u64,
    entries: HashMap<K, V>,
}

// Every write leaves the map valid, so poisoning is ignored.
fn read_state<K, V>(state: &RwLock<CacheState<K, V>>) -> RwLockReadGuard<'_, CacheState<K, V>> {
    state.read().unwrap_or_else(PoisonError::into_inner)
}

fn write_state<K, V>(state: &RwLock<CacheState<K, V>>) -> RwLockWriteGuard<'_, CacheState<K, V>> {
    state.write().unwrap_or_else(PoisonError::into_inner)
}

/// Map shared by a service and its background population queue.
///
/// Every mutation bumps a generation counter. A population job carries the
/// generation observed before its store read and is discarded if anything
/// changed in between, so a slow read never resurrects stale data.
pub struct ReadThroughCache<K, V> {
    state: Arc<RwLock<CacheState<K, V>>>,
    tasks: BackgroundTasks,
}

impl<K, V> Clone for ReadThroughCache<K, V> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
            tasks: self.tasks.clone(),
        }
    }
}

impl<K, V> ReadThroughCache<K, V>
where
    K: Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(tasks: BackgroundTasks) -> Self {
        Self {
            state: Arc::new(RwLock::new(CacheState {
                generation: 0,
                entries: HashMap::new(),
            })),
            tasks,
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let state = read_state(&self.state);
        state.entries.get(key).cloned()
    }

    pub fn generation(&self) -> u64 {
        read_state(&self.state).generation
    }

    pub fn insert(&self, key: K, value: V) {
        let mut state = write_state(&self.state);
        state.generation += 1;
        state.entries.insert(key, value);
    }

    pub fn remove(&self, key: &K) {
        let mut state = write_state(&self.state);
        state.generation += 1;
        state.entries.remove(key);
    }

    /// Keeps entries for which `keep` is true; returns how many were dropped.
    pub fn retain(&self, mut keep: impl FnMut(&K, &V) -> bool) -> usize {
        let mut state = write_state(&self.state);
        state.generation += 1;
        let before = state.entries.len();
        state.entries.retain(|key, value| keep(key, value));
        before - state.entries.len()
    }

    /// Schedules an insert on the background queue, valid only if no
    /// mutation happened since `generation` was read.
    pub fn populate(&self, generation: u64, key: K, value: V) {
        let state = self.state.clone();
        self.tasks.dispatch(move || {
            let mut state = write_state(&state);
            if state.generation == generation {
                state.entries.insert(key, value);
            }
        });
    }

    pub fn len(&self) -> usize {
        read_state(&self.state).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub async fn flush(&self) {
        self.tasks.flush().await;
    }
}

/// Feed-by-filter results keyed by the canonical filter key. Empty results
/// are never served from cache.
#[derive(Clone)]
pub struct FeedQueryCache {
    lists: ReadThroughCache<String, FeedList>,
}

impl FeedQueryCache {
    pub fn new(tasks: BackgroundTasks) -> Self {
        Self {
            lists: ReadThroughCache::new(tasks),
        }
    }

    pub fn get(&self, key: &str) -> Option<FeedList> {
        self.lists
            .get(&key.to_string())
            .filter(|list| !list.is_empty())
    }

    pub fn generation(&self) -> u64 {
        self.lists.generation()
    }

    pub fn populate(&self, generation: u64, key: String, list: FeedList) {
        self.lists.populate(generation, key, list);
    }

    /// Drops every cached list containing an item of `dao_id` or, when
    /// `proposal_id` is non-empty, an item of that proposal.
    pub fn invalidate(&self, dao_id: Uuid, proposal_id: &str) -> usize {
        self.lists.retain(|_, list| {
            !list.items.iter().any(|item| {
                item.dao_id == dao_id
                    || (!proposal_id.is_empty() && item.proposal_id == proposal_id)
            })
        })
    }

    pub fn len(&self) -> usize {
        self.lists.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lists.is_empty()
    }

    pub async fn flush(&self) {
        self.lists.flush().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::items::{FeedItem, FeedItemType};

    fn list_with(dao_id: Uuid, proposal_id: &str) -> FeedList {
        FeedList {
            items: vec![FeedItem::new(
                FeedItemType::Proposal,
                dao_id,
                proposal_id,
                serde_json::Value::Null,
            )],
            total_count: 1,
        }
    }

    fn cache() -> FeedQueryCache {
        FeedQueryCache::new(BackgroundTasks::spawn("feed-cache", 8))
    }

    #[tokio::test]
    async fn empty_lists_are_not_served() {
        let cache = cache();
        cache.populate(cache.generation(), "k".to_string(), FeedList::default());
        cache.flush().await;
        assert_eq!(cache.len(), 1);
        assert!(cache.get("k").is_none());
    }

    #[tokio::test]
    async fn populates_in_background() {
        let cache = cache();
        cache.populate(cache.generation(), "k".to_string(), list_with(Uuid::new_v4(), "p1"));
        assert!(cache.get("k").is_none());
        cache.flush().await;
        assert_eq!(cache.get("k").map(|list| list.total_count), Some(1));
    }

    #[tokio::test]
    async fn stale_population_is_discarded() {
        let cache = cache();
        let dao_id = Uuid::new_v4();
        let observed = cache.generation();

        cache.invalidate(dao_id, "");
        cache.populate(observed, "k".to_string(), list_with(dao_id, "p1"));
        cache.flush().await;

        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn panicking_retain_does_not_break_later_access() {
        let lists: ReadThroughCache<String, u32> =
            ReadThroughCache::new(BackgroundTasks::spawn("poisoned", 4));
        lists.insert("a".to_string(), 1);

        let shared = lists.clone();
        let joined = std::thread::spawn(move || {
            shared.retain(|_, _| panic!("predicate panicked"));
        })
        .join();
        assert!(joined.is_err());

        assert_eq!(lists.get(&"a".to_string()), Some(1));
        lists.insert("b".to_string(), 2);
        lists.populate(lists.generation(), "c".to_string(), 3);
        lists.flush().await;
        assert_eq!(lists.len(), 3);
        assert_eq!(lists.retain(|key, _| key != "a"), 1);
    }

    #[tokio::test]
    async fn invalidates_lists_touching_dao_or_proposal() {
        let cache = cache();
        let (dao_a, dao_b, dao_c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        cache.populate(cache.generation(), "a".to_string(), list_with(dao_a, "p1"));
        cache.populate(cache.generation(), "b".to_string(), list_with(dao_b, "p2"));
        cache.populate(cache.generation(), "c".to_string(), list_with(dao_c, "p3"));
        cache.flush().await;

        assert_eq!(cache.invalidate(dao_a, "p2"), 2);
        assert!(cache.get("a").is_none());
        assert!(cache.get("b").is_none());
        assert!(cache.get("c").is_some());

        assert_eq!(cache.invalidate(dao_c, ""), 1);
        assert!(cache.is_empty());
    }
}
