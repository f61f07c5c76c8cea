// Run-scoped read-through cache
// One instance lives for one batch run; it is never shared across runs.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use tokio::sync::RwLock;

/// Memoizes successful lookups by key; failed lookups are not cached
#[derive(Debug)]
pub struct RunCache<K, V> {
    entries: RwLock<HashMap<K, V>>,
}

impl<K, V> Default for RunCache<K, V> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl<K, V> RunCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, key: &K) -> Option<V> {
        self.entries.read().await.get(key).cloned()
    }

    pub async fn insert(&self, key: K, value: V) {
        self.entries.write().await.insert(key, value);
    }

    /// Return the cached value for `key`, or compute, store and return it
    pub async fn get_or_try_insert<E, F, Fut>(&self, key: K, fetch: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(value) = self.get(&key).await {
            return Ok(value);
        }
        let value = fetch().await?;
        self.insert(key, value.clone()).await;
        Ok(value)
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}
