use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, RwLock};

use thiserror::Error;

use super::query::ReadModelQuery;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReadModelError {
    #[error("read model storage unavailable: {0}")]
    Unavailable(String),
}

/// Key/value store abstraction for disposable read models.
///
/// Rows are last-write-wins per key. Point reads and every write report
/// storage failures; `query` and `count` are best-effort views.
pub trait ReadModelStore<K, V>: Send + Sync {
    fn get(&self, key: &K) -> Result<Option<V>, ReadModelError>;
    fn upsert(&self, key: K, value: V) -> Result<(), ReadModelError>;
    /// Returns the removed row, if any.
    fn remove(&self, key: &K) -> Result<Option<V>, ReadModelError>;
    fn query(&self, query: &ReadModelQuery<V>) -> Vec<V>;
    fn count(&self) -> usize;
    /// Drop every row (rebuild support).
    fn destroy_all(&self) -> Result<(), ReadModelError>;
}

impl<K, V, S> ReadModelStore<K, V> for Arc<S>
where
    S: ReadModelStore<K, V> + ?Sized,
{
    fn get(&self, key: &K) -> Result<Option<V>, ReadModelError> {
        (**self).get(key)
    }

    fn upsert(&self, key: K, value: V) -> Result<(), ReadModelError> {
        (**self).upsert(key, value)
    }

    fn remove(&self, key: &K) -> Result<Option<V>, ReadModelError> {
        (**self).remove(key)
    }

    fn query(&self, query: &ReadModelQuery<V>) -> Vec<V> {
        (**self).query(query)
    }

    fn count(&self) -> usize {
        (**self).count()
    }

    fn destroy_all(&self) -> Result<(), ReadModelError> {
        (**self).destroy_all()
    }
}

/// In-memory store for tests/dev.
#[derive(Debug)]
pub struct InMemoryReadModelStore<K, V> {
    inner: RwLock<HashMap<K, V>>,
}

impl<K, V> InMemoryReadModelStore<K, V> {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }
}

impl<K, V> Default for InMemoryReadModelStore<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned() -> ReadModelError {
    ReadModelError::Unavailable("lock poisoned".to_string())
}

impl<K, V> ReadModelStore<K, V> for InMemoryReadModelStore<K, V>
where
    K: Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn get(&self, key: &K) -> Result<Option<V>, ReadModelError> {
        let map = self.inner.read().map_err(|_| poisoned())?;
        Ok(map.get(key).cloned())
    }

    fn upsert(&self, key: K, value: V) -> Result<(), ReadModelError> {
        self.inner.write().map_err(|_| poisoned())?.insert(key, value);
        Ok(())
    }

    fn remove(&self, key: &K) -> Result<Option<V>, ReadModelError> {
        Ok(self.inner.write().map_err(|_| poisoned())?.remove(key))
    }

    fn query(&self, query: &ReadModelQuery<V>) -> Vec<V> {
        let map = match self.inner.read() {
            Ok(m) => m,
            Err(_) => return vec![],
        };
        query.run(map.values().cloned())
    }

    fn count(&self) -> usize {
        self.inner.read().map(|m| m.len()).unwrap_or(0)
    }

    fn destroy_all(&self) -> Result<(), ReadModelError> {
        self.inner.write().map_err(|_| poisoned())?.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upsert_is_last_write_wins() {
        let store = InMemoryReadModelStore::new();
        store.upsert("car-1", 1).unwrap();
        store.upsert("car-1", 2).unwrap();
        assert_eq!(store.get(&"car-1").unwrap(), Some(2));
        assert_eq!(store.count(), 1);
    }

    #[test]
    fn query_remove_and_destroy_all() {
        let store = InMemoryReadModelStore::new();
        for (k, v) in [("a", 1), ("b", 2), ("c", 3)] {
            store.upsert(k, v).unwrap();
        }

        let mut odd = store.query(&ReadModelQuery::all().filter(|v: &i32| v % 2 == 1));
        odd.sort();
        assert_eq!(odd, vec![1, 3]);

        assert_eq!(store.remove(&"a").unwrap(), Some(1));
        assert_eq!(store.count(), 2);

        store.destroy_all().unwrap();
        assert_eq!(store.count(), 0);
    }

    #[test]
    fn poisoned_store_reports_writes_as_unavailable() {
        let store = Arc::new(InMemoryReadModelStore::new());
        store.upsert("car-1", 1).unwrap();

        let poisoner = store.clone();
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.inner.write().unwrap();
            panic!("writer died holding the lock");
        })
        .join();

        assert!(matches!(store.upsert("car-2", 2), Err(ReadModelError::Unavailable(_))));
        assert!(matches!(store.get(&"car-1"), Err(ReadModelError::Unavailable(_))));
        assert!(matches!(store.destroy_all(), Err(ReadModelError::Unavailable(_))));
    }
}
