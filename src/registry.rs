//! Descriptor registry - builds each descriptor once and shares it
//!
//! Lookups take a read lock; a miss takes the write lock, re-checks, and
//! builds, so concurrent first access to a type builds its descriptor once.

use crate::fulltext::FullTextModel;
use crate::model::Model;
use crate::notify::ResourceKind;
use crate::schema::TableInfo;
use crate::Result;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

type Key = (TypeId, ResourceKind);

/// Process-lifetime cache of [`TableInfo`] values, passed around explicitly.
#[derive(Default)]
pub struct SchemaRegistry {
    tables: RwLock<HashMap<Key, Arc<dyn Any + Send + Sync>>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Primary-table descriptor of `M`
    pub fn table_info<M: Model>(&self) -> Result<Arc<TableInfo<M>>> {
        self.get_or_build((TypeId::of::<M>(), ResourceKind::Standard), TableInfo::<M>::for_model)
    }

    /// Full-text descriptor of `S`
    pub fn full_text_info<S: FullTextModel>(&self) -> Result<Arc<TableInfo<S>>> {
        self.get_or_build((TypeId::of::<S>(), ResourceKind::FullText), TableInfo::<S>::for_full_text)
    }

    fn get_or_build<T>(&self, key: Key, build: impl FnOnce() -> Result<T>) -> Result<Arc<T>>
    where
        T: Send + Sync + 'static,
    {
        if let Some(found) = self.lookup::<T>(&key) {
            return Ok(found);
        }

        let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(found) = tables.get(&key).and_then(|entry| Arc::clone(entry).downcast::<T>().ok()) {
            return Ok(found);
        }

        let built = Arc::new(build()?);
        tables.insert(key, built.clone());
        Ok(built)
    }

    fn lookup<T: Send + Sync + 'static>(&self, key: &Key) -> Option<Arc<T>> {
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        tables
            .get(key)
            .and_then(|entry| Arc::clone(entry).downcast::<T>().ok())
    }

    /// Number of descriptors built so far
    pub fn len(&self) -> usize {
        self.tables.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for SchemaRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaRegistry").field("descriptors", &self.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Identity;
    use crate::model::Describe;
    use crate::schema::SchemaBuilder;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    static DESCRIBE_CALLS: AtomicUsize = AtomicUsize::new(0);

    #[derive(Debug, Default)]
    struct Counter {
        identity: Identity,
        hits: i64,
    }

    impl Describe for Counter {
        fn describe(schema: &mut SchemaBuilder<Self>) {
            DESCRIBE_CALLS.fetch_add(1, Ordering::SeqCst);
            schema.field("hits", |c: &Counter| &c.hits, |c, v| c.hits = v);
        }
    }

    impl Model for Counter {
        fn identity(&self) -> &Identity {
            &self.identity
        }
    }

    #[test]
    fn test_built_once_under_concurrent_first_access() {
        let registry = Arc::new(SchemaRegistry::new());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || registry.table_info::<Counter>().unwrap())
            })
            .collect();
        let infos: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(DESCRIBE_CALLS.load(Ordering::SeqCst), 1);
        assert!(infos.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert_eq!(registry.len(), 1);
    }
}
