use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use serde_json::Value;

use super::models::Collection;
use super::store::{Document, Filter, Store, matches};
use crate::errors::StoreError;

type Key = (Collection, String);

/// Volatile store for tests and throwaway runs. Insertion order is kept so
/// listings are stable.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    docs: HashMap<Key, Document>,
    order: Vec<Key>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn write_doc(inner: &mut Inner, key: Key, body: Value) -> u64 {
        match inner.docs.get_mut(&key) {
            Some(doc) => {
                doc.body = body;
                doc.version += 1;
                doc.version
            }
            None => {
                inner.order.push(key.clone());
                inner.docs.insert(key, Document { body, version: 1 });
                1
            }
        }
    }

    fn collect(&self, collection: Collection, filter: Option<&Filter>) -> Result<Vec<Value>, StoreError> {
        let inner = self.inner.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(inner
            .order
            .iter()
            .filter(|key| key.0 == collection)
            .filter_map(|key| inner.docs.get(key))
            .filter(|doc| filter.is_none_or(|f| matches(&doc.body, f)))
            .map(|doc| doc.body.clone())
            .collect())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn save(&self, collection: Collection, id: &str, body: Value) -> Result<u64, StoreError> {
        let mut inner = self.inner.write().map_err(|_| StoreError::LockPoisoned)?;
        Ok(Self::write_doc(&mut inner, (collection, id.to_string()), body))
    }

    async fn save_if_version(
        &self,
        collection: Collection,
        id: &str,
        body: Value,
        expected: u64,
    ) -> Result<Option<u64>, StoreError> {
        let mut inner = self.inner.write().map_err(|_| StoreError::LockPoisoned)?;
        let key = (collection, id.to_string());
        let current = inner.docs.get(&key).map(|doc| doc.version).unwrap_or(0);
        if current != expected {
            return Ok(None);
        }
        Ok(Some(Self::write_doc(&mut inner, key, body)))
    }

    async fn get(&self, collection: Collection, id: &str) -> Result<Option<Document>, StoreError> {
        let inner = self.inner.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(inner.docs.get(&(collection, id.to_string())).cloned())
    }

    async fn get_all(&self, collection: Collection) -> Result<Vec<Value>, StoreError> {
        self.collect(collection, None)
    }

    async fn query(&self, collection: Collection, filter: &Filter) -> Result<Vec<Value>, StoreError> {
        self.collect(collection, Some(filter))
    }

    async fn delete(&self, collection: Collection, id: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.write().map_err(|_| StoreError::LockPoisoned)?;
        let key = (collection, id.to_string());
        if inner.docs.remove(&key).is_none() {
            return Err(StoreError::NotFound {
                collection,
                id: id.to_string(),
            });
        }
        inner.order.retain(|k| k != &key);
        Ok(())
    }
}
