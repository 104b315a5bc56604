//! Document persistence contract shared by every store backend.
//!
//! A `Store` keeps schema-free JSON documents grouped into collections and
//! keyed by id. Every document carries a store-managed version that starts
//! at 1 and increases on each write; it is never part of the document body.
//! `Repository` layers typed `Record` access on top of any `Store`.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use super::models::{Collection, Record};
use crate::errors::StoreError;

/// Field-equality predicate over top-level document fields.
pub type Filter = Map<String, Value>;

/// Build a single-field equality filter.
pub fn filter_eq(field: &str, value: impl Into<Value>) -> Filter {
    let mut filter = Filter::new();
    filter.insert(field.to_string(), value.into());
    filter
}

/// Whether `doc` satisfies every field in `filter`. A missing field only
/// matches an explicit `null`.
pub fn matches(doc: &Value, filter: &Filter) -> bool {
    filter
        .iter()
        .all(|(field, expected)| doc.get(field).unwrap_or(&Value::Null) == expected)
}

/// A stored document together with its current version.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub body: Value,
    pub version: u64,
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Upsert by id, returning the new version.
    async fn save(&self, collection: Collection, id: &str, body: Value) -> Result<u64, StoreError>;

    /// Write only if the stored version still equals `expected` (0 = must not
    /// exist yet). Returns the new version, or `None` when another writer won.
    async fn save_if_version(
        &self,
        collection: Collection,
        id: &str,
        body: Value,
        expected: u64,
    ) -> Result<Option<u64>, StoreError>;

    async fn get(&self, collection: Collection, id: &str) -> Result<Option<Document>, StoreError>;

    async fn get_all(&self, collection: Collection) -> Result<Vec<Value>, StoreError>;

    async fn query(&self, collection: Collection, filter: &Filter) -> Result<Vec<Value>, StoreError>;

    /// Remove a document; fails with `StoreError::NotFound` if it is absent.
    async fn delete(&self, collection: Collection, id: &str) -> Result<(), StoreError>;
}

/// A typed record together with the version it was read at.
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<T> {
    pub record: T,
    pub version: u64,
}

/// Typed access to any `Store`.
#[derive(Clone)]
pub struct Repository {
    store: Arc<dyn Store>,
}

impl Repository {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub async fn save<T: Record>(&self, record: &T) -> Result<u64, StoreError> {
        let body = serde_json::to_value(record)?;
        self.store.save(T::COLLECTION, record.id(), body).await
    }

    pub async fn save_if_version<T: Record>(
        &self,
        record: &T,
        expected: u64,
    ) -> Result<Option<u64>, StoreError> {
        let body = serde_json::to_value(record)?;
        self.store
            .save_if_version(T::COLLECTION, record.id(), body, expected)
            .await
    }

    pub async fn get<T: Record>(&self, id: &str) -> Result<Option<T>, StoreError> {
        Ok(self.get_versioned(id).await?.map(|v| v.record))
    }

    pub async fn get_versioned<T: Record>(&self, id: &str) -> Result<Option<Versioned<T>>, StoreError> {
        match self.store.get(T::COLLECTION, id).await? {
            Some(doc) => Ok(Some(Versioned {
                record: serde_json::from_value(doc.body)?,
                version: doc.version,
            })),
            None => Ok(None),
        }
    }

    pub async fn all<T: Record>(&self) -> Result<Vec<T>, StoreError> {
        decode_all(self.store.get_all(T::COLLECTION).await?)
    }

    pub async fn query<T: Record>(&self, filter: &Filter) -> Result<Vec<T>, StoreError> {
        decode_all(self.store.query(T::COLLECTION, filter).await?)
    }

    pub async fn delete<T: Record>(&self, id: &str) -> Result<(), StoreError> {
        self.store.delete(T::COLLECTION, id).await
    }
}

/// Decode a listing. A record that no longer matches its type is logged and
/// left out, so one bad document cannot hide the rest of its collection.
fn decode_all<T: Record>(docs: Vec<Value>) -> Result<Vec<T>, StoreError> {
    let mut records = Vec::with_capacity(docs.len());
    for doc in docs {
        let id = doc.get("id").and_then(Value::as_str).unwrap_or("?").to_string();
        match serde_json::from_value::<T>(doc) {
            Ok(record) => records.push(record),
            Err(e) => {
                tracing::warn!(collection = %T::COLLECTION, %id, error = %e, "skipping undecodable record");
            }
        }
    }
    Ok(records)
}
