//! In-memory DocumentStore implementation for testing.
//!
//! Stores documents in memory without persistence. Useful for tests and
//! development without a Turso database.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::error::{Result, StoreError};
use crate::traits::{CasGuard, Collection, DocumentStore, Filter};

/// In-memory implementation of [`DocumentStore`].
#[derive(Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<Collection, BTreeMap<String, Value>>>,
}

impl MemoryStore {
    /// Create an empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of documents in a collection.
    pub async fn len(&self, collection: Collection) -> usize {
        self.collections
            .read()
            .await
            .get(&collection)
            .map_or(0, BTreeMap::len)
    }

    /// Whether a collection holds no documents.
    pub async fn is_empty(&self, collection: Collection) -> bool {
        self.len(collection).await == 0
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn find_one(&self, collection: Collection, id: &str) -> Result<Option<Value>> {
        let collections = self.collections.read().await;
        Ok(collections
            .get(&collection)
            .and_then(|docs| docs.get(id))
            .cloned())
    }

    async fn find_many(&self, collection: Collection, filter: &Filter) -> Result<Vec<Value>> {
        let collections = self.collections.read().await;
        let Some(docs) = collections.get(&collection) else {
            return Ok(Vec::new());
        };
        Ok(docs
            .values()
            .filter(|doc| filter.matches(doc))
            .cloned()
            .collect())
    }

    async fn insert_one(&self, collection: Collection, id: &str, doc: Value) -> Result<()> {
        let mut collections = self.collections.write().await;
        let docs = collections.entry(collection).or_default();
        if docs.contains_key(id) {
            return Err(StoreError::Conflict(format!(
                "{}/{id} already exists",
                collection.as_str()
            )));
        }
        docs.insert(id.to_string(), doc);
        Ok(())
    }

    async fn update_one(
        &self,
        collection: Collection,
        id: &str,
        doc: Value,
        guard: Option<&CasGuard>,
    ) -> Result<bool> {
        let mut collections = self.collections.write().await;
        let docs = collections.entry(collection).or_default();
        let Some(existing) = docs.get(id) else {
            return Ok(false);
        };
        if let Some(guard) = guard
            && existing.get(&guard.field) != Some(&guard.expected)
        {
            return Ok(false);
        }
        docs.insert(id.to_string(), doc);
        Ok(true)
    }

    async fn delete_one(&self, collection: Collection, id: &str) -> Result<bool> {
        let mut collections = self.collections.write().await;
        Ok(collections
            .get_mut(&collection)
            .is_some_and(|docs| docs.remove(id).is_some()))
    }
}
