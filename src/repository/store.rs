use crate::core::{HookError, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

/// Boundary to a concrete storage backend.
///
/// The hook engine never touches storage itself; repositories call through
/// this trait between the ON and AFTER phases. Records are JSON objects keyed
/// by collection and id.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn insert(&self, collection: &str, id: &str, record: Value) -> Result<()>;

    async fn fetch(&self, collection: &str, id: &str) -> Result<Option<Value>>;

    async fn update(&self, collection: &str, id: &str, record: Value) -> Result<()>;

    async fn remove(&self, collection: &str, id: &str) -> Result<()>;

    /// All records of a collection, in id order.
    async fn scan(&self, collection: &str) -> Result<Vec<Value>>;
}

/// In-memory storage backend for tests and demos.
pub struct MemoryStore {
    collections: RwLock<HashMap<String, BTreeMap<String, Value>>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
        }
    }

    pub async fn len(&self, collection: &str) -> usize {
        self.collections
            .read()
            .await
            .get(collection)
            .map(|records| records.len())
            .unwrap_or(0)
    }

    pub async fn is_empty(&self, collection: &str) -> bool {
        self.len(collection).await == 0
    }
}

#[async_trait]
impl Storage for MemoryStore {
    async fn insert(&self, collection: &str, id: &str, record: Value) -> Result<()> {
        let mut collections = self.collections.write().await;
        let records = collections.entry(collection.to_string()).or_default();
        if records.contains_key(id) {
            return Err(HookError::Storage(format!(
                "record '{id}' already exists in '{collection}'"
            )));
        }
        records.insert(id.to_string(), record);
        Ok(())
    }

    async fn fetch(&self, collection: &str, id: &str) -> Result<Option<Value>> {
        Ok(self
            .collections
            .read()
            .await
            .get(collection)
            .and_then(|records| records.get(id))
            .cloned())
    }

    async fn update(&self, collection: &str, id: &str, record: Value) -> Result<()> {
        let mut collections = self.collections.write().await;
        let records = collections
            .get_mut(collection)
            .ok_or_else(|| HookError::NotFound(id.to_string(), collection.to_string()))?;
        if !records.contains_key(id) {
            return Err(HookError::NotFound(id.to_string(), collection.to_string()));
        }
        records.insert(id.to_string(), record);
        Ok(())
    }

    async fn remove(&self, collection: &str, id: &str) -> Result<()> {
        let mut collections = self.collections.write().await;
        let removed = collections
            .get_mut(collection)
            .and_then(|records| records.remove(id));
        if removed.is_none() {
            return Err(HookError::NotFound(id.to_string(), collection.to_string()));
        }
        Ok(())
    }

    async fn scan(&self, collection: &str) -> Result<Vec<Value>> {
        Ok(self
            .collections
            .read()
            .await
            .get(collection)
            .map(|records| records.values().cloned().collect())
            .unwrap_or_default())
    }
}
