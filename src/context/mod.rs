// ============================================================================
// Operation Context
// ============================================================================
//
// A hierarchical, scoped key/value store created once per top-level operation.
// Children spawned via `child()` share no state with the parent except the
// fallback link consulted on `get`/`pop` misses.
//
// ============================================================================

use crate::core::{HookError, OperationKey, Result};
use serde_json::Value;
use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// A mutable scope threaded through one logical operation.
///
/// Values are JSON so behaviors can exchange data without agreeing on types
/// up front. Non-serializable collaborators (e.g. a storage probe used by a
/// uniqueness behavior) travel in a separate typed extension slot.
pub struct Context {
    operation: Option<OperationKey>,
    model_type: Option<&'static str>,
    values: RwLock<HashMap<String, Value>>,
    extensions: RwLock<HashMap<String, Arc<dyn Any + Send + Sync>>>,
    parent: Option<Arc<Context>>,
}

impl Context {
    /// Create a root scope.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            operation: None,
            model_type: None,
            values: RwLock::new(HashMap::new()),
            extensions: RwLock::new(HashMap::new()),
            parent: None,
        })
    }

    /// Spawn a nested scope for one operation against one model type.
    ///
    /// The child starts empty; lookups that miss fall back to this scope.
    pub fn child(
        self: &Arc<Self>,
        operation: OperationKey,
        model_type: &'static str,
    ) -> Arc<Self> {
        Arc::new(Self {
            operation: Some(operation),
            model_type: Some(model_type),
            values: RwLock::new(HashMap::new()),
            extensions: RwLock::new(HashMap::new()),
            parent: Some(Arc::clone(self)),
        })
    }

    /// The operation key this scope was opened for, if any.
    pub fn operation(&self) -> Option<OperationKey> {
        self.operation
    }

    /// The model type name this scope was opened for, if any.
    pub fn model_type(&self) -> Option<&'static str> {
        self.model_type
    }

    /// Read a value, falling back to the parent chain on a miss.
    pub fn get(&self, key: &str) -> Result<Option<Value>> {
        if let Some(value) = self.values.read()?.get(key) {
            return Ok(Some(value.clone()));
        }
        match &self.parent {
            Some(parent) => parent.get(key),
            None => Ok(None),
        }
    }

    /// Insert or overwrite a value in this scope.
    pub fn put(&self, key: impl Into<String>, value: Value) -> Result<()> {
        self.values.write()?.insert(key.into(), value);
        Ok(())
    }

    /// Insert a value that must not already exist in this scope.
    pub fn push(&self, key: impl Into<String>, value: Value) -> Result<()> {
        let key = key.into();
        let mut values = self.values.write()?;
        if values.contains_key(&key) {
            return Err(HookError::Context(format!(
                "key '{key}' already present in scope"
            )));
        }
        values.insert(key, value);
        Ok(())
    }

    /// Read and remove a value, falling back to the parent chain on a miss.
    pub fn pop(&self, key: &str) -> Result<Option<Value>> {
        if let Some(value) = self.values.write()?.remove(key) {
            return Ok(Some(value));
        }
        match &self.parent {
            Some(parent) => parent.pop(key),
            None => Ok(None),
        }
    }

    /// Attach a typed collaborator to this scope.
    pub fn set_extension<T: Any + Send + Sync>(
        &self,
        key: impl Into<String>,
        extension: Arc<T>,
    ) -> Result<()> {
        self.extensions.write()?.insert(key.into(), extension);
        Ok(())
    }

    /// Fetch a typed collaborator, falling back to the parent chain.
    pub fn extension<T: Any + Send + Sync>(&self, key: &str) -> Result<Option<Arc<T>>> {
        if let Some(ext) = self.extensions.read()?.get(key) {
            return Ok(Arc::clone(ext).downcast::<T>().ok());
        }
        match &self.parent {
            Some(parent) => parent.extension(key),
            None => Ok(None),
        }
    }
}
